pub mod daily;

pub use daily::{run, PipelineOptions, ProcessSummary};

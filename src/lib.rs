// Groundswell: topic trend analysis for app store reviews
//
// This is the library root. Each module corresponds to a stage of the
// consolidation pipeline: raw reviews in, a stable topic taxonomy and
// daily trend signals out.

pub mod config;
pub mod db;
pub mod matcher;
pub mod output;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod similarity;
pub mod stats;
pub mod status;
pub mod trend;

// Topic registry — durable taxonomy of canonical topics and merge history.

pub mod model;
pub mod store;

pub use model::{CanonicalizationMap, RegistryError, Topic, TopicId};
pub use store::{ScoredTopic, TopicRegistry};

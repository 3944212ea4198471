//! In-process message topics.
//!
//! Each topic is a bounded `mpsc` channel drained by exactly one task, so
//! messages are handled one at a time in publish order. Removal requests and
//! notification events travel on separate topics.

mod removal;
mod topic;

pub use removal::{RemovalExecutor, RemovalRequest, RemovalTopic};
pub use topic::{PipelineError, TOPIC_DEPTH, Topic, TopicHandler, TopicWorker};

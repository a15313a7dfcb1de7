pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod observability;

pub use config::QueueConfig;
pub use error::QueueError;
pub use jobs::{
    Job, JobStore, JobView, MemoryJobStore, PayloadRef, PayloadRefType, PgJobStore, QueueManager,
    QueueStats,
};

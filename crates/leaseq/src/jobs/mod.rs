pub mod clock;
pub mod manager;
pub mod memory;
pub mod model;
pub mod repo;
pub mod schema;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::QueueManager;
pub use memory::MemoryJobStore;
pub use model::{ClaimRequest, Job, JobView, PayloadRef, PayloadRefType, QueueStats};
pub use repo::PgJobStore;
pub use store::JobStore;

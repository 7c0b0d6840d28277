pub mod error;
pub mod gateway;
pub mod memory;
pub mod quota;
pub mod reconcile;
pub mod redis_store;
pub mod slim;
pub mod store;

pub use error::{IngestError, StoreError};
pub use gateway::{BatchReport, IngestGateway, IngestOutcome, IngestStats};
pub use memory::MemoryQueueStore;
pub use quota::{Admission, QuotaTracker};
pub use reconcile::{Reconciler, Reconciliation};
pub use redis_store::RedisQueueStore;
pub use slim::Slimmer;
pub use store::{CounterOp, MemoryUsage, QueueStore};

pub mod archive;
pub mod cycle;
pub mod drain;
pub mod error;
pub mod retention;
pub mod state;
pub mod trigger;

pub use archive::{
    read_archive, ArchiveBatch, ArchiveContents, ArchiveEncoder, ArchiveInventory, ArchiveOutcome,
    ArchiveWriter,
};
pub use cycle::{CycleReport, DrainCycle};
pub use drain::{ArchiveDrain, DrainStats};
pub use error::{ArchiveError, DrainError};
pub use retention::{RetentionSweep, SweepStats};
pub use state::{DrainState, StateFile};
pub use trigger::{DrainTrigger, TriggerDecision, TriggerReason};

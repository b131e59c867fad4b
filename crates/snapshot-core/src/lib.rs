mod errors;
pub mod reconcile;
pub mod scheduler;
pub mod slot;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use errors::SnapshotError;
pub use reconcile::{ReconcileOptions, ReconcileOutcome, ReconcilePolicy, StepResult};
pub use scheduler::{RunPhase, Scheduler, SnapshotState, Snapshotter, TickOutcome};
pub use slot::{CopyReport, DestinationSlot, Recovery};
pub use transaction::{SnapshotTransaction, TransactionReport};

//! Keeping local state in step with the provider and with other tabs.

pub mod reconcile;
pub mod tabs;

pub use reconcile::{ingest, IngestOutcome};
pub use tabs::{MergeOutcome, SyncSlot, SyncSnapshot, TabState, TabSync};

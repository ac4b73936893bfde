//! Local persistence: key-value backends, the binary message table
//! format, message identity and tombstones, and the partitioned store.

pub mod backend;
pub mod format;
pub mod identity;
pub mod local;

pub use backend::{FileEngine, KvBackend, MemoryEngine, StorageEngine};
pub use identity::{derive_id, TombstoneSet};
pub use local::LocalStore;

//! `tempbox`: a local cache and sync engine for disposable mailboxes.
//!
//! The crate mirrors a remote, provider-owned ephemeral inbox into a
//! partitioned local store, deduplicates repeated fetches, keeps deleted
//! messages deleted, and lets several sessions over one data directory
//! converge on the same state.

pub mod analytics;
pub mod backup;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod search;
pub mod session;
pub mod store;
pub mod sync;

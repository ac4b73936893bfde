//! View engine: filtering and pagination of the active account's messages.

pub mod filter;
pub mod pagination;

pub use filter::{apply_filter, DateFilter, FilterSpec, StatusFilter};
pub use pagination::{build_view, clamp_page, MailboxView, PageCursor, PageCursors, View};

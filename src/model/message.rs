//! Locally stored message type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an account partition (`default`, `account_<millis>`).
pub type AccountId = String;

/// Deterministic message identity, see [`crate::store::identity::derive_id`].
pub type MessageId = String;

/// Placeholder stored when the provider omits a subject.
pub const NO_SUBJECT: &str = "(No subject)";

/// Placeholder stored when the provider omits a body.
pub const EMPTY_BODY: &str = "(Empty)";

/// A message mirrored from the remote mailbox into one account partition.
///
/// The same shape is written to message tables (bincode), sync slots and
/// backups (JSON), so it carries no skip/flatten attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Derived from `(created_at, from)`; never reassigned.
    pub id: MessageId,

    /// Account that was active when the message was ingested or saved.
    pub account_id: AccountId,

    /// Sender as reported by the provider.
    pub from: String,

    pub subject: String,

    /// Plain-text body.
    pub body: String,

    /// Delivery time reported by the provider.
    pub created_at: DateTime<Utc>,

    pub is_read: bool,

    /// Mirror of StarredSet membership, refreshed on every save.
    pub starred: bool,
}

impl Message {
    /// Build a fresh unread message, substituting placeholders for
    /// missing subject or body.
    pub fn new_unread(
        id: MessageId,
        account_id: &str,
        from: &str,
        subject: Option<&str>,
        body: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            account_id: account_id.to_string(),
            from: from.to_string(),
            subject: non_empty_or(subject, NO_SUBJECT),
            body: non_empty_or(body, EMPTY_BODY),
            created_at,
            is_read: false,
            starred: false,
        }
    }
}

fn non_empty_or(value: Option<&str>, fallback: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => fallback.to_string(),
    }
}

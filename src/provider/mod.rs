//! Remote mailbox provider: wire types and the provider trait.
//!
//! The provider owns the ephemeral mailbox. Only two operations are
//! consumed: generating a new address and listing its inbox.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TempboxError};

pub use http::HttpProvider;

/// Envelope every provider response is wrapped in.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ProviderResponse<T> {
    /// Unwrap the payload, treating `success = false` as a failure.
    pub fn into_result(self, action: &str) -> Result<T> {
        if !self.success {
            let reason = self.error.unwrap_or_else(|| "success = false".to_string());
            return Err(TempboxError::NetworkFailure(format!("{action}: {reason}")));
        }
        self.result
            .ok_or_else(|| TempboxError::NetworkFailure(format!("{action}: response has no result")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedAddress {
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboxPayload {
    #[serde(default)]
    pub inbox: Vec<RemoteMessage>,
}

/// A message as delivered by the provider. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

/// A remote message that carries the fields identity needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRemoteMessage<'a> {
    pub from: &'a str,
    pub subject: Option<&'a str>,
    pub body: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

impl RemoteMessage {
    /// Check that `from` and `created` are present and `created` parses.
    pub fn validate(&self) -> Result<ValidRemoteMessage<'_>> {
        let from = self
            .from
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| TempboxError::MalformedRemoteMessage("missing sender".into()))?;
        let created = self
            .created
            .as_deref()
            .ok_or_else(|| TempboxError::MalformedRemoteMessage(format!("message from {from} has no timestamp")))?;
        let created_at = parse_created(created).ok_or_else(|| {
            TempboxError::MalformedRemoteMessage(format!("unparseable timestamp '{created}'"))
        })?;
        Ok(ValidRemoteMessage {
            from,
            subject: self.subject.as_deref(),
            body: self.message.as_deref(),
            created_at,
        })
    }
}

/// Parse RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_created(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// The two operations consumed from a mailbox provider.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Request a fresh disposable address.
    async fn generate_address(&self) -> Result<String>;

    /// List the inbox of `address`, oldest-to-newest as the provider sends it.
    async fn fetch_inbox(&self, address: &str) -> Result<Vec<RemoteMessage>>;
}

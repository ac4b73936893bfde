//! JSON backup document.
//!
//! ```json
//! {"version": 1, "timestamp": "...", "data": {"messages": [], "accounts": {},
//!  "starred": [], "deleted": [], "analytics": {}, "settings": {}}}
//! ```
//!
//! Every section of `data` is optional on import; an absent section leaves
//! the matching local state untouched.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::Analytics;
use crate::error::{Result, TempboxError};
use crate::model::account::AccountRecord;
use crate::model::message::{AccountId, Message, MessageId};
use crate::model::settings::Settings;
use crate::store::identity::TombstoneSet;

/// Format version written by [`Backup::to_json`].
pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub version: serde_json::Value,
    pub timestamp: Option<DateTime<Utc>>,
    pub data: BackupData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupData {
    pub messages: Option<Vec<Message>>,
    pub accounts: Option<BTreeMap<AccountId, AccountRecord>>,
    pub starred: Option<BTreeSet<MessageId>>,
    pub deleted: Option<Vec<DeletedEntry>>,
    pub analytics: Option<Analytics>,
    pub settings: Option<Settings>,
}

/// A tombstone entry. Older documents carry bare ids with no account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeletedEntry {
    Scoped {
        #[serde(rename = "accountId")]
        account_id: AccountId,
        id: MessageId,
    },
    Bare(MessageId),
}

impl Backup {
    /// Assemble a full backup stamped with the current time.
    pub fn new(data: BackupData) -> Self {
        Self {
            version: serde_json::Value::from(BACKUP_VERSION),
            timestamp: Some(Utc::now()),
            data,
        }
    }

    /// Parse and validate a backup document.
    ///
    /// Rejects input that is not JSON, or lacks a truthy `version` or an
    /// object `data`.
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| TempboxError::InvalidBackup(format!("not valid JSON: {e}")))?;

        match value.get("version") {
            None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => {
                return Err(TempboxError::InvalidBackup("missing version".into()));
            }
            Some(serde_json::Value::String(s)) if s.is_empty() => {
                return Err(TempboxError::InvalidBackup("missing version".into()));
            }
            Some(serde_json::Value::Number(n)) if n.as_f64() == Some(0.0) => {
                return Err(TempboxError::InvalidBackup("missing version".into()));
            }
            _ => {}
        }
        if !value.get("data").is_some_and(serde_json::Value::is_object) {
            return Err(TempboxError::InvalidBackup("missing data section".into()));
        }

        serde_json::from_value(value).map_err(|e| TempboxError::InvalidBackup(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Flatten tombstones into scoped entries for export.
pub fn deleted_entries(tombstones: &TombstoneSet) -> Vec<DeletedEntry> {
    tombstones
        .iter()
        .map(|(account, id)| DeletedEntry::Scoped {
            account_id: account.clone(),
            id: id.clone(),
        })
        .collect()
}

/// Rebuild a tombstone set. Bare ids apply to every account in `accounts`.
pub fn tombstones_from<'a>(
    entries: &[DeletedEntry],
    accounts: impl IntoIterator<Item = &'a AccountId> + Clone,
) -> TombstoneSet {
    let mut set = TombstoneSet::default();
    for entry in entries {
        match entry {
            DeletedEntry::Scoped { account_id, id } => {
                set.add(account_id, id);
            }
            DeletedEntry::Bare(id) => {
                for account in accounts.clone() {
                    set.add(account, id);
                }
            }
        }
    }
    set
}

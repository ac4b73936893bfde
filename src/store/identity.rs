//! Message identity and tombstones.
//!
//! Identity granularity is `(created_at, from)`: two deliveries from the
//! same sender at the same instant are the same message, whatever their
//! subjects say.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::message::{AccountId, MessageId};

/// Derive the stable id of a message.
///
/// Concatenates the millisecond RFC 3339 timestamp and the sender, then
/// keeps ASCII alphanumerics only.
pub fn derive_id(created_at: &DateTime<Utc>, from: &str) -> MessageId {
    let stamp = created_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    stamp
        .chars()
        .chain(from.trim().chars())
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Ids that must never be reinserted, scoped per account.
///
/// Serialized as `{account_id: [ids]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TombstoneSet {
    scopes: BTreeMap<AccountId, BTreeSet<MessageId>>,
}

impl TombstoneSet {
    pub fn add(&mut self, account: &str, id: &str) -> bool {
        self.scopes
            .entry(account.to_string())
            .or_default()
            .insert(id.to_string())
    }

    pub fn contains(&self, account: &str, id: &str) -> bool {
        self.scopes
            .get(account)
            .is_some_and(|ids| ids.contains(id))
    }

    pub fn remove(&mut self, account: &str, id: &str) -> bool {
        let Some(ids) = self.scopes.get_mut(account) else {
            return false;
        };
        let removed = ids.remove(id);
        if ids.is_empty() {
            self.scopes.remove(account);
        }
        removed
    }

    /// Forget every tombstone of `account`. Returns how many were cleared.
    pub fn reset(&mut self, account: &str) -> usize {
        self.scopes.remove(account).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Tombstoned ids of one account.
    pub fn ids(&self, account: &str) -> impl Iterator<Item = &MessageId> {
        self.scopes.get(account).into_iter().flatten()
    }

    /// Every `(account, id)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &MessageId)> {
        self.scopes
            .iter()
            .flat_map(|(account, ids)| ids.iter().map(move |id| (account, id)))
    }

    pub fn len(&self) -> usize {
        self.scopes.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

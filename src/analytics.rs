//! Usage counters derived from local store state, plus a bounded event log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::message::Message;

/// Number of events kept in the log.
pub const EVENT_LOG_CAPACITY: usize = 100;

/// Persisted usage counters. Exported verbatim in backups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Analytics {
    /// Messages currently held for the last mutated account.
    pub messages_received: u64,
    /// How many of those are read.
    pub messages_read: u64,
    /// Addresses generated over the lifetime of the profile.
    pub emails_generated: u64,
    /// Last cross-tab broadcast or applied merge.
    pub last_sync: Option<DateTime<Utc>>,
    /// Serialized JSON size of the account's messages, in bytes.
    pub storage_used: u64,
}

impl Analytics {
    /// Recompute the derived counters from one account's messages.
    pub fn recompute(&mut self, messages: &[Message]) {
        self.messages_received = messages.len() as u64;
        self.messages_read = messages.iter().filter(|m| m.is_read).count() as u64;
        self.storage_used = serde_json::to_vec(messages)
            .map(|v| v.len() as u64)
            .unwrap_or(0);
    }

    /// Millisecond timestamp of `last_sync`, 0 if never synced.
    pub fn last_sync_millis(&self) -> i64 {
        self.last_sync.map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub account: String,
}

/// Ring buffer of the most recent [`EVENT_LOG_CAPACITY`] events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    events: VecDeque<Event>,
}

impl EventLog {
    pub fn record(&mut self, name: &str, data: serde_json::Value, account: &str) {
        self.events.push_back(Event {
            name: name.to_string(),
            timestamp: Utc::now(),
            data,
            account: account.to_string(),
        });
        while self.events.len() > EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

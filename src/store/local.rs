//! Account-partitioned local message store.
//!
//! Message partitions and tombstones are read from the backend on every
//! operation, so writes made by another session over the same data
//! directory are visible immediately. Tombstones and analytics are updated
//! read-modify-write so concurrent sessions do not erase each other's
//! changes. The starred set is held in memory and written through; across
//! sessions it converges last-writer-wins via tab sync.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::backend::{read_json, write_json, KvBackend, StorageEngine};
use super::format::{decode_table, encode_table};
use super::identity::TombstoneSet;
use crate::analytics::Analytics;
use crate::error::{BatchReport, Result, TempboxError};
use crate::model::message::{AccountId, Message, MessageId};

pub const KEY_ACCOUNTS: &str = "accounts";
pub const KEY_ACTIVE_ACCOUNT: &str = "active_account";
pub const KEY_STARRED: &str = "starred";
pub const KEY_TOMBSTONES: &str = "tombstones";
pub const KEY_ANALYTICS: &str = "analytics";
pub const KEY_SETTINGS: &str = "settings";
pub const KEY_EVENTS: &str = "events";
pub const MESSAGES_PREFIX: &str = "messages.";

type Partition = BTreeMap<MessageId, Message>;

fn partition_key(account: &str) -> String {
    format!("{MESSAGES_PREFIX}{account}")
}

/// The local store. See the module docs.
pub struct LocalStore {
    engine: Arc<dyn StorageEngine>,
    conn: Option<Arc<dyn KvBackend>>,
    starred: BTreeSet<MessageId>,
    /// Last analytics record written or read.
    analytics: Analytics,
}

impl LocalStore {
    /// Open the store and load starred ids and analytics.
    pub fn open(engine: Arc<dyn StorageEngine>) -> Result<Self> {
        let mut store = Self {
            engine,
            conn: None,
            starred: BTreeSet::new(),
            analytics: Analytics::default(),
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-read starred ids and analytics from the backend.
    pub fn reload(&mut self) -> Result<()> {
        let conn = self.connection()?;
        self.starred = read_json(conn.as_ref(), KEY_STARRED)?.unwrap_or_default();
        self.analytics = read_json(conn.as_ref(), KEY_ANALYTICS)?.unwrap_or_default();
        debug!(starred = self.starred.len(), "Loaded store state");
        Ok(())
    }

    /// Return the open connection, opening it if needed.
    ///
    /// A failed open is retried exactly once before `StorageUnavailable`
    /// is returned.
    pub fn connection(&mut self) -> Result<Arc<dyn KvBackend>> {
        if let Some(ref conn) = self.conn {
            return Ok(Arc::clone(conn));
        }
        let conn = match self.engine.open() {
            Ok(conn) => conn,
            Err(first) => {
                warn!(error = %first, "Storage open failed, retrying once");
                self.engine.open().map_err(|e| match e {
                    TempboxError::StorageUnavailable(_) => e,
                    other => TempboxError::StorageUnavailable(other.to_string()),
                })?
            }
        };
        self.conn = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Release the connection. The next operation reopens it.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("Storage connection closed");
        }
    }

    // ── Partitions ──────────────────────────────────────────────

    fn load_partition(&mut self, account: &str) -> Result<Partition> {
        let key = partition_key(account);
        let conn = self.connection()?;
        let Some(bytes) = conn.get(&key)? else {
            return Ok(Partition::new());
        };
        let messages = decode_table(&key, &bytes)?;
        Ok(messages.into_iter().map(|m| (m.id.clone(), m)).collect())
    }

    fn save_partition(&mut self, account: &str, partition: &Partition) -> Result<()> {
        let key = partition_key(account);
        let conn = self.connection()?;
        if partition.is_empty() {
            return conn.remove(&key);
        }
        let messages: Vec<Message> = partition.values().cloned().collect();
        conn.put(&key, &encode_table(&messages)?)
    }

    /// Accounts that currently own at least one stored message.
    pub fn partition_accounts(&mut self) -> Result<Vec<AccountId>> {
        let conn = self.connection()?;
        Ok(conn
            .keys(MESSAGES_PREFIX)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(MESSAGES_PREFIX).map(str::to_string))
            .collect())
    }

    // ── Reads ───────────────────────────────────────────────────

    /// All messages of `account`, newest first; ties ordered by id.
    pub fn get_all(&mut self, account: &str) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self.load_partition(account)?.into_values().collect();
        for m in &mut messages {
            m.starred = self.starred.contains(&m.id);
        }
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    /// Look up a message in one partition.
    pub fn get(&mut self, account: &str, id: &str) -> Result<Option<Message>> {
        let mut found = self.load_partition(account)?.remove(id);
        if let Some(ref mut m) = found {
            m.starred = self.starred.contains(&m.id);
        }
        Ok(found)
    }

    /// Look up a message in any partition, in account-id order.
    pub fn get_by_id(&mut self, id: &str) -> Result<Option<Message>> {
        for account in self.partition_accounts()? {
            if let Some(m) = self.get(&account, id)? {
                return Ok(Some(m));
            }
        }
        Ok(None)
    }

    /// Current tombstones, as persisted.
    pub fn tombstones(&mut self) -> Result<TombstoneSet> {
        let conn = self.connection()?;
        Ok(read_json(conn.as_ref(), KEY_TOMBSTONES)?.unwrap_or_default())
    }

    pub fn is_tombstoned(&mut self, account: &str, id: &str) -> Result<bool> {
        Ok(self.tombstones()?.contains(account, id))
    }

    pub fn starred(&self) -> &BTreeSet<MessageId> {
        &self.starred
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    // ── Single-item writes ──────────────────────────────────────

    /// Insert or replace a message in `account`'s partition.
    ///
    /// The message's `account_id` is set to `account` and its `starred`
    /// flag to StarredSet membership. Tombstoned ids are rejected.
    pub fn put(&mut self, mut message: Message, account: &str) -> Result<()> {
        if self.is_tombstoned(account, &message.id)? {
            return Err(TempboxError::Validation(format!(
                "message {} was deleted and cannot be stored again",
                message.id
            )));
        }
        message.account_id = account.to_string();
        message.starred = self.starred.contains(&message.id);

        let mut partition = self.load_partition(account)?;
        let id = message.id.clone();
        let is_read = message.is_read;
        partition.insert(id.clone(), message);
        self.save_partition(account, &partition)?;
        debug!(id = %id, account = %account, is_read, "Message saved");

        self.refresh_analytics(&partition);
        Ok(())
    }

    /// Remove a message, tombstone its id, and unstar it.
    ///
    /// Deleting an id that is not stored still tombstones it.
    pub fn delete(&mut self, account: &str, id: &str) -> Result<()> {
        let mut partition = self.load_partition(account)?;
        self.delete_in(account, id, &mut partition)?;
        self.refresh_analytics(&partition);
        Ok(())
    }

    /// Tombstone first, then remove; a failed removal rolls the tombstone
    /// back so the message stays consistent.
    fn delete_in(&mut self, account: &str, id: &str, partition: &mut Partition) -> Result<()> {
        let newly_tombstoned = self.update_tombstones(|t| t.add(account, id))?;

        if let Some(removed) = partition.remove(id) {
            if let Err(e) = self.save_partition(account, partition) {
                partition.insert(id.to_string(), removed);
                if newly_tombstoned {
                    if let Err(revert) = self.update_tombstones(|t| t.remove(account, id)) {
                        warn!(id = %id, error = %revert, "Could not roll back tombstone");
                    }
                }
                return Err(e);
            }
        }

        if self.starred.remove(id) {
            if let Err(e) = self.persist_starred() {
                warn!(id = %id, error = %e, "Could not persist starred set after delete");
            }
        }
        debug!(id = %id, account = %account, "Message deleted");
        Ok(())
    }

    /// Star or unstar `id`. Returns the new state.
    pub fn set_starred(&mut self, account: &str, id: &str, starred: bool) -> Result<bool> {
        let mut partition = self.load_partition(account)?;
        if !partition.contains_key(id) {
            return Err(TempboxError::MessageNotFound(id.to_string()));
        }
        let changed = if starred {
            self.starred.insert(id.to_string())
        } else {
            self.starred.remove(id)
        };
        if changed {
            if let Err(e) = self.persist_starred() {
                if starred {
                    self.starred.remove(id);
                } else {
                    self.starred.insert(id.to_string());
                }
                return Err(e);
            }
        }
        if let Some(m) = partition.get_mut(id) {
            m.starred = starred;
        }
        self.save_partition(account, &partition)?;
        Ok(starred)
    }

    // ── Bulk writes ─────────────────────────────────────────────

    /// Tombstone and remove every message of `account`.
    pub fn clear_account(&mut self, account: &str) -> BatchReport {
        self.delete_where(account, |_| true)
    }

    /// Tombstone and remove the read messages of `account`.
    pub fn delete_read(&mut self, account: &str) -> BatchReport {
        self.delete_where(account, |m| m.is_read)
    }

    fn delete_where(&mut self, account: &str, pred: impl Fn(&Message) -> bool) -> BatchReport {
        let mut report = BatchReport::default();
        let mut partition = match self.load_partition(account) {
            Ok(p) => p,
            Err(e) => {
                report.failed(account, &e);
                return report;
            }
        };
        let ids: Vec<MessageId> = partition
            .values()
            .filter(|m| pred(*m))
            .map(|m| m.id.clone())
            .collect();

        for id in ids {
            match self.delete_in(account, &id, &mut partition) {
                Ok(()) => report.applied(),
                Err(e) => {
                    warn!(id = %id, error = %e, "Bulk delete failed for item");
                    report.failed(id, &e);
                }
            }
        }
        self.refresh_analytics(&partition);
        info!(
            account = %account,
            applied = report.applied,
            failed = report.failed.len(),
            "Bulk delete finished"
        );
        report
    }

    /// Mark every unread message of `account` as read.
    pub fn mark_all_read(&mut self, account: &str) -> BatchReport {
        let mut report = BatchReport::default();
        let mut partition = match self.load_partition(account) {
            Ok(p) => p,
            Err(e) => {
                report.failed(account, &e);
                return report;
            }
        };
        let unread: Vec<MessageId> = partition
            .values()
            .filter(|m| !m.is_read)
            .map(|m| m.id.clone())
            .collect();

        for id in unread {
            if let Some(m) = partition.get_mut(&id) {
                m.is_read = true;
            }
            match self.save_partition(account, &partition) {
                Ok(()) => report.applied(),
                Err(e) => {
                    if let Some(m) = partition.get_mut(&id) {
                        m.is_read = false;
                    }
                    report.failed(id, &e);
                }
            }
        }
        self.refresh_analytics(&partition);
        report
    }

    /// Replace every message, the starred set, and the tombstones.
    ///
    /// Existing partitions are dropped first; messages are then written one
    /// by one, each into the partition named by its own `account_id`.
    pub fn replace_all(
        &mut self,
        messages: Vec<Message>,
        starred: BTreeSet<MessageId>,
        tombstones: TombstoneSet,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        let accounts = match self.partition_accounts() {
            Ok(a) => a,
            Err(e) => {
                report.failed("partitions", &e);
                return report;
            }
        };
        for account in accounts {
            if let Err(e) = self.connection().and_then(|c| c.remove(&partition_key(&account))) {
                report.failed(partition_key(&account), &e);
            }
        }

        if let Err(e) = self.save_record(KEY_TOMBSTONES, &tombstones) {
            report.failed(KEY_TOMBSTONES, &e);
        }
        self.starred = starred;
        if let Err(e) = self.persist_starred() {
            report.failed(KEY_STARRED, &e);
        }

        for message in messages {
            let id = message.id.clone();
            let account = message.account_id.clone();
            match self.put(message, &account) {
                Ok(()) => report.applied(),
                Err(e) => report.failed(id, &e),
            }
        }
        report
    }

    /// Overwrite the starred set wholesale.
    pub fn replace_starred(&mut self, starred: BTreeSet<MessageId>) -> Result<()> {
        self.starred = starred;
        self.persist_starred()
    }

    /// Forget the tombstones of `account`.
    pub fn reset_tombstones(&mut self, account: &str) -> Result<usize> {
        let cleared = self.update_tombstones(|t| t.reset(account))?;
        info!(account = %account, cleared, "Tombstones reset");
        Ok(cleared)
    }

    // ── Analytics ───────────────────────────────────────────────

    /// Recompute counters for `account` without mutating messages.
    pub fn recompute_analytics(&mut self, account: &str) -> Result<()> {
        let partition = self.load_partition(account)?;
        self.refresh_analytics(&partition);
        Ok(())
    }

    pub fn record_address_generated(&mut self) -> Result<()> {
        self.update_analytics(|a| a.emails_generated += 1)
    }

    pub fn record_sync(&mut self, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        self.update_analytics(|a| a.last_sync = Some(at))
    }

    /// Overwrite the stored record wholesale (backup import).
    pub fn replace_analytics(&mut self, analytics: Analytics) -> Result<()> {
        self.save_record(KEY_ANALYTICS, &analytics)?;
        self.analytics = analytics;
        Ok(())
    }

    fn refresh_analytics(&mut self, partition: &Partition) {
        let messages: Vec<Message> = partition.values().cloned().collect();
        if let Err(e) = self.update_analytics(|a| a.recompute(&messages)) {
            warn!(error = %e, "Could not persist analytics");
            self.analytics.recompute(&messages);
        }
    }

    /// Apply `f` to the stored analytics record and write it back, keeping
    /// counters other sessions have bumped since we last looked.
    fn update_analytics(&mut self, f: impl FnOnce(&mut Analytics)) -> Result<()> {
        let conn = self.connection()?;
        let mut current: Analytics = read_json(conn.as_ref(), KEY_ANALYTICS)?.unwrap_or_default();
        f(&mut current);
        write_json(conn.as_ref(), KEY_ANALYTICS, &current)?;
        self.analytics = current;
        Ok(())
    }

    /// Apply `f` to the stored tombstones and write them back.
    fn update_tombstones<R>(&mut self, f: impl FnOnce(&mut TombstoneSet) -> R) -> Result<R> {
        let conn = self.connection()?;
        let mut current: TombstoneSet = read_json(conn.as_ref(), KEY_TOMBSTONES)?.unwrap_or_default();
        let out = f(&mut current);
        write_json(conn.as_ref(), KEY_TOMBSTONES, &current)?;
        Ok(out)
    }

    // ── Small JSON records ──────────────────────────────────────

    /// Read a JSON record such as the account registry or settings.
    pub fn load_record<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        let conn = self.connection()?;
        read_json(conn.as_ref(), key)
    }

    pub fn save_record<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        let conn = self.connection()?;
        write_json(conn.as_ref(), key, value)
    }

    fn persist_starred(&mut self) -> Result<()> {
        let starred = self.starred.clone();
        self.save_record(KEY_STARRED, &starred)
    }

}

impl Drop for LocalStore {
    fn drop(&mut self) {
        self.close();
    }
}

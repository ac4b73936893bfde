//! The command surface a UI drives.
//!
//! A `Session` owns the local store plus the per-tab view state: active
//! account, filter, page cursors, and settings. Every command persists
//! what it changes before returning, so a second session over the same
//! data directory sees the result on its next read.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::analytics::{Analytics, EventLog};
use crate::backup::{deleted_entries, tombstones_from, Backup, BackupData};
use crate::error::{Result, TempboxError};
use crate::model::account::{AccountRecord, AccountRegistry};
use crate::model::message::{AccountId, Message};
use crate::model::settings::Settings;
use crate::provider::MailProvider;
use crate::search::filter::FilterSpec;
use crate::search::pagination::{build_view, clamp_page, total_pages, MailboxView, PageCursor, PageCursors, View};
use crate::store::local::{KEY_ACCOUNTS, KEY_ACTIVE_ACCOUNT, KEY_EVENTS, KEY_SETTINGS};
use crate::store::{LocalStore, StorageEngine};
use crate::sync::reconcile::{self, IngestOutcome};

pub struct Session {
    store: LocalStore,
    accounts: AccountRegistry,
    settings: Settings,
    filter: FilterSpec,
    cursors: PageCursors,
    page_size: usize,
    events: EventLog,
    storage_limit: Option<u64>,
}

impl Session {
    /// Open the store and load accounts, settings, and the event log.
    pub fn open(engine: Arc<dyn StorageEngine>, page_size: usize) -> Result<Self> {
        let store = LocalStore::open(engine)?;
        let mut session = Self {
            store,
            accounts: AccountRegistry::default(),
            settings: Settings::default(),
            filter: FilterSpec::default(),
            cursors: PageCursors::default(),
            page_size: page_size.max(1),
            events: EventLog::default(),
            storage_limit: None,
        };
        session.load_records()?;
        let active = session.accounts.active().clone();
        session.store.recompute_analytics(&active)?;
        session.log_event("app_loaded", json!({}));
        info!(account = %active, "Session opened");
        Ok(session)
    }

    /// Warn when analytics report more than `bytes` of stored messages.
    pub fn with_storage_limit(mut self, bytes: u64) -> Self {
        self.storage_limit = Some(bytes);
        self
    }

    fn load_records(&mut self) -> Result<()> {
        let records = self.store.load_record(KEY_ACCOUNTS)?.unwrap_or_default();
        let active: Option<AccountId> = self.store.load_record(KEY_ACTIVE_ACCOUNT)?;
        self.accounts = AccountRegistry::from_parts(records, active);
        self.settings = self.store.load_record(KEY_SETTINGS)?.unwrap_or_default();
        self.events = self.store.load_record(KEY_EVENTS)?.unwrap_or_default();
        Ok(())
    }

    fn persist_accounts(&mut self) -> Result<()> {
        let records = self.accounts.records().clone();
        let active = self.accounts.active().clone();
        self.store.save_record(KEY_ACCOUNTS, &records)?;
        self.store.save_record(KEY_ACTIVE_ACCOUNT, &active)
    }

    fn persist_settings(&mut self) -> Result<()> {
        let settings = self.settings;
        self.store.save_record(KEY_SETTINGS, &settings)
    }

    fn log_event(&mut self, name: &str, data: serde_json::Value) {
        let account = self.accounts.active().clone();
        self.events.record(name, data, &account);
        let events = self.events.clone();
        if let Err(e) = self.store.save_record(KEY_EVENTS, &events) {
            warn!(event = name, error = %e, "Could not persist event log");
        }
    }

    fn check_storage(&self) {
        if let Some(limit) = self.storage_limit {
            let used = self.store.analytics().storage_used;
            if used > limit {
                warn!(used, limit, "Stored messages exceed the configured storage limit");
            }
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    pub fn active_account(&self) -> &AccountId {
        self.accounts.active()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn cursors(&self) -> PageCursors {
        self.cursors
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn analytics(&self) -> &Analytics {
        self.store.analytics()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LocalStore {
        &mut self.store
    }

    /// All messages of the active account, newest first.
    pub fn messages(&mut self) -> Result<Vec<Message>> {
        let active = self.accounts.active().clone();
        self.store.get_all(&active)
    }

    // ── Message commands ────────────────────────────────────────

    /// Store a message in the active account.
    pub fn save_message(&mut self, message: Message) -> Result<()> {
        let active = self.accounts.active().clone();
        self.store.put(message, &active)?;
        self.check_storage();
        Ok(())
    }

    /// Return a message of the active account, marking it read.
    pub fn open_message(&mut self, id: &str) -> Result<Message> {
        let active = self.accounts.active().clone();
        let mut message = self
            .store
            .get(&active, id)?
            .ok_or_else(|| TempboxError::MessageNotFound(id.to_string()))?;
        if !message.is_read {
            message.is_read = true;
            self.store.put(message.clone(), &active)?;
            self.log_event("message_read", json!({ "id": id }));
        }
        Ok(message)
    }

    pub fn delete_message(&mut self, id: &str) -> Result<()> {
        let active = self.accounts.active().clone();
        self.store.delete(&active, id)
    }

    /// Delete every message of the active account. Returns how many went.
    pub fn clear_account(&mut self) -> Result<usize> {
        let active = self.accounts.active().clone();
        self.store.clear_account(&active).into_result()
    }

    pub fn delete_read(&mut self) -> Result<usize> {
        let active = self.accounts.active().clone();
        self.store.delete_read(&active).into_result()
    }

    pub fn mark_all_read(&mut self) -> Result<usize> {
        let active = self.accounts.active().clone();
        self.store.mark_all_read(&active).into_result()
    }

    /// Flip the starred flag of a message. Returns the new state.
    pub fn toggle_star(&mut self, id: &str) -> Result<bool> {
        let active = self.accounts.active().clone();
        let starred = !self.store.starred().contains(id);
        self.store.set_starred(&active, id, starred)
    }

    // ── Accounts ────────────────────────────────────────────────

    pub fn switch_account(&mut self, id: &str) -> Result<()> {
        self.accounts.set_active(id)?;
        self.persist_accounts()?;
        self.cursors.reset();
        self.store.recompute_analytics(id)?;
        info!(account = %id, "Switched account");
        Ok(())
    }

    pub fn add_account(&mut self, display_name: &str, email: Option<&str>) -> Result<AccountId> {
        let id = self
            .accounts
            .add(display_name, email, Utc::now().timestamp_millis())?;
        self.persist_accounts()?;
        info!(account = %id, name = display_name, "Account added");
        Ok(id)
    }

    /// Overwrite the registry wholesale, keeping `active` if it still exists.
    /// Returns true when the active account changed.
    pub fn replace_accounts(
        &mut self,
        records: std::collections::BTreeMap<AccountId, AccountRecord>,
        active: Option<&str>,
    ) -> Result<bool> {
        let before = self.accounts.active().clone();
        self.accounts.replace_records(records);
        if let Some(active) = active {
            if self.accounts.contains(active) {
                self.accounts.set_active(active)?;
            }
        }
        self.persist_accounts()?;
        let changed = *self.accounts.active() != before;
        if changed {
            self.cursors.reset();
        }
        Ok(changed)
    }

    // ── View state ──────────────────────────────────────────────

    /// Move one list to `page`, clamped into range. Never rejects.
    pub fn change_page(&mut self, view: View, page: i64) -> Result<PageCursor> {
        let messages = self.messages()?;
        let now = Local::now();
        let count = crate::search::filter::apply_filter(&messages, &self.filter, now)
            .iter()
            .filter(|m| m.is_read == (view == View::Inbox))
            .count();
        let total = total_pages(count, self.page_size);
        let cursor = PageCursor {
            page: clamp_page(page, total),
            total_pages: total,
        };
        *self.cursors.get_mut(view) = cursor;
        Ok(cursor)
    }

    /// Replace the filter and go back to page 1 of both lists.
    pub fn apply_filter(&mut self, spec: FilterSpec) -> Result<()> {
        spec.validate()?;
        self.filter = spec.normalized();
        self.cursors.reset();
        debug!(filter = ?self.filter, "Filter applied");
        Ok(())
    }

    pub fn reset_filter(&mut self) {
        self.filter = FilterSpec::default();
        self.cursors.reset();
    }

    /// Build the read/unread view for `now`, storing the clamped cursors.
    pub fn view_at(&mut self, now: DateTime<Local>) -> Result<MailboxView> {
        let messages = self.messages()?;
        let view = build_view(&messages, &self.filter, self.cursors, self.page_size, now);
        self.cursors = view.cursors;
        Ok(view)
    }

    pub fn view(&mut self) -> Result<MailboxView> {
        self.view_at(Local::now())
    }

    /// Persist a new auto-refresh period, in milliseconds.
    pub fn set_refresh_interval(&mut self, millis: u64) -> Result<()> {
        if millis == 0 {
            return Err(TempboxError::Validation("refresh interval must be positive".into()));
        }
        self.settings.refresh_interval = millis;
        self.persist_settings()?;
        debug!(millis, "Refresh interval updated");
        Ok(())
    }

    pub fn toggle_dark_mode(&mut self) -> Result<bool> {
        self.settings.dark_mode = !self.settings.dark_mode;
        self.persist_settings()?;
        Ok(self.settings.dark_mode)
    }

    // ── Provider ────────────────────────────────────────────────

    /// Fetch the active account's inbox and ingest it.
    ///
    /// Items that could not be stored are reported once, as a
    /// `PartialFailure`, after the rest of the batch has been kept.
    pub async fn refresh(&mut self, provider: &dyn MailProvider) -> Result<IngestOutcome> {
        let active = self.accounts.active().clone();
        let address = self.accounts.active_record().email_address.clone();
        let outcome = reconcile::refresh(&mut self.store, provider, &active, address.as_deref()).await?;
        if outcome.inserted > 0 {
            self.log_event("messages_received", json!({ "count": outcome.inserted }));
            self.check_storage();
        }
        if !outcome.failed.is_empty() {
            return Err(TempboxError::PartialFailure {
                applied: outcome.inserted,
                failed: outcome.failed,
            });
        }
        Ok(outcome)
    }

    /// Replace the active account's address with a freshly generated one.
    pub async fn generate_address(&mut self, provider: &dyn MailProvider) -> Result<String> {
        let active = self.accounts.active().clone();
        let address =
            reconcile::generate_address(&mut self.store, provider, &mut self.accounts, &active).await?;
        self.persist_accounts()?;
        self.cursors.reset();
        self.log_event("email_generated", json!({ "email": address }));
        Ok(address)
    }

    // ── Backup ──────────────────────────────────────────────────

    /// Export every partition plus accounts, starred ids, and tombstones.
    pub fn export_backup(&mut self) -> Result<Backup> {
        let mut messages = Vec::new();
        for account in self.store.partition_accounts()? {
            messages.extend(self.store.get_all(&account)?);
        }
        let data = BackupData {
            messages: Some(messages),
            accounts: Some(self.accounts.records().clone()),
            starred: Some(self.store.starred().clone()),
            deleted: Some(deleted_entries(&self.store.tombstones()?)),
            analytics: Some(self.store.analytics().clone()),
            settings: Some(self.settings),
        };
        info!(
            messages = data.messages.as_ref().map_or(0, Vec::len),
            "Backup exported"
        );
        Ok(Backup::new(data))
    }

    /// Replace local state with the sections present in `backup`.
    ///
    /// Messages are written one by one; failures are reported as a
    /// `PartialFailure` after everything else has been applied.
    pub fn import_backup(&mut self, backup: Backup) -> Result<()> {
        let data = backup.data;

        if let Some(records) = data.accounts {
            let active = self.accounts.active().clone();
            self.replace_accounts(records, Some(&active))?;
        }

        let messages = match data.messages {
            Some(m) => m,
            None => {
                let mut current = Vec::new();
                for account in self.store.partition_accounts()? {
                    current.extend(self.store.get_all(&account)?);
                }
                current
            }
        };
        let starred = data.starred.unwrap_or_else(|| self.store.starred().clone());
        let tombstones = match data.deleted {
            Some(entries) => {
                let ids: Vec<AccountId> = self.accounts.ids().cloned().collect();
                tombstones_from(&entries, &ids)
            }
            None => self.store.tombstones()?,
        };
        let report = self.store.replace_all(messages, starred, tombstones);

        if let Some(analytics) = data.analytics {
            self.store.replace_analytics(analytics)?;
        }
        if let Some(settings) = data.settings {
            self.settings = settings;
            self.persist_settings()?;
        }

        self.reload()?;
        info!(applied = report.applied, failed = report.failed.len(), "Backup imported");
        report.into_result().map(|_| ())
    }

    /// Re-read everything persisted, keeping the filter and cursors.
    pub fn reload(&mut self) -> Result<()> {
        self.store.reload()?;
        self.load_records()?;
        let active = self.accounts.active().clone();
        self.store.recompute_analytics(&active)
    }
}

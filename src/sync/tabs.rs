//! Cross-tab convergence over a shared data directory.
//!
//! Each tab periodically broadcasts a snapshot of its state into the
//! `sync.slot` key and bumps `sync.trigger`. Other tabs poll the trigger;
//! when it moves they read the slot and, if the snapshot is newer than
//! the last one this tab published or applied, adopt its accounts, active
//! account, and starred set. Last writer wins.
//!
//! The profile-wide `lastSync` in analytics is shared by every tab, so the
//! staleness check uses the tab's own watermark instead.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::account::AccountRecord;
use crate::model::message::{AccountId, Message, MessageId};
use crate::session::Session;
use crate::store::backend::{read_json, write_json, KvBackend};

pub const KEY_SYNC_SLOT: &str = "sync.slot";
pub const KEY_SYNC_TRIGGER: &str = "sync.trigger";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabState {
    Idle,
    Broadcasting,
    Merging,
}

/// What a tab publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    /// Messages of the broadcaster's active account.
    pub messages: Vec<Message>,
    pub accounts: BTreeMap<AccountId, AccountRecord>,
    pub active_account: AccountId,
    pub starred: BTreeSet<MessageId>,
}

/// The shared slot and trigger keys.
pub struct SyncSlot {
    conn: Arc<dyn KvBackend>,
}

impl SyncSlot {
    pub fn new(conn: Arc<dyn KvBackend>) -> Self {
        Self { conn }
    }

    pub fn read(&self) -> Result<Option<SyncSnapshot>> {
        read_json(self.conn.as_ref(), KEY_SYNC_SLOT)
    }

    pub fn trigger(&self) -> Result<i64> {
        Ok(read_json(self.conn.as_ref(), KEY_SYNC_TRIGGER)?.unwrap_or(0))
    }

    /// Write `snapshot`, then a trigger value greater than any before it.
    pub fn publish(&self, snapshot: &SyncSnapshot) -> Result<i64> {
        write_json(self.conn.as_ref(), KEY_SYNC_SLOT, snapshot)?;
        let next = Utc::now().timestamp_millis().max(self.trigger()? + 1);
        write_json(self.conn.as_ref(), KEY_SYNC_TRIGGER, &next)?;
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing has been published yet.
    Empty,
    /// The snapshot is not newer than the last one this tab saw.
    Stale,
    Applied { switched_account: bool },
}

/// Per-tab synchronizer state.
#[derive(Debug)]
pub struct TabSync {
    state: TabState,
    last_trigger: i64,
    /// Timestamp of the newest snapshot published or applied here.
    /// Seeded from the persisted `lastSync` when first polled or merged.
    last_applied: Option<i64>,
}

impl Default for TabSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TabSync {
    pub fn new() -> Self {
        Self {
            state: TabState::Idle,
            last_trigger: 0,
            last_applied: None,
        }
    }

    pub fn state(&self) -> TabState {
        self.state
    }

    fn slot(session: &mut Session) -> Result<SyncSlot> {
        Ok(SyncSlot::new(session.store_mut().connection()?))
    }

    /// Publish this tab's state and record the sync time.
    pub fn broadcast(&mut self, session: &mut Session) -> Result<i64> {
        self.state = TabState::Broadcasting;
        let result = Self::publish(session);
        self.state = TabState::Idle;
        let (timestamp, trigger) = result?;
        self.last_trigger = trigger;
        self.last_applied = Some(timestamp);
        debug!(timestamp, "Broadcast sync snapshot");
        Ok(timestamp)
    }

    fn publish(session: &mut Session) -> Result<(i64, i64)> {
        let now = Utc::now();
        let snapshot = SyncSnapshot {
            timestamp: now.timestamp_millis(),
            messages: session.messages()?,
            accounts: session.accounts().records().clone(),
            active_account: session.active_account().clone(),
            starred: session.store().starred().clone(),
        };
        let trigger = Self::slot(session)?.publish(&snapshot)?;
        session.store_mut().record_sync(now)?;
        Ok((snapshot.timestamp, trigger))
    }

    fn seed_watermark(&mut self, session: &Session) -> i64 {
        *self
            .last_applied
            .get_or_insert_with(|| session.analytics().last_sync_millis())
    }

    /// True when another tab has published since we last looked.
    pub fn poll_trigger(&mut self, session: &mut Session) -> Result<bool> {
        self.seed_watermark(session);
        let trigger = Self::slot(session)?.trigger()?;
        if trigger == self.last_trigger {
            return Ok(false);
        }
        self.last_trigger = trigger;
        Ok(true)
    }

    /// Adopt the published snapshot if it is newer than the last one this
    /// tab published or applied.
    pub fn merge(&mut self, session: &mut Session) -> Result<MergeOutcome> {
        self.state = TabState::Merging;
        let result = self.apply(session);
        self.state = TabState::Idle;
        result
    }

    fn apply(&mut self, session: &mut Session) -> Result<MergeOutcome> {
        let watermark = self.seed_watermark(session);
        let Some(snapshot) = Self::slot(session)?.read()? else {
            return Ok(MergeOutcome::Empty);
        };
        if snapshot.timestamp <= watermark {
            debug!(timestamp = snapshot.timestamp, watermark, "Ignoring stale snapshot");
            return Ok(MergeOutcome::Stale);
        }

        let switched = session.replace_accounts(snapshot.accounts, Some(&snapshot.active_account))?;
        session.store_mut().replace_starred(snapshot.starred)?;
        if switched {
            session.reload()?;
        }
        self.last_applied = Some(snapshot.timestamp);
        if let Some(at) = Utc.timestamp_millis_opt(snapshot.timestamp).single() {
            session.store_mut().record_sync(at)?;
        }
        info!(
            timestamp = snapshot.timestamp,
            switched_account = switched,
            "Merged state from another tab"
        );
        Ok(MergeOutcome::Applied {
            switched_account: switched,
        })
    }

    /// Broadcast every `sync_interval` and poll the trigger every
    /// `poll_interval` until `shutdown` flips to true or its sender drops.
    pub async fn run(
        mut self,
        session: Arc<Mutex<Session>>,
        sync_interval: Duration,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut sync_tick = tokio::time::interval(sync_interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll_tick = tokio::time::interval(poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sync_tick.tick() => {
                    let mut session = session.lock().await;
                    if let Err(e) = self.broadcast(&mut session) {
                        warn!(error = %e, "Sync broadcast failed");
                    }
                }
                _ = poll_tick.tick() => {
                    let mut session = session.lock().await;
                    match self.poll_trigger(&mut session) {
                        Ok(true) => {
                            if let Err(e) = self.merge(&mut session) {
                                warn!(error = %e, "Sync merge failed");
                            }
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "Sync trigger poll failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Tab sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEngine;

    fn tabs() -> (MemoryEngine, Session, Session) {
        let engine = MemoryEngine::new();
        let a = Session::open(Arc::new(engine.clone()), 20).unwrap();
        let b = Session::open(Arc::new(engine.clone()), 20).unwrap();
        (engine, a, b)
    }

    #[test]
    fn test_merge_adopts_newer_snapshot() {
        let (_, mut a, mut b) = tabs();
        let work = a.add_account("Work", None).unwrap();
        a.switch_account(&work).unwrap();

        let mut sync_a = TabSync::new();
        let mut sync_b = TabSync::new();
        sync_a.broadcast(&mut a).unwrap();
        assert_eq!(sync_a.state(), TabState::Idle);
        assert!(!sync_a.poll_trigger(&mut a).unwrap());

        assert!(sync_b.poll_trigger(&mut b).unwrap());
        let outcome = sync_b.merge(&mut b).unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Applied {
                switched_account: true
            }
        );
        assert_eq!(b.active_account(), &work);
        assert!(b.accounts().contains(&work));

        // Same snapshot again is stale
        assert_eq!(sync_b.merge(&mut b).unwrap(), MergeOutcome::Stale);
    }

    #[test]
    fn test_merge_overwrites_starred_set() {
        let (_, mut a, mut b) = tabs();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let kept = Message::new_unread("kept".into(), "", "a@x.com", Some("Hi"), None, at);
        let dropped = Message::new_unread("dropped".into(), "", "b@x.com", Some("Yo"), None, at);
        a.store_mut().put(kept, "default").unwrap();
        a.store_mut().put(dropped, "default").unwrap();
        b.toggle_star("dropped").unwrap();
        a.reload().unwrap();
        a.toggle_star("dropped").unwrap();
        a.toggle_star("kept").unwrap();

        let mut sync_a = TabSync::new();
        let mut sync_b = TabSync::new();
        sync_a.broadcast(&mut a).unwrap();
        assert!(sync_b.poll_trigger(&mut b).unwrap());
        assert!(matches!(sync_b.merge(&mut b).unwrap(), MergeOutcome::Applied { .. }));

        let expected: BTreeSet<MessageId> = ["kept".to_string()].into_iter().collect();
        assert_eq!(b.store().starred(), &expected);
        assert!(b.messages().unwrap().iter().any(|m| m.id == "kept" && m.starred));
    }

    #[test]
    fn test_older_snapshot_is_stale() {
        let (_, mut a, mut b) = tabs();
        let work = a.add_account("Work", None).unwrap();
        let mut sync_b = TabSync::new();
        let published = sync_b.broadcast(&mut b).unwrap();

        // A snapshot from before B's broadcast lands in the slot afterwards
        let older = SyncSnapshot {
            timestamp: published - 1_000,
            messages: Vec::new(),
            accounts: a.accounts().records().clone(),
            active_account: work.clone(),
            starred: BTreeSet::new(),
        };
        SyncSlot::new(a.store_mut().connection().unwrap())
            .publish(&older)
            .unwrap();

        assert!(sync_b.poll_trigger(&mut b).unwrap());
        assert_eq!(sync_b.merge(&mut b).unwrap(), MergeOutcome::Stale);
        assert_eq!(b.active_account().as_str(), "default");
        assert!(!b.accounts().contains(&work));
    }

    #[test]
    fn test_shared_last_sync_does_not_hide_new_snapshot() {
        let (_, mut a, mut b) = tabs();
        let work = a.add_account("Work", None).unwrap();
        let mut sync_a = TabSync::new();
        let mut sync_b = TabSync::new();
        // B has seen the slot once, before A published anything
        assert_eq!(sync_b.merge(&mut b).unwrap(), MergeOutcome::Empty);

        sync_a.broadcast(&mut a).unwrap();
        // B's next analytics write picks up the lastSync A just recorded
        b.store_mut().record_address_generated().unwrap();
        assert!(b.analytics().last_sync.is_some());

        assert!(sync_b.poll_trigger(&mut b).unwrap());
        assert!(matches!(sync_b.merge(&mut b).unwrap(), MergeOutcome::Applied { .. }));
        assert!(b.accounts().contains(&work));
    }

    #[test]
    fn test_merge_without_snapshot() {
        let (_, _, mut b) = tabs();
        assert_eq!(TabSync::new().merge(&mut b).unwrap(), MergeOutcome::Empty);
    }

    #[test]
    fn test_trigger_strictly_increases() {
        let engine = MemoryEngine::new();
        let mut s = Session::open(Arc::new(engine), 20).unwrap();
        let slot = SyncSlot::new(s.store_mut().connection().unwrap());
        let far_future = Utc::now().timestamp_millis() + 1_000_000;
        write_json(slot.conn.as_ref(), KEY_SYNC_TRIGGER, &far_future).unwrap();

        let snapshot = SyncSnapshot {
            timestamp: 1,
            messages: Vec::new(),
            accounts: BTreeMap::new(),
            active_account: "default".into(),
            starred: BTreeSet::new(),
        };
        assert_eq!(slot.publish(&snapshot).unwrap(), far_future + 1);
        assert_eq!(slot.publish(&snapshot).unwrap(), far_future + 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let engine = MemoryEngine::new();
        let session = Arc::new(Mutex::new(Session::open(Arc::new(engine.clone()), 20).unwrap()));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(TabSync::new().run(
            Arc::clone(&session),
            Duration::from_millis(10),
            Duration::from_millis(5),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(engine.raw(KEY_SYNC_SLOT).is_some());
        assert!(session.lock().await.analytics().last_sync.is_some());
    }
}

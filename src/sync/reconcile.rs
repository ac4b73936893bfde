//! Merge provider fetches into the local store.
//!
//! Ingestion is idempotent: ids already stored or tombstoned are skipped,
//! so the provider may redeliver the same inbox on every poll.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{ItemFailure, Result, TempboxError};
use crate::model::account::AccountRegistry;
use crate::model::message::{Message, MessageId};
use crate::provider::{MailProvider, RemoteMessage};
use crate::store::identity::derive_id;
use crate::store::LocalStore;

/// Per-batch ingestion counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub inserted: usize,
    /// Already stored in the partition.
    pub duplicates: usize,
    /// Suppressed by a tombstone.
    pub tombstoned: usize,
    /// Missing sender or timestamp; skipped.
    pub malformed: usize,
    /// Store writes that failed; the rest of the batch still ran.
    pub failed: Vec<ItemFailure>,
}

/// Ingest `remote` into `account`, in order.
pub fn ingest(store: &mut LocalStore, account: &str, remote: &[RemoteMessage]) -> Result<IngestOutcome> {
    let mut known: BTreeSet<MessageId> = store
        .get_all(account)?
        .into_iter()
        .map(|m| m.id)
        .collect();
    let tombstones = store.tombstones()?;
    let mut outcome = IngestOutcome::default();

    for item in remote {
        let valid = match item.validate() {
            Ok(v) => v,
            Err(e) => {
                debug!(account, error = %e, "Skipping remote message");
                outcome.malformed += 1;
                continue;
            }
        };

        let id = derive_id(&valid.created_at, valid.from);
        if tombstones.contains(account, &id) {
            outcome.tombstoned += 1;
            continue;
        }
        if known.contains(&id) {
            outcome.duplicates += 1;
            continue;
        }

        let message = Message::new_unread(
            id.clone(),
            account,
            valid.from,
            valid.subject,
            valid.body,
            valid.created_at,
        );
        match store.put(message, account) {
            Ok(()) => {
                known.insert(id);
                outcome.inserted += 1;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Could not store remote message");
                outcome.failed.push(ItemFailure {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }

    if outcome.inserted > 0 {
        info!(account, inserted = outcome.inserted, "New messages stored");
    }
    debug!(
        account,
        duplicates = outcome.duplicates,
        tombstoned = outcome.tombstoned,
        malformed = outcome.malformed,
        "Ingest finished"
    );
    Ok(outcome)
}

/// Fetch the inbox of `address` and ingest it. No address is a no-op.
pub async fn refresh(
    store: &mut LocalStore,
    provider: &dyn MailProvider,
    account: &str,
    address: Option<&str>,
) -> Result<IngestOutcome> {
    let Some(address) = address else {
        debug!(account, "No address, nothing to refresh");
        return Ok(IngestOutcome::default());
    };
    let remote = provider.fetch_inbox(address).await?;
    ingest(store, account, &remote)
}

/// Request a new address for `account` and start its mailbox over.
///
/// The old messages are tombstoned and removed, then the account's
/// tombstones are reset so the new mailbox starts clean. The registry is
/// updated in place; persisting it is the caller's job.
pub async fn generate_address(
    store: &mut LocalStore,
    provider: &dyn MailProvider,
    registry: &mut AccountRegistry,
    account: &str,
) -> Result<String> {
    if !registry.contains(account) {
        return Err(TempboxError::UnknownAccount(account.to_string()));
    }
    let address = provider.generate_address().await?;

    store.clear_account(account).into_result()?;
    store.reset_tombstones(account)?;
    registry.set_address(account, &address)?;
    store.record_address_generated()?;
    store.record_sync(Utc::now())?;
    info!(account, address = %address, "New address generated");
    Ok(address)
}

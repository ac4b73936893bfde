//! Account registry: named accounts, their disposable addresses, and the
//! active account.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::message::AccountId;
use crate::error::{Result, TempboxError};

/// Id of the account every registry starts with.
pub const DEFAULT_ACCOUNT: &str = "default";

/// One named account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub display_name: String,
    /// Disposable address, set once one has been generated or entered.
    pub email_address: Option<String>,
}

/// All known accounts plus the active one.
///
/// Always contains [`DEFAULT_ACCOUNT`], and `active` always names an
/// account in the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRegistry {
    accounts: BTreeMap<AccountId, AccountRecord>,
    active: AccountId,
}

impl Default for AccountRegistry {
    fn default() -> Self {
        let mut accounts = BTreeMap::new();
        accounts.insert(DEFAULT_ACCOUNT.to_string(), default_record());
        Self {
            accounts,
            active: DEFAULT_ACCOUNT.to_string(),
        }
    }
}

fn default_record() -> AccountRecord {
    AccountRecord {
        display_name: "Default".to_string(),
        email_address: None,
    }
}

impl AccountRegistry {
    /// Rebuild a registry from persisted parts, repairing a missing default
    /// account or a dangling active id.
    pub fn from_parts(accounts: BTreeMap<AccountId, AccountRecord>, active: Option<AccountId>) -> Self {
        let mut registry = Self {
            accounts,
            active: DEFAULT_ACCOUNT.to_string(),
        };
        registry
            .accounts
            .entry(DEFAULT_ACCOUNT.to_string())
            .or_insert_with(default_record);
        if let Some(active) = active {
            if registry.accounts.contains_key(&active) {
                registry.active = active;
            }
        }
        registry
    }

    pub fn active(&self) -> &AccountId {
        &self.active
    }

    pub fn active_record(&self) -> &AccountRecord {
        // `active` is kept pointing at an existing entry.
        &self.accounts[&self.active]
    }

    pub fn get(&self, id: &str) -> Option<&AccountRecord> {
        self.accounts.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn records(&self) -> &BTreeMap<AccountId, AccountRecord> {
        &self.accounts
    }

    pub fn ids(&self) -> impl Iterator<Item = &AccountId> {
        self.accounts.keys()
    }

    /// Make `id` the active account.
    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if !self.accounts.contains_key(id) {
            return Err(TempboxError::UnknownAccount(id.to_string()));
        }
        self.active = id.to_string();
        Ok(())
    }

    /// Register a new account named `display_name`.
    ///
    /// The id is `account_<now_millis>`, bumped until unused.
    pub fn add(
        &mut self,
        display_name: &str,
        email_address: Option<&str>,
        now_millis: i64,
    ) -> Result<AccountId> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(TempboxError::Validation(
                "account display name must not be empty".into(),
            ));
        }
        let email = match email_address.map(str::trim).filter(|e| !e.is_empty()) {
            Some(e) if !is_valid_address(e) => {
                return Err(TempboxError::Validation(format!("invalid email address: {e}")));
            }
            other => other.map(str::to_string),
        };

        let mut stamp = now_millis;
        let mut id = format!("account_{stamp}");
        while self.accounts.contains_key(&id) {
            stamp += 1;
            id = format!("account_{stamp}");
        }
        self.accounts.insert(
            id.clone(),
            AccountRecord {
                display_name: name.to_string(),
                email_address: email,
            },
        );
        Ok(id)
    }

    /// Store a freshly generated address on an account.
    pub fn set_address(&mut self, id: &str, email: &str) -> Result<()> {
        let record = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| TempboxError::UnknownAccount(id.to_string()))?;
        record.email_address = Some(email.to_string());
        Ok(())
    }

    /// Replace every record wholesale (cross-tab merge, backup import).
    /// The active account falls back to the default if it disappeared.
    pub fn replace_records(&mut self, accounts: BTreeMap<AccountId, AccountRecord>) {
        let active = self.active.clone();
        *self = Self::from_parts(accounts, Some(active));
    }
}

/// Loose syntactic check: `local@domain.tld` with no whitespace.
pub fn is_valid_address(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rfind('.') {
        Some(dot) => dot > 0 && dot + 1 < domain.len(),
        None => false,
    }
}

//! Account lifecycle on top of the cache and the remote store.
//!
//! Creation assigns one identifier shared by both tiers, checks the
//! remote unique indexes (email, then username) before writing anywhere,
//! and degrades to a local-only record when the remote store is
//! unreachable; the reconciler pushes those later. Updates and deletes
//! apply locally first and propagate to the remote store best-effort.

use std::sync::Arc;

use log::{info, warn};
use shared::Account;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::account_sync::AccountReconciler;
use crate::domain::drafts::AccountDraft;
use crate::domain::errors::StoreError;
use crate::domain::local_store::LocalStore;
use crate::storage::{AccountDocument, AccountQuery, RemoteError};

#[derive(Debug, Error)]
pub enum AccountError {
    /// Another account already owns the email or username.
    #[error("account already exists: {0}")]
    Duplicate(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AccountService {
    store: Arc<LocalStore>,
    reconciler: Arc<AccountReconciler>,
}

impl AccountService {
    pub fn new(store: Arc<LocalStore>, reconciler: Arc<AccountReconciler>) -> Self {
        Self { store, reconciler }
    }

    /// Whether another remote document matches the filter. `None` when the
    /// remote store could not answer.
    fn remote_has(&self, filter: AccountQuery) -> Option<bool> {
        match self.reconciler.remote_find(filter) {
            Ok(hits) => Some(!hits.is_empty()),
            Err(e) => {
                warn!("Remote uniqueness check unavailable: {e}");
                None
            }
        }
    }

    /// Create an account. The remote document and the cached record share
    /// one generated identifier.
    pub fn create(&self, mut draft: AccountDraft) -> Result<Account, AccountError> {
        draft.id = None;
        if draft.username.is_empty() {
            draft.username = draft.email.clone();
        }

        // Uniqueness pre-checks; both must come back clean before anything
        // is written. An unreachable remote skips the checks.
        let mut remote_reachable = true;
        match self.remote_has(AccountQuery::ByEmail(draft.email.clone())) {
            Some(true) => return Err(AccountError::Duplicate(format!("email {}", draft.email))),
            Some(false) => {}
            None => remote_reachable = false,
        }
        if remote_reachable {
            if let Some(true) = self.remote_has(AccountQuery::ByUsername(draft.username.clone())) {
                return Err(AccountError::Duplicate(format!(
                    "username {}",
                    draft.username
                )));
            }
        }

        let id = Uuid::new_v4().to_string();
        let account = self.store.save_account_with_id(&id, draft)?;

        if remote_reachable {
            let document = AccountDocument::from_account(&account);
            match self.reconciler.remote_create(id.clone(), document) {
                Ok(_) => {
                    info!("Created account {} locally and remotely", account.email);
                }
                // The pre-check raced a concurrent create; undo the local
                // write and report the conflict.
                Err(RemoteError::Duplicate(detail)) => {
                    self.store.delete_account(&id)?;
                    return Err(AccountError::Duplicate(detail));
                }
                Err(e) => {
                    warn!(
                        "Account {} saved locally; remote create failed ({e}), \
                         pending reconciliation",
                        account.email
                    );
                }
            }
        } else {
            info!(
                "Account {} saved locally only; remote store unreachable",
                account.email
            );
        }
        Ok(account)
    }

    /// Update the cached record and propagate to the remote store
    /// best-effort. A document the remote store has never seen is created
    /// there instead.
    pub fn update(&self, draft: AccountDraft) -> Result<Account, AccountError> {
        let account = self.store.save_account(draft)?;
        let document = AccountDocument::from_account(&account);
        match self
            .reconciler
            .remote_update(account.id.clone(), document.clone())
        {
            Ok(_) => {}
            Err(RemoteError::NotFound(_)) => {
                if let Err(e) = self.reconciler.remote_create(account.id.clone(), document) {
                    warn!("Could not push updated account {} remotely: {e}", account.email);
                }
            }
            Err(e) => warn!("Remote update for {} failed: {e}", account.email),
        }
        Ok(account)
    }

    /// Delete locally, then best-effort remotely.
    pub fn delete(&self, id: &str) -> Result<(), AccountError> {
        self.store.delete_account(id)?;
        if let Err(e) = self.reconciler.remote_delete(id.to_string()) {
            warn!("Remote delete for account {id} failed: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account_sync::RemoteConfig;
    use crate::storage::{CollectionRef, InMemoryRemoteStore, JsonConnection, RemoteAccountStore};
    use shared::AccountRole;
    use tempfile::TempDir;

    fn setup(
        config: RemoteConfig,
    ) -> (Arc<LocalStore>, Arc<InMemoryRemoteStore>, AccountService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let connection = Arc::new(JsonConnection::new(temp_dir.path()).unwrap());
        let store = Arc::new(LocalStore::new(connection));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let reconciler = Arc::new(AccountReconciler::new(
            store.clone(),
            remote.clone(),
            config,
        ));
        let service = AccountService::new(store.clone(), reconciler);
        (store, remote, service, temp_dir)
    }

    fn draft(email: &str, username: &str) -> AccountDraft {
        AccountDraft {
            id: None,
            name: email.to_string(),
            email: email.to_string(),
            username: username.to_string(),
            password: Some("secret".to_string()),
            role: AccountRole::SchoolAdmin,
            school_id: String::new(),
            grade_levels: None,
            last_login: None,
        }
    }

    fn collection() -> CollectionRef {
        CollectionRef {
            database_id: "db".to_string(),
            collection_id: "users".to_string(),
        }
    }

    #[test]
    fn create_shares_one_id_and_keeps_the_password_local() {
        let (store, remote, service, _dir) = setup(RemoteConfig::new("db", "users"));
        let account = service.create(draft("a@school.om", "a")).unwrap();

        let cached = store.get_account(&account.id).unwrap();
        assert_eq!(cached.password.as_deref(), Some("secret"));

        let document = remote.get(&collection(), &account.id).unwrap();
        assert_eq!(document.email, "a@school.om");
    }

    #[test]
    fn duplicate_email_is_rejected_before_any_write() {
        let (store, remote, service, _dir) = setup(RemoteConfig::new("db", "users"));
        service.create(draft("a@school.om", "a")).unwrap();

        let err = service.create(draft("A@SCHOOL.OM", "other")).unwrap_err();
        assert!(matches!(err, AccountError::Duplicate(_)));
        assert_eq!(store.get_accounts(None).len(), 1);
        assert_eq!(remote.len(), 1);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let (_store, _remote, service, _dir) = setup(RemoteConfig::new("db", "users"));
        service.create(draft("a@school.om", "admin")).unwrap();
        let err = service.create(draft("b@school.om", "admin")).unwrap_err();
        assert!(matches!(err, AccountError::Duplicate(_)));
    }

    #[test]
    fn unreachable_remote_degrades_to_local_only() {
        let (store, remote, service, _dir) = setup(RemoteConfig::default());
        let account = service.create(draft("a@school.om", "a")).unwrap();
        assert!(store.get_account(&account.id).is_some());
        assert!(remote.is_empty());
    }

    #[test]
    fn update_propagates_to_the_remote_store() {
        let (_store, remote, service, _dir) = setup(RemoteConfig::new("db", "users"));
        let account = service.create(draft("a@school.om", "a")).unwrap();

        let mut change = draft("a@school.om", "a");
        change.id = Some(account.id.clone());
        change.name = "Renamed".to_string();
        change.password = None;
        let updated = service.update(change).unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.password.as_deref(), Some("secret"));

        let document = remote.get(&collection(), &account.id).unwrap();
        assert_eq!(document.name, "Renamed");
    }

    #[test]
    fn delete_removes_both_sides() {
        let (store, remote, service, _dir) = setup(RemoteConfig::new("db", "users"));
        let account = service.create(draft("a@school.om", "a")).unwrap();
        service.delete(&account.id).unwrap();
        assert!(store.get_account(&account.id).is_none());
        assert!(remote.is_empty());
    }
}

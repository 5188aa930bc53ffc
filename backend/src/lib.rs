//! School fee management backend.
//!
//! Everything lives locally in JSON collections; the only remote state
//! is the account collection, reconciled on demand. `Backend` wires the
//! tiers together for embedding hosts (desktop shells, test harnesses).

pub mod domain;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use domain::{
    AccountReconciler, AccountService, ImportMerger, LocalStore, MessagingService, RemoteConfig,
    StoreError,
};
use storage::{InMemoryRemoteStore, JsonConnection, RemoteAccountStore, WhatsAppTransport};

pub struct Backend {
    pub store: Arc<LocalStore>,
    pub reconciler: Arc<AccountReconciler>,
    pub accounts: AccountService,
    pub importer: ImportMerger,
    pub messaging: MessagingService,
}

impl Backend {
    /// Wire the backend against a data directory, a remote account store
    /// and an optional WhatsApp transport.
    pub fn new<P: AsRef<Path>>(
        data_directory: P,
        remote: Arc<dyn RemoteAccountStore>,
        remote_config: RemoteConfig,
        transport: Option<Arc<dyn WhatsAppTransport>>,
    ) -> Result<Self, StoreError> {
        let connection = Arc::new(JsonConnection::new(data_directory)?);
        info!(
            "Backend starting with data directory {:?}",
            connection.base_directory()
        );
        let store = Arc::new(LocalStore::new(connection));
        let reconciler = Arc::new(AccountReconciler::new(
            store.clone(),
            remote,
            remote_config,
        ));
        Ok(Self {
            accounts: AccountService::new(store.clone(), reconciler.clone()),
            importer: ImportMerger::new(store.clone()),
            messaging: MessagingService::new(store.clone(), transport),
            reconciler,
            store,
        })
    }

    /// Fully local wiring: in-process remote store, no outbound
    /// messaging. What offline installs and tests run on.
    pub fn local<P: AsRef<Path>>(data_directory: P) -> Result<Self, StoreError> {
        Self::new(
            data_directory,
            Arc::new(InMemoryRemoteStore::new()),
            RemoteConfig::new("local", "accounts"),
            None,
        )
    }

    /// Wipe all local data, then clear the remote account collection
    /// best-effort, keeping `keep_email`'s document when given. A remote
    /// failure leaves the local reset in place.
    pub fn reset_all(&self, keep_email: Option<&str>) -> Result<(), StoreError> {
        self.store.reset_all()?;
        match self.reconciler.cleanup_remote(keep_email) {
            Ok(deleted) => info!("Reset removed {deleted} remote account(s)"),
            Err(e) => warn!("Remote cleanup after reset failed: {e}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::AccountDraft;
    use shared::AccountRole;
    use tempfile::TempDir;

    fn draft(email: &str) -> AccountDraft {
        AccountDraft {
            id: None,
            name: email.to_string(),
            email: email.to_string(),
            username: String::new(),
            password: Some("secret".to_string()),
            role: AccountRole::Admin,
            school_id: String::new(),
            grade_levels: None,
            last_login: None,
        }
    }

    #[test]
    fn local_wiring_round_trips_an_account() {
        let dir = TempDir::new().unwrap();
        let backend = Backend::local(dir.path()).unwrap();
        let account = backend.accounts.create(draft("admin@school.om")).unwrap();
        assert!(backend.store.get_account(&account.id).is_some());
        assert!(backend.reconciler.check_sync_status().unwrap().is_synced);
    }

    #[test]
    fn reset_clears_local_and_remote_except_the_kept_account() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let backend = Backend::new(
            dir.path(),
            remote.clone(),
            RemoteConfig::new("db", "users"),
            None,
        )
        .unwrap();
        backend.accounts.create(draft("admin@school.om")).unwrap();
        backend.accounts.create(draft("staff@school.om")).unwrap();

        backend.reset_all(Some("admin@school.om")).unwrap();
        assert!(backend.store.get_accounts(None).is_empty());
        assert_eq!(remote.len(), 1);
    }
}

//! Two-way repair between the local account cache and the remote store.
//!
//! The local cache is authoritative for everything except identity; the
//! remote collection is authoritative for identity. The reconciler can
//! report the divergence between the two (`check_sync_status`), repair it
//! in both directions (`fix`), run the never-failing background pass the
//! app calls opportunistically (`sync`), and clear the remote collection
//! as part of a full reset (`cleanup_remote`).
//!
//! Every remote call runs on a helper thread bounded by the configured
//! timeout; a call that outlives it surfaces as `RemoteError::Transient`
//! and the worker's eventual result is discarded.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use shared::Account;

use crate::domain::local_store::LocalStore;
use crate::storage::{AccountDocument, CollectionRef, RemoteAccountStore, RemoteError};

/// Where the remote account collection lives. Both identifiers must be
/// present before any remote call is attempted.
#[derive(Debug, Clone, Default)]
pub struct RemoteConfig {
    pub database_id: Option<String>,
    pub collection_id: Option<String>,
    /// Per-call budget for remote operations.
    pub timeout: Option<Duration>,
}

impl RemoteConfig {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(database_id: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            database_id: Some(database_id.into()),
            collection_id: Some(collection_id.into()),
            timeout: None,
        }
    }

    fn collection(&self) -> Result<CollectionRef, RemoteError> {
        match (&self.database_id, &self.collection_id) {
            (Some(database_id), Some(collection_id)) => Ok(CollectionRef {
                database_id: database_id.clone(),
                collection_id: collection_id.clone(),
            }),
            _ => Err(RemoteError::Configuration(
                "database and collection identifiers are required".to_string(),
            )),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(Self::DEFAULT_TIMEOUT)
    }
}

/// Divergence report. Matching is by document id only; an account that
/// exists on both sides under different ids shows up in both lists.
#[derive(Debug)]
pub struct SyncStatus {
    pub total_local: usize,
    pub total_remote: usize,
    pub local_only: Vec<Account>,
    pub remote_only: Vec<AccountDocument>,
    pub is_synced: bool,
}

/// One repair failure, attributed to the account it concerned.
#[derive(Debug)]
pub struct SyncFixError {
    pub email: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct FixReport {
    /// Emails of local-only accounts pushed to the remote store.
    pub fixed_local_accounts: Vec<String>,
    /// Emails of remote-only accounts pulled into the local cache.
    pub fixed_remote_accounts: Vec<String>,
    pub errors: Vec<SyncFixError>,
    pub is_synced: bool,
}

pub struct AccountReconciler {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteAccountStore>,
    config: RemoteConfig,
}

impl AccountReconciler {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteAccountStore>,
        config: RemoteConfig,
    ) -> Self {
        Self {
            store,
            remote,
            config,
        }
    }

    /// Run a remote operation on a helper thread under the configured
    /// timeout. A worker that misses the deadline keeps running but its
    /// result is dropped.
    fn with_timeout<T, F>(&self, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RemoteAccountStore, &CollectionRef) -> Result<T, RemoteError>
            + Send
            + 'static,
    {
        let collection = self.config.collection()?;
        let remote = Arc::clone(&self.remote);
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(op(remote.as_ref(), &collection));
        });
        match receiver.recv_timeout(self.config.timeout()) {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient(
                "remote operation timed out".to_string(),
            )),
        }
    }

    fn list_remote(&self) -> Result<Vec<AccountDocument>, RemoteError> {
        self.with_timeout(|remote, collection| remote.list(collection, &[]))
    }

    // Single-document remote calls under the same timeout policy, for the
    // account service.

    pub(crate) fn remote_find(
        &self,
        filter: crate::storage::AccountQuery,
    ) -> Result<Vec<AccountDocument>, RemoteError> {
        self.with_timeout(move |remote, collection| remote.list(collection, &[filter]))
    }

    pub(crate) fn remote_create(
        &self,
        id: String,
        document: AccountDocument,
    ) -> Result<AccountDocument, RemoteError> {
        self.with_timeout(move |remote, collection| remote.create(collection, &id, &document))
    }

    pub(crate) fn remote_update(
        &self,
        id: String,
        document: AccountDocument,
    ) -> Result<AccountDocument, RemoteError> {
        self.with_timeout(move |remote, collection| remote.update(collection, &id, &document))
    }

    pub(crate) fn remote_delete(&self, id: String) -> Result<(), RemoteError> {
        self.with_timeout(move |remote, collection| remote.delete(collection, &id))
    }

    /// Diff the local cache against the remote collection by document id.
    pub fn check_sync_status(&self) -> Result<SyncStatus, RemoteError> {
        let remote_documents = self.list_remote()?;
        let local_accounts = self.store.get_accounts(None);

        let local_only: Vec<Account> = local_accounts
            .iter()
            .filter(|a| !remote_documents.iter().any(|d| d.id == a.id))
            .cloned()
            .collect();
        let remote_only: Vec<AccountDocument> = remote_documents
            .iter()
            .filter(|d| !local_accounts.iter().any(|a| a.id == d.id))
            .cloned()
            .collect();

        let status = SyncStatus {
            total_local: local_accounts.len(),
            total_remote: remote_documents.len(),
            is_synced: local_only.is_empty() && remote_only.is_empty(),
            local_only,
            remote_only,
        };
        debug!(
            "Sync status: {} local, {} remote, {} local-only, {} remote-only",
            status.total_local,
            status.total_remote,
            status.local_only.len(),
            status.remote_only.len()
        );
        Ok(status)
    }

    /// Repair both directions: push local-only accounts to the remote
    /// store and pull remote-only documents into the cache. Pushes are
    /// per-record (a duplicate means the remote already holds the account
    /// and counts as repaired); the pull is a single cache write. Safe to
    /// run repeatedly.
    pub fn fix(&self) -> Result<FixReport, RemoteError> {
        let status = self.check_sync_status()?;
        let mut report = FixReport::default();

        for account in &status.local_only {
            let document = AccountDocument::from_account(account);
            let id = account.id.clone();
            let result = self.with_timeout(move |remote, collection| {
                remote.create(collection, &id, &document)
            });
            match result {
                Ok(_) => {
                    info!("Pushed local account {} to remote", account.email);
                    report.fixed_local_accounts.push(account.email.clone());
                }
                // A unique index hit means the account is already there.
                Err(RemoteError::Duplicate(_)) => {
                    debug!("Account {} already exists remotely", account.email);
                    report.fixed_local_accounts.push(account.email.clone());
                }
                Err(e) => report.errors.push(SyncFixError {
                    email: account.email.clone(),
                    message: e.to_string(),
                }),
            }
        }

        if !status.remote_only.is_empty() {
            let mut merged = self.store.get_accounts(None);
            let mut pulled = Vec::with_capacity(status.remote_only.len());
            for document in status.remote_only {
                info!("Pulling remote account {} into local cache", document.email);
                pulled.push(document.email.clone());
                merged.push(document.into_account());
            }
            match self.store.replace_accounts(merged) {
                Ok(()) => report.fixed_remote_accounts = pulled,
                Err(e) => report.errors.push(SyncFixError {
                    email: String::new(),
                    message: e.to_string(),
                }),
            }
        }

        // What counts is whether the sides actually agree afterwards, so
        // re-run the comparison rather than trusting the repair log.
        report.is_synced = self.check_sync_status()?.is_synced;
        Ok(report)
    }

    /// Opportunistic background pass. Pushes local accounts the remote
    /// store has never seen (matching by id, then by email ignoring case)
    /// and overwrites the local cache with the remote-confirmed list,
    /// carrying stored passwords across. Never fails: any error is logged
    /// and reported as `false`.
    pub fn sync(&self) -> bool {
        let remote_documents = match self.list_remote() {
            Ok(documents) => documents,
            Err(e) => {
                warn!("Account sync skipped: {e}");
                return false;
            }
        };

        let local_accounts = self.store.get_accounts(None);
        let mut ok = true;

        for account in &local_accounts {
            if account.email.trim().is_empty() {
                continue;
            }
            let known = remote_documents.iter().any(|d| {
                d.id == account.id || d.email.eq_ignore_ascii_case(&account.email)
            });
            if known {
                continue;
            }
            let document = AccountDocument::from_account(account);
            let id = account.id.clone();
            let result = self.with_timeout(move |remote, collection| {
                remote.create(collection, &id, &document)
            });
            match result {
                Ok(_) => info!("Synced account {} to remote", account.email),
                Err(RemoteError::Duplicate(_)) => {
                    debug!("Account {} already exists remotely", account.email);
                }
                Err(e) => {
                    warn!("Failed to sync account {}: {e}", account.email);
                    ok = false;
                }
            }
        }

        let confirmed = match self.list_remote() {
            Ok(documents) => documents,
            Err(e) => {
                warn!("Account sync could not confirm remote state: {e}");
                return false;
            }
        };
        let refreshed: Vec<Account> = confirmed
            .into_iter()
            .map(|document| {
                let mut account = document.into_account();
                account.password = local_accounts
                    .iter()
                    .find(|a| {
                        a.id == account.id || a.email.eq_ignore_ascii_case(&account.email)
                    })
                    .and_then(|a| a.password.clone());
                account
            })
            .collect();
        if let Err(e) = self.store.replace_accounts(refreshed) {
            warn!("Account sync could not refresh the local cache: {e}");
            return false;
        }
        ok
    }

    /// Delete every remote account document, optionally keeping the one
    /// matching `keep_email` (ignoring case). Returns the number deleted;
    /// per-document failures are logged and skipped.
    pub fn cleanup_remote(&self, keep_email: Option<&str>) -> Result<usize, RemoteError> {
        let documents = self.list_remote()?;
        let mut deleted = 0;
        for document in documents {
            if let Some(keep) = keep_email {
                if document.email.eq_ignore_ascii_case(keep) {
                    debug!("Keeping remote account {}", document.email);
                    continue;
                }
            }
            let id = document.id.clone();
            let result =
                self.with_timeout(move |remote, collection| remote.delete(collection, &id));
            match result {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete remote account {}: {e}", document.email),
            }
        }
        info!("Remote cleanup removed {deleted} account(s)");
        Ok(deleted)
    }
}

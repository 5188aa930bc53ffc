//! In-process implementation of the remote account store.
//!
//! Serves two purposes: the default remote tier when no cloud backend is
//! configured, and the double that reconciliation tests run against. It
//! enforces the same unique indexes (document id, email, username) a real
//! deployment declares on the account collection.

use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;

use super::traits::{AccountDocument, AccountQuery, CollectionRef, RemoteAccountStore};
use super::traits::RemoteError;

#[derive(Default)]
pub struct InMemoryRemoteStore {
    documents: Mutex<HashMap<String, AccountDocument>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents, for assertions and status logs.
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches(document: &AccountDocument, filter: &AccountQuery) -> bool {
        match filter {
            AccountQuery::ByEmail(email) => document.email.eq_ignore_ascii_case(email),
            AccountQuery::ByUsername(username) => document.username == *username,
        }
    }
}

impl RemoteAccountStore for InMemoryRemoteStore {
    fn create(
        &self,
        _collection: &CollectionRef,
        id: &str,
        document: &AccountDocument,
    ) -> Result<AccountDocument, RemoteError> {
        let mut documents = self.documents.lock().unwrap();
        if documents.contains_key(id) {
            return Err(RemoteError::Duplicate(format!("document id {id}")));
        }
        for existing in documents.values() {
            if existing.email.eq_ignore_ascii_case(&document.email) {
                return Err(RemoteError::Duplicate(format!("email {}", document.email)));
            }
            if !document.username.is_empty() && existing.username == document.username {
                return Err(RemoteError::Duplicate(format!(
                    "username {}",
                    document.username
                )));
            }
        }
        let mut stored = document.clone();
        stored.id = id.to_string();
        documents.insert(id.to_string(), stored.clone());
        debug!("remote: created document {id} ({})", stored.email);
        Ok(stored)
    }

    fn get(&self, _collection: &CollectionRef, id: &str) -> Result<AccountDocument, RemoteError> {
        self.documents
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn list(
        &self,
        _collection: &CollectionRef,
        filters: &[AccountQuery],
    ) -> Result<Vec<AccountDocument>, RemoteError> {
        let documents = self.documents.lock().unwrap();
        let mut result: Vec<AccountDocument> = documents
            .values()
            .filter(|d| filters.iter().all(|f| Self::matches(d, f)))
            .cloned()
            .collect();
        // Stable ordering for callers and tests.
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    fn update(
        &self,
        _collection: &CollectionRef,
        id: &str,
        document: &AccountDocument,
    ) -> Result<AccountDocument, RemoteError> {
        let mut documents = self.documents.lock().unwrap();
        match documents.get_mut(id) {
            Some(existing) => {
                let mut updated = document.clone();
                updated.id = id.to_string();
                updated.created_at = existing.created_at;
                *existing = updated.clone();
                Ok(updated)
            }
            None => Err(RemoteError::NotFound(id.to_string())),
        }
    }

    fn delete(&self, _collection: &CollectionRef, id: &str) -> Result<(), RemoteError> {
        self.documents.lock().unwrap().remove(id);
        Ok(())
    }
}

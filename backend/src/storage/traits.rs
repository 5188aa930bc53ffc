//! Storage abstraction traits for the remote tier and outbound messaging.
//!
//! The remote account store is an external collaborator (a cloud document
//! collection with unique indexes on email and username); the domain layer
//! only ever talks to it through `RemoteAccountStore` so any backend can be
//! swapped in without touching reconciliation logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Account, AccountRole};
use thiserror::Error;

/// Failures surfaced by the remote account store.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Required database/collection identifiers are unset.
    #[error("remote store not configured: {0}")]
    Configuration(String),
    /// No document with the requested identifier.
    #[error("remote document not found: {0}")]
    NotFound(String),
    /// A unique index (identifier, email or username) rejected a create.
    #[error("duplicate key: {0}")]
    Duplicate(String),
    /// Network, quota or timeout failure. Callers on background paths
    /// log these and degrade rather than propagating.
    #[error("remote store unavailable: {0}")]
    Transient(String),
}

/// Addresses one account collection inside the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    pub database_id: String,
    pub collection_id: String,
}

/// An account as the remote store holds it. Never carries a password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDocument {
    pub id: String,
    pub name: String,
    pub email: String,
    pub username: String,
    pub role: AccountRole,
    #[serde(default)]
    pub school_id: String,
    #[serde(default)]
    pub school_name: String,
    #[serde(default)]
    pub grade_levels: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl AccountDocument {
    /// Project a locally cached account onto the remote document shape.
    pub fn from_account(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
            email: account.email.clone(),
            username: if account.username.is_empty() {
                account.email.clone()
            } else {
                account.username.clone()
            },
            role: account.role,
            school_id: account.school_id.clone(),
            school_name: account.school_name.clone().unwrap_or_default(),
            grade_levels: account.grade_levels.clone().unwrap_or_default(),
            created_at: Utc::now(),
            last_login: account.last_login,
        }
    }

    /// Materialize a local cache entry for this remote document.
    ///
    /// The password stays unset; remote documents never echo one.
    pub fn into_account(self) -> Account {
        Account {
            id: self.id,
            name: self.name,
            email: self.email,
            username: self.username,
            password: None,
            role: self.role,
            school_id: self.school_id,
            school_name: if self.school_name.is_empty() {
                None
            } else {
                Some(self.school_name)
            },
            school_logo: None,
            grade_levels: if self.grade_levels.is_empty() {
                None
            } else {
                Some(self.grade_levels)
            },
            last_login: self.last_login,
        }
    }
}

/// Filter for listing remote account documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountQuery {
    /// Case-insensitive exact email match.
    ByEmail(String),
    /// Exact username match.
    ByUsername(String),
}

/// Remote key-document store holding account records.
///
/// Identifier assignment: the caller proposes the key on `create` and the
/// store validates it (rejecting collisions with `Duplicate`), matching a
/// cloud document API where the client supplies the document id.
pub trait RemoteAccountStore: Send + Sync {
    /// Create a document under `id`. Fails with `Duplicate` when the id
    /// or a unique-indexed field (email, username) already exists.
    fn create(
        &self,
        collection: &CollectionRef,
        id: &str,
        document: &AccountDocument,
    ) -> Result<AccountDocument, RemoteError>;

    /// Fetch one document by id.
    fn get(&self, collection: &CollectionRef, id: &str) -> Result<AccountDocument, RemoteError>;

    /// List documents matching every filter. No filters lists everything.
    fn list(
        &self,
        collection: &CollectionRef,
        filters: &[AccountQuery],
    ) -> Result<Vec<AccountDocument>, RemoteError>;

    /// Overwrite the mutable fields of an existing document.
    fn update(
        &self,
        collection: &CollectionRef,
        id: &str,
        document: &AccountDocument,
    ) -> Result<AccountDocument, RemoteError>;

    /// Delete a document. Deleting a missing id is a no-op.
    fn delete(&self, collection: &CollectionRef, id: &str) -> Result<(), RemoteError>;
}

/// Outbound WhatsApp capability: deliver `body` to `phone`, reporting
/// success. Phone numbers are expected to carry the country prefix.
pub trait WhatsAppTransport: Send + Sync {
    fn send(&self, phone: &str, body: &str) -> bool;
}

//! Domain services: the local datastore, account lifecycle and
//! reconciliation, bulk import, and parent messaging.

pub mod account_service;
pub mod account_sync;
pub mod csv;
pub mod drafts;
pub mod errors;
pub mod import_service;
pub mod local_store;
pub mod messaging_service;

pub use account_service::{AccountError, AccountService};
pub use account_sync::{AccountReconciler, FixReport, RemoteConfig, SyncFixError, SyncStatus};
pub use drafts::{
    AccountDraft, FeeDraft, InstallmentDraft, MessageDraft, SchoolDraft, StudentDraft,
};
pub use errors::StoreError;
pub use import_service::{
    process_rows, ImportCounts, ImportMerger, ImportRow, ImportedFee, ImportedStudent,
    ProcessedImport,
};
pub use local_store::{Listener, LocalStore, SubscriptionId};
pub use messaging_service::{MessageTemplate, MessagingService};

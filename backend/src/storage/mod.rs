//! Storage layer: the local JSON tier and the remote store abstraction.

pub mod json;
pub mod memory;
pub mod traits;

pub use json::JsonConnection;
pub use memory::InMemoryRemoteStore;
pub use traits::{
    AccountDocument, AccountQuery, CollectionRef, RemoteAccountStore, RemoteError,
    WhatsAppTransport,
};

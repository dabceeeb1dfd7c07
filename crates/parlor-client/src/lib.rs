pub mod auth;
pub mod client;
pub mod composer;
pub mod config;
pub mod credential;
pub mod error;
pub mod feed;
pub mod store;
pub mod subscription;
pub mod transport;

pub use auth::Authenticator;
pub use client::{ChatClient, ConversationSession};
pub use composer::{MessageComposer, SentMessage};
pub use config::{BackoffConfig, ClientConfig};
pub use credential::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{ConfigError, CredentialError, SyncError, TransportError};
pub use feed::{Feed, LiveOutcome};
pub use store::{FeedUpdate, PageSummary, PaginatedFeedStore};
pub use subscription::{ConnectionState, SubscriptionManager, SubscriptionNotice};
pub use transport::{Operation, OperationKind, Routed, TransportRouter};

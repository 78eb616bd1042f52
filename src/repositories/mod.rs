//! # Repository Layer
//!
//! SeaORM access for credentials, OAuth states, sync job progress and the
//! local entity tables written by the importer.

pub mod contact;
pub mod exchange;
pub mod oauth_state;
pub mod oauth_token;
pub mod sync_job;
pub mod task;

pub use contact::ContactStore;
pub use exchange::ExchangeStore;
pub use oauth_state::OAuthStateRepository;
pub use oauth_token::{NewToken, RefreshMetadata, StoredToken, TokenRepository};
pub use sync_job::{NewSyncJob, SyncJobRepository};
pub use task::TaskStore;

//! # Data Models
//!
//! SeaORM entities for the credential tables, the sync job progress table and
//! the three local entity tables fed by the importer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod contact;
pub mod exchange;
pub mod oauth_state;
pub mod oauth_token;
pub mod sync_job;
pub mod task;

pub use contact::Entity as Contact;
pub use exchange::Entity as Exchange;
pub use oauth_state::Entity as OAuthState;
pub use oauth_token::Entity as OAuthToken;
pub use sync_job::Entity as SyncJob;
pub use task::Entity as Task;

/// Kind of external record an import run pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Contacts,
    Matters,
    Tasks,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Contacts, EntityType::Matters, EntityType::Tasks];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Contacts => "contacts",
            EntityType::Matters => "matters",
            EntityType::Tasks => "tasks",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contacts" | "contact" => Ok(EntityType::Contacts),
            "matters" | "matter" | "exchanges" => Ok(EntityType::Matters),
            "tasks" | "task" => Ok(EntityType::Tasks),
            other => Err(other.to_string()),
        }
    }
}

//! Database migrations for the exchange sync engine.
//!
//! The schema is a fixed, versioned contract: the engine depends on these
//! tables as declared here and never inspects the live schema.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_000001_create_oauth_tokens;
mod m2025_11_10_000002_create_oauth_states;
mod m2025_11_10_000003_create_sync_jobs;
mod m2025_11_10_000004_create_contacts;
mod m2025_11_10_000005_create_exchanges;
mod m2025_11_10_000006_create_tasks;
mod m2025_11_10_000007_add_sync_job_lease;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_000001_create_oauth_tokens::Migration),
            Box::new(m2025_11_10_000002_create_oauth_states::Migration),
            Box::new(m2025_11_10_000003_create_sync_jobs::Migration),
            Box::new(m2025_11_10_000004_create_contacts::Migration),
            Box::new(m2025_11_10_000005_create_exchanges::Migration),
            Box::new(m2025_11_10_000006_create_tasks::Migration),
            Box::new(m2025_11_10_000007_add_sync_job_lease::Migration),
        ]
    }
}

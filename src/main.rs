//! # Exchange Sync CLI
//!
//! Thin administrative client of the engine: migrations, the authorization
//! bootstrap, and start/status/pause/resume of import runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use exchange_sync::api_client::ApiClient;
use exchange_sync::config::{AppConfig, ConfigLoader};
use exchange_sync::crypto::CryptoKey;
use exchange_sync::models::EntityType;
use exchange_sync::oauth::OAuthClient;
use exchange_sync::repositories::{OAuthStateRepository, TokenRepository};
use exchange_sync::sync::{StartOptions, SyncService};
use exchange_sync::token_manager::{CredentialSource, TokenManager};
use exchange_sync::{db, telemetry};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "exchange-sync", version, about = "Practice-management synchronization engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Print an authorize URL for the operator to open
    AuthorizeUrl,
    /// Complete authorization with the state and code from the callback
    Authorize { state: String, code: String },
    /// Show the active credential (never the secret itself)
    Token,
    /// Start an import run and follow it until it ends
    Start {
        /// contacts, matters or tasks
        entity: String,
        /// Continue from the last committed cursor
        #[arg(long)]
        resume: bool,
        /// Use a unique sync id for this run
        #[arg(long)]
        one_shot: bool,
    },
    /// Print the status of a sync id as JSON
    Status { sync_id: String },
    /// Request a pause; the run stops after its current page
    Pause { sync_id: String },
    /// Resume a paused run and follow it until it ends
    Resume { sync_id: String },
    /// Run the proactive token refresher until interrupted
    Refresher,
}

struct Engine {
    config: AppConfig,
    db: DatabaseConnection,
    tokens: Arc<TokenManager>,
}

impl Engine {
    async fn connect(config: AppConfig) -> Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("crypto key not present in configuration")?;
        let key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

        let db = db::init_pool(&config)
            .await
            .context("initializing database connection pool")?;

        let endpoint = OAuthClient::new(
            &config.provider,
            Duration::from_millis(config.api_retry.request_timeout_ms),
        )
        .context("building OAuth client")?;

        let tokens = Arc::new(TokenManager::new(
            TokenRepository::new(db.clone(), key),
            OAuthStateRepository::new(db.clone()),
            Arc::new(endpoint),
            config.token_refresh.clone(),
            config.provider.state_ttl_minutes,
        ));

        Ok(Self { config, db, tokens })
    }

    fn sync_service(&self) -> Result<SyncService> {
        let credentials: Arc<dyn CredentialSource> = self.tokens.clone();
        let client = ApiClient::new(
            &self.config.provider.api_base_url,
            &self.config.provider.slug,
            self.config.sync.page_size,
            self.config.api_retry.clone(),
            credentials,
        )
        .context("building API client")?;

        Ok(SyncService::new(
            self.db.clone(),
            Arc::new(client),
            self.config.sync.clone(),
        ))
    }
}

/// Follow a run; Ctrl-C requests a pause and waits for the page in flight.
async fn follow(service: &SyncService, sync_id: &str) -> Result<()> {
    let status = tokio::select! {
        status = service.wait_for(sync_id) => status?,
        _ = tokio::signal::ctrl_c() => {
            info!(sync_id, "interrupt received; pausing after current page");
            service.pause_sync(sync_id).await?;
            service.wait_for(sync_id).await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;
    info!(profile = %config.profile, "configuration loaded");

    if let Command::Migrate = cli.command {
        let db = db::init_pool(&config)
            .await
            .context("initializing database connection pool")?;
        db::health_check(&db).await?;
        db::run_migrations(&db).await?;
        println!("migrations applied");
        return Ok(());
    }

    let engine = Engine::connect(config).await?;
    let provider = engine.config.provider.slug.clone();

    match cli.command {
        Command::Migrate => {}
        Command::AuthorizeUrl => {
            let request = engine.tokens.begin_authorization(&provider).await?;
            println!("{}", request.url);
            println!("state expires at {}", request.expires_at.to_rfc3339());
        }
        Command::Authorize { state, code } => {
            engine
                .tokens
                .complete_authorization(&provider, &state, &code)
                .await?;
            println!("credential installed for {provider}");
        }
        Command::Token => match engine.tokens.store().find_active(&provider).await? {
            Some(token) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "provider": token.provider,
                        "token_id": token.id,
                        "expires_at": token.expires_at.to_rfc3339(),
                        "has_refresh_token": token.refresh_token.is_some(),
                        "refresh_metadata": token.metadata,
                    }))?
                );
            }
            None => println!("no active credential for {provider}"),
        },
        Command::Start {
            entity,
            resume,
            one_shot,
        } => {
            let entity_type: EntityType = entity.parse().map_err(|e: String| anyhow!(e))?;
            let service = engine.sync_service()?;
            let sync_id = service
                .start_sync(entity_type, StartOptions { resume, one_shot })
                .await?;
            info!(sync_id = %sync_id, "sync started");
            follow(&service, &sync_id).await?;
        }
        Command::Status { sync_id } => {
            let status = engine.sync_service()?.get_sync_status(&sync_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Pause { sync_id } => {
            engine.sync_service()?.pause_sync(&sync_id).await?;
            println!("pause requested for {sync_id}");
        }
        Command::Resume { sync_id } => {
            let service = engine.sync_service()?;
            service.resume_sync(&sync_id).await?;
            follow(&service, &sync_id).await?;
        }
        Command::Refresher => {
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });
            engine.tokens.run(shutdown).await;
        }
    }

    Ok(())
}

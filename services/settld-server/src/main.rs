//! settld-server
//!
//! The settlement core server: store selection and migrations, keyring
//! bootstrap, destination seeding, the HTTP dispatcher and the autotick
//! scheduler.

mod autotick;
mod config;

use anyhow::Context;
use autotick::Autotick;
use clap::Parser;
use config::{ServerConfig, StoreKind};
use settld_api::{ApiConfig, AppState};
use settld_crypto::{KeyPair, SignerRing};
use settld_engine::RunEngine;
use settld_outbox::{DeliveryConfig, DeliveryWorker, HttpTransport};
use settld_store::{MemStore, PgStore, PgStoreConfig, Store};
use settld_toolcall::ToolCallEngine;
use settld_types::{DestinationId, TenantId, WebhookDestination, PLATFORM_TENANT};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "settld-server", version, about = "Settld settlement core")]
struct Args {
    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the store backend (mem | pg)
    #[arg(long)]
    store: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Some(store) = args.store {
        std::env::set_var("STORE", store);
    }
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Mem => {
            info!("using in-memory store");
            Arc::new(MemStore::new())
        }
        StoreKind::Pg => {
            let url = config
                .database_url
                .clone()
                .context("DATABASE_URL is required for the pg store")?;
            let mut pg = PgStoreConfig::new(url, config.pg_schema.clone());
            pg.migrate_on_startup = config.migrate_on_startup;
            info!(schema = %config.pg_schema, "using postgres store");
            Arc::new(PgStore::connect(&pg).await?)
        }
    };

    let ring = bootstrap_ring(&store, config.signer_seed.as_deref()).await?;
    seed_destinations(&store, &config).await?;

    let api_config = ApiConfig {
        ops_tokens: config.ops_tokens.clone(),
        static_api_keys: config.static_api_keys.clone(),
        require_signer_key: config.require_signer_key,
        protocol_version: "1.0".to_string(),
    };
    let state = AppState::new(store.clone(), ring, api_config);

    if config.autotick {
        let worker = DeliveryWorker::new(
            store.clone(),
            Arc::new(HttpTransport::new()),
            DeliveryConfig {
                http_timeout: config.delivery_http_timeout,
                ..DeliveryConfig::default()
            },
        );
        let tick = Autotick::new(
            store.clone(),
            worker,
            RunEngine::new(store.clone()),
            ToolCallEngine::new(store.clone()),
            config.autotick_interval,
        );
        info!(interval = ?config.autotick_interval, "autotick scheduler enabled");
        tokio::spawn(tick.run());
    }

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "settld-server listening");

    axum::serve(listener, settld_api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

/// Derive or generate the platform signer and restore the published
/// previous-key history from the store
async fn bootstrap_ring(
    store: &Arc<dyn Store>,
    seed: Option<&str>,
) -> anyhow::Result<SignerRing> {
    let keypair = match seed {
        Some(seed) => KeyPair::from_seed(seed),
        None => KeyPair::generate(),
    };
    let ring = SignerRing::new(keypair);

    let platform = TenantId::from(PLATFORM_TENANT);
    if let Some(stored) = store.get_keyset(&platform).await? {
        ring.restore_previous(&stored)?;
        info!(previous = stored.previous.len(), "restored keyset history");
    }
    store
        .commit(
            &platform,
            settld_store::WriteBatch::new().put_keyset(ring.to_store()),
        )
        .await?;
    Ok(ring)
}

/// Load `PROXY_EXPORT_DESTINATIONS` into the store so the worker and the
/// ops surface share one source of truth
async fn seed_destinations(store: &Arc<dyn Store>, config: &ServerConfig) -> anyhow::Result<()> {
    for (tenant, destinations) in &config.export_destinations {
        let tenant = TenantId::from_string(tenant.clone());
        for dest in destinations {
            let destination = WebhookDestination {
                destination_id: dest
                    .destination_id
                    .clone()
                    .map(DestinationId::from_string)
                    .unwrap_or_default(),
                tenant_id: tenant.clone(),
                url: dest.url.clone(),
                secret: dest.secret.clone(),
                topics: dest.topics.clone(),
            };
            store.put_destination(&tenant, &destination).await?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

use gate_rs::api::{self, AppState};
use gate_rs::capacity::{CapacityPolicy, CapacityStore};
use gate_rs::clock::{Clock, SystemClock};
use gate_rs::config::Config;
use gate_rs::pipeline::AdmissionPipeline;
use gate_rs::quota::{QuotaCounter, QuotaDay};
use gate_rs::ratelimit::{MemoryCounterStore, RateLimiter};
use gate_rs::store::fs::FsBlobStore;
use gate_rs::store::memory::MemoryMetadataStore;
use gate_rs::store::sqlite::SqliteMetadataStore;
use gate_rs::store::{BlobStore, MetadataStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = if std::path::Path::new("config.toml").exists() {
        Config::from_file("config.toml")?
    } else {
        Config::default()
    };

    // Initialize logging
    let level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    if config.logging.format == "pretty" {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .pretty()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Starting gate-rs");
    info!("  Listening on: {}", config.server.listen_addr);
    info!("  Database: {}", config.storage.database_url);
    info!("  Blob path: {}", config.storage.blob_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Stores
    let metadata: Arc<dyn MetadataStore> = if config.storage.database_url.starts_with("sqlite") {
        Arc::new(SqliteMetadataStore::connect(&config.storage.database_url).await?)
    } else {
        info!("no sqlite url configured, using in-memory metadata store");
        Arc::new(MemoryMetadataStore::new())
    };
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.blob_path.clone()));

    // Capacity policy from config
    let mut policy = CapacityPolicy::new(config.capacity.default_max_items);
    for (tier, max_items) in &config.capacity.tiers {
        policy = policy.with_tier(tier.clone(), *max_items);
    }

    let capacity = Arc::new(
        CapacityStore::open(
            metadata,
            blobs,
            Arc::clone(&clock),
            policy,
            config.capacity.legacy_blob_prefixes.clone(),
        )
        .await?,
    );
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        Arc::clone(&clock),
    ));
    let quota = Arc::new(QuotaCounter::new(config.quota.retention_days));

    // Background maintenance
    Arc::clone(&limiter).spawn_sweeper(Duration::from_secs(config.limits.sweep_interval_secs));
    Arc::clone(&capacity)
        .spawn_reconciler(Duration::from_secs(config.capacity.reconcile_interval_secs));

    let retention_quota = Arc::clone(&quota);
    let retention_clock = Arc::clone(&clock);
    let retention_interval = Duration::from_secs(config.quota.cleanup_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(retention_interval);
        loop {
            ticker.tick().await;
            let today = QuotaDay::from_timestamp(retention_clock.now());
            retention_quota.cleanup_expired(today).await;
        }
    });

    let pipeline = Arc::new(AdmissionPipeline::new(
        limiter,
        quota,
        capacity,
        Arc::clone(&clock),
        config.limits.clone(),
        config.quota.clone(),
    ));

    let state = Arc::new(AppState { pipeline, clock });
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    info!("gate-rs listening on {}", config.server.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

use paybridge::api::{self, AppState};
use paybridge::config::Config;
use paybridge::payments::{AdapterRegistry, PaymentService};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;

    tracing::info!("Starting paybridge");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Payments config: {:?}", config.payments);

    let registry = Arc::new(AdapterRegistry::from_settings(&config.payments.adapters));
    if registry.names().is_empty() {
        tracing::warn!("No payment adapters registered");
    }

    let service = PaymentService::new(registry)
        .with_default_adapter(config.payments.default_adapter.clone());

    let mut state_redis = None;
    let service = match &config.redis {
        Some(redis) => {
            let pool = paybridge::cache::init_cache_pool(
                paybridge::cache::CacheConfig::with_url(redis.url.clone()),
            )
            .await?;
            tracing::info!("Notification de-duplication backed by Redis");
            state_redis = Some(pool.clone());
            service.with_deduplicator(Arc::new(
                paybridge::payments::dedup::RedisDeduplicator::new(pool),
            ))
        }
        None => {
            tracing::warn!("No Redis configured, de-duplication is per-process");
            service
        }
    };

    let mut state = AppState::new(Arc::new(service), config.server.environment.clone());
    state.redis = state_redis;

    let app = api::app(state, &config.payments.route_prefix);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Plain text by default, JSON lines when `LOG_JSON=true`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_JSON")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

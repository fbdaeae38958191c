use std::net::SocketAddr;
use std::sync::Arc;

use taskflow::api::{self, AppState};
use taskflow::auth::IdentityResolver;
use taskflow::config::AppConfig;
use taskflow::error::Result;
use taskflow::rate_limit::{self, RateLimiter};
use taskflow::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        eprintln!("  export JWT_SECRET_KEY=<a long random string>");
        std::process::exit(1);
    }

    eprintln!("TaskFlow API v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Environment: {}", config.environment);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .inspect_err(|e| {
                eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            })?,
    );
    eprintln!("   Database: {}", config.db_path);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    rate_limit::spawn_prune_task(Arc::clone(&limiter));
    eprintln!(
        "   Rate limit: {} requests / {}s",
        config.rate_limit.max_requests,
        config.rate_limit.window.as_secs()
    );

    let state = AppState {
        db,
        resolver: Arc::new(IdentityResolver::new(&config.auth)),
        limiter,
        environment: config.environment.clone(),
    };
    let app = api::router(state, &config.cors_origins);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    eprintln!("   Listening: http://{}\n", addr);
    tracing::info!(addr = %addr, "TaskFlow API started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
    })
    .await?;

    Ok(())
}

//! HTTP surface: shared state, service routes, and the layered router.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::accounts::routes::auth_routes;
use crate::auth::IdentityResolver;
use crate::rate_limit::{RateLimiter, rate_limit_middleware};
use crate::store::Database;
use crate::tags::routes::tag_routes;
use crate::tasks::routes::task_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub resolver: Arc<IdentityResolver>,
    pub limiter: Arc<RateLimiter>,
    /// Reported by `/health`.
    pub environment: String,
}

impl FromRef<AppState> for Arc<IdentityResolver> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.resolver)
    }
}

impl FromRef<AppState> for Arc<dyn Database> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.db)
    }
}

/// Build the full router: routes, rate limiting, tracing, and CORS.
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let limiter = Arc::clone(&state.limiter);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(auth_routes())
        .merge(task_routes())
        .merge(tag_routes())
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) if o != "*" => Some(v),
            _ => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([
            header::RETRY_AFTER,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
        ])
        .allow_credentials(true)
}

// ── Service ─────────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "TaskFlow API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
    }))
}

/// GET /health. Always 200; the database field reports the ping result.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            "disconnected"
        }
    };
    Json(json!({
        "status": "ok",
        "database": database,
        "environment": state.environment,
    }))
}

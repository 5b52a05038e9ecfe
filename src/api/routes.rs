use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Trade endpoints
        .route(
            "/trades",
            get(handlers::list_trades).post(handlers::create_trade),
        )
        .route("/trades/:id", get(handlers::get_trade))
        .route("/trades/:id/stats", get(handlers::get_trade_stats))
        .route("/trades/:id/pause", post(handlers::pause_trade))
        .route("/trades/:id/resume", post(handlers::resume_trade))
        .route("/trades/:id/cancel", post(handlers::cancel_trade))
        // System endpoints
        .route("/strategies", get(handlers::list_strategies))
        .route("/health", get(handlers::health_handler))
        // Add state, tracing and CORS
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

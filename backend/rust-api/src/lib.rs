use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Protected endpoints (require JWT)
        .nest(
            "/api/v1",
            api_routes(app_state.clone()).layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn api_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        // Throttle applies to generation only; reads are cheap
        .route(
            "/quizzes",
            post(handlers::quizzes::create_quiz)
                .layer(middleware::from_fn_with_state(
                    app_state,
                    middlewares::rate_limit::generation_throttle_middleware,
                ))
                .get(handlers::quizzes::list_quizzes),
        )
        .route("/quizzes/{id}", get(handlers::quizzes::get_quiz))
        .route("/models", get(handlers::candidates::list_models))
}

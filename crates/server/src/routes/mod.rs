use axum::{Router, middleware, routing::get};
use tower_http::cors::{Any, CorsLayer};

use crate::{AppState, middleware as app_middleware};

pub mod events;
pub mod health;
pub mod runs;

pub fn router(state: AppState) -> Router {
    let base_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(runs::router())
        .merge(events::router())
        .with_state(state);

    Router::new()
        .nest("/api", base_routes)
        .layer(middleware::from_fn(app_middleware::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

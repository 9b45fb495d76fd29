//! API routes.

pub mod auth;
pub mod catalog;
pub mod health;
pub mod runs;
pub mod tasks;
pub mod webhooks;

use crate::AppState;
use axum::Router;
use axum::middleware;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .nest("/tasks", tasks::router())
        .nest("/runs", runs::router())
        .merge(catalog::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .merge(protected)
        .nest("/webhooks", webhooks::router())
        .merge(health::router())
        .with_state(state)
}

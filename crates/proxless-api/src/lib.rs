//! proxless-api — admin API and push-based discovery feed.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/routes` | List all routes |
//! | GET | `/api/v1/routes/{id}` | Get one route |
//! | PUT | `/api/v1/routes/{id}` | Create or update a route |
//! | DELETE | `/api/v1/routes/{id}` | Delete a route |

pub mod handlers;

use axum::Router;
use axum::routing::get;
use proxless_state::RouteIndex;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub index: RouteIndex,
}

/// Build the complete API router.
pub fn build_router(index: RouteIndex) -> Router {
    let api_state = ApiState { index };

    let api_routes = Router::new()
        .route("/routes", get(handlers::list_routes))
        .route(
            "/routes/{id}",
            get(handlers::get_route)
                .put(handlers::put_route)
                .delete(handlers::delete_route),
        )
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}

use axum::{middleware, routing::get, Router};

use crate::{metering, ratelimit};

pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/usage/license",
            get(metering::usage_license).post(metering::usage_license),
        )
        .route_layer(middleware::from_fn(ratelimit::enforce))
}

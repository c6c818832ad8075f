//! Middleware components for the functron server.
//!
//! This module handles:
//! - Request tracing and logging

use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};

//--------------------------------------------------------------------------------------------------
// Middleware Functions
//--------------------------------------------------------------------------------------------------

/// Log incoming requests and the status they were answered with
pub async fn logging_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    tracing::info!("request: {} {}", method, uri);

    let response = next.run(req).await;

    tracing::info!(
        "response: {} {}: {} in {:?}",
        method,
        uri,
        response.status(),
        started.elapsed()
    );

    response
}

//! HTTP route handlers.

pub mod boot;

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::bootconfig::BootConfigRetriever;

/// Path of the iPXE chain-load script.
pub const BOOT_SCRIPT_PATH: &str = "/boot.ipxe";

/// HTTP request logging middleware.
async fn request_logging(request: Request<Body>, next: Next) -> Response {
    // Absent when the router is driven without a real listener (tests).
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let method = request.method().clone();
    let uri = request.uri().clone();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        remote = %remote,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        user_agent = %user_agent,
        duration_ms = started.elapsed().as_millis() as u64,
        "HTTP request"
    );

    response
}

/// Create the application router with all routes.
pub fn create_router(retriever: BootConfigRetriever) -> Router {
    Router::new()
        .route(BOOT_SCRIPT_PATH, get(boot::handle_boot_script))
        .layer(middleware::from_fn(request_logging))
        .with_state(retriever)
}

//! HTTP transport for the router
//!
//! Every path lands in one fallback handler. POST bodies are dispatched as
//! RPC envelopes on the blocking pool; GET serves files from a handle's
//! static root.

use super::envelope::Response as Envelope;
use super::router::Router;
use crate::utils::AppResult;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

pub fn app(router: Arc<Router>) -> axum::Router {
    axum::Router::new().fallback(handle_request).with_state(router)
}

/// Serve `router` on `addr` until `shutdown` completes
pub async fn serve<F>(router: Arc<Router>, addr: SocketAddr, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app(router).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

pub async fn handle_request(
    State(router): State<Arc<Router>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    match method {
        Method::POST => dispatch(router, path, body).await,
        Method::GET => static_file(router, path).await,
        _ => envelope(
            StatusCode::METHOD_NOT_ALLOWED,
            &Envelope::error(format!("Method {} not allowed", method)),
        ),
    }
}

async fn dispatch(router: Arc<Router>, path: String, body: Bytes) -> Response {
    if router.route(&path).is_none() {
        return envelope(
            StatusCode::NOT_FOUND,
            &Envelope::error(format!("No handler for path {}", path)),
        );
    }

    match tokio::task::spawn_blocking(move || router.dispatch(&path, &body)).await {
        Ok(bytes) => json(StatusCode::OK, bytes),
        Err(e) => envelope(
            StatusCode::INTERNAL_SERVER_ERROR,
            &Envelope::error(format!("Dispatch task failed: {}", e)),
        ),
    }
}

// An isolated handle answers `static_root` over its pipe, so resolve off the runtime
async fn static_file(router: Arc<Router>, path: String) -> Response {
    let file = match tokio::task::spawn_blocking(move || router.static_file(&path)).await {
        Ok(Some(Ok(file))) => file,
        Ok(Some(Err(e))) => return envelope(StatusCode::BAD_REQUEST, &Envelope::error(e.to_string())),
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            return envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                &Envelope::error(format!("Static lookup failed: {}", e)),
            )
        }
    };

    match tokio::fs::read(&file).await {
        Ok(contents) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            contents,
        )
            .into_response(),
        Err(e) => {
            tracing::debug!("Static file {:?} unavailable: {}", file, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn envelope(status: StatusCode, envelope: &Envelope) -> Response {
    json(status, envelope.encode())
}

fn json(status: StatusCode, bytes: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

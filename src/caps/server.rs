//! HTTP front for a [`CapsTable`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::{CapsResponse, CapsTable, CAPS_PREFIX};

impl IntoResponse for CapsResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();
        let headers = response.headers_mut();
        if let Ok(content_type) = HeaderValue::from_str(&self.content_type) {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        if !self.keep_alive {
            headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}

/// Router serving `GET /CAPS/:token` from `table`.
pub fn router(table: Arc<CapsTable>) -> Router {
    Router::new()
        .route("/CAPS/:token", get(serve_capability))
        .with_state(table)
}

async fn serve_capability(
    State(table): State<Arc<CapsTable>>,
    Path(token): Path<String>,
) -> CapsResponse {
    let path = format!("{}{}", CAPS_PREFIX, token);
    // Handlers are synchronous and only copy in-memory state.
    table.dispatch("GET", &path)
}

/// Serve `table` on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, table: Arc<CapsTable>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "serving capability endpoints");
    }
    axum::serve(listener, router(table)).await
}

/// Bind `addr` and serve `table` on it.
pub async fn bind_and_serve(addr: SocketAddr, table: Arc<CapsTable>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, table).await
}

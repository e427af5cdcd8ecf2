use crate::controller;
use crate::session::SessionStore;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// Bind `addr` and serve the HTTP/SSE controller until the process is
/// terminated. `addr` is a `host:port` pair, e.g. `127.0.0.1:8787`.
pub async fn execute(store: Arc<SessionStore>, addr: &str) -> anyhow::Result<()> {
    let router = controller::router(store);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("controller listening on http://{addr}");
    axum::serve(listener, router)
        .await
        .context("controller server failed")?;
    Ok(())
}

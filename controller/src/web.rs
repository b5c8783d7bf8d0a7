use std::net::SocketAddr;

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use stove_common::ControllerStatus;
use tokio::{net::TcpListener, sync::watch};
use tracing::info;

type StatusRx = watch::Receiver<ControllerStatus>;

pub fn router(status: StatusRx) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/healthz", get(handle_health))
        .with_state(status)
}

pub async fn serve(status: StatusRx, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status server listening on http://{addr}");
    axum::serve(listener, router(status)).await?;
    Ok(())
}

async fn handle_get_status(State(status): State<StatusRx>) -> impl IntoResponse {
    let snapshot = status.borrow().clone();
    Json(snapshot)
}

async fn handle_health() -> &'static str {
    "ok"
}

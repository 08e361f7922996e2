//! Plain-HTTP liveness listener. The broker's real health surface is the
//! gRPC `Health` RPC on the main service port; this exists only so that
//! `GET /healthz` is uniform across every binary in the platform rather
//! than requiring a gRPC client to check liveness.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn serve(port: u16, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = Router::new().route("/healthz", get(healthz));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

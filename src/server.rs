use std::net::SocketAddr;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::Config,
    error::Error,
    link::{LinkHandle, LinkState},
    ports::PortEnumerator,
    transport::Transport,
    websocket,
};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 3000;

async fn run(
    config: Config,
    link: LinkHandle,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    let app = Router::new()
        .route("/client", get(websocket::ws_handler))
        .route("/api/status", get(show_status))
        .route("/api/ports", get(list_ports))
        .route("/api/connect", post(connect))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Each websocket needs to be able to reach the link
                .layer(Extension(link.clone()))
                // The config should be known to the web server
                .layer(Extension(config)),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Io(format!("Could not bind {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on {}", addr);

    let result = server.await.map_err(|e| Error::Io(e.to_string()));

    // The server only returns on failure.
    let _ = link.shutdown().await;

    result
}

fn spawn_link<E: PortEnumerator, T: Transport>(
    config: &Config,
    enumerator: E,
    transport: T,
) -> Result<LinkHandle, Error> {
    config.validate()?;
    Ok(LinkHandle::spawn(config, enumerator, transport))
}

/// Start the server on an arbitrary available port, using the serial ports of this machine.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(config: Config, allocated_port: oneshot::Sender<u16>) -> Result<(), Error> {
    config.validate()?;
    let link = LinkHandle::system(&config);
    run(config, link, None, Some(allocated_port)).await
}

/// Start the server on an arbitrary available port, using the given way to find and open devices.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port_with<E: PortEnumerator, T: Transport>(
    config: Config,
    enumerator: E,
    transport: T,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    let link = spawn_link(&config, enumerator, transport)?;
    run(config, link, None, Some(allocated_port)).await
}

/// Start the server on the given port, using the serial ports of this machine.
///
/// Returns the handle to the device link too, so the caller can shut it down.
pub fn run_on_port(
    config: Config,
    port: u16,
) -> Result<(LinkHandle, impl std::future::Future<Output = Result<(), Error>>), Error> {
    config.validate()?;
    let link = LinkHandle::system(&config);

    Ok((link.clone(), run(config, link, Some(port), None)))
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config.serialize_pretty()
}

async fn show_version() -> impl IntoResponse {
    format!("Sensor Keel v{}\n", env!("CARGO_PKG_VERSION"))
}

fn failure(e: Error) -> (StatusCode, Json<serde_json::Value>) {
    let code = match e {
        Error::AttemptInFlight => StatusCode::CONFLICT,
        Error::ActorGone => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (code, Json(serde_json::json!({ "error": e.to_string() })))
}

async fn show_status(Extension(link): Extension<LinkHandle>) -> impl IntoResponse {
    match link.status().await {
        Ok(status) => (StatusCode::OK, Json(serde_json::json!(status))),
        Err(e) => failure(e),
    }
}

async fn list_ports(Extension(link): Extension<LinkHandle>) -> impl IntoResponse {
    match link.list_candidates().await {
        Ok(ports) => (StatusCode::OK, Json(serde_json::json!(ports))),
        Err(e) => failure(e),
    }
}

/// The body of a connect request.
#[derive(Debug, Deserialize)]
struct ConnectRequest {
    port: Option<String>,
}

async fn connect(
    Extension(link): Extension<LinkHandle>,
    Json(request): Json<ConnectRequest>,
) -> impl IntoResponse {
    let Some(port) = request.port.filter(|port| !port.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Port not specified" })),
        );
    };

    info!(%port, "Connect requested");

    match link.connect_to(&port).await {
        Ok(status) if status.state == LinkState::Open => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "status": status })),
        ),
        Ok(status) => {
            let error = status
                .error
                .clone()
                .unwrap_or_else(|| format!("Could not connect to `{port}`"));
            warn!(%port, %error, "Connect failed");

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": error, "status": status })),
            )
        }
        Err(e) => failure(e),
    }
}

use crate::relay_logic::adapter::{event_queue, Subscription};
use crate::relay_logic::config::Config;
use crate::relay_logic::directory::{select_stream_port, ResourceKind};
use crate::relay_logic::model::ErrorPayload;
use crate::relay_logic::session::ViewerSession;
use crate::relay_logic::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::SinkExt;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Deserialize, Default)]
pub struct StreamQuery {
    /// Optional viewer-chosen connection id; must be unique on the port.
    #[serde(rename = "connectionId")]
    connection_id: Option<String>,
}

pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let app = Router::new()
        .route("/bulkio/{kind}/{*path}", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    log::info!("Relay server listening on {}", addr);

    if let (Some(cert_path), Some(key_path)) = (config.tls_cert_path, config.tls_key_path) {
        match RustlsConfig::from_pem_file(cert_path, key_path).await {
            Ok(tls_config) => {
                let handle = axum_server::Handle::new();
                spawn_graceful_shutdown(handle.clone(), shutdown);
                if let Err(e) = axum_server::bind_rustls(addr, tls_config)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
                {
                    log::error!("TLS server error: {}", e);
                }
            }
            Err(e) => {
                log::error!("Failed to load TLS configuration: {}", e);
            }
        }
    } else {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                    shutdown.recv().await.ok();
                    log::info!("Relay server shutting down.");
                });
                if let Err(e) = serve.await {
                    log::error!("Server error: {}", e);
                }
            }
            Err(e) => {
                log::error!("Failed to bind {}: {}", addr, e);
            }
        }
    }
}

/// Bridges the broadcast shutdown signal into axum-server's handle so the
/// TLS listener drains connections instead of running until process exit.
fn spawn_graceful_shutdown(handle: axum_server::Handle, mut shutdown: broadcast::Receiver<()>) {
    tokio::spawn(async move {
        shutdown.recv().await.ok();
        log::info!("Relay server shutting down.");
        handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
    });
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((kind, path)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, kind, path, query))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

/// Resolves the requested stream port and hands the socket to a session.
/// Any resolution failure is reported on the socket as a structured error,
/// then the socket is closed; nothing was subscribed yet at that point.
async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    kind: String,
    path: String,
    query: StreamQuery,
) {
    let port = match resolve_port(&state, &kind, &path) {
        Ok(port) => port,
        Err(payload) => {
            log::info!("Rejecting stream request /{kind}/{path}: {}", payload.message);
            let _ = socket.send(Message::Text(payload.to_json().into())).await;
            let _ = socket.close().await;
            return;
        }
    };

    let connection_id = query
        .connection_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| state.next_connection_id());

    let (sink, events) = event_queue(state.packet_queue_depth);
    let subscription = match Subscription::subscribe(Arc::clone(&port.source), &connection_id, sink)
    {
        Ok(subscription) => subscription,
        Err(e) => {
            let payload = ErrorPayload::new("SystemError", e.to_string());
            log::warn!("Could not subscribe '{}' to '{}': {}", connection_id, port.name, e);
            let _ = socket.send(Message::Text(payload.to_json().into())).await;
            let _ = socket.close().await;
            return;
        }
    };

    log::info!(
        "Viewer '{}' connected to port '{}' ({})",
        connection_id,
        port.name,
        port.element_type
    );
    let _gauge = state.session_opened();

    let session = ViewerSession::new(&connection_id, &port.element_type, state.resample_mode);
    session.run(socket, events, subscription, state.clone()).await;

    log::info!("Viewer '{}' disconnected", connection_id);
}

/// Splits `/bulkio/{kind}/{*path}` into a directory lookup plus a port name:
/// the final path segment names the port, everything before it identifies the
/// resource.
fn resolve_port(
    state: &AppState,
    kind: &str,
    path: &str,
) -> Result<crate::relay_logic::directory::PortEntry, ErrorPayload> {
    let kind: ResourceKind = kind
        .parse()
        .map_err(|e: crate::relay_logic::directory::ResolveError| {
            ErrorPayload::new(e.wire_kind(), e.to_string())
        })?;

    let mut segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let port_name = match segments.pop() {
        Some(name) if !segments.is_empty() => name,
        _ => {
            return Err(ErrorPayload::new(
                "SystemError",
                format!("stream path '{path}' must name a resource and a port"),
            ));
        }
    };

    let resource = state
        .directory
        .resolve(kind, &segments)
        .map_err(|e| ErrorPayload::new(e.wire_kind(), e.to_string()))?;

    let port = select_stream_port(&resource, &port_name)
        .map_err(|e| ErrorPayload::new(e.wire_kind(), e.to_string()))?;
    Ok(port.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay_logic::sim::SimDirectory;

    fn demo_state() -> AppState {
        AppState::new(Arc::new(SimDirectory::demo()), &Config::default())
    }

    #[test]
    fn resolves_component_port_from_path() {
        let state = demo_state();
        let port = resolve_port(&state, "component", "demo/siggen/out-float").unwrap();
        assert_eq!(port.name, "out-float");
        assert_eq!(port.element_type, "dataFloat");
    }

    #[test]
    fn unknown_resource_maps_to_resource_not_found() {
        let state = demo_state();
        let err = resolve_port(&state, "component", "demo/nosuch/out").unwrap_err();
        assert_eq!(err.error, "ResourceNotFound");
    }

    #[test]
    fn bad_kind_and_bad_port_are_system_errors() {
        let state = demo_state();

        let err = resolve_port(&state, "gadget", "demo/siggen/out-float").unwrap_err();
        assert_eq!(err.error, "SystemError");

        let err = resolve_port(&state, "component", "demo/siggen/nope").unwrap_err();
        assert_eq!(err.error, "SystemError");

        // Wrong direction and wrong namespace are rejections too.
        let err = resolve_port(&state, "component", "demo/siggen/in-float").unwrap_err();
        assert_eq!(err.error, "SystemError");
        let err = resolve_port(&state, "component", "demo/siggen/rf-info").unwrap_err();
        assert_eq!(err.error, "SystemError");
    }

    #[test]
    fn path_must_carry_resource_and_port() {
        let state = demo_state();
        let err = resolve_port(&state, "component", "only-port").unwrap_err();
        assert_eq!(err.error, "SystemError");
    }

    #[tokio::test]
    async fn shutdown_signal_drains_handle_driven_server() {
        let handle = axum_server::Handle::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        spawn_graceful_shutdown(handle.clone(), shutdown_rx);

        let app = Router::new().route("/health", get(health_handler));
        let server = tokio::spawn(
            axum_server::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
                .handle(handle.clone())
                .serve(app.into_make_service()),
        );

        // Wait until the listener is bound before signalling.
        handle.listening().await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server did not stop after shutdown signal")
            .unwrap()
            .unwrap();
    }
}

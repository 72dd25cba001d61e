//! The WebSocket gateway: one `/ws` connection per client, fed by the
//! coordinator's broadcast channel and forwarding inbound client messages
//! straight into coordinator calls.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tower_http::cors::CorsLayer;

type WsSink = SplitSink<WebSocket, Message>;

use crate::coordinator::Coordinator;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::storage::NotebookStore;

/// One WebSocket session is bound to exactly one coordinator and one kernel
/// process (see the `Session` glossary entry): `AppState` carries only what
/// is needed to spawn a fresh pair per connection, not a live one.
#[derive(Clone)]
pub struct AppState {
    pub kernel_binary: PathBuf,
    pub store: Arc<dyn NotebookStore>,
    pub notebook_id: String,
    pub connection_string: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let coordinator = match Coordinator::spawn(&state.kernel_binary, state.store, state.notebook_id).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!(error = %e, "failed to start kernel for session");
            return;
        }
    };
    if let Some(connection_string) = state.connection_string {
        if let Err(e) = coordinator.update_db_connection(connection_string).await {
            tracing::warn!(error = %e, "failed to apply initial database connection");
        }
    }

    let (mut sink, mut stream) = socket.split();
    let mut rx = coordinator.subscribe();

    for message in coordinator.initial_snapshot().await {
        if send(&mut sink, &message).await.is_err() {
            coordinator.shutdown().await;
            return;
        }
    }

    let mut forward_task = tokio::spawn(async move {
        while let Ok(message) = rx.recv().await {
            if send(&mut sink, &message).await.is_err() {
                break;
            }
        }
    });

    let inbound_coordinator = coordinator.clone();
    let mut inbound_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            let Message::Text(text) = message else { continue };
            let client_message: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed client message");
                    continue;
                }
            };
            if let Err(e) = dispatch(&inbound_coordinator, client_message).await {
                tracing::warn!(error = %e, "client command failed");
            }
        }
    });

    tokio::select! {
        _ = &mut forward_task => inbound_task.abort(),
        _ = &mut inbound_task => forward_task.abort(),
    }

    coordinator.shutdown().await;
}

async fn dispatch(coordinator: &Arc<Coordinator>, message: ClientMessage) -> crate::error::ServerResult<()> {
    match message {
        ClientMessage::Authenticate => {
            coordinator.authenticate();
            Ok(())
        }
        ClientMessage::CellUpdate { cell_id, code } => coordinator.update_cell(cell_id, code).await,
        ClientMessage::CreateCell { cell_type, after_cell_id } => coordinator.create_cell(cell_type, after_cell_id).await,
        ClientMessage::DeleteCell { cell_id } => coordinator.delete_cell(cell_id).await,
        ClientMessage::RunCell { cell_id } => coordinator.run_cell(cell_id).await,
        ClientMessage::UpdateDbConnection { connection_string } => coordinator.update_db_connection(connection_string).await,
    }
}

async fn send(sink: &mut WsSink, message: &ServerMessage) -> Result<(), ()> {
    let Ok(text) = serde_json::to_string(message) else { return Err(()) };
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}

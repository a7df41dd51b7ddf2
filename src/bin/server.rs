use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use maze_race_server::config::ServerConfig;
use maze_race_server::history_store::HistoryStore;
use maze_race_server::server_protocol::{parse_client_message, ParsedClientMessage};
use maze_race_server::server_utils::{
    is_player_view, normalize_maze_size, normalize_moves_per_turn, parse_history_limit,
};
use maze_race_server::session::{Effects, GameSettings, Recipient, ScheduledTimer, Session};
use maze_race_server::types::{GameMode, ServerEvent};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    host_id: Option<String>,
    session: Session<HistoryStore>,
    timers: Vec<AbortHandle>,
}

impl ServerState {
    fn new(session: Session<HistoryStore>) -> Self {
        Self {
            clients: HashMap::new(),
            host_id: None,
            session,
            timers: Vec::new(),
        }
    }

    fn is_host(&self, client_id: &str) -> bool {
        self.host_id.as_deref() == Some(client_id)
    }

    /// Player views never take the host slot; any other client claims it when empty.
    fn register_client(
        &mut self,
        client_id: &str,
        tx: mpsc::Sender<OutboundMessage>,
        player_view: bool,
    ) -> bool {
        self.clients.insert(client_id.to_string(), ClientContext { tx });
        let is_host = !player_view && self.host_id.is_none();
        if is_host {
            self.host_id = Some(client_id.to_string());
            info!(client = %client_id, "host connected");
        } else {
            info!(client = %client_id, "player connected");
        }
        is_host
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    view: Option<String>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config = ServerConfig::parse();
    let seed = config.seed.unwrap_or_else(rand::random);
    info!(seed, history = %config.history_path.display(), "session created");

    let session = Session::new(HistoryStore::new(config.history_path.clone()), seed);
    let state = Arc::new(Mutex::new(ServerState::new(session)));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/history", get(history_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = config.resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        let player_file = static_dir.join("player.html");
        info!(root = %static_dir.display(), "serving static files");
        app.route_service("/player", ServeFile::new(player_file))
            .fallback_service(
                ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
            )
    } else {
        warn!("static file root not found; only the API and websocket are served");
        app
    };

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!(port = config.port, "listening");
    axum::serve(listener, app).await
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn history_handler(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(
        guard
            .session
            .history()
            .build_response(parse_history_limit(query.limit.as_deref())),
    )
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let referer = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok());
    let player_view = is_player_view(query.view.as_deref(), referer);
    ws.on_upgrade(move |socket| handle_socket(state, socket, player_view))
}

async fn handle_socket(state: SharedState, socket: WebSocket, player_view: bool) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        let is_host = guard.register_client(&client_id, tx.clone(), player_view);
        send_to_client(
            &state,
            &mut guard,
            &client_id,
            &ServerEvent::Welcome { is_host },
            QueuePolicy::DisconnectOnFull,
        );
        let snapshot = ServerEvent::GameUpdate(Box::new(guard.session.snapshot()));
        send_to_client(&state, &mut guard, &client_id, &snapshot, QueuePolicy::DropOnFull);
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(&state, &client_id, raw.as_str()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = std::str::from_utf8(&raw) {
                    handle_client_message(&state, &client_id, text).await;
                } else {
                    send_error_to_client(&state, &client_id, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    {
        let mut guard = state.lock().await;
        let effects = disconnect_client_internal(&mut guard, &client_id);
        dispatch_effects(&state, &mut guard, effects);
    }
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: &SharedState, client_id: &str, raw: &str) {
    let Some(message) = parse_client_message(raw) else {
        send_error_to_client(state, client_id, "invalid message").await;
        return;
    };

    let mut guard = state.lock().await;
    if !guard.clients.contains_key(client_id) {
        return;
    }
    let is_host = guard.is_host(client_id);

    let result = match message {
        ParsedClientMessage::Ping { t } => {
            send_to_client(
                state,
                &mut guard,
                client_id,
                &ServerEvent::Pong { t },
                QueuePolicy::DisconnectOnFull,
            );
            return;
        }
        ParsedClientMessage::JoinGame { name } => guard.session.join(client_id, &name),
        ParsedClientMessage::StartGame {
            moves_per_turn,
            maze_size,
            game_mode,
        } => {
            let settings = GameSettings {
                moves_per_turn: normalize_moves_per_turn(moves_per_turn),
                maze_size: normalize_maze_size(maze_size),
                mode: game_mode.unwrap_or(GameMode::TurnBased),
            };
            guard.session.start(is_host, settings)
        }
        ParsedClientMessage::MakeMove { position } => {
            guard.session.make_move(client_id, position)
        }
        ParsedClientMessage::BuyMoves { buy, num_moves } => {
            guard.session.buy_moves(client_id, buy, num_moves)
        }
        ParsedClientMessage::QuitGame => guard.session.quit(client_id),
        ParsedClientMessage::ForceEndGame => guard.session.force_end(is_host),
    };

    match result {
        Ok(effects) => dispatch_effects(state, &mut guard, effects),
        Err(rejection) => {
            debug!(client = %client_id, %rejection, "command rejected");
            send_to_client(
                state,
                &mut guard,
                client_id,
                &rejection.to_event(),
                QueuePolicy::DisconnectOnFull,
            );
        }
    }
}

/// Delivers messages and schedules timers. Clients whose queues overflow are
/// dropped, and the effects of dropping them are delivered in turn.
fn dispatch_effects(state: &SharedState, guard: &mut ServerState, effects: Effects) {
    let mut pending = VecDeque::from([effects]);
    while let Some(effects) = pending.pop_front() {
        if effects.cancel_pending {
            for handle in guard.timers.drain(..) {
                handle.abort();
            }
        }

        let mut overflowed = Vec::new();
        for outbound in &effects.messages {
            match &outbound.to {
                Recipient::Client(client_id) => {
                    if !send_event(guard, client_id, &outbound.event) {
                        overflowed.push(client_id.clone());
                    }
                }
                Recipient::All => overflowed.extend(broadcast(guard, &outbound.event)),
            }
        }
        for client_id in overflowed {
            pending.push_back(drop_client(guard, &client_id));
        }

        guard.timers.retain(|handle| !handle.is_finished());
        for timer in effects.timers {
            let handle = spawn_timer(state.clone(), timer);
            guard.timers.push(handle);
        }
    }
}

fn spawn_timer(state: SharedState, timer: ScheduledTimer) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(timer.delay_ms)).await;
        let mut guard = state.lock().await;
        let effects = guard.session.fire_timer(&timer);
        dispatch_effects(&state, &mut guard, effects);
    })
    .abort_handle()
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) -> Effects {
    if state.clients.remove(client_id).is_none() {
        return Effects::default();
    }
    if state.is_host(client_id) {
        state.host_id = None;
        info!(client = %client_id, "host disconnected");
    }
    debug!(client = %client_id, "client disconnected");
    state.session.disconnect(client_id)
}

/// Returns false when the client's queue rejected the message.
fn send_event(state: &ServerState, client_id: &str, event: &ServerEvent) -> bool {
    let Some(payload) = encode(event) else {
        return true;
    };
    match state.clients.get(client_id) {
        Some(client) => client.tx.try_send(OutboundMessage::Text(payload)).is_ok(),
        None => true,
    }
}

fn send_to_client(
    state: &SharedState,
    guard: &mut ServerState,
    client_id: &str,
    event: &ServerEvent,
    policy: QueuePolicy,
) {
    if !send_event(guard, client_id, event) && policy == QueuePolicy::DisconnectOnFull {
        let effects = drop_client(guard, client_id);
        dispatch_effects(state, guard, effects);
    }
}

fn drop_client(state: &mut ServerState, client_id: &str) -> Effects {
    warn!(client = %client_id, "outbound queue full; dropping client");
    close_client(state, client_id, 1013, "outbound queue full");
    disconnect_client_internal(state, client_id)
}

/// Sends to every connected socket and returns those whose queues were full.
fn broadcast(state: &ServerState, event: &ServerEvent) -> Vec<String> {
    let Some(payload) = encode(event) else {
        return Vec::new();
    };
    state
        .clients
        .iter()
        .filter(|(_, client)| {
            client
                .tx
                .try_send(OutboundMessage::Text(payload.clone()))
                .is_err()
        })
        .map(|(client_id, _)| client_id.clone())
        .collect()
}

fn close_client(state: &ServerState, client_id: &str, code: u16, reason: &str) {
    if let Some(client) = state.clients.get(client_id) {
        let _ = client.tx.try_send(OutboundMessage::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(err) => {
            error!(%err, "failed to serialize outbound event");
            None
        }
    }
}

async fn send_error_to_client(state: &SharedState, client_id: &str, message: &str) {
    let mut guard = state.lock().await;
    send_to_client(
        state,
        &mut guard,
        client_id,
        &ServerEvent::Error {
            message: message.to_string(),
        },
        QueuePolicy::DisconnectOnFull,
    );
}

fn make_id(prefix: &str) -> String {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{id}")
}

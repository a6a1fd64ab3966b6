use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::models::SeatGrid;
use crate::services::reservation::CommitSettings;
use crate::services::sync::GridSynchronizer;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/seats", get(get_seats))
        .route("/seats/live", get(live_seats))
}

/// Снимок сетки для клиента.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSnapshot {
    pub version: u64,
    pub rows: SeatGrid,
    pub row_labels: Vec<&'static str>,
    /// `false`, если показана локальная раскладка вместо данных хранилища
    pub authoritative: bool,
    pub warning: Option<String>,
    pub max_seats: usize,
    pub seat_price: u32,
}

impl GridSnapshot {
    fn new(
        grid: SeatGrid,
        version: u64,
        authoritative: bool,
        warning: Option<String>,
        settings: CommitSettings,
    ) -> Self {
        Self {
            version,
            row_labels: grid.row_labels(),
            rows: grid,
            authoritative,
            warning,
            max_seats: settings.max_seats,
            seat_price: settings.seat_price,
        }
    }
}

async fn snapshot(sync: &GridSynchronizer, settings: CommitSettings) -> GridSnapshot {
    let loaded = sync.load().await;
    let authoritative = loaded.is_authoritative();
    let warning = loaded.warning().map(|e| e.user_message());
    GridSnapshot::new(loaded.grid, loaded.version, authoritative, warning, settings)
}

// GET /api/seats
async fn get_seats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = state.payments.reservations().settings();
    Json(snapshot(&state.sync, settings).await)
}

// GET /api/seats/live (WebSocket)
async fn live_seats(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sync = state.sync.clone();
    let settings = state.payments.reservations().settings();
    ws.on_upgrade(move |socket| stream_grid(socket, sync, settings))
}

/// `false`: клиент отвалился или кадр не собрался, поток надо закрывать.
async fn send_json<S, T>(sender: &mut S, payload: &T) -> bool
where
    S: Sink<Message> + Unpin,
    T: Serialize,
{
    match serde_json::to_string(payload) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize seat grid, closing stream: {:?}", e);
            let _ = sender.send(Message::Close(None)).await;
            false
        }
    }
}

/// Сначала текущий снимок, затем каждое изменение. Закрытие сокета = отписка.
async fn stream_grid(socket: WebSocket, sync: GridSynchronizer, settings: CommitSettings) {
    info!("Client subscribed to seat grid");
    let (mut sender, mut receiver) = socket.split();

    let mut feed = match sync.watch().await {
        Ok(feed) => feed,
        Err(e) => {
            error!("Failed to subscribe to seat grid: {:?}", e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    if !send_json(&mut sender, &snapshot(&sync, settings).await).await {
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(update) = feed.next().await {
            let snapshot = GridSnapshot::new(
                update.grid,
                update.version,
                update.warning.is_none(),
                update.warning.map(|e| e.user_message()),
                settings,
            );
            if !send_json(&mut sender, &snapshot).await {
                break;
            }
        }
        feed.unsubscribe();
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(_) | Message::Binary(_)) => {
                    warn!("Ignoring client message on seat grid stream");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Seat grid socket error: {:?}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!("Client unsubscribed from seat grid");
}

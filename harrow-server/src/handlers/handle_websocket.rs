use axum::{
    body::Bytes,
    extract::{
        Query, State,
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use harrow_config::WebSocketConfig;
use harrow_core::{Envelope, ScanId};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Notify, mpsc},
    time::{Instant, sleep_until, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handlers::ScanQuery;
use crate::infra::{
    app_state::AppState,
    errors::AppResult,
    websocket::{Connection, Heartbeat, HeartbeatAction},
};

/// Attach the push channel for `?id=`. Unknown sessions are refused before
/// the upgrade.
pub async fn websocket_handler(
    State(state): State<AppState>,
    query: Result<Query<ScanQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let Query(query) = query?;
    let scan_id = query.scan_id()?;
    state.scans.snapshot(&scan_id)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, scan_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, scan_id: ScanId) {
    let settings = state.config.websocket.clone();
    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Envelope>(settings.outbound_buffer);

    let connection = Arc::new(Connection::new(scan_id.clone(), tx));
    let conn_id = connection.id;
    let closed = connection.closed_token();
    let pong = Arc::new(Notify::new());

    state.websocket_manager.bind(Arc::clone(&connection));

    let writer = tokio::spawn(write_loop(
        ws_sender,
        rx,
        settings,
        closed.clone(),
        Arc::clone(&pong),
    ));

    read_loop(ws_receiver, &closed, &pong).await;

    closed.cancel();
    if let Err(err) = writer.await {
        warn!(target: "ws::push", conn = %conn_id, error = %err, "writer task failed");
    }
    state.websocket_manager.unbind(&scan_id, conn_id);
    info!(target: "ws::push", scan = %scan_id, conn = %conn_id, "observer disconnected");
}

/// Observes pongs and peer disconnects. Anything the peer sends beyond
/// that is ignored.
async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    closed: &CancellationToken,
    pong: &Notify,
) {
    loop {
        let msg = tokio::select! {
            _ = closed.cancelled() => return,
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(Message::Pong(_))) => pong.notify_one(),
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(err)) => {
                debug!(target: "ws::push", error = %err, "websocket read failed");
                return;
            }
            Some(Ok(_)) => {}
        }
    }
}

#[derive(Debug)]
enum WriteExit {
    Closed,
    Drained,
    HeartbeatExpired,
    WriteFailed,
}

/// Single writer for the socket: envelopes in queue order, interleaved with
/// heartbeat pings.
async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Envelope>,
    settings: WebSocketConfig,
    closed: CancellationToken,
    pong: Arc<Notify>,
) {
    let mut heartbeat = Heartbeat::new(&settings, Instant::now());

    let exit = loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break WriteExit::Closed,
            _ = pong.notified() => heartbeat.on_pong(Instant::now()),
            _ = sleep_until(heartbeat.next_wakeup()) => {
                match heartbeat.poll(Instant::now()) {
                    HeartbeatAction::SendPing => {
                        let ping = Message::Ping(Bytes::new());
                        if !write_frame(&mut ws_sender, ping, settings.write_wait).await {
                            break WriteExit::WriteFailed;
                        }
                    }
                    HeartbeatAction::Expire => break WriteExit::HeartbeatExpired,
                    HeartbeatAction::Idle => {}
                }
            }
            envelope = rx.recv() => {
                let Some(envelope) = envelope else {
                    break WriteExit::Drained;
                };
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(target: "ws::push", error = %err, "failed to encode envelope");
                        continue;
                    }
                };
                if !write_frame(&mut ws_sender, Message::Text(text.into()), settings.write_wait).await {
                    break WriteExit::WriteFailed;
                }
            }
        }
    };

    heartbeat.close();
    closed.cancel();
    if matches!(exit, WriteExit::HeartbeatExpired | WriteExit::WriteFailed) {
        warn!(target: "ws::push", reason = ?exit, "closing observer");
    } else {
        debug!(target: "ws::push", reason = ?exit, "closing observer");
    }
    if !write_frame(&mut ws_sender, Message::Close(None), settings.write_wait).await {
        debug!(target: "ws::push", "close frame not delivered, peer already gone");
    }
}

async fn write_frame(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    wait: Duration,
) -> bool {
    match timeout(wait, ws_sender.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(target: "ws::push", error = %err, "websocket write failed");
            false
        }
        Err(_) => {
            debug!(target: "ws::push", ?wait, "websocket write timed out");
            false
        }
    }
}

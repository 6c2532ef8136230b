use crate::{
    AppState,
    command_handler::CommandHandler,
    handlers::{AppError, ErrorBody, room_id},
    shared_types::{CommandRequest, Notification},
};
use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
};
use futures_util::{
    sink::{Sink, SinkExt},
    stream::{Stream, StreamExt},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The entry point for WebSocket connections to a room.
/// The socket both receives the room's notifications and can submit
/// commands; each command gets its `{lines}` reply on the same socket.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let room = room_id(room)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, room)))
}

/// The main logic for a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, room: String) {
    // Subscribe before reading anything so no notification is missed.
    let mut subscription = state
        .registry
        .listen(&room, state.config.listener_buffer)
        .await;
    info!(room = %room, listener = %subscription.listener(), "New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(16);

    // Task to handle commands coming from the client.
    let commands = state.commands.clone();
    let command_room = room.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let Some(reply) = handle_frame(&commands, &command_room, text.as_str()).await else {
                continue;
            };
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    });

    // Forward notifications and replies until either side is done.
    tokio::select! {
        _ = forward(&mut subscription, &mut reply_rx, &mut sender) => recv_task.abort(),
        _ = (&mut recv_task) => {}
    };

    subscription.close().await;
    info!("WebSocket connection for room {} closed", room);
}

/// Runs one command frame and returns the JSON reply for it: the room's
/// `{lines}` on success, an `ErrorBody` otherwise.
async fn handle_frame(commands: &CommandHandler, room: &str, text: &str) -> Option<String> {
    let outcome = match serde_json::from_str::<CommandRequest>(text) {
        Ok(request) => commands.execute(room, request).await,
        Err(e) => {
            warn!(room = %room, "Unreadable command: {}", e);
            Err(AppError::from(e))
        }
    };
    let reply = match outcome {
        Ok(view) => serde_json::to_string(&view),
        Err(err) => serde_json::to_string(&ErrorBody::from(&err)),
    };
    match reply {
        Ok(reply) => Some(reply),
        Err(e) => {
            warn!("Failed to encode reply: {}", e);
            None
        }
    }
}

/// Writes notifications and command replies to the client.
///
/// Returns when the client can no longer be written to, or when the
/// notification stream ends. The stream ends once the broadcaster has
/// dropped this listener, so the client is sent a close frame and has to
/// reconnect and fetch the room again.
async fn forward<N, W>(notifications: &mut N, replies: &mut mpsc::Receiver<String>, sender: &mut W)
where
    N: Stream<Item = Notification> + Unpin,
    W: Sink<Message> + Unpin,
{
    loop {
        let text = tokio::select! {
            notification = notifications.next() => match notification {
                Some(notification) => match serde_json::to_string(&notification) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode notification: {}", e);
                        continue;
                    }
                },
                None => {
                    debug!("Listener dropped, closing WebSocket");
                    let close = CloseFrame {
                        code: close_code::AGAIN,
                        reason: "listener dropped, reconnect and fetch".into(),
                    };
                    let _ = sender.send(Message::Close(Some(close))).await;
                    return;
                }
            },
            Some(reply) = replies.recv() => reply,
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
}

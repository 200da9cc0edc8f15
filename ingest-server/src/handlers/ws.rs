//! WebSocket live flow updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use flowsense_core::{BroadcastMessage, ChannelSubscriber, Subscriber, FLOW_UPDATES_TOPIC};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::AppState;

pub async fn flows(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let router = state.pipeline.router().clone();
    let (subscriber, rx) = ChannelSubscriber::new(state.config.pipeline.broadcast.subscriber_buffer);
    let id = subscriber.id();

    router.join(FLOW_UPDATES_TOPIC, subscriber);
    tracing::debug!("Live subscriber {} joined ({} total)", id, router.subscriber_count(FLOW_UPDATES_TOPIC));

    relay(socket, rx).await;

    router.leave(FLOW_UPDATES_TOPIC, id);
    tracing::debug!("Live subscriber {} left", id);
}

async fn relay(socket: WebSocket, mut rx: mpsc::Receiver<BroadcastMessage>) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else { break };

                let text = match serde_json::to_string(&update) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Skipping unserializable update: {}", e);
                        continue;
                    }
                };

                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(payload))) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
}

//! WebSocket bridge for per-user signal topics
//!
//! A client connected to `/signal/{user_id}/ws` receives every event
//! published on `user:{user_id}` (`incoming`, `cancelled`) as it happens.

use crate::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{Message, Session};
use callmeter_core::traits::{SignalMessage, Subscription};
use callmeter_signal::user_topic;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Subscription is live
    #[serde(rename = "subscribed")]
    Subscribed { topic: String },
    /// An event published on the user's topic
    #[serde(rename = "signal")]
    Signal {
        event: String,
        payload: serde_json::Value,
    },
    /// Error message
    #[serde(rename = "error")]
    Error { message: String },
    /// Ping/pong for keepalive
    #[serde(rename = "pong")]
    Pong,
}

impl From<SignalMessage> for WsMessage {
    fn from(msg: SignalMessage) -> Self {
        WsMessage::Signal {
            event: msg.event,
            payload: msg.payload,
        }
    }
}

async fn send(session: &mut Session, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => session.text(json).await.is_ok(),
        Err(e) => {
            error!("Failed to encode WebSocket message: {}", e);
            true
        }
    }
}

/// WebSocket connection handler
///
/// GET /api/v1/signal/{user_id}/ws
pub async fn ws_handler(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let user_id = path.into_inner();
    let topic = user_topic(&user_id);
    let subscription = state.signal.transport().subscribe(&topic).await?;

    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;

    info!(user = %user_id, "Signal WebSocket connection established");

    actix_web::rt::spawn(async move {
        ws_session(session, msg_stream, subscription, user_id).await;
    });

    Ok(response)
}

/// Handle WebSocket session
async fn ws_session(
    mut session: Session,
    mut msg_stream: actix_ws::MessageStream,
    mut subscription: Subscription,
    user_id: String,
) {
    let subscribed = WsMessage::Subscribed {
        topic: subscription.topic().to_string(),
    };
    if !send(&mut session, &subscribed).await {
        warn!(user = %user_id, "Failed to confirm subscription, closing connection");
        return;
    }

    let mut ping_interval = interval(PING_INTERVAL);

    loop {
        tokio::select! {
            // Handle incoming messages
            Some(msg) = msg_stream.next() => {
                match msg {
                    Ok(Message::Text(text)) => {
                        debug!(user = %user_id, "Received text: {}", text);
                        if text.contains("ping") && !send(&mut session, &WsMessage::Pong).await {
                            break;
                        }
                    }
                    Ok(Message::Ping(msg)) => {
                        if session.pong(&msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        info!(user = %user_id, "Client closed connection: {:?}", reason);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(user = %user_id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }

            // Forward topic events
            event = subscription.recv() => {
                let Some(event) = event else {
                    let closed = WsMessage::Error { message: "Signal topic closed".to_string() };
                    let _ = send(&mut session, &closed).await;
                    break;
                };
                debug!(user = %user_id, event = %event.event, "Forwarding signal");
                if !send(&mut session, &WsMessage::from(event)).await {
                    warn!(user = %user_id, "Failed to forward signal, closing connection");
                    break;
                }
            }

            // Send periodic pings to keep connection alive
            _ = ping_interval.tick() => {
                if session.ping(b"").await.is_err() {
                    warn!(user = %user_id, "Failed to send ping, closing connection");
                    break;
                }
            }
        }
    }

    info!(user = %user_id, "Signal WebSocket connection closed");
    subscription.unsubscribe();
    let _ = session.close(None).await;
}

/// Configure signal routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/signal/{user_id}/ws", web::get().to(ws_handler));
}

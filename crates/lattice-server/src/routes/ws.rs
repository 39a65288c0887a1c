//! WebSocket endpoint: execution status and live-data streaming.
//!
//! Auth rides on the `token` query parameter (browsers cannot set headers
//! on WebSocket upgrades). Every connection attaches to its tenant's
//! general channel; subscribe/unsubscribe control frames carry channel
//! suffixes and the server prepends the canonical tenant prefix.
//!
//! Wire frames (one JSON object per text frame):
//! - client → server: `{"action":"subscribe"|"unsubscribe","channel":"<suffix>"}`
//! - server → client: `{"type":"subscribed"|"unsubscribed","channel":...}`,
//!   `{"type":"error","detail":...}`, `{"type":"ping"}`, and bus frames
//!   (`execution_status`, `live_data`, plus `table_rows` frames published
//!   by the ingest pipeline on tenant broadcast channels).

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::decode_token;
use crate::state::AppContext;

/// WebSocket routes.
pub fn router() -> Router<AppContext> {
    Router::new().route("/ws", any(upgrade))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

async fn upgrade(
    State(ctx): State<AppContext>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.token else {
        return (StatusCode::UNAUTHORIZED, "Missing token").into_response();
    };
    match decode_token(&token, &ctx.config.secret_key) {
        Ok(principal) => {
            ws.on_upgrade(move |socket| handle_socket(socket, ctx, principal.tenant_id))
        },
        Err(_) => (StatusCode::UNAUTHORIZED, "Invalid token").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ControlFrame {
    action:  String,
    #[serde(default)]
    channel: String,
}

async fn handle_socket(socket: WebSocket, ctx: AppContext, tenant_id: Uuid) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = ctx.hub.register(tenant_id, tx.clone());

    // Hub frames → socket. The hub prunes this client when the channel
    // closes, so a send failure here just ends the forwarder.
    let forward = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Live-mode widgets this connection subscribed to, for refcounted
    // poller cleanup on disconnect.
    let mut live_widgets: HashSet<Uuid> = HashSet::new();

    while let Some(message) = stream.next().await {
        let raw = match message {
            Ok(Message::Text(raw)) => raw,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let Ok(frame) = serde_json::from_str::<ControlFrame>(&raw) else {
            send(&tx, json!({"type": "error", "detail": "Invalid JSON"}).to_string());
            continue;
        };

        match frame.action.as_str() {
            "subscribe" if !frame.channel.is_empty() => {
                ctx.hub.subscribe(client_id, tenant_id, &frame.channel);
                if let Some(widget_id) = live_widget_for_suffix(&ctx, tenant_id, &frame.channel).await
                {
                    ctx.poller.subscribe(tenant_id, widget_id);
                    live_widgets.insert(widget_id);
                }
                send(
                    &tx,
                    json!({"type": "subscribed", "channel": frame.channel}).to_string(),
                );
            },
            "unsubscribe" if !frame.channel.is_empty() => {
                ctx.hub.unsubscribe(client_id, tenant_id, &frame.channel);
                if let Some(widget_id) = widget_suffix(&frame.channel) {
                    if live_widgets.remove(&widget_id) {
                        ctx.poller.unsubscribe(widget_id);
                    }
                }
                send(
                    &tx,
                    json!({"type": "unsubscribed", "channel": frame.channel}).to_string(),
                );
            },
            _ => {
                send(&tx, json!({"type": "error", "detail": "Unknown action"}).to_string());
            },
        }
    }

    // Disconnect: the gauge decrements exactly once, here.
    ctx.hub.remove(client_id);
    for widget_id in live_widgets {
        ctx.poller.unsubscribe(widget_id);
    }
    forward.abort();
}

fn send(tx: &mpsc::UnboundedSender<String>, frame: String) {
    // A failed send means the forwarder died; the read loop will observe
    // the closed socket on its next poll.
    let _ = tx.send(frame);
}

/// Parse `widget:<uuid>` suffixes.
fn widget_suffix(suffix: &str) -> Option<Uuid> {
    suffix
        .strip_prefix("widget:")
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// Resolve a widget-channel suffix to a live-mode widget, tenant-checked.
async fn live_widget_for_suffix(ctx: &AppContext, tenant_id: Uuid, suffix: &str) -> Option<Uuid> {
    let widget_id = widget_suffix(suffix)?;
    let widget = ctx.widget_repo.get(tenant_id, widget_id).await.ok().flatten()?;
    widget.is_live().then_some(widget_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widget_suffix_parsing() {
        let id = Uuid::new_v4();
        assert_eq!(widget_suffix(&format!("widget:{id}")), Some(id));
        assert_eq!(widget_suffix("execution:abc"), None);
        assert_eq!(widget_suffix("widget:not-a-uuid"), None);
    }
}

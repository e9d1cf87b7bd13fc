use axum::{
    extract::{
        ws::{Message as Frame, WebSocket, WebSocketUpgrade},
        Extension, Path, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::Caller;
use crate::messages::{Delivery, Subscription};

/// GET /api/groups/:id/subscribe - Live messages over a websocket
///
/// Membership is checked before the upgrade: 401/403 come back as ordinary JSON errors.
/// Frames sent to the client:
/// ```json
/// { "type": "ready", "group_id": "uuid", "cursor": 41 }
/// { "type": "message", "data": { "id": "uuid", "seq": 42, "content": "hi", ... } }
/// { "type": "lagged", "resume_from": 57 }
/// ```
/// After `lagged` the socket closes; resume with `GET /api/messages?since=<resume_from>`.
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(group_id): Path<Uuid>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let subscription = state.bus.subscribe(&caller, group_id).await?;

    let Some(ws) = ws else {
        return Err(ApiError::bad_request("Websocket upgrade required"));
    };
    Ok(ws.on_upgrade(move |socket| stream_group(socket, subscription)).into_response())
}

async fn stream_group(socket: WebSocket, subscription: Subscription) {
    let group_id = subscription.group_id();
    let subscriber = subscription.subscriber();
    let (mut sender, mut receiver) = socket.split();

    let ready = json!({ "type": "ready", "group_id": group_id, "cursor": subscription.cursor() });
    if sender.send(Frame::Text(ready.to_string())).await.is_err() {
        return;
    }

    let mut forward = tokio::spawn(async move {
        let mut deliveries = Box::pin(subscription.into_stream());
        while let Some(delivery) = deliveries.next().await {
            let frame = match delivery {
                Delivery::Message(message) => json!({ "type": "message", "data": message }),
                Delivery::Lagged { resume_from } => json!({ "type": "lagged", "resume_from": resume_from }),
            };
            if sender.send(Frame::Text(frame.to_string())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Frame::Close(None)).await;
    });

    // Inbound frames are ignored; the socket is receive-only. Posting goes through POST /api/messages.
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if matches!(frame, Frame::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut forward => inbound.abort(),
        _ = &mut inbound => forward.abort(),
    }
    debug!(%group_id, %subscriber, "subscription closed");
}

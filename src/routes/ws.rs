use axum::{
    Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tokio::sync::broadcast::error::RecvError;

use crate::{middleware::auth::AuthUser, notify::Notification, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(subscribe))
}

/// GET /api/ws — upgrade an authenticated connection and stream notification
/// events addressed to the caller.
#[utoipa::path(
    get,
    path = "/api/ws",
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 400, description = "Missing or invalid token"),
    ),
    security(("bearer_auth" = [])),
    tag = "Notifications"
)]
pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, user))
}

async fn handle_connection(mut socket: WebSocket, state: AppState, user: AuthUser) {
    let mut rx = state.notifier.subscribe();
    tracing::info!(user_id = %user.user_id, role = %user.role, "websocket connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(notification) => {
                    if !notification.audience.matches(user.user_id, &user.role) {
                        continue;
                    }
                    if forward(&mut socket, &notification).await.is_err() {
                        break;
                    }
                }
                // Slow consumers drop missed events and keep going.
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(user_id = %user.user_id, missed, "websocket lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "websocket receive error");
                    break;
                }
            },
        }
    }

    tracing::info!(user_id = %user.user_id, "websocket disconnected");
}

async fn forward(socket: &mut WebSocket, notification: &Notification) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(notification) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "notification serialization failed");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}

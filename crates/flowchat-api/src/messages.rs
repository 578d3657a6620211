use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use flowchat_db::models::MessageRow;
use flowchat_gateway::dispatcher::Room;
use flowchat_types::api::{Claims, MessageResponse, SendMessageRequest, UnreadCountResponse};
use flowchat_types::events::GatewayEvent;

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Create a message over the request/response path. Persistence never
/// depends on socket liveness: the record is stored first, then fanned out
/// to the global room and each recipient's notification room.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::Validation("message text must not be empty".into()));
    }

    let message_id = Uuid::new_v4();

    // A cipher failure downgrades to plaintext-only storage; the send
    // itself still succeeds.
    let (encrypted_body, is_encrypted) = match state.cipher.encrypt(&text) {
        Ok(encoded) => (Some(encoded), true),
        Err(e) => {
            warn!("Message encryption failed, storing plaintext only: {}", e);
            (None, false)
        }
    };

    // Run blocking DB insert off the async runtime
    let db = state.clone();
    let mid = message_id.to_string();
    let sid = claims.sub.to_string();
    let body = text.clone();
    let (row, recipients) = tokio::task::spawn_blocking(move || {
        db.db
            .insert_message(&mid, &sid, &body, encrypted_body.as_deref(), is_encrypted)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })??;

    let created_at = parse_timestamp(&row.created_at, &row.id);

    let event = GatewayEvent::MessageCreate {
        id: message_id,
        sender_id: claims.sub,
        sender_username: row.sender_username.clone(),
        text: text.clone(),
        created_at,
    };
    state.dispatcher.broadcast(Room::Global, event, None).await;

    for recipient in &recipients {
        let Ok(user_id) = recipient.parse::<Uuid>() else {
            warn!("Corrupt recipient id '{}' on message '{}'", recipient, row.id);
            continue;
        };
        state
            .dispatcher
            .notify_user(
                user_id,
                GatewayEvent::MessageNotify {
                    id: message_id,
                    sender_id: claims.sub,
                    sender_username: row.sender_username.clone(),
                    text: text.clone(),
                    created_at,
                },
            )
            .await;
    }

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: message_id,
            sender_id: claims.sub,
            sender_username: row.sender_username,
            text,
            is_encrypted,
            created_at,
        }),
    ))
}

/// List recent messages, newest first. Read-on-view: every returned message
/// is marked read for the caller before the response is built.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let limit = query.limit.min(200);
    let uid = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || {
        let rows = db.db.recent_messages(limit)?;

        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        db.db.mark_messages_read(&uid, &message_ids)?;

        Ok::<_, ApiError>(rows)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })??;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .map(|row| to_response(&state, row))
        .collect();

    Ok(Json(messages))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = claims.sub.to_string();

    let count = tokio::task::spawn_blocking(move || db.db.unread_count(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })??;

    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let mid = message_id.to_string();
    let uid = claims.sub.to_string();

    tokio::task::spawn_blocking(move || db.db.mark_read(&mid, &uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })??;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let mid = message_id.to_string();
    let uid = claims.sub.to_string();
    let is_admin = claims.is_admin();

    tokio::task::spawn_blocking(move || db.db.delete_message(&mid, &uid, is_admin))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })??;

    state
        .dispatcher
        .broadcast(Room::Global, GatewayEvent::MessageDelete { id: message_id }, None)
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// The secure read path prefers the stored ciphertext; a decryption failure
/// falls back to the stored plaintext and is never surfaced as an error.
fn to_response(state: &AppStateInner, row: MessageRow) -> MessageResponse {
    let text = match row.encrypted_body.as_deref() {
        Some(encoded) if row.is_encrypted => match state.cipher.decrypt(encoded) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(
                    "Decryption failed for message '{}', serving stored plaintext: {}",
                    row.id, e
                );
                row.body
            }
        },
        _ => row.body,
    };

    MessageResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt message id '{}': {}", row.id, e);
            Uuid::default()
        }),
        sender_id: row.sender_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt sender_id '{}' on message '{}': {}", row.sender_id, row.id, e);
            Uuid::default()
        }),
        sender_username: row.sender_username,
        text,
        is_encrypted: row.is_encrypted,
        created_at: parse_timestamp(&row.created_at, &row.id),
    }
}

fn parse_timestamp(raw: &str, message_id: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message '{}': {}", raw, message_id, e);
            chrono::DateTime::default()
        })
}

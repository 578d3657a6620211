use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated. Carries the interval
    /// (seconds) at which clients should poll the unread count as a fallback
    /// for missed pushes.
    Ready {
        user_id: Uuid,
        username: String,
        unread_poll_secs: u64,
    },

    /// A new chat message was posted, delivered to the global room
    MessageCreate {
        id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        text: String,
        created_at: chrono::DateTime<chrono::Utc>,
    },

    /// Personal notification delivered to a recipient's user room,
    /// independent of whether they have the chat view open
    MessageNotify {
        id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        text: String,
        created_at: chrono::DateTime<chrono::Utc>,
    },

    /// A message was deleted by its sender or an admin
    MessageDelete { id: Uuid },
}

/// Commands sent FROM client TO server over WebSocket.
///
/// Room membership is never restored across reconnects: a fresh connection
/// starts with no rooms and must issue these joins again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Join the global chat room
    JoinGlobal,

    /// Join the per-user notification room. The server refuses ids other
    /// than the authenticated user's own.
    JoinUser { user_id: Uuid },
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Member,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }

    /// Unknown role strings fall back to Member rather than failing a read.
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message. The plaintext body is always stored; the
/// encrypted body is kept redundantly alongside it so the secure read path
/// can prefer ciphertext and still fall back if decryption fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    /// Snapshot of "all users except the sender" taken at send time.
    /// Never recomputed when the user population changes.
    pub recipients: Vec<Uuid>,
    /// Grows monotonically, starts as {sender}.
    pub read_by: Vec<Uuid>,
    pub body: String,
    pub encrypted_body: Option<String>,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
}

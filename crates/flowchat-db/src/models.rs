/// Database row types — these map directly to SQLite rows.
/// Distinct from flowchat-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub body: String,
    pub encrypted_body: Option<String>,
    pub is_encrypted: bool,
    pub created_at: String,
}

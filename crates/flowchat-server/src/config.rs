use anyhow::{Context, Result};

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// Signs REST and gateway tokens. Required.
    pub jwt_secret: String,
    /// Shared secret behind message-body encryption. Required — there is no
    /// fallback value; a missing secret fails startup.
    pub message_secret: String,
    /// Interval (seconds) clients poll the unread count as a fallback for
    /// missed pushes. Announced in the gateway Ready event.
    pub unread_poll_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: std::env::var("FLOWCHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("FLOWCHAT_PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .context("Invalid FLOWCHAT_PORT")?,
            db_path: std::env::var("FLOWCHAT_DB_PATH").unwrap_or_else(|_| "flowchat.db".into()),
            jwt_secret: std::env::var("FLOWCHAT_JWT_SECRET")
                .context("FLOWCHAT_JWT_SECRET must be set")?,
            message_secret: std::env::var("FLOWCHAT_MESSAGE_SECRET")
                .context("FLOWCHAT_MESSAGE_SECRET must be set")?,
            unread_poll_secs: std::env::var("FLOWCHAT_UNREAD_POLL_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .context("Invalid FLOWCHAT_UNREAD_POLL_SECS")?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

use thiserror::Error;

/// Store-level failures. The first three are client conditions the API layer
/// maps to 404/403; the rest are infrastructure failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message not found")]
    NotFound,

    #[error("user is not a recipient of this message")]
    NotRecipient,

    #[error("only the sender or an admin may delete a message")]
    NotSender,

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

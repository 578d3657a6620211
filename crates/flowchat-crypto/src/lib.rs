/// FlowChat Crypto Library
///
/// Symmetric encryption of chat message bodies under a process-wide shared
/// secret (AES-256-GCM, key derived with SHA-256). Every failure mode is a
/// returned error, never a panic: callers always hold a plaintext fallback,
/// so a cipher error downgrades the operation instead of failing the request.
pub mod cipher;
pub mod keys;

pub use cipher::{CipherError, MessageCipher};

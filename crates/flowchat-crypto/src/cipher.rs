use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use thiserror::Error;

use crate::keys::derive_key;

/// AES-GCM nonce size. The nonce is prepended to the ciphertext so the
/// encrypted body travels as a single opaque string.
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    Encrypt,

    #[error("ciphertext is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("ciphertext too short to carry a nonce")]
    Truncated,

    #[error("decryption failed (wrong secret or tampered ciphertext)")]
    Decrypt,

    #[error("decrypted bytes are not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Symmetric codec for chat message bodies.
///
/// Encryption is salted by a fresh random nonce per call, so the same
/// plaintext never produces the same ciphertext twice.
pub struct MessageCipher {
    key: [u8; 32],
}

impl MessageCipher {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: derive_key(secret),
        }
    }

    /// Encrypt a plaintext body. Returns `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(B64.encode(combined))
    }

    /// Decrypt an encoded body produced by [`encrypt`](Self::encrypt).
    /// Malformed input of any kind is an error, never a panic.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let combined = B64.decode(encoded)?;
        if combined.len() <= NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::Decrypt)?;

        Ok(String::from_utf8(plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = MessageCipher::from_secret("team-secret");
        let message = "hello team";

        let encoded = cipher.encrypt(message).unwrap();
        assert_ne!(encoded, message);

        let decrypted = cipher.decrypt(&encoded).unwrap();
        assert_eq!(decrypted, message);
    }

    #[test]
    fn roundtrip_preserves_unicode() {
        let cipher = MessageCipher::from_secret("team-secret");
        let message = "déploiement ✅ 완료";

        let encoded = cipher.encrypt(message).unwrap();
        assert_eq!(cipher.decrypt(&encoded).unwrap(), message);
    }

    #[test]
    fn nonce_salting_varies_ciphertext() {
        let cipher = MessageCipher::from_secret("team-secret");

        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_secret_fails() {
        let encoded = MessageCipher::from_secret("secret-one")
            .encrypt("confidential")
            .unwrap();

        let result = MessageCipher::from_secret("secret-two").decrypt(&encoded);
        assert!(matches!(result, Err(CipherError::Decrypt)));
    }

    #[test]
    fn malformed_base64_is_an_error() {
        let cipher = MessageCipher::from_secret("team-secret");
        assert!(matches!(
            cipher.decrypt("%%% not base64 %%%"),
            Err(CipherError::Decode(_))
        ));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let cipher = MessageCipher::from_secret("team-secret");
        let short = B64.encode([0u8; NONCE_LEN]);
        assert!(matches!(cipher.decrypt(&short), Err(CipherError::Truncated)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = MessageCipher::from_secret("team-secret");
        let encoded = cipher.encrypt("original").unwrap();

        let mut bytes = B64.decode(&encoded).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = B64.encode(bytes);

        assert!(matches!(cipher.decrypt(&tampered), Err(CipherError::Decrypt)));
    }
}

use sha2::{Digest, Sha256};

/// Derive the 256-bit AES key from the configured shared secret.
/// Same secret, same key — both sides of a round trip must agree on the
/// secret for decryption to succeed.
pub fn derive_key(secret: &str) -> [u8; 32] {
    let digest = Sha256::digest(secret.as_bytes());
    digest.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_secret_same_key() {
        assert_eq!(derive_key("swordfish"), derive_key("swordfish"));
    }

    #[test]
    fn different_secrets_differ() {
        assert_ne!(derive_key("swordfish"), derive_key("swordfish2"));
    }
}

//! Secret generation and hashing.
//!
//! Endpoint secrets are 32 random bytes rendered as 64 lowercase hex
//! characters. Only the SHA-256 digest of a secret is ever persisted; the
//! plaintext exists exactly once, at mint time.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of random bytes in a freshly minted secret.
const SECRET_BYTES: usize = 32;

/// Mint a new plaintext secret. The caller is responsible for handing it to
/// the operator and then forgetting it.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a plaintext secret for storage or lookup. Deterministic, so the same
/// plaintext always resolves to the same stored credential.
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_64_hex_chars() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn generated_secrets_are_unique() {
        assert_ne!(generate_secret(), generate_secret());
    }

    #[test]
    fn hashing_is_deterministic_and_not_identity() {
        let secret = generate_secret();
        let hash = hash_secret(&secret);
        assert_eq!(hash, hash_secret(&secret));
        assert_ne!(hash, secret);
        assert_eq!(hash.len(), 64);
    }
}

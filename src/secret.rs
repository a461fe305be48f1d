//! Secret generation, hashing and comparison.
//!
//! Secrets are drawn from the OS CSPRNG and encoded as URL-safe base64 without
//! padding, so they travel in headers, query strings and cookies unescaped.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{CredentialError, Result};

/// Fill `byte_len` bytes from the OS entropy source and encode them.
///
/// A failing entropy source is reported as `GeneratorUnavailable` and is never
/// retried.
pub fn generate_secret(byte_len: usize) -> Result<String> {
    if byte_len == 0 {
        return Err(CredentialError::InvalidInput(
            "secret length must be > 0 bytes".into(),
        ));
    }
    let mut buf = vec![0u8; byte_len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CredentialError::GeneratorUnavailable(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(&buf))
}

/// Same as [`generate_secret`] with a human-readable prefix such as `kw_`.
pub fn generate_prefixed(prefix: &str, byte_len: usize) -> Result<String> {
    Ok(format!("{}{}", prefix, generate_secret(byte_len)?))
}

/// SHA-256 hex digest of a presented secret. API keys are stored as this
/// digest only.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time equality. Inputs of different length compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn secret_is_url_safe_and_decodes_to_requested_length() {
        let s = generate_secret(32).unwrap();
        assert!(!s.contains('='));
        assert!(s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        assert_eq!(URL_SAFE_NO_PAD.decode(&s).unwrap().len(), 32);
    }

    #[test]
    fn secrets_do_not_collide() {
        let seen: HashSet<String> = (0..2000).map(|_| generate_secret(16).unwrap()).collect();
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn zero_length_is_rejected() {
        assert!(matches!(
            generate_secret(0),
            Err(CredentialError::InvalidInput(_))
        ));
    }

    #[test]
    fn prefix_is_prepended() {
        let s = generate_prefixed("kw_", 24).unwrap();
        assert!(s.starts_with("kw_"));
        assert_eq!(URL_SAFE_NO_PAD.decode(&s[3..]).unwrap().len(), 24);
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = hash_secret("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(hash_secret("abd"), h);
    }

    #[test]
    fn constant_time_eq_handles_lengths() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokem"));
        assert!(!constant_time_eq(b"token", b"token2"));
        assert!(!constant_time_eq(b"", b"x"));
    }
}

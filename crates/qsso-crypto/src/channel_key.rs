//! Symmetric key agreed with the identity server when the channel starts.
//!
//! The key is generated locally, written once to the server's stdin inside an
//! [`EncryptionInit`] line, and afterwards used only to open access-token
//! envelopes returned by `getSsoToken`.

use base64::{engine::general_purpose::STANDARD, Engine};
use zeroize::{Zeroize, ZeroizeOnDrop};

use qsso_proto::v1::EncryptionInit;

/// Length of the AES-256 key in bytes.
pub const KEY_LENGTH: usize = 32;

const INIT_VERSION: &str = "1.0";
const INIT_MODE: &str = "JWT";

#[derive(Debug, thiserror::Error)]
pub enum ChannelKeyError {
    #[error("RNG failed")]
    RngError,
    #[error("invalid base64 key")]
    InvalidEncoding,
    #[error("key must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChannelKey {
    bytes: [u8; KEY_LENGTH],
}

impl ChannelKey {
    /// Generate a fresh random key.
    pub fn generate() -> Result<Self, ChannelKeyError> {
        let mut bytes = [0u8; KEY_LENGTH];
        getrandom::getrandom(&mut bytes).map_err(|_| ChannelKeyError::RngError)?;
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, ChannelKeyError> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| ChannelKeyError::InvalidEncoding)?;
        if decoded.len() != KEY_LENGTH {
            let actual = decoded.len();
            decoded.zeroize();
            return Err(ChannelKeyError::InvalidLength {
                expected: KEY_LENGTH,
                actual,
            });
        }
        let mut bytes = [0u8; KEY_LENGTH];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    /// The init message handed to the server before any JSON-RPC traffic.
    pub fn encryption_init(&self) -> EncryptionInit {
        EncryptionInit {
            version: INIT_VERSION.to_string(),
            mode: INIT_MODE.to_string(),
            key: self.to_base64(),
        }
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = ChannelKey::generate().unwrap();
        let b = ChannelKey::generate().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_base64_round_trip_and_length_check() {
        let key = ChannelKey::from_bytes([7u8; KEY_LENGTH]);
        let decoded = ChannelKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(decoded.as_bytes(), key.as_bytes());

        let short = STANDARD.encode([1u8; 16]);
        assert!(matches!(
            ChannelKey::from_base64(&short),
            Err(ChannelKeyError::InvalidLength { expected: 32, actual: 16 })
        ));
        assert!(matches!(
            ChannelKey::from_base64("not base64!"),
            Err(ChannelKeyError::InvalidEncoding)
        ));
    }

    #[test]
    fn test_encryption_init_line() {
        let key = ChannelKey::from_bytes([0u8; KEY_LENGTH]);
        let init = key.encryption_init();
        assert_eq!(init.version, "1.0");
        assert_eq!(init.mode, "JWT");
        assert_eq!(init.key, key.to_base64());
        assert!(!format!("{:?}", key).contains(&init.key));
    }
}

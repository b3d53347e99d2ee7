//! Access-token envelopes.
//!
//! The identity server returns access tokens as JWE compact serializations
//! with direct key agreement (`alg: dir`) and AES-256-GCM content encryption
//! under the [`ChannelKey`]. The protected header (as transmitted, base64url)
//! is the AEAD associated data.
//!
//! Format: `header . encrypted_key(empty) . iv . ciphertext . tag`

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::channel_key::ChannelKey;

const ALG_DIR: &str = "dir";
const ENC_A256GCM: &str = "A256GCM";
const IV_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
    #[error("unsupported algorithm: alg={alg}, enc={enc}")]
    UnsupportedAlgorithm { alg: String, enc: String },
    #[error("decryption failed")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("plaintext is not a bearer token")]
    InvalidPlaintext,
    #[error("RNG failed")]
    RngError,
}

#[derive(Serialize, Deserialize)]
struct ProtectedHeader {
    alg: String,
    enc: String,
}

/// Decrypted bearer token. Wiped on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PlaintextToken(String);

impl PlaintextToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PlaintextToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlaintextToken(<redacted>)")
    }
}

fn b64(part: &str, what: &'static str) -> Result<Vec<u8>, EnvelopeError> {
    URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| EnvelopeError::Malformed(what))
}

/// Open a compact envelope and extract the bearer token.
///
/// The plaintext is JSON: either a bare string or an object with a string
/// `data` member. Anything else is rejected.
pub fn decrypt_access_token(key: &ChannelKey, compact: &str) -> Result<PlaintextToken, EnvelopeError> {
    let parts: Vec<&str> = compact.trim().split('.').collect();
    if parts.len() != 5 {
        return Err(EnvelopeError::Malformed("expected 5 segments"));
    }
    let (header_b64, encrypted_key, iv_b64, ciphertext_b64, tag_b64) =
        (parts[0], parts[1], parts[2], parts[3], parts[4]);

    let header: ProtectedHeader = serde_json::from_slice(&b64(header_b64, "header")?)
        .map_err(|_| EnvelopeError::Malformed("header"))?;
    if header.alg != ALG_DIR || header.enc != ENC_A256GCM {
        return Err(EnvelopeError::UnsupportedAlgorithm {
            alg: header.alg,
            enc: header.enc,
        });
    }
    if !encrypted_key.is_empty() {
        return Err(EnvelopeError::Malformed("direct encryption carries no key"));
    }

    let iv = b64(iv_b64, "iv")?;
    if iv.len() != IV_LENGTH {
        return Err(EnvelopeError::Malformed("iv length"));
    }
    let mut sealed = b64(ciphertext_b64, "ciphertext")?;
    let tag = b64(tag_b64, "tag")?;
    if tag.len() != TAG_LENGTH {
        return Err(EnvelopeError::Malformed("tag length"));
    }
    sealed.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let mut plaintext = cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|_| EnvelopeError::DecryptFailed)?;

    let token = parse_plaintext(&plaintext);
    plaintext.zeroize();
    token
}

fn parse_plaintext(plaintext: &[u8]) -> Result<PlaintextToken, EnvelopeError> {
    match serde_json::from_slice::<serde_json::Value>(plaintext) {
        Ok(serde_json::Value::String(token)) => Ok(PlaintextToken(token)),
        Ok(serde_json::Value::Object(mut map)) => match map.remove("data") {
            Some(serde_json::Value::String(token)) => Ok(PlaintextToken(token)),
            _ => Err(EnvelopeError::InvalidPlaintext),
        },
        Ok(_) => Err(EnvelopeError::InvalidPlaintext),
        // Some servers send the raw token without JSON quoting.
        Err(_) => std::str::from_utf8(plaintext)
            .ok()
            .filter(|s| !s.is_empty() && !s.contains(char::is_whitespace))
            .map(|s| PlaintextToken(s.to_string()))
            .ok_or(EnvelopeError::InvalidPlaintext),
    }
}

/// Produce an envelope the way the identity server does. Used by test peers
/// and local tooling that stands in for the server.
pub fn seal_access_token(key: &ChannelKey, token: &str) -> Result<String, EnvelopeError> {
    let header = serde_json::to_vec(&ProtectedHeader {
        alg: ALG_DIR.to_string(),
        enc: ENC_A256GCM.to_string(),
    })
    .map_err(|_| EnvelopeError::EncryptFailed)?;
    let header_b64 = URL_SAFE_NO_PAD.encode(header);

    let mut iv = [0u8; IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|_| EnvelopeError::RngError)?;

    let mut plaintext =
        serde_json::to_vec(&serde_json::Value::String(token.to_string())).map_err(|_| EnvelopeError::EncryptFailed)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &plaintext,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|_| EnvelopeError::EncryptFailed)?;
    plaintext.zeroize();

    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LENGTH);
    Ok(format!(
        "{}..{}.{}.{}",
        header_b64,
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_key::KEY_LENGTH;

    fn key(b: u8) -> ChannelKey {
        ChannelKey::from_bytes([b; KEY_LENGTH])
    }

    #[test]
    fn test_sealed_token_opens_with_same_key() {
        let k = key(1);
        let compact = seal_access_token(&k, "bearer-abc").unwrap();
        assert_eq!(compact.split('.').count(), 5);
        assert_eq!(decrypt_access_token(&k, &compact).unwrap().expose(), "bearer-abc");
    }

    #[test]
    fn test_wrong_key_fails() {
        let compact = seal_access_token(&key(1), "bearer-abc").unwrap();
        assert!(matches!(
            decrypt_access_token(&key(2), &compact),
            Err(EnvelopeError::DecryptFailed)
        ));
    }

    #[test]
    fn test_tampered_header_fails() {
        let k = key(3);
        let compact = seal_access_token(&k, "bearer-abc").unwrap();
        let mut parts: Vec<String> = compact.split('.').map(str::to_string).collect();
        parts[0] = URL_SAFE_NO_PAD.encode(br#"{"alg":"dir","enc":"A256GCM","x":1}"#);
        let tampered = parts.join(".");
        assert!(matches!(
            decrypt_access_token(&k, &tampered),
            Err(EnvelopeError::DecryptFailed)
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RSA-OAEP","enc":"A256GCM"}"#);
        let compact = format!("{}..AAAAAAAAAAAAAAAA.AA.AAAAAAAAAAAAAAAAAAAAAA", header);
        assert!(matches!(
            decrypt_access_token(&key(0), &compact),
            Err(EnvelopeError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn test_malformed_segments() {
        assert!(matches!(
            decrypt_access_token(&key(0), "a.b.c"),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_plaintext_shapes() {
        assert_eq!(parse_plaintext(br#""tok""#).unwrap().expose(), "tok");
        assert_eq!(parse_plaintext(br#"{"data":"tok"}"#).unwrap().expose(), "tok");
        assert_eq!(parse_plaintext(b"tok").unwrap().expose(), "tok");
        assert!(parse_plaintext(b"42").is_err());
        assert!(parse_plaintext(br#"{"other":"tok"}"#).is_err());
        assert!(parse_plaintext(b"").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = PlaintextToken::new("very-secret");
        assert!(!format!("{:?}", token).contains("very-secret"));
    }
}

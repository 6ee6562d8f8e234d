//! Optional payload encryption
//!
//! Payloads are sealed with AES-256-GCM under a key derived from the
//! configured secret. The sealed form is a JSON envelope stored as text:
//! `{"alg":"aes-256-gcm","iv":"<base64>","ct":"<base64>"}`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

use crate::error::{SessionError, SessionResult};
use crate::serializer::Payload;

const ALGORITHM: &str = "aes-256-gcm";
const KEY_SALT: &[u8] = b"express-docstore-session";
const KEY_ROUNDS: u32 = 10_000;
const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct Envelope {
    alg: String,
    iv: String,
    ct: String,
}

/// Encrypts and decrypts serialized payloads.
///
/// Only the derived key is kept; the secret it came from is dropped by the
/// caller after construction.
pub struct SessionCrypto {
    key: [u8; 32],
}

impl SessionCrypto {
    /// Derive the encryption key from a secret
    pub fn new(secret: &str) -> SessionResult<Self> {
        if secret.is_empty() {
            return Err(SessionError::ConfigurationError(
                "secret must not be empty".to_string(),
            ));
        }

        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), KEY_SALT, KEY_ROUNDS, &mut key);
        Ok(Self { key })
    }

    /// Seal a serialized payload
    pub fn encrypt(&self, payload: Payload) -> SessionResult<Payload> {
        let plaintext = payload.into_text()?;
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| SessionError::CryptoError(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| SessionError::CryptoError(e.to_string()))?;

        let envelope = Envelope {
            alg: ALGORITHM.to_string(),
            iv: STANDARD.encode(nonce_bytes),
            ct: STANDARD.encode(ciphertext),
        };
        Ok(Payload::Text(serde_json::to_string(&envelope)?))
    }

    /// Open a sealed payload.
    ///
    /// The result is always textual; a structural serializer decodes it
    /// through its identity path.
    pub fn decrypt(&self, payload: Payload) -> SessionResult<Payload> {
        let envelope: Envelope = match payload {
            Payload::Text(text) => serde_json::from_str(&text),
            Payload::Structured(value) => serde_json::from_value(value),
        }
        .map_err(|e| SessionError::CryptoError(format!("invalid envelope: {}", e)))?;

        if envelope.alg != ALGORITHM {
            return Err(SessionError::CryptoError(format!(
                "unsupported algorithm: {}",
                envelope.alg
            )));
        }

        let nonce_bytes: [u8; NONCE_LEN] = STANDARD
            .decode(&envelope.iv)
            .map_err(|e| SessionError::CryptoError(e.to_string()))?
            .try_into()
            .map_err(|_| SessionError::CryptoError("invalid nonce length".to_string()))?;
        let ciphertext = STANDARD
            .decode(&envelope.ct)
            .map_err(|e| SessionError::CryptoError(e.to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| SessionError::CryptoError(e.to_string()))?;
        let plaintext = cipher
            .decrypt(&Nonce::from(nonce_bytes), ciphertext.as_slice())
            .map_err(|e| SessionError::CryptoError(e.to_string()))?;

        String::from_utf8(plaintext)
            .map(Payload::Text)
            .map_err(|e| SessionError::CryptoError(e.to_string()))
    }
}

impl fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCrypto").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encrypt_decrypt() {
        let crypto = SessionCrypto::new("squirrel").unwrap();
        let payload = Payload::Text(r#"{"foo":"bar"}"#.to_string());

        let sealed = crypto.encrypt(payload.clone()).unwrap();
        let Payload::Text(text) = &sealed else {
            panic!("sealed payload must be text");
        };
        assert!(!text.contains("bar"));
        assert!(text.contains(ALGORITHM));

        assert_eq!(crypto.decrypt(sealed).unwrap(), payload);
    }

    #[test]
    fn test_structured_payload_is_sealed_as_text() {
        let crypto = SessionCrypto::new("squirrel").unwrap();
        let sealed = crypto
            .encrypt(Payload::Structured(json!({ "foo": "bar" })))
            .unwrap();
        let opened = crypto.decrypt(sealed).unwrap();
        assert_eq!(opened, Payload::Text(r#"{"foo":"bar"}"#.to_string()));
    }

    #[test]
    fn test_nonce_is_fresh() {
        let crypto = SessionCrypto::new("squirrel").unwrap();
        let payload = Payload::Text("same".to_string());
        let a = crypto.encrypt(payload.clone()).unwrap();
        let b = crypto.encrypt(payload).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = SessionCrypto::new("squirrel")
            .unwrap()
            .encrypt(Payload::Text("secret data".to_string()))
            .unwrap();
        let err = SessionCrypto::new("badger")
            .unwrap()
            .decrypt(sealed)
            .unwrap_err();
        assert!(matches!(err, SessionError::CryptoError(_)));
    }

    #[test]
    fn test_plain_payload_is_rejected() {
        let crypto = SessionCrypto::new("squirrel").unwrap();
        let err = crypto
            .decrypt(Payload::Text(r#"{"foo":"bar"}"#.to_string()))
            .unwrap_err();
        assert!(matches!(err, SessionError::CryptoError(_)));
    }

    #[test]
    fn test_empty_secret() {
        assert!(matches!(
            SessionCrypto::new(""),
            Err(SessionError::ConfigurationError(_))
        ));
    }
}

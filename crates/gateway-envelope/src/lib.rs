//! Symmetric Envelope (C7): encrypts and decrypts progress-bus payloads
//! with a single shared key, understanding both the current AEAD format
//! and a legacy non-AEAD format it must still be able to decrypt.
//!
//! Current format: `IV:TAG:CIPHERTEXT`, all hex, colon-delimited —
//! AES-256-GCM with a 96-bit IV and a 128-bit tag.
//!
//! Legacy format: `IV:CIPHERTEXT`, hex, colon-delimited — AES-128-CTR with
//! a 128-bit IV, no authentication. Decrypt-only; never produced by
//! [`Envelope::encrypt`].

pub mod error;

pub use error::EnvelopeError;

use aes::Aes128;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const LEGACY_KEY_LEN: usize = 16;
const LEGACY_IV_LEN: usize = 16;

type Aes128Ctr = ctr::Ctr64BE<Aes128>;

/// Holds the shared key material for both the current AEAD format and the
/// legacy format it can still decrypt. Constructed once from
/// `redisEncryptionKey` (spec §6) and shared across the progress bus.
#[derive(Clone)]
pub struct Envelope {
    key: [u8; KEY_LEN],
}

impl Envelope {
    /// Builds an envelope from `redisEncryptionKey` (spec §4.7): a
    /// 64-character value is interpreted as hex (32 bytes); anything else is
    /// taken as raw key bytes, which must themselves be exactly 32 bytes.
    pub fn from_key(key: &str) -> Result<Self, EnvelopeError> {
        if key.len() == KEY_LEN * 2 {
            Self::from_hex_key(key)
        } else {
            Self::from_raw_bytes(key.as_bytes())
        }
    }

    /// Builds an envelope from a hex-encoded 256-bit key.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, EnvelopeError> {
        let bytes = hex::decode(hex_key).map_err(|e| EnvelopeError::InvalidHex(e.to_string()))?;
        Self::from_raw_bytes(&bytes)
    }

    /// Builds an envelope from exactly 32 raw key bytes.
    fn from_raw_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() != KEY_LEN {
            return Err(EnvelopeError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Encrypts `plaintext`, always producing the current
    /// `IV:TAG:CIPHERTEXT` format.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EnvelopeError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).expect("key is exactly 32 bytes");
        let mut iv_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut iv_bytes);
        let nonce = Nonce::from_slice(&iv_bytes);

        let mut ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EnvelopeError::DecryptionFailed)?;
        let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv_bytes),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypts `payload` if it looks like an envelope this crate
    /// understands; otherwise returns it unchanged. Only a well-formed
    /// envelope that fails authentication returns an error — anything that
    /// doesn't parse as either format is assumed to be plaintext that
    /// never needed encrypting.
    pub fn decrypt_or_passthrough(&self, payload: &str) -> Result<String, EnvelopeError> {
        let fields: Vec<&str> = payload.split(':').collect();
        match fields.as_slice() {
            [iv, tag, ciphertext] => self.decrypt_current(iv, tag, ciphertext),
            [iv, ciphertext] => self.decrypt_legacy(iv, ciphertext),
            _ => Ok(payload.to_string()),
        }
    }

    fn decrypt_current(&self, iv_hex: &str, tag_hex: &str, ciphertext_hex: &str) -> Result<String, EnvelopeError> {
        if !is_hex_of_len(iv_hex, NONCE_LEN) || !is_hex_of_len(tag_hex, TAG_LEN) || !is_hex(ciphertext_hex) {
            return Ok(format!("{iv_hex}:{tag_hex}:{ciphertext_hex}"));
        }

        let iv = hex::decode(iv_hex).expect("validated hex");
        let tag = hex::decode(tag_hex).expect("validated hex");
        let mut ciphertext = hex::decode(ciphertext_hex).expect("validated hex");

        ciphertext.extend_from_slice(&tag);
        let cipher = Aes256Gcm::new_from_slice(&self.key).expect("key is exactly 32 bytes");
        let nonce = Nonce::from_slice(&iv);
        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| EnvelopeError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| EnvelopeError::DecryptionFailed)
    }

    fn decrypt_legacy(&self, iv_hex: &str, ciphertext_hex: &str) -> Result<String, EnvelopeError> {
        if !is_hex_of_len(iv_hex, LEGACY_IV_LEN) || !is_hex(ciphertext_hex) {
            return Ok(format!("{iv_hex}:{ciphertext_hex}"));
        }

        let iv = hex::decode(iv_hex).expect("validated hex");
        let mut buf = hex::decode(ciphertext_hex).expect("validated hex");

        let legacy_key = &self.key[..LEGACY_KEY_LEN];
        let mut cipher = Aes128Ctr::new(legacy_key.into(), iv.as_slice().into());
        cipher.apply_keystream(&mut buf);
        String::from_utf8(buf).map_err(|_| EnvelopeError::DecryptionFailed)
    }
}

/// Non-empty, even-length, all-ASCII-hex-digit check — cheaper than
/// decoding just to discover the segment was never hex at all.
fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// `is_hex` plus an exact decoded-byte-length check.
fn is_hex_of_len(s: &str, bytes_len: usize) -> bool {
    is_hex(s) && s.len() == bytes_len * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        hex::encode([7u8; KEY_LEN])
    }

    #[test]
    fn round_trips_through_current_format() {
        let envelope = Envelope::from_hex_key(&test_key()).unwrap();
        let ciphertext = envelope.encrypt("hello progress bus").unwrap();
        assert_eq!(ciphertext.split(':').count(), 3);
        let plaintext = envelope.decrypt_or_passthrough(&ciphertext).unwrap();
        assert_eq!(plaintext, "hello progress bus");
    }

    #[test]
    fn decrypts_legacy_two_field_format() {
        let envelope = Envelope::from_hex_key(&test_key()).unwrap();
        let iv = [3u8; LEGACY_IV_LEN];
        let legacy_key = &envelope.key[..LEGACY_KEY_LEN];
        let mut cipher = Aes128Ctr::new(legacy_key.into(), iv.as_slice().into());
        let mut buf = b"legacy payload".to_vec();
        cipher.apply_keystream(&mut buf);
        let payload = format!("{}:{}", hex::encode(iv), hex::encode(buf));

        let plaintext = envelope.decrypt_or_passthrough(&payload).unwrap();
        assert_eq!(plaintext, "legacy payload");
    }

    #[test]
    fn passes_through_non_envelope_payload_unchanged() {
        let envelope = Envelope::from_hex_key(&test_key()).unwrap();
        let plaintext = envelope.decrypt_or_passthrough("just some plain json").unwrap();
        assert_eq!(plaintext, "just some plain json");
    }

    #[test]
    fn passes_through_plaintext_json_with_three_colon_segments() {
        let envelope = Envelope::from_hex_key(&test_key()).unwrap();
        let payload = r#"{"requestId":"R","progress":0.5}"#;
        assert_eq!(payload.split(':').count(), 3);
        let result = envelope.decrypt_or_passthrough(payload).unwrap();
        assert_eq!(result, payload);
    }

    #[test]
    fn passes_through_legacy_shaped_payload_with_non_hex_segment() {
        let envelope = Envelope::from_hex_key(&test_key()).unwrap();
        let payload = "not-hex:also-not-hex";
        let result = envelope.decrypt_or_passthrough(payload).unwrap();
        assert_eq!(result, payload);
    }

    #[test]
    fn rejects_wrong_key_length() {
        let err = Envelope::from_hex_key(&hex::encode([1u8; 10])).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidKeyLength { .. }));
    }

    #[test]
    fn from_key_accepts_64_char_hex_or_32_raw_bytes() {
        let hex_envelope = Envelope::from_key(&test_key()).unwrap();
        let raw_key = "x".repeat(KEY_LEN);
        let raw_envelope = Envelope::from_key(&raw_key).unwrap();

        let ciphertext = hex_envelope.encrypt("hello").unwrap();
        assert!(hex_envelope.decrypt_or_passthrough(&ciphertext).is_ok());

        let ciphertext = raw_envelope.encrypt("hello").unwrap();
        assert!(raw_envelope.decrypt_or_passthrough(&ciphertext).is_ok());
    }

    #[test]
    fn from_key_rejects_non_hex_length_wrong_byte_count() {
        let err = Envelope::from_key("too-short").unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidKeyLength { .. }));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let envelope = Envelope::from_hex_key(&test_key()).unwrap();
        let mut ciphertext = envelope.encrypt("hello").unwrap();
        ciphertext.push('0');
        let result = envelope.decrypt_or_passthrough(&ciphertext);
        assert!(result.is_err());
    }
}

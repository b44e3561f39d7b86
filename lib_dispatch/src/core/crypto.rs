//! # Payload Encryption
//!
//! AES-256-CBC with PKCS7 padding. An encrypted payload travels as
//! `{"iv": <base64>, "data": <base64 ciphertext>}` with a fresh random IV per
//! request. The key is 32 bytes, hex encoded wherever it is configured.

use aes::Aes256;
use base64::{engine::general_purpose, Engine as _};
use cbc::{Decryptor, Encryptor};
use cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rng, RngCore};
use serde_json::{json, Value};

use super::error::CryptoError;

/// Raw AES-256 key.
pub type PayloadKey = [u8; 32];

/// Decodes a hex encoded 32-byte key.
pub fn parse_key(hex_key: &str) -> Result<PayloadKey, CryptoError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("invalid hex: {}", e)))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("key must be 32 bytes, found {}", len)))
}

/// Serializes `payload` to JSON and wraps it in an encrypted envelope.
pub fn encrypt_payload(key: &PayloadKey, payload: &Value) -> Result<Value, CryptoError> {
    let plaintext = serde_json::to_vec(payload)
        .map_err(|e| CryptoError::InvalidPayload(e.to_string()))?;

    let mut iv = [0u8; 16];
    rng().fill_bytes(&mut iv);

    let ciphertext = Encryptor::<Aes256>::new(&(*key).into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    Ok(json!({
        "iv": general_purpose::STANDARD.encode(iv),
        "data": general_purpose::STANDARD.encode(ciphertext),
    }))
}

/// Reverses [`encrypt_payload`].
pub fn decrypt_payload(key: &PayloadKey, envelope: &Value) -> Result<Value, CryptoError> {
    let field = |name: &str| {
        envelope
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| CryptoError::InvalidPayload(format!("missing '{}'", name)))
    };

    let iv = general_purpose::STANDARD
        .decode(field("iv")?)
        .map_err(|e| CryptoError::InvalidPayload(format!("invalid base64 IV: {}", e)))?;
    let ciphertext = general_purpose::STANDARD
        .decode(field("data")?)
        .map_err(|e| CryptoError::InvalidPayload(format!("invalid base64 data: {}", e)))?;

    let iv: [u8; 16] = iv
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidPayload(format!("invalid IV length: {}", iv.len())))?;

    let plaintext = Decryptor::<Aes256>::new(&(*key).into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| CryptoError::InvalidPayload(format!("decryption failed: {:?}", e)))?;

    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn envelope_decrypts_with_same_key_only() {
        let key = parse_key(KEY_HEX).unwrap();
        let payload = json!({"orderId": 42, "note": "leave at door"});
        let envelope = encrypt_payload(&key, &payload).unwrap();

        assert!(envelope["iv"].is_string());
        assert_ne!(envelope["data"], json!(payload.to_string()));
        assert_eq!(decrypt_payload(&key, &envelope).unwrap(), payload);

        let mut other = key;
        other[0] ^= 0xff;
        assert!(decrypt_payload(&other, &envelope).is_err());
    }

    #[test]
    fn iv_is_fresh_per_call() {
        let key = parse_key(KEY_HEX).unwrap();
        let a = encrypt_payload(&key, &json!({"a": 1})).unwrap();
        let b = encrypt_payload(&key, &json!({"a": 1})).unwrap();
        assert_ne!(a["iv"], b["iv"]);
    }

    #[test]
    fn key_validation() {
        assert!(matches!(parse_key("zz"), Err(CryptoError::InvalidKey(_))));
        assert!(matches!(parse_key("00ff"), Err(CryptoError::InvalidKey(_))));
        assert!(parse_key(&format!(" {} ", KEY_HEX)).is_ok());
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let key = parse_key(KEY_HEX).unwrap();
        assert!(matches!(
            decrypt_payload(&key, &json!({"data": "AAAA"})),
            Err(CryptoError::InvalidPayload(_))
        ));
    }
}

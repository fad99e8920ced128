//! Password-based AES-256-GCM encryption for credential bundles.
//!
//! The key is derived from the password with PBKDF2-HMAC-SHA256. Salt and
//! nonce are generated fresh for every call and travel with the ciphertext,
//! so the password is the only secret. Neither the password nor the derived
//! key is ever persisted.

use crate::error::{Result, TokenError};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Size of the derived key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the per-encryption salt in bytes
const SALT_SIZE: usize = 16;

/// PBKDF2 iteration count.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Ciphertext together with the IV and salt needed to open it.
///
/// All three fields are base64-encoded. This is also the on-disk shape of
/// encrypted exports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
}

fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, KDF_ITERATIONS, &mut key[..]);
    key
}

/// Encrypts plaintext under a password.
///
/// # Security
/// - Fresh random salt and nonce on every call (never reused)
/// - Authenticated encryption (tampering and wrong passwords detected on decrypt)
pub fn encrypt(plaintext: &str, password: &str) -> Result<EncryptedBlob> {
    if password.is_empty() {
        return Err(TokenError::Validation("password must not be empty".to_string()));
    }

    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(password, &salt);

    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| TokenError::Validation(format!("failed to create cipher: {}", e)))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| TokenError::Validation(format!("encryption failed: {}", e)))?;

    Ok(EncryptedBlob {
        ciphertext: BASE64.encode(ciphertext),
        iv: BASE64.encode(nonce),
        salt: BASE64.encode(salt),
    })
}

/// Decrypts a blob produced by [`encrypt`].
///
/// Any failure (bad base64, wrong sizes, wrong password, tampered data,
/// non-UTF-8 plaintext) is reported as [`TokenError::Decryption`].
pub fn decrypt(blob: &EncryptedBlob, password: &str) -> Result<Zeroizing<String>> {
    let ciphertext = BASE64
        .decode(&blob.ciphertext)
        .map_err(|_| TokenError::Decryption)?;
    let iv = BASE64.decode(&blob.iv).map_err(|_| TokenError::Decryption)?;
    let salt = BASE64.decode(&blob.salt).map_err(|_| TokenError::Decryption)?;

    if iv.len() != NONCE_SIZE || salt.is_empty() {
        return Err(TokenError::Decryption);
    }

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| TokenError::Decryption)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| TokenError::Decryption)?;

    String::from_utf8(plaintext)
        .map(Zeroizing::new)
        .map_err(|_| TokenError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = r#"{"client_id":"abc","client_secret":"s3cret"}"#;

        let blob = encrypt(plaintext, "hunter2").expect("Encryption failed");
        assert_ne!(blob.ciphertext, plaintext);

        let decrypted = decrypt(&blob, "hunter2").expect("Decryption failed");
        assert_eq!(decrypted.as_str(), plaintext);
    }

    #[test]
    fn test_fresh_salt_and_iv() {
        let blob1 = encrypt("same-plaintext", "pw").unwrap();
        let blob2 = encrypt("same-plaintext", "pw").unwrap();

        assert_ne!(blob1.salt, blob2.salt);
        assert_ne!(blob1.iv, blob2.iv);
        assert_ne!(blob1.ciphertext, blob2.ciphertext);

        assert_eq!(decrypt(&blob1, "pw").unwrap().as_str(), "same-plaintext");
        assert_eq!(decrypt(&blob2, "pw").unwrap().as_str(), "same-plaintext");
    }

    #[test]
    fn test_wrong_password_fails() {
        let blob = encrypt("secret", "right").unwrap();
        let result = decrypt(&blob, "wrong");
        assert!(matches!(result, Err(TokenError::Decryption)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut blob = encrypt("secret", "pw").unwrap();
        let mut raw = BASE64.decode(&blob.ciphertext).unwrap();
        raw[0] ^= 0xff;
        blob.ciphertext = BASE64.encode(raw);

        assert!(matches!(decrypt(&blob, "pw"), Err(TokenError::Decryption)));
    }

    #[test]
    fn test_swapped_salt_fails() {
        let blob = encrypt("secret", "pw").unwrap();
        let other = encrypt("other", "pw").unwrap();
        let mixed = EncryptedBlob {
            salt: other.salt,
            ..blob
        };

        assert!(matches!(decrypt(&mixed, "pw"), Err(TokenError::Decryption)));
    }

    #[test]
    fn test_garbage_input_is_decryption_error() {
        let blob = EncryptedBlob {
            ciphertext: "not-valid-base64!@#$".to_string(),
            iv: "AAAA".to_string(),
            salt: "AAAA".to_string(),
        };
        assert!(matches!(decrypt(&blob, "pw"), Err(TokenError::Decryption)));
    }

    #[test]
    fn test_empty_password_rejected() {
        assert!(matches!(encrypt("x", ""), Err(TokenError::Validation(_))));
    }
}

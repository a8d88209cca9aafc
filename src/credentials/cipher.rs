//! AES-256-CBC encryption of credential sets.
//!
//! Each record is encrypted separately under a fresh random IV. The key is
//! derived once from the configured passphrase and salt with Argon2id, so the
//! same configuration always yields the same key across restarts.

use super::CredentialSet;
use aes::Aes256;
use anyhow::{anyhow, Context, Result};
use argon2::Argon2;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the CBC initialization vector in bytes (one AES block)
const IV_SIZE: usize = 16;

/// Argon2 rejects salts shorter than this
pub const MIN_SALT_SIZE: usize = 8;

/// Derives the vault key from a passphrase and salt.
///
/// Argon2id with the crate's default cost parameters. Deterministic: the same
/// passphrase and salt always produce the same key.
///
/// # Returns
/// * `Ok([u8; 32])` - Derived key
/// * `Err` - If the salt is too short or derivation fails
pub fn derive_key(passphrase: &str, salt: &str) -> Result<[u8; KEY_SIZE]> {
    if salt.len() < MIN_SALT_SIZE {
        return Err(anyhow!(
            "Key derivation salt must be at least {} bytes, got {} bytes",
            MIN_SALT_SIZE,
            salt.len()
        ));
    }

    let mut key = [0u8; KEY_SIZE];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut key)
        .map_err(|e| anyhow!("Key derivation failed: {}", e))?;

    Ok(key)
}

/// Ciphertext and IV of one credential set, both hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredentials {
    pub encrypted: String,
    pub iv: String,
}

/// Encrypts and decrypts [`CredentialSet`]s under the process-wide vault key.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; KEY_SIZE],
}

impl CredentialCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Derives the key from `passphrase` and `salt` and builds a cipher.
    pub fn from_passphrase(passphrase: &str, salt: &str) -> Result<Self> {
        Ok(Self::new(derive_key(passphrase, salt)?))
    }

    /// Encrypts the canonical JSON form of `credentials` with a random IV.
    pub fn encrypt(&self, credentials: &CredentialSet) -> Result<EncryptedCredentials> {
        let plaintext = canonical_json(credentials)?;
        Ok(self.encrypt_bytes(&plaintext))
    }

    fn encrypt_bytes(&self, plaintext: &[u8]) -> EncryptedCredentials {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        EncryptedCredentials {
            encrypted: hex::encode(ciphertext),
            iv: hex::encode(iv),
        }
    }

    /// Decrypts a stored record back into a [`CredentialSet`].
    ///
    /// Never panics on bad input: malformed hex, a wrong-length IV, bad
    /// padding and plaintext that is not a credential set all come back as a
    /// [`CipherError`].
    pub fn decrypt(&self, data: &EncryptedCredentials) -> Result<CredentialSet, CipherError> {
        let ciphertext =
            hex::decode(&data.encrypted).map_err(|_| CipherError::InvalidHex("ciphertext"))?;
        let iv = hex::decode(&data.iv).map_err(|_| CipherError::InvalidHex("iv"))?;

        if iv.len() != IV_SIZE {
            return Err(CipherError::InvalidIvLength(iv.len()));
        }

        let plaintext = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|_| CipherError::Decryption)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::Decryption)?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| CipherError::MalformedCredentials(e.to_string()))
    }

    /// One-way SHA-256 digest of the canonical JSON form, hex encoded.
    ///
    /// Bookkeeping only; never consulted when resolving a token.
    pub fn fingerprint(credentials: &CredentialSet) -> Result<String> {
        let canonical = canonical_json(credentials)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

fn canonical_json(credentials: &CredentialSet) -> Result<Vec<u8>> {
    serde_json::to_vec(credentials).context("Failed to serialize credentials")
}

/// Decryption failures
#[derive(Debug, PartialEq, Clone)]
pub enum CipherError {
    /// Stored field is not valid hex
    InvalidHex(&'static str),
    /// IV decoded to the wrong number of bytes
    InvalidIvLength(usize),
    /// Wrong key, truncated ciphertext or bad padding
    Decryption,
    /// Plaintext is not a well-formed credential set
    MalformedCredentials(String),
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherError::InvalidHex(field) => write!(f, "Stored {} is not valid hex", field),
            CipherError::InvalidIvLength(len) => {
                write!(f, "Invalid IV size: expected {}, got {}", IV_SIZE, len)
            }
            CipherError::Decryption => {
                write!(f, "Decryption failed (wrong key or corrupted data)")
            }
            CipherError::MalformedCredentials(e) => {
                write!(f, "Decrypted data is not a credential set: {}", e)
            }
        }
    }
}

impl std::error::Error for CipherError {}

//! Streaming-server credentials and their at-rest encryption.
//!
//! A [`CredentialSet`] is the server URL, username and password that an
//! overlay token stands in for. It only ever exists in clear form in memory:
//! the token store holds the [`EncryptedCredentials`] produced by
//! [`CredentialCipher`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenService                       │
//! │  - issue / resolve                       │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialCipher                   │
//! │  - AES-256-CBC, PKCS#7 padding           │
//! │  - Fresh random IV per record            │
//! │  - Argon2id key from passphrase + salt   │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenStore (tokens.json)           │
//! │  - hex ciphertext + IV at rest           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - Credentials are never written to disk or logs in clear form
//! - The key is derived once at startup and held in memory only
//! - Anyone holding the passphrase and salt can decrypt every stored record
//! - CBC is not authenticated; tampering surfaces as a padding or parse failure

use serde::{Deserialize, Serialize};
use std::fmt;

mod cipher;

pub use cipher::{
    derive_key, CipherError, CredentialCipher, EncryptedCredentials, KEY_SIZE, MIN_SALT_SIZE,
};

/// Credentials for a Subsonic-compatible streaming server.
///
/// Field names match the JSON the login page submits and the overlay script
/// reads back (`serverURL`, `username`, `password`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    #[serde(rename = "serverURL")]
    pub server_url: String,
    pub username: String,
    pub password: String,
}

impl CredentialSet {
    pub fn new(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

// Password stays out of Debug output so a stray `?creds` never leaks it.
impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials as submitted over the wire, before validation.
///
/// Every field is optional so a missing field is reported as a
/// [`CredentialError`] instead of a body deserialization failure.
#[derive(Clone, Default, Deserialize)]
pub struct CredentialPayload {
    #[serde(rename = "serverURL")]
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CredentialPayload {
    /// Checks that all three fields are present and non-blank.
    pub fn validate(self) -> Result<CredentialSet, CredentialError> {
        let server_url = required(self.server_url, "serverURL")?;
        let username = required(self.username, "username")?;
        let password = required(self.password, "password")?;

        Ok(CredentialSet {
            server_url,
            username,
            password,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, CredentialError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CredentialError::MissingField(field)),
    }
}

/// Credential validation errors
#[derive(Debug, PartialEq, Clone)]
pub enum CredentialError {
    /// Request carried no credentials object at all
    MissingCredentials,
    /// A required field was absent or blank
    MissingField(&'static str),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::MissingCredentials => write!(f, "Missing credentials"),
            CredentialError::MissingField(field) => {
                write!(f, "Missing credentials: '{}' is required", field)
            }
        }
    }
}

impl std::error::Error for CredentialError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(server: Option<&str>, user: Option<&str>, pass: Option<&str>) -> CredentialPayload {
        CredentialPayload {
            server_url: server.map(str::to_string),
            username: user.map(str::to_string),
            password: pass.map(str::to_string),
        }
    }

    #[test]
    fn test_valid_payload() {
        let creds = payload(Some("https://music.example.com"), Some("alice"), Some("hunter2"))
            .validate()
            .unwrap();

        assert_eq!(creds.server_url, "https://music.example.com");
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "hunter2");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = payload(Some("https://music.example.com"), Some("alice"), None)
            .validate()
            .unwrap_err();
        assert_eq!(err, CredentialError::MissingField("password"));

        let err = payload(None, Some("alice"), Some("pw")).validate().unwrap_err();
        assert_eq!(err, CredentialError::MissingField("serverURL"));

        let err = payload(Some("https://x"), Some("   "), Some("pw"))
            .validate()
            .unwrap_err();
        assert_eq!(err, CredentialError::MissingField("username"));
    }

    #[test]
    fn test_wire_field_names() {
        let json = r#"{"serverURL":"https://music.example.com","username":"bob","password":"pw"}"#;
        let creds: CredentialSet = serde_json::from_str(json).unwrap();
        assert_eq!(creds.server_url, "https://music.example.com");

        let out = serde_json::to_string(&creds).unwrap();
        assert!(out.contains("\"serverURL\":\"https://music.example.com\""));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = CredentialSet::new("https://music.example.com", "bob", "s3cret");
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}

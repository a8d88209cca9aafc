//! Overlay tokens: records, persistence, issuance and expiry.
//!
//! A token is an opaque random id that stands in for one encrypted
//! [`CredentialSet`](crate::credentials::CredentialSet). Records live in a
//! single JSON document (`{ "tokens": [...] }`) managed by [`TokenStore`];
//! [`TokenService`] decides which of them are live.

use crate::credentials::EncryptedCredentials;
use chrono::{DateTime, Duration, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

mod service;
mod store;
mod sweeper;


pub use service::{generate_token_id, ResolveError, TokenService};
pub use store::{SweepResult, TokenStore};
pub use sweeper::run_sweep_loop;

/// One issued token as persisted in the store.
///
/// Field names and millisecond timestamps match the existing `tokens.json`
/// layout so stores written by earlier deployments stay readable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: String,

    /// SHA-256 of the credentials (diagnostic only)
    pub credentials_hash: String,

    pub credentials_encrypted: EncryptedCredentials,

    #[serde(rename = "created", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    pub expires: Expiry,
}

/// When a token stops being valid.
///
/// Persisted as epoch milliseconds, with `0` meaning [`Expiry::Never`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(DateTime<Utc>),
}

impl Expiry {
    /// True once `now` is strictly after the expiry instant.
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => now > *at,
        }
    }

    /// True once the expiry instant is at or before `now`; such records are swept.
    pub fn is_reached(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => *at <= now,
        }
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiry::Never => write!(f, "never"),
            Expiry::At(at) => write!(f, "{}", at.to_rfc3339()),
        }
    }
}

impl Serialize for Expiry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expiry::Never => serializer.serialize_i64(0),
            Expiry::At(at) => serializer.serialize_i64(at.timestamp_millis()),
        }
    }
}

impl<'de> Deserialize<'de> for Expiry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        if millis == 0 {
            return Ok(Expiry::Never);
        }

        DateTime::from_timestamp_millis(millis)
            .map(Expiry::At)
            .ok_or_else(|| de::Error::custom(format!("expiry out of range: {}", millis)))
    }
}

/// Token lifetime in whole days; zero means tokens never expire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenTtl {
    days: u32,
}

impl TokenTtl {
    pub fn days(days: u32) -> Self {
        Self { days }
    }

    pub fn never() -> Self {
        Self { days: 0 }
    }

    pub fn is_never(&self) -> bool {
        self.days == 0
    }

    /// Expiry for a token created at `created_at`.
    pub fn expiry_from(&self, created_at: DateTime<Utc>) -> Expiry {
        if self.is_never() {
            return Expiry::Never;
        }

        // Out-of-range lifetimes are rejected by config validation.
        created_at
            .checked_add_signed(Duration::days(i64::from(self.days)))
            .map(Expiry::At)
            .unwrap_or(Expiry::Never)
    }
}

impl fmt::Display for TokenTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "never")
        } else {
            write!(f, "{} days", self.days)
        }
    }
}

/// The whole persisted document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenStoreState {
    #[serde(default)]
    pub tokens: Vec<TokenRecord>,
}

impl TokenStoreState {
    pub fn find(&self, token_id: &str) -> Option<&TokenRecord> {
        self.tokens.iter().find(|t| t.id == token_id)
    }

    pub fn contains(&self, token_id: &str) -> bool {
        self.find(token_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

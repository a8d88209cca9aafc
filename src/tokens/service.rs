//! Token issuance and resolution.

use super::{TokenRecord, TokenStore, TokenTtl};
use crate::credentials::{CipherError, CredentialCipher, CredentialSet};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Random bytes per token id (192 bits, 48 hex characters)
const TOKEN_ID_BYTES: usize = 24;

/// Issues tokens and resolves them back to credentials.
///
/// Sole owner of the liveness policy: the store only persists what this
/// service decides. Every load-modify-save cycle runs under `store`'s mutex,
/// so request handlers and the background sweep never interleave writes.
pub struct TokenService {
    store: Mutex<TokenStore>,
    cipher: CredentialCipher,
    ttl: TokenTtl,
}

impl TokenService {
    /// Opens the service over `store`, creating or resetting the document as
    /// needed.
    pub fn open(store: TokenStore, cipher: CredentialCipher, ttl: TokenTtl) -> Self {
        let state = store.load();
        info!(
            path = %store.path().display(),
            tokens = state.len(),
            ttl = %ttl,
            "Token store loaded"
        );

        Self {
            store: Mutex::new(store),
            cipher,
            ttl,
        }
    }

    /// Issues a new token for `credentials` as of `now`.
    ///
    /// Sweeps expired records first, then appends the new encrypted record
    /// and persists it. Unlike sweeps, a failed read or write here is an
    /// error: the caller must not hand out a token that was never stored, and
    /// an unreadable document must not be replaced by this one record.
    pub fn issue(&self, credentials: &CredentialSet, now: DateTime<Utc>) -> Result<String> {
        let store = self.store();
        let mut state = store
            .try_sweep_expired(now)
            .context("Failed to read token store")?
            .state;

        let token_id = loop {
            let candidate = generate_token_id();
            if !state.contains(&candidate) {
                break candidate;
            }
            warn!("Token id collision, regenerating");
        };

        let credentials_hash = CredentialCipher::fingerprint(credentials)?;
        let credentials_encrypted = self
            .cipher
            .encrypt(credentials)
            .context("Failed to encrypt credentials")?;
        let expires = self.ttl.expiry_from(now);

        state.tokens.push(TokenRecord {
            id: token_id.clone(),
            credentials_hash,
            credentials_encrypted,
            created_at: now,
            expires,
        });

        store.save(&state).context("Failed to persist new token")?;

        info!(
            token = %token_prefix(&token_id),
            expires = %expires,
            "Token generated"
        );

        Ok(token_id)
    }

    /// [`issue`](Self::issue) at the current wall-clock time.
    pub fn issue_now(&self, credentials: &CredentialSet) -> Result<String> {
        self.issue(credentials, Utc::now())
    }

    /// Resolves `token_id` to its credentials as of `now`.
    ///
    /// A token removed by this call's own sweep reports [`ResolveError::Expired`]
    /// rather than `NotFound`, so the holder learns why the link stopped working.
    pub fn resolve(
        &self,
        token_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CredentialSet, ResolveError> {
        let sweep = self.store().sweep_expired(now);

        let Some(record) = sweep.state.find(token_id) else {
            if sweep.expired.iter().any(|t| t.id == token_id) {
                debug!(token = %token_prefix(token_id), "Token expired");
                return Err(ResolveError::Expired);
            }
            debug!(token = %token_prefix(token_id), "Token not found");
            return Err(ResolveError::NotFound);
        };

        // Sweep and lookup share `now`, but keep the check in case they ever diverge.
        if record.expires.is_past(now) {
            debug!(token = %token_prefix(token_id), "Token expired");
            return Err(ResolveError::Expired);
        }

        self.cipher
            .decrypt(&record.credentials_encrypted)
            .map_err(|e| {
                error!(
                    token = %token_prefix(token_id),
                    error = %e,
                    "Failed to decrypt stored credentials (store corrupt or key changed)"
                );
                ResolveError::DecryptFailure(e)
            })
    }

    /// [`resolve`](Self::resolve) at the current wall-clock time.
    pub fn resolve_now(&self, token_id: &str) -> Result<CredentialSet, ResolveError> {
        self.resolve(token_id, Utc::now())
    }

    /// Removes expired records as of `now`, returning how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.store().sweep_expired(now).removed()
    }

    /// [`sweep`](Self::sweep) at the current wall-clock time.
    pub fn sweep_now(&self) -> usize {
        self.sweep(Utc::now())
    }

    /// Number of records currently persisted, expired or not.
    pub fn token_count(&self) -> usize {
        self.store().load().len()
    }

    // Every cycle re-reads the file, so a panic mid-cycle leaves nothing to repair.
    fn store(&self) -> MutexGuard<'_, TokenStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Generates an opaque token id from the OS random source.
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Log-safe prefix of a token id.
pub(crate) fn token_prefix(token_id: &str) -> String {
    token_id.chars().take(8).collect()
}

/// Token resolution failures
#[derive(Debug, PartialEq, Clone)]
pub enum ResolveError {
    /// No such token (never issued, or swept in an earlier request)
    NotFound,
    /// Token lifetime is over
    Expired,
    /// Stored credentials could not be decrypted
    DecryptFailure(CipherError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotFound => write!(f, "Token not found"),
            ResolveError::Expired => write!(f, "Token expired"),
            ResolveError::DecryptFailure(e) => write!(f, "Failed to decrypt credentials: {}", e),
        }
    }
}

impl std::error::Error for ResolveError {}

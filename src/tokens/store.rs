//! Flat-file token persistence.
//!
//! The store is a passive JSON document with no policy of its own. Writes are
//! atomic (temp file, fsync, rename) so a crash never leaves a half-written
//! document behind. An unreadable document is moved aside and replaced with an
//! empty one: tokens can always be re-issued, so losing them is preferable to
//! refusing to start.

use super::{TokenRecord, TokenStoreState};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Outcome of an expiry sweep
#[derive(Debug, Default)]
pub struct SweepResult {
    /// Records still live after the sweep
    pub state: TokenStoreState,
    /// Records removed by this sweep
    pub expired: Vec<TokenRecord>,
}

impl SweepResult {
    pub fn removed(&self) -> usize {
        self.expired.len()
    }
}

/// Token document on disk.
///
/// Not synchronised: callers serialise load-modify-save cycles themselves
/// (see [`TokenService`](super::TokenService)).
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document.
    ///
    /// - Missing file: an empty document is written and returned
    /// - Unparseable file (bad JSON or bad UTF-8): moved to `<path>.corrupt`,
    ///   replaced by an empty document
    /// - Other read errors: logged, empty state returned, file left untouched
    pub fn load(&self) -> TokenStoreState {
        self.try_load().unwrap_or_else(|e| {
            error!(
                path = %self.path.display(),
                error = %e,
                "Failed to read token store, using empty state"
            );
            TokenStoreState::default()
        })
    }

    /// Like [`load`](Self::load), but a file that cannot be read at all is an
    /// error instead of an empty state.
    pub fn try_load(&self) -> Result<TokenStoreState> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Token store not found, creating empty store");
                return Ok(self.reset());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read token store {}", self.path.display())
                })
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "Token store is corrupt, resetting to empty store"
                );
                self.quarantine();
                Ok(self.reset())
            }
        }
    }

    /// Atomically overwrites the document.
    ///
    /// Failures are logged here and also returned, so callers that need the
    /// write to land (issuance) can report it.
    pub fn save(&self, state: &TokenStoreState) -> Result<()> {
        self.write_atomic(state).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to save token store");
            e
        })
    }

    /// Drops every record whose expiry has been reached by `now`.
    ///
    /// Persists only when something was removed, so back-to-back sweeps are
    /// free and leave the document unchanged.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> SweepResult {
        self.sweep_state(self.load(), now)
    }

    /// [`sweep_expired`](Self::sweep_expired) over [`try_load`](Self::try_load):
    /// an unreadable file fails instead of being swept as empty.
    pub fn try_sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepResult> {
        Ok(self.sweep_state(self.try_load()?, now))
    }

    fn sweep_state(&self, state: TokenStoreState, now: DateTime<Utc>) -> SweepResult {
        let (expired, live): (Vec<_>, Vec<_>) = state
            .tokens
            .into_iter()
            .partition(|t| t.expires.is_reached(now));

        let result = SweepResult {
            state: TokenStoreState { tokens: live },
            expired,
        };

        if result.removed() > 0 {
            info!(
                removed = result.removed(),
                remaining = result.state.len(),
                "Swept expired tokens"
            );
            // Best effort: a failed write is logged by save() and retried by the next sweep.
            let _ = self.save(&result.state);
        }

        result
    }

    fn reset(&self) -> TokenStoreState {
        let empty = TokenStoreState::default();
        let _ = self.save(&empty);
        empty
    }

    /// Moves an unreadable document out of the way so it can be inspected.
    fn quarantine(&self) {
        let target = self.sibling(".corrupt");
        match fs::rename(&self.path, &target) {
            Ok(()) => warn!(path = %target.display(), "Moved corrupt token store aside"),
            Err(e) => warn!(error = %e, "Failed to move corrupt token store aside"),
        }
    }

    fn write_atomic(&self, state: &TokenStoreState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create token store directory {}", parent.display())
            })?;
        }

        let json =
            serde_json::to_string_pretty(state).context("Failed to serialize token store")?;

        let tmp_path = self.sibling(".tmp");

        {
            let mut tmp_file =
                File::create(&tmp_path).context("Failed to create temporary token store file")?;
            tmp_file
                .write_all(json.as_bytes())
                .context("Failed to write token store")?;
            tmp_file
                .sync_all()
                .context("Failed to sync token store to disk")?;
        }

        fs::rename(&tmp_path, &self.path).context("Failed to replace token store file")?;

        Ok(())
    }

    /// `<path><suffix>`, e.g. `tokens.json.tmp`
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self.path.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::EncryptedCredentials;
    use crate::tokens::Expiry;
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(id: &str, created_at: DateTime<Utc>, expires: Expiry) -> TokenRecord {
        TokenRecord {
            id: id.to_string(),
            credentials_hash: "ab".repeat(32),
            credentials_encrypted: EncryptedCredentials {
                encrypted: "00".repeat(32),
                iv: "11".repeat(16),
            },
            created_at,
            expires,
        }
    }

    fn store_in(dir: &TempDir) -> TokenStore {
        TokenStore::new(dir.path().join("config").join("tokens.json"))
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let state = store.load();
        assert!(state.is_empty());
        assert!(store.path().exists());

        let contents = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["tokens"], serde_json::json!([]));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();

        let state = TokenStoreState {
            tokens: vec![
                record("aaa", now, Expiry::Never),
                record("bbb", now, Expiry::At(now + Duration::days(2))),
            ],
        };
        store.save(&state).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.find("aaa").unwrap().expires, Expiry::Never);
        assert!(matches!(loaded.find("bbb").unwrap().expires, Expiry::At(_)));

        // No temp file left behind
        assert!(!store.sibling(".tmp").exists());
    }

    #[test]
    fn test_corrupt_file_resets_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ this is not json").unwrap();

        let state = store.load();
        assert!(state.is_empty());

        // Original content kept for inspection, store rewritten as valid JSON
        let corrupt = fs::read_to_string(store.sibling(".corrupt")).unwrap();
        assert_eq!(corrupt, "{ this is not json");
        let reloaded: TokenStoreState =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_non_utf8_file_resets_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let garbage = [0xff, 0xfe, 0x00, b'{'];
        fs::write(store.path(), garbage).unwrap();

        assert!(store.load().is_empty());

        assert_eq!(fs::read(store.sibling(".corrupt")).unwrap(), garbage);
        let reloaded: TokenStoreState =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_unreadable_store_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        // A directory where the document should be cannot be read as a file
        fs::create_dir_all(store.path()).unwrap();

        assert!(store.try_load().is_err());
        assert!(store.try_sweep_expired(Utc::now()).is_err());
        assert!(store.load().is_empty());

        assert!(store.path().is_dir());
        assert!(!store.sibling(".corrupt").exists());
    }

    #[test]
    fn test_reads_legacy_document() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{
  "tokens": [
    {
      "id": "3f1c",
      "credentials_hash": "deadbeef",
      "credentials_encrypted": { "encrypted": "00ff", "iv": "0102" },
      "created": 1735689600000,
      "expires": 0
    },
    {
      "id": "9a2b",
      "credentials_hash": "deadbeef",
      "credentials_encrypted": { "encrypted": "00ff", "iv": "0102" },
      "created": 1735689600000,
      "expires": 1735862400000
    }
  ]
}"#,
        )
        .unwrap();

        let state = store.load();
        assert_eq!(state.len(), 2);

        let never = state.find("3f1c").unwrap();
        assert_eq!(never.expires, Expiry::Never);
        assert_eq!(never.created_at.timestamp_millis(), 1735689600000);

        let timed = state.find("9a2b").unwrap();
        assert_eq!(
            timed.expires,
            Expiry::At(DateTime::from_timestamp_millis(1735862400000).unwrap())
        );
    }

    #[test]
    fn test_sweep_removes_only_reached_expiries() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();

        store
            .save(&TokenStoreState {
                tokens: vec![
                    record("forever", now - Duration::days(30), Expiry::Never),
                    record("stale", now - Duration::days(3), Expiry::At(now - Duration::days(1))),
                    record("boundary", now - Duration::days(2), Expiry::At(now)),
                    record("fresh", now, Expiry::At(now + Duration::days(2))),
                ],
            })
            .unwrap();

        let result = store.sweep_expired(now);
        assert_eq!(result.removed(), 2);
        assert!(result.state.contains("forever"));
        assert!(result.state.contains("fresh"));
        assert!(!result.state.contains("stale"));
        assert!(!result.state.contains("boundary"));

        // Persisted
        assert_eq!(store.load(), result.state);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();

        store
            .save(&TokenStoreState {
                tokens: vec![
                    record("a", now, Expiry::Never),
                    record("b", now - Duration::days(5), Expiry::At(now - Duration::days(3))),
                ],
            })
            .unwrap();

        let first = store.sweep_expired(now);
        let persisted_once = fs::read_to_string(store.path()).unwrap();

        let second = store.sweep_expired(now);
        let persisted_twice = fs::read_to_string(store.path()).unwrap();

        assert_eq!(first.state, second.state);
        assert_eq!(second.removed(), 0);
        assert_eq!(persisted_once, persisted_twice);
    }
}

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::credentials::MIN_SALT_SIZE;
use crate::tokens::TokenTtl;

/// Longest accepted token lifetime (100 years)
const MAX_EXPIRES_DAYS: u32 = 36_500;

/// Complete NaviOverlay configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NaviOverlayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub overlay: OverlayPageConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Directory served under `/static` (overlay script, stylesheet, images)
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    3000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            static_dir: None,
        }
    }
}

/// Token lifetime and storage
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Token lifetime in days, 0 = never expire
    #[serde(default = "default_expires")]
    pub expires: u32,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// How often the background sweep runs (minutes)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_minutes: u64,
}

fn default_expires() -> u32 {
    2
}

fn default_store_path() -> PathBuf {
    PathBuf::from("config/tokens.json")
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expires: default_expires(),
            store_path: default_store_path(),
            sweep_interval_minutes: default_sweep_interval(),
        }
    }
}

impl TokenConfig {
    pub fn ttl(&self) -> TokenTtl {
        TokenTtl::days(self.expires)
    }
}

/// Credential vault key material.
///
/// Whoever knows the passphrase and salt can decrypt every stored credential.
#[derive(Clone, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_salt")]
    pub salt: String,
}

fn default_salt() -> String {
    "navioverlay-salt".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            passphrase: None,
            salt: default_salt(),
        }
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("salt", &"<redacted>")
            .finish()
    }
}

/// Overlay page template
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverlayPageConfig {
    /// HTML template to serve; the built-in page is used when unset
    #[serde(default)]
    pub template_path: Option<PathBuf>,
}

impl NaviOverlayConfig {
    /// Applies `NAVIOVERLAY_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // PORT is honoured for hosting platforms that inject it
        for key in ["PORT", "NAVIOVERLAY_PORT"] {
            if let Some(port) = var(key).and_then(|v| v.parse::<u16>().ok()) {
                self.server.port = port;
            }
        }
        if let Some(v) = var("NAVIOVERLAY_BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(v) = var("NAVIOVERLAY_STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(v));
        }
        if let Some(days) = var("NAVIOVERLAY_EXPIRES").and_then(|v| v.parse::<u32>().ok()) {
            self.tokens.expires = days;
        }
        if let Some(v) = var("NAVIOVERLAY_STORE_PATH") {
            self.tokens.store_path = PathBuf::from(v);
        }
        if let Some(v) = var("NAVIOVERLAY_SECRET") {
            self.vault.passphrase = Some(v);
        }
        if let Some(v) = var("NAVIOVERLAY_SALT") {
            self.vault.salt = v;
        }
        if let Some(v) = var("NAVIOVERLAY_TEMPLATE") {
            self.overlay.template_path = Some(PathBuf::from(v));
        }
    }

    /// Rejects configurations the service cannot safely start with.
    pub fn validate(&self) -> Result<()> {
        match &self.vault.passphrase {
            Some(p) if !p.is_empty() => {}
            _ => {
                return Err(anyhow!(
                    "vault.passphrase (or NAVIOVERLAY_SECRET) is required to encrypt stored credentials"
                ))
            }
        }
        if self.vault.salt.len() < MIN_SALT_SIZE {
            return Err(anyhow!(
                "vault.salt must be at least {} bytes",
                MIN_SALT_SIZE
            ));
        }
        if self.tokens.expires > MAX_EXPIRES_DAYS {
            return Err(anyhow!(
                "tokens.expires must be at most {} days (use 0 for never)",
                MAX_EXPIRES_DAYS
            ));
        }
        if self.tokens.sweep_interval_minutes == 0 {
            return Err(anyhow!("tokens.sweep_interval_minutes must be greater than 0"));
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<NaviOverlayConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: NaviOverlayConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Loads `path` if it exists (defaults otherwise), then applies env overrides.
pub fn load_or_default(path: &Path) -> Result<NaviOverlayConfig> {
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        NaviOverlayConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with_passphrase(mut config: NaviOverlayConfig) -> NaviOverlayConfig {
        config.vault.passphrase = Some("test-passphrase".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = NaviOverlayConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.tokens.expires, 2);
        assert_eq!(config.tokens.store_path, PathBuf::from("config/tokens.json"));
        assert_eq!(config.tokens.sweep_interval_minutes, 60);
        assert!(config.vault.passphrase.is_none());
        assert!(config.overlay.template_path.is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            port = 8080
            bind_address = "127.0.0.1"
            static_dir = "public"

            [tokens]
            expires = 0
            store_path = "/var/lib/navioverlay/tokens.json"
            sweep_interval_minutes = 15

            [vault]
            passphrase = "correct horse"
            salt = "deployment-salt"

            [overlay]
            template_path = "overlay/overlay.html"
        "#;

        let config: NaviOverlayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.static_dir, Some(PathBuf::from("public")));
        assert_eq!(config.tokens.expires, 0);
        assert!(config.tokens.ttl().is_never());
        assert_eq!(config.tokens.sweep_interval_minutes, 15);
        assert_eq!(config.vault.passphrase.as_deref(), Some("correct horse"));
        assert_eq!(config.vault.salt, "deployment-salt");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [tokens]
            expires = 7
        "#;

        let config: NaviOverlayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.tokens.expires, 7);
        assert_eq!(config.server.port, 3000); // Default
        assert_eq!(config.vault.salt, "navioverlay-salt"); // Default
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "4000"),
            ("NAVIOVERLAY_EXPIRES", "0"),
            ("NAVIOVERLAY_SECRET", "from-env"),
            ("NAVIOVERLAY_STORE_PATH", "/tmp/tokens.json"),
        ]
        .into_iter()
        .collect();

        let mut config = NaviOverlayConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.tokens.expires, 0);
        assert_eq!(config.vault.passphrase.as_deref(), Some("from-env"));
        assert_eq!(config.tokens.store_path, PathBuf::from("/tmp/tokens.json"));
    }

    #[test]
    fn test_specific_port_wins_and_bad_values_ignored() {
        let env: HashMap<&str, &str> = [
            ("PORT", "4000"),
            ("NAVIOVERLAY_PORT", "5000"),
            ("NAVIOVERLAY_EXPIRES", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = NaviOverlayConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.tokens.expires, 2);
    }

    #[test]
    fn test_validation() {
        // No passphrase
        assert!(NaviOverlayConfig::default().validate().is_err());

        let config = with_passphrase(NaviOverlayConfig::default());
        assert!(config.validate().is_ok());

        let mut short_salt = config.clone();
        short_salt.vault.salt = "salt".to_string();
        assert!(short_salt.validate().is_err());

        let mut too_long = config.clone();
        too_long.tokens.expires = MAX_EXPIRES_DAYS + 1;
        assert!(too_long.validate().is_err());

        let mut no_sweep = config;
        no_sweep.tokens.sweep_interval_minutes = 0;
        assert!(no_sweep.validate().is_err());
    }

    #[test]
    fn test_vault_debug_redacts_secrets() {
        let config = with_passphrase(NaviOverlayConfig::default());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("test-passphrase"));
        assert!(!rendered.contains("navioverlay-salt"));
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("navioverlay.toml");
        std::fs::write(&path, "[server]\nport = 9000\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9000);

        // Missing file is an error for load_config, defaults for load_or_default
        let absent = dir.path().join("absent.toml");
        assert!(load_config(&absent).is_err());
        assert!(load_or_default(&absent).is_ok());

        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(load_config(&path).is_err());
    }
}

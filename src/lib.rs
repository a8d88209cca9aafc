// Streaming-server credentials and the cipher that protects them at rest
pub mod credentials;

// Token records, flat-file store, issuance and expiry
pub mod tokens;

// HTTP surface and the gated overlay page
pub mod api;

// TOML + environment configuration
pub mod config;

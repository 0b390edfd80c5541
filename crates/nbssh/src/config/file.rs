//! File-based configuration loading.
//!
//! Configuration files are TOML. Every key is optional. Timeouts are in
//! seconds, may be fractional, and `0` disables a timeout:
//!
//! ```toml
//! host = "db1.example.com"
//! port = 22
//! user = "deploy"
//! num_retries = 3
//! identities = ["~/.ssh/id_ed25519"]
//! agent = "blocking"
//!
//! [timeouts]
//! connect_secs = 30
//! io_secs = 60
//! close_secs = 5
//!
//! [exec]
//! term = "vt100"
//! trim = true
//! ```

use std::path::Path;

use super::ClientConfig;
use crate::error::{Result, SshError};

impl ClientConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SshError::config(format!("invalid TOML: {e}")))
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SshError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), host = %config.host, "loaded configuration file");
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| SshError::config(format!("failed to serialize: {e}")))
    }
}

//! Environment-based configuration.
//!
//! Recognised variables, with the default `NBSSH` prefix:
//!
//! | Variable | Field |
//! |---|---|
//! | `NBSSH_HOST` | `host` |
//! | `NBSSH_PORT` | `port` |
//! | `NBSSH_USER` | `user` |
//! | `NBSSH_PASSWORD` | `password` |
//! | `NBSSH_PRIVATE_KEY` | `private_key` |
//! | `NBSSH_NUM_RETRIES` | `num_retries` |
//! | `NBSSH_AGENT` | `agent` (`blocking` or `non-blocking`) |
//! | `NBSSH_CONNECT_TIMEOUT` | `timeouts.connect` (seconds, `0` disables) |
//! | `NBSSH_IO_TIMEOUT` | `timeouts.io` |
//! | `NBSSH_READ_TIMEOUT` | `timeouts.read` |
//! | `NBSSH_CLOSE_TIMEOUT` | `timeouts.close` |
//! | `NBSSH_TERM` | `exec.term` |
//! | `NBSSH_TRIM` | `exec.trim` |

use std::collections::HashMap;
use std::time::Duration;

use super::{AgentMode, ClientConfig};
use crate::error::{Result, SshError};

/// Environment configuration prefix.
pub const DEFAULT_PREFIX: &str = "NBSSH";

/// Environment variable reader.
///
/// Values set with [`EnvConfig::with_var`] shadow the process environment,
/// which lets tests avoid mutating global state.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Prefix for environment variables.
    prefix: String,
    /// Overrides consulted before the process environment.
    overrides: HashMap<String, String>,
    /// Ignore the process environment entirely.
    isolated: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl EnvConfig {
    /// Create a new environment config reader.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            overrides: HashMap::new(),
            isolated: false,
        }
    }

    /// Create a reader that only sees the given `(name, value)` pairs.
    ///
    /// Names are given without the prefix.
    #[must_use]
    pub fn from_pairs<I, K, V>(prefix: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::new(prefix);
        config.overrides = pairs
            .into_iter()
            .map(|(k, v)| (config.var_name(k.as_ref()), v.into()))
            .collect();
        config.isolated = true;
        config
    }

    /// Add an override.
    #[must_use]
    pub fn with_var(mut self, name: &str, value: impl Into<String>) -> Self {
        let var_name = self.var_name(name);
        self.overrides.insert(var_name, value.into());
        self
    }

    /// Build the full environment variable name.
    fn var_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_uppercase()
        } else {
            format!("{}_{}", self.prefix, name.to_uppercase())
        }
    }

    /// Get a string value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let var_name = self.var_name(name);
        if let Some(value) = self.overrides.get(&var_name) {
            return Some(value.clone());
        }
        if self.isolated {
            return None;
        }
        std::env::var(&var_name).ok()
    }

    /// Get a parsed value, failing on values that do not parse.
    pub fn parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.get(name)
            .map(|v| {
                v.trim().parse().map_err(|_| {
                    SshError::config(format!("invalid value '{v}' for {}", self.var_name(name)))
                })
            })
            .transpose()
    }

    /// Get a boolean value.
    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).map(|v| {
            matches!(
                v.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on" | "enabled"
            )
        })
    }

    /// Get a timeout in seconds; `0` means no timeout.
    pub fn timeout_secs(&self, name: &str) -> Result<Option<Option<Duration>>> {
        Ok(self
            .parse::<u64>(name)?
            .map(|secs| (secs > 0).then(|| Duration::from_secs(secs))))
    }

    /// Check if a variable is set.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl ClientConfig {
    /// Override fields from environment variables.
    ///
    /// Unset variables leave the field untouched.
    pub fn apply_env(&mut self, env: &EnvConfig) -> Result<()> {
        if let Some(host) = env.get("host") {
            self.host = host;
        }
        if let Some(port) = env.parse("port")? {
            self.port = port;
        }
        if let Some(user) = env.get("user") {
            self.user = Some(user);
        }
        if let Some(password) = env.get("password") {
            self.password = Some(password);
        }
        if let Some(key) = env.get("private_key") {
            self.private_key = Some(key.into());
        }
        if let Some(retries) = env.parse("num_retries")? {
            self.num_retries = retries;
        }
        if let Some(agent) = env.get("agent") {
            self.agent = match agent.to_lowercase().as_str() {
                "blocking" => AgentMode::Blocking,
                "non-blocking" | "nonblocking" => AgentMode::NonBlocking,
                other => {
                    return Err(SshError::config(format!("unknown agent mode '{other}'")));
                }
            };
        }
        if let Some(timeout) = env.timeout_secs("connect_timeout")? {
            self.timeouts.connect = timeout;
        }
        if let Some(timeout) = env.timeout_secs("io_timeout")? {
            self.timeouts.io = timeout;
        }
        if let Some(timeout) = env.timeout_secs("read_timeout")? {
            self.timeouts.read = timeout;
        }
        if let Some(timeout) = env.timeout_secs("close_timeout")? {
            self.timeouts.close = timeout;
        }
        if let Some(term) = env.get("term") {
            self.exec.term = term;
        }
        if let Some(trim) = env.bool("trim") {
            self.exec.trim = trim;
        }
        Ok(())
    }

    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(&EnvConfig::default())?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_name_uses_prefix() {
        let env = EnvConfig::new("TEST");
        assert_eq!(env.var_name("io_timeout"), "TEST_IO_TIMEOUT");
        assert_eq!(EnvConfig::new("").var_name("host"), "HOST");
    }

    #[test]
    fn overrides_shadow_environment() {
        let env = EnvConfig::from_pairs("NBSSH", [("host", "db1"), ("port", "2222")]);
        assert_eq!(env.get("host").as_deref(), Some("db1"));
        assert_eq!(env.parse::<u16>("port").unwrap(), Some(2222));
        assert!(!env.is_set("user"));
    }

    #[test]
    fn apply_env_overrides_fields() {
        let env = EnvConfig::from_pairs(
            DEFAULT_PREFIX,
            [
                ("host", "db1.example.com"),
                ("user", "deploy"),
                ("num_retries", "7"),
                ("agent", "non-blocking"),
                ("read_timeout", "15"),
                ("close_timeout", "0"),
            ],
        )
        .with_var("trim", "no");

        let mut config = ClientConfig::new("placeholder");
        config.apply_env(&env).unwrap();

        assert_eq!(config.host, "db1.example.com");
        assert_eq!(config.user.as_deref(), Some("deploy"));
        assert_eq!(config.num_retries, 7);
        assert_eq!(config.agent, AgentMode::NonBlocking);
        assert_eq!(config.timeouts.read, Some(Duration::from_secs(15)));
        assert_eq!(config.timeouts.close, None);
        assert!(!config.exec.trim);
        assert_eq!(config.port, 22);
    }

    #[test]
    fn bad_values_are_config_errors() {
        let env = EnvConfig::from_pairs(DEFAULT_PREFIX, [("port", "ssh")]);
        let mut config = ClientConfig::new("host");
        let err = config.apply_env(&env).unwrap_err();
        assert!(err.to_string().contains("NBSSH_PORT"));

        let env = EnvConfig::from_pairs(DEFAULT_PREFIX, [("agent", "sometimes")]);
        assert!(config.apply_env(&env).is_err());
    }
}

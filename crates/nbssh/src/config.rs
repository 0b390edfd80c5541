//! Client configuration.
//!
//! A [`ClientConfig`] can be built in code, loaded from TOML (see [`file`]),
//! and overridden from `NBSSH_*` environment variables (see [`env`]).

pub mod env;
pub mod file;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SshError};

/// Default number of retries for each bounded authentication call.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Identity files tried, in order, when authenticating with keys.
pub const DEFAULT_IDENTITIES: &[&str] = &[
    "~/.ssh/id_dsa",
    "~/.ssh/id_rsa",
    "~/.ssh/identity",
    "~/.ssh/id_ecdsa",
    "~/.ssh/id_ed25519",
];

/// How the agent authentication attempt is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentMode {
    /// Switch the engine to blocking mode for a single agent call.
    ///
    /// Agents are local and answer quickly, so the call is not retried.
    #[default]
    Blocking,
    /// Stay non-blocking and retry through the bounded retry driver.
    NonBlocking,
}

/// Timeouts for the blocking stages of a client.
///
/// `None` waits indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connection establishment.
    #[serde(rename = "connect_secs", with = "option_secs")]
    pub connect: Option<Duration>,
    /// Each driven protocol operation (handshake, auth, channel, PTY, exec).
    #[serde(rename = "io_secs", with = "option_secs")]
    pub io: Option<Duration>,
    /// Each wait for command output.
    #[serde(rename = "read_secs", with = "option_secs")]
    pub read: Option<Duration>,
    /// Closing the session on teardown.
    #[serde(rename = "close_secs", with = "option_secs")]
    pub close: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Some(Duration::from_secs(30)),
            io: Some(Duration::from_secs(60)),
            read: None,
            close: Some(Duration::from_secs(5)),
        }
    }
}

impl TimeoutConfig {
    /// No timeouts anywhere.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            connect: None,
            io: None,
            read: None,
            close: None,
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn connect(mut self, timeout: Option<Duration>) -> Self {
        self.connect = timeout;
        self
    }

    /// Set the protocol operation timeout.
    #[must_use]
    pub const fn io(mut self, timeout: Option<Duration>) -> Self {
        self.io = timeout;
        self
    }

    /// Set the output wait timeout.
    #[must_use]
    pub const fn read(mut self, timeout: Option<Duration>) -> Self {
        self.read = timeout;
        self
    }

    /// Set the close timeout.
    #[must_use]
    pub const fn close(mut self, timeout: Option<Duration>) -> Self {
        self.close = timeout;
        self
    }
}

/// Options for command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Terminal type sent with PTY requests.
    pub term: String,
    /// Trim surrounding whitespace from each output line.
    ///
    /// When false only the line terminator (and a `\r` before it) is removed.
    pub trim: bool,
    /// Size of each channel read.
    pub read_buffer: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            term: "vt100".to_string(),
            trim: true,
            read_buffer: 32 * 1024,
        }
    }
}

impl ExecConfig {
    /// Set the terminal type.
    #[must_use]
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    /// Enable or disable whitespace trimming.
    #[must_use]
    pub const fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    /// Set the read buffer size.
    #[must_use]
    pub const fn read_buffer(mut self, size: usize) -> Self {
        self.read_buffer = size;
        self
    }
}

/// Everything needed to connect, authenticate and run commands on one host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host to connect to.
    pub host: String,
    /// Port (default 22).
    pub port: u16,
    /// User name; the current OS user when unset.
    pub user: Option<String>,
    /// Passphrase for private keys.
    pub password: Option<String>,
    /// Private key tried before the well-known identity files.
    pub private_key: Option<PathBuf>,
    /// Retry budget for each bounded authentication call.
    pub num_retries: u32,
    /// Identity files, `~/` expanded to the home directory.
    pub identities: Vec<String>,
    /// How agent authentication is attempted.
    pub agent: AgentMode,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
    /// Command execution options.
    pub exec: ExecConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            user: None,
            password: None,
            private_key: None,
            num_retries: DEFAULT_RETRIES,
            identities: DEFAULT_IDENTITIES.iter().map(ToString::to_string).collect(),
            agent: AgentMode::default(),
            timeouts: TimeoutConfig::default(),
            exec: ExecConfig::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key)
            .field("num_retries", &self.num_retries)
            .field("identities", &self.identities)
            .field("agent", &self.agent)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl ClientConfig {
    /// Create a config for a host with defaults for everything else.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the private key passphrase.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set a private key to try first.
    #[must_use]
    pub fn private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key = Some(path.into());
        self
    }

    /// Set the retry budget for bounded authentication calls.
    #[must_use]
    pub const fn num_retries(mut self, retries: u32) -> Self {
        self.num_retries = retries;
        self
    }

    /// Replace the identity file list.
    #[must_use]
    pub fn identities<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identities = identities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the agent authentication mode.
    #[must_use]
    pub const fn agent(mut self, mode: AgentMode) -> Self {
        self.agent = mode;
        self
    }

    /// Set timeouts.
    #[must_use]
    pub const fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set execution options.
    #[must_use]
    pub fn exec(mut self, exec: ExecConfig) -> Self {
        self.exec = exec;
        self
    }

    /// The configured user, or the current OS user.
    #[must_use]
    pub fn resolved_user(&self) -> String {
        self.user.clone().unwrap_or_else(whoami::username)
    }

    /// The `host:port` address string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SshError::config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(SshError::config("port must be between 1 and 65535"));
        }
        if self.user.as_deref().is_some_and(str::is_empty) {
            return Err(SshError::config("user must not be empty when set"));
        }
        if self.exec.read_buffer == 0 {
            return Err(SshError::config("exec.read_buffer must be positive"));
        }
        Ok(())
    }
}

/// Expand a leading `~/` to the current user's home directory.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map_or_else(|| PathBuf::from(path), |home| home.join(rest)),
        None if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        None => Path::new(path).to_path_buf(),
    }
}

/// Serde helpers for optional durations stored as seconds.
///
/// `0` means "no timeout", as in the environment reader, and is what `None`
/// is written as so a disabled timeout survives a save and reload. Whole
/// seconds are written as integers; sub-second values as fractions.
mod option_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Secs {
        Whole(u64),
        Fractional(f64),
    }

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) if duration.subsec_nanos() == 0 => {
                serializer.serialize_u64(duration.as_secs())
            }
            Some(duration) => serializer.serialize_f64(duration.as_secs_f64()),
            None => serializer.serialize_u64(0),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let duration = match Secs::deserialize(deserializer)? {
            Secs::Whole(secs) => Duration::from_secs(secs),
            Secs::Fractional(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| D::Error::custom(format!("invalid timeout: {secs} seconds")))?,
        };
        Ok((!duration.is_zero()).then_some(duration))
    }
}

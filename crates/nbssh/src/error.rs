//! Error types for nbssh.
//!
//! [`SshError`] is the single error surfaced to callers. Its variants follow
//! the stages a client goes through: resolving the host, connecting the
//! socket, negotiating the session, authenticating, opening channels, and
//! moving bytes. "Would block" is never an error here; it is consumed by the
//! retry driver before anything reaches the caller.

use std::io;
use std::time::Duration;

use nbssh_io::DriveError;
use thiserror::Error;

use crate::engine::EngineError;

/// The main error type for nbssh operations.
#[derive(Debug, Error)]
pub enum SshError {
    /// The host name could not be resolved.
    #[error("failed to resolve host '{host}': {source}")]
    NameResolution {
        /// The host that could not be resolved.
        host: String,
        /// The underlying lookup error.
        #[source]
        source: io::Error,
    },

    /// The TCP connection was refused or the host is unreachable.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connection {
        /// The host that could not be connected to.
        host: String,
        /// The port that was used.
        port: u16,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Handshake or other session-level engine failure.
    #[error("SSH session error: {reason}")]
    Session {
        /// The reason for the session error.
        reason: String,
    },

    /// Every authentication method failed.
    #[error("authentication failed for {user}@{host}: {reason}")]
    Authentication {
        /// The user that failed to authenticate.
        user: String,
        /// The host being authenticated against.
        host: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Opening a channel or requesting a PTY failed.
    #[error("SSH channel error: {reason}")]
    Channel {
        /// The reason for the channel error.
        reason: String,
    },

    /// Socket-level failure while reading, writing or waiting.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// An operation did not complete before its deadline.
    #[error("SSH operation timed out after {duration:?}")]
    Timeout {
        /// The duration that elapsed.
        duration: Duration,
    },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Result type alias for nbssh operations.
pub type Result<T> = std::result::Result<T, SshError>;

impl SshError {
    /// Create a name resolution error.
    pub fn name_resolution(host: impl Into<String>, source: io::Error) -> Self {
        Self::NameResolution {
            host: host.into(),
            source,
        }
    }

    /// Create a connection error.
    pub fn connection(host: impl Into<String>, port: u16, source: io::Error) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            source,
        }
    }

    /// Create a session error.
    pub fn session(reason: impl Into<String>) -> Self {
        Self::Session {
            reason: reason.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(
        user: impl Into<String>,
        host: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Authentication {
            user: user.into(),
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a channel error.
    pub fn channel(reason: impl Into<String>) -> Self {
        Self::Channel {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Convert the outcome of a driven engine call.
    ///
    /// Wait failures become [`SshError::Transport`] and deadlines become
    /// [`SshError::Timeout`]; engine failures are classified by `on_engine`.
    pub(crate) fn driven(
        err: DriveError<EngineError>,
        on_engine: impl FnOnce(EngineError) -> Self,
    ) -> Self {
        match err {
            DriveError::Engine(e) => on_engine(e),
            DriveError::Wait(e) => Self::Transport(e),
            DriveError::Timeout { duration } => Self::Timeout { duration },
            DriveError::Exhausted { attempts } => {
                Self::session(format!("operation still blocked after {attempts} attempts"))
            }
        }
    }

    /// Check if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is an authentication error.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Check if this error happened before the session was negotiated.
    #[must_use]
    pub const fn is_connect(&self) -> bool {
        matches!(self, Self::NameResolution { .. } | Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_names_user_and_host() {
        let err = SshError::authentication("deploy", "db1.example.com", "no methods left");
        let msg = err.to_string();
        assert!(msg.contains("deploy@db1.example.com"));
        assert!(msg.contains("no methods left"));
        assert!(err.is_authentication());
    }

    #[test]
    fn connection_display() {
        let err = SshError::connection(
            "example.com",
            2222,
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        assert!(err.to_string().contains("example.com:2222"));
        assert!(err.is_connect());
    }

    #[test]
    fn driven_maps_each_variant() {
        let err = SshError::driven(DriveError::Timeout { duration: Duration::from_secs(3) }, |_| {
            unreachable!()
        });
        assert!(err.is_timeout());

        let err = SshError::driven(DriveError::Wait(io::Error::other("poll failed")), |_| {
            unreachable!()
        });
        assert!(matches!(err, SshError::Transport(_)));

        let err = SshError::driven(
            DriveError::Engine(EngineError::failure(-18, "refused")),
            |e| SshError::channel(e.to_string()),
        );
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn timeout_display() {
        let err = SshError::timeout(Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
    }
}

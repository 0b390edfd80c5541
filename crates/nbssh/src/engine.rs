//! The protocol engine contract.
//!
//! nbssh does not speak the SSH wire protocol itself. It drives an engine
//! (libssh2 through the `libssh2` feature, or the `mock` module in tests) that
//! runs in non-blocking mode and answers [`EngineError::WouldBlock`] whenever
//! a call cannot make progress yet. After such an answer the engine must be
//! able to report the socket directions it is waiting on and must accept the
//! same call again with the same arguments.
//!
//! Session-level calls take `&self` so that the retry loop can query
//! [`BlockDirections`] between attempts; engines keep their mutable state
//! behind a shared handle, as libssh2 sessions do.

use std::path::Path;

use nbssh_io::{BlockDirections, WouldBlock};

/// Status returned by engine calls that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The call cannot complete yet; wait for readiness and call again.
    #[error("operation would block")]
    WouldBlock,

    /// The call failed.
    #[error("{message} (code {code})")]
    Failure {
        /// Engine-specific error code.
        code: i32,
        /// Human readable description.
        message: String,
    },
}

impl EngineError {
    /// Create a failure.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }

    /// The engine error code, if this is a failure.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::WouldBlock => None,
            Self::Failure { code, .. } => Some(*code),
        }
    }
}

impl WouldBlock for EngineError {
    fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}

/// Result of a single engine call.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A negotiated (or negotiating) SSH session.
pub trait Engine: BlockDirections {
    /// The channel type opened by this engine.
    type Channel: EngineChannel;

    /// Switch the session between blocking and non-blocking mode.
    fn set_blocking(&self, blocking: bool);

    /// Run the protocol handshake over the session's socket.
    fn handshake(&self) -> EngineResult<()>;

    /// Authenticate `user` with the identities held by an SSH agent.
    fn userauth_agent(&self, user: &str) -> EngineResult<()>;

    /// Authenticate `user` with a private key file.
    ///
    /// `public_key` may be `None` when the engine can derive it from the
    /// private key.
    fn userauth_pubkey_file(
        &self,
        user: &str,
        public_key: Option<&Path>,
        private_key: &Path,
        passphrase: Option<&str>,
    ) -> EngineResult<()>;

    /// Whether the session has been authenticated.
    fn authenticated(&self) -> bool;

    /// Open a session channel.
    ///
    /// `Ok(None)` means the channel cannot be created yet; the caller waits
    /// for readiness and asks again.
    fn open_session(&self) -> EngineResult<Option<Self::Channel>>;

    /// Close the session.
    fn close(&self, description: &str) -> EngineResult<()>;
}

/// One command-execution stream multiplexed over a session.
pub trait EngineChannel {
    /// Request a pseudo-terminal for the channel.
    fn request_pty(&mut self, term: &str) -> EngineResult<()>;

    /// Start `command` on the channel.
    fn exec(&mut self, command: &str) -> EngineResult<()>;

    /// Read available standard output bytes into `buf`.
    ///
    /// Returns the number of bytes read; `Ok(0)` does not by itself mean the
    /// stream has ended, only [`EngineChannel::eof`] does.
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize>;

    /// Whether the remote end has signalled end of stream.
    fn eof(&self) -> bool;

    /// Close the channel and wait for the remote close.
    ///
    /// Called again after [`EngineError::WouldBlock`] until it completes.
    fn close(&mut self) -> EngineResult<()>;

    /// The remote command's exit status.
    fn exit_status(&self) -> EngineResult<i32>;
}

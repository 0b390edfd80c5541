//! nbssh: single-host SSH command execution over a non-blocking engine
//!
//! This crate connects to one host, authenticates with an agent or local
//! identity files, and streams command output line by line. The SSH wire
//! protocol is left to an engine (libssh2, feature `libssh2`) running in
//! non-blocking mode; nbssh drives it through its "would block" signal with
//! the retry loop from [`nbssh_io`].
//!
//! # Features
//!
//! - **Authentication fallback**: agent first, then identity files in order
//! - **Lazy line streaming** independent of how output is chunked
//! - **Deadlines** on every wait (see [`TimeoutConfig`])
//! - **libssh2 engine** (feature: `libssh2`)
//! - **Async offload** onto tokio's blocking pool (feature: `tokio`)
//! - **Mock engine** for testing without a server (feature: `mock`)
//!
//! # Example
//!
//! ```ignore
//! use nbssh::{ClientConfig, SshClient};
//!
//! let config = ClientConfig::new("db1.example.com").user("deploy");
//! let mut client = SshClient::connect(config)?;
//!
//! let mut output = client.exec_command("uname -a", false)?;
//! for line in output.stdout.by_ref() {
//!     println!("{}", line?);
//! }
//! println!("exit status: {}", output.recv_exit_status()?);
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(all(feature = "libssh2", unix))]
pub mod libssh2;

#[cfg(feature = "tokio")]
pub mod offload;

pub use auth::{AuthMethod, AuthState, Authenticator, IdentityCandidate, identity_candidates};
pub use client::{SshClient, connect_socket};
pub use config::env::EnvConfig;
pub use config::{
    AgentMode, ClientConfig, DEFAULT_IDENTITIES, DEFAULT_PORT, DEFAULT_RETRIES, ExecConfig,
    TimeoutConfig,
};
pub use engine::{Engine, EngineChannel, EngineError, EngineResult};
pub use error::{Result, SshError};
pub use exec::{CommandOutput, LineSplitter, OutputLines, exit_status_ready, recv_exit_status};
#[cfg(all(feature = "libssh2", unix))]
pub use libssh2::{Ssh2Channel, Ssh2Engine};
#[cfg(feature = "tokio")]
pub use offload::{ExecHandle, LineStream, spawn_exec};

// Driver types from nbssh-io
#[cfg(unix)]
pub use nbssh_io::SocketWaiter;
pub use nbssh_io::{BlockDirections, Deadline, Directions, RetryDriver, WaitOutcome, Waiter};

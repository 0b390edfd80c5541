//! Authentication fallback chain.
//!
//! The [`Authenticator`] tries the SSH agent first. If the agent is absent,
//! refuses, or fails in any other way, it scans the identity files in order
//! and attempts public-key authentication with each key that exists locally.
//! The first success stops the scan; a scan with no success fails.
//!
//! Per-candidate failures are logged and never reach the caller. Each
//! public-key attempt goes through a bounded retry loop so a key whose
//! authentication keeps answering "would block" is given up on after
//! `num_retries` waits.

use std::fmt;
use std::path::{Path, PathBuf};

use nbssh_io::{DriveError, RetryDriver, Waiter};

use crate::config::{AgentMode, ClientConfig, expand_home};
use crate::engine::{Engine, EngineError};
use crate::error::{Result, SshError};

/// A private key file and its public counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCandidate {
    /// Path of the private key.
    pub private_key: PathBuf,
    /// Path of the public key (`<private_key>.pub`).
    pub public_key: PathBuf,
}

impl IdentityCandidate {
    /// Create a candidate for a private key, deriving the public key path.
    #[must_use]
    pub fn new(private_key: impl Into<PathBuf>) -> Self {
        let private_key = private_key.into();
        let mut public_key = private_key.clone().into_os_string();
        public_key.push(".pub");
        Self {
            private_key,
            public_key: PathBuf::from(public_key),
        }
    }

    /// Whether the private key exists locally.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.private_key.is_file()
    }

    /// The public key path, if that file exists.
    ///
    /// Engines derive the public key from the private key otherwise.
    #[must_use]
    pub fn public_key_if_present(&self) -> Option<&Path> {
        self.public_key
            .is_file()
            .then_some(self.public_key.as_path())
    }
}

impl fmt::Display for IdentityCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.private_key.display())
    }
}

/// Build the ordered candidate list.
///
/// An explicit private key comes first, followed by `identities` with
/// `~/` expanded. Existence is not checked here; the scan skips missing
/// files.
#[must_use]
pub fn identity_candidates<S: AsRef<str>>(
    explicit: Option<&Path>,
    identities: &[S],
) -> Vec<IdentityCandidate> {
    explicit
        .map(IdentityCandidate::new)
        .into_iter()
        .chain(
            identities
                .iter()
                .map(|path| IdentityCandidate::new(expand_home(path.as_ref()))),
        )
        .collect()
}

/// How authentication succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// An agent identity was accepted.
    Agent,
    /// The identity file at this path was accepted.
    Identity(PathBuf),
}

/// Position of an [`Authenticator`] in the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The agent has not been tried yet.
    AgentAttempt,
    /// Scanning identity files.
    IdentityAttempt,
    /// Authentication succeeded.
    Authenticated(AuthMethod),
    /// Every method failed.
    Failed,
}

impl AuthState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated(_) | Self::Failed)
    }
}

/// Runs the agent-then-identities fallback chain against an engine.
pub struct Authenticator<'a, E, W: ?Sized> {
    engine: &'a E,
    driver: RetryDriver<'a, W>,
    user: &'a str,
    host: &'a str,
    passphrase: Option<&'a str>,
    num_retries: u32,
    agent_mode: AgentMode,
    candidates: Vec<IdentityCandidate>,
    state: AuthState,
}

impl<'a, E: Engine, W: Waiter + ?Sized> Authenticator<'a, E, W> {
    /// Create an authenticator with the default policies and no identities.
    pub fn new(engine: &'a E, driver: RetryDriver<'a, W>, user: &'a str, host: &'a str) -> Self {
        Self {
            engine,
            driver,
            user,
            host,
            passphrase: None,
            num_retries: crate::config::DEFAULT_RETRIES,
            agent_mode: AgentMode::default(),
            candidates: Vec::new(),
            state: AuthState::AgentAttempt,
        }
    }

    /// Create an authenticator with the settings of a client configuration.
    pub fn from_config(
        engine: &'a E,
        driver: RetryDriver<'a, W>,
        config: &'a ClientConfig,
        user: &'a str,
    ) -> Self {
        Self::new(engine, driver, user, &config.host)
            .passphrase(config.password.as_deref())
            .num_retries(config.num_retries)
            .agent_mode(config.agent)
            .candidates(identity_candidates(
                config.private_key.as_deref(),
                config.identities.as_slice(),
            ))
    }

    /// Set the passphrase for private keys.
    #[must_use]
    pub const fn passphrase(mut self, passphrase: Option<&'a str>) -> Self {
        self.passphrase = passphrase;
        self
    }

    /// Set the retry budget for each authentication call.
    #[must_use]
    pub const fn num_retries(mut self, retries: u32) -> Self {
        self.num_retries = retries;
        self
    }

    /// Set the agent policy.
    #[must_use]
    pub const fn agent_mode(mut self, mode: AgentMode) -> Self {
        self.agent_mode = mode;
        self
    }

    /// Set the identity candidates.
    #[must_use]
    pub fn candidates(mut self, candidates: Vec<IdentityCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &AuthState {
        &self.state
    }

    /// Run the chain to a terminal state.
    ///
    /// Returns the method that succeeded, or an authentication error naming
    /// the user and host once every method has failed.
    pub fn authenticate(&mut self) -> Result<AuthMethod> {
        loop {
            self.state = match std::mem::replace(&mut self.state, AuthState::Failed) {
                AuthState::AgentAttempt => match self.agent_attempt() {
                    Ok(()) => {
                        tracing::info!(user = self.user, "authenticated with agent");
                        AuthState::Authenticated(AuthMethod::Agent)
                    }
                    Err(e) => {
                        tracing::debug!(
                            user = self.user,
                            error = %e,
                            "agent authentication failed"
                        );
                        AuthState::IdentityAttempt
                    }
                },
                AuthState::IdentityAttempt => match self.scan_identities() {
                    Some(path) => AuthState::Authenticated(AuthMethod::Identity(path)),
                    None => AuthState::Failed,
                },
                AuthState::Authenticated(method) => {
                    self.state = AuthState::Authenticated(method.clone());
                    return Ok(method);
                }
                AuthState::Failed => {
                    tracing::warn!(
                        user = self.user,
                        host = self.host,
                        "all authentication methods failed"
                    );
                    return Err(SshError::authentication(
                        self.user,
                        self.host,
                        "no authentication methods succeeded",
                    ));
                }
            };
        }
    }

    /// Attempt agent authentication under the configured policy.
    pub fn agent_attempt(&self) -> Result<()> {
        match self.agent_mode {
            AgentMode::Blocking => {
                self.engine.set_blocking(true);
                let result = self.engine.userauth_agent(self.user);
                self.engine.set_blocking(false);
                result.map_err(|e| self.auth_error(&e.to_string()))
            }
            AgentMode::NonBlocking => self
                .driver
                .run_bounded(self.engine, self.num_retries, || {
                    self.engine.userauth_agent(self.user)
                })
                .map_err(|e| self.classify(e, "agent")),
        }
    }

    /// Attempt public-key authentication with one candidate.
    ///
    /// The caller is expected to have checked that the private key exists.
    pub fn identity_attempt(&self, candidate: &IdentityCandidate) -> Result<()> {
        let public_key = candidate.public_key_if_present();
        self.driver
            .run_bounded(self.engine, self.num_retries, || {
                self.engine.userauth_pubkey_file(
                    self.user,
                    public_key,
                    &candidate.private_key,
                    self.passphrase,
                )
            })
            .map_err(|e| self.classify(e, &candidate.to_string()))
    }

    fn scan_identities(&self) -> Option<PathBuf> {
        for candidate in &self.candidates {
            if !candidate.exists() {
                tracing::trace!(identity = %candidate, "identity file not found, skipping");
                continue;
            }
            tracing::debug!(identity = %candidate, "trying identity file");
            match self.identity_attempt(candidate) {
                Ok(()) => {
                    tracing::info!(
                        user = self.user,
                        identity = %candidate,
                        "authenticated with identity file"
                    );
                    return Some(candidate.private_key.clone());
                }
                Err(e) => {
                    tracing::debug!(identity = %candidate, error = %e, "identity rejected");
                }
            }
        }
        None
    }

    fn classify(&self, err: DriveError<EngineError>, method: &str) -> SshError {
        match err {
            DriveError::Exhausted { attempts } => self.auth_error(&format!(
                "{method} still blocked after {attempts} attempts"
            )),
            other => SshError::driven(other, |e| self.auth_error(&e.to_string())),
        }
    }

    fn auth_error(&self, reason: &str) -> SshError {
        SshError::authentication(self.user, self.host, reason)
    }
}

impl<E, W: ?Sized> fmt::Debug for Authenticator<'_, E, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("num_retries", &self.num_retries)
            .field("agent_mode", &self.agent_mode)
            .field("candidates", &self.candidates)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

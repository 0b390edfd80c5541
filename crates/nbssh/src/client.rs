//! Session bootstrapping and the client handle.
//!
//! [`SshClient`] owns one engine session, the waiter over its socket, and at
//! most one channel. Construction runs the whole bootstrap sequence:
//! handshake, authentication, and opening a first channel. Dropping the
//! client closes the session exactly once.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use nbssh_io::{RetryDriver, Waiter};
use tracing::Span;

use crate::auth::{AuthMethod, Authenticator};
use crate::config::ClientConfig;
use crate::engine::{Engine, EngineChannel};
use crate::error::{Result, SshError};
use crate::exec::{self, CommandOutput, OutputLines};

/// Description sent with the session close.
const DISCONNECT_DESCRIPTION: &str = "Normal Shutdown";

/// An authenticated SSH session to a single host.
///
/// A client must be used from one thread at a time; it performs no locking.
/// Every engine call happens inside the client's tracing span.
pub struct SshClient<E: Engine, W: Waiter> {
    config: ClientConfig,
    user: String,
    engine: E,
    waiter: W,
    channel: Option<E::Channel>,
    /// The channel in `channel` has not run a command yet.
    fresh: bool,
    auth: AuthMethod,
    span: Span,
    closed: bool,
}

impl<E: Engine, W: Waiter> SshClient<E, W> {
    /// Bootstrap a client over an engine whose socket is already connected.
    ///
    /// Runs the handshake, authenticates, and opens the first channel.
    pub fn from_engine(config: ClientConfig, engine: E, waiter: W) -> Result<Self> {
        let user = config.resolved_user();
        let span = tracing::info_span!(
            "ssh",
            host = %config.host,
            port = config.port,
            user = %user,
        );
        Self::bootstrap(config, user, engine, waiter, span)
    }

    /// Like [`SshClient::from_engine`], logging inside the given span.
    pub fn from_engine_with_span(
        config: ClientConfig,
        engine: E,
        waiter: W,
        span: Span,
    ) -> Result<Self> {
        let user = config.resolved_user();
        Self::bootstrap(config, user, engine, waiter, span)
    }

    fn bootstrap(
        config: ClientConfig,
        user: String,
        engine: E,
        waiter: W,
        span: Span,
    ) -> Result<Self> {
        config.validate()?;
        let entered = span.enter();

        let driver = RetryDriver::new(&waiter).with_timeout(config.timeouts.io);

        driver
            .run(&engine, || engine.handshake())
            .map_err(|e| {
                SshError::driven(e, |e| SshError::session(format!("handshake failed: {e}")))
            })?;
        tracing::debug!("handshake complete");

        let established = Authenticator::from_config(&engine, driver, &config, &user)
            .authenticate()
            .and_then(|auth| Ok((auth, open_channel(&engine, &driver)?)));
        let (auth, channel) = match established {
            Ok(established) => established,
            Err(e) => {
                let closer = RetryDriver::new(&waiter).with_timeout(config.timeouts.close);
                if let Err(close_err) = close_session(&engine, &closer) {
                    tracing::debug!(
                        error = %close_err,
                        "failed to close session after setup error"
                    );
                }
                return Err(e);
            }
        };
        tracing::info!(?auth, "session established");

        drop(entered);
        Ok(Self {
            config,
            user,
            engine,
            waiter,
            channel: Some(channel),
            fresh: true,
            auth,
            span,
            closed: false,
        })
    }

    fn driver(&self, timeout: Option<Duration>) -> RetryDriver<'_, W> {
        RetryDriver::new(&self.waiter).with_timeout(timeout)
    }

    /// Open a new session channel.
    pub fn open_channel(&self) -> Result<E::Channel> {
        let _enter = self.span.enter();
        open_channel(&self.engine, &self.driver(self.config.timeouts.io))
    }

    /// Run `command` and stream its output.
    ///
    /// The first call uses the channel opened during bootstrap; every later
    /// call opens a new channel. With `use_pty`, a pseudo-terminal of the
    /// configured type is requested first.
    pub fn exec_command(
        &mut self,
        command: &str,
        use_pty: bool,
    ) -> Result<CommandOutput<'_, E, W>> {
        if !self.fresh || self.channel.is_none() {
            let channel = self.open_channel()?;
            self.channel = Some(channel);
        }
        self.fresh = false;

        let Some(channel) = self.channel.as_mut() else {
            return Err(SshError::channel("no channel available"));
        };

        if use_pty {
            let _enter = self.span.enter();
            let term = self.config.exec.term.as_str();
            RetryDriver::new(&self.waiter)
                .with_timeout(self.config.timeouts.io)
                .run(&self.engine, || channel.request_pty(term))
                .map_err(|e| {
                    SshError::driven(e, |e| SshError::channel(format!("PTY request failed: {e}")))
                })?;
            tracing::debug!(term, "pseudo-terminal allocated");
        }

        let stdout = exec::start(
            &self.engine,
            &self.waiter,
            channel,
            command,
            &self.config.exec,
            &self.config.timeouts,
            self.span.clone(),
        )?;

        Ok(CommandOutput {
            host: &self.config.host,
            stdout,
            stderr: std::iter::empty(),
        })
    }

    /// Run `command` on a channel the caller manages.
    pub fn execute<'a>(
        &'a self,
        channel: &'a mut E::Channel,
        command: &str,
    ) -> Result<OutputLines<'a, E, W>> {
        exec::start(
            &self.engine,
            &self.waiter,
            channel,
            command,
            &self.config.exec,
            &self.config.timeouts,
            self.span.clone(),
        )
    }

    /// Close the session.
    ///
    /// Only the first call reaches the engine; later calls return `Ok(())`.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let _enter = self.span.enter();
        close_session(&self.engine, &self.driver(self.config.timeouts.close))
    }

    /// Whether the session has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// The host this client is connected to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// The port this client is connected to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.config.port
    }

    /// The authenticated user.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The configuration the client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// How the client authenticated.
    #[must_use]
    pub const fn auth_method(&self) -> &AuthMethod {
        &self.auth
    }

    /// The underlying engine.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// The span all client activity is logged in.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }
}

impl<E: Engine, W: Waiter> Drop for SshClient<E, W> {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            let _enter = self.span.enter();
            tracing::warn!(error = %e, "failed to close session cleanly");
        }
    }
}

impl<E: Engine, W: Waiter> std::fmt::Debug for SshClient<E, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("user", &self.user)
            .field("auth", &self.auth)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Open a channel, waiting while the engine has none to give yet.
fn open_channel<E: Engine, W: Waiter + ?Sized>(
    engine: &E,
    driver: &RetryDriver<'_, W>,
) -> Result<E::Channel> {
    let channel = driver
        .run_until_some(engine, || engine.open_session())
        .map_err(|e| {
            SshError::driven(e, |e| SshError::channel(format!("failed to open channel: {e}")))
        })?;
    tracing::debug!("channel opened");
    Ok(channel)
}

/// Close the session, retrying while the engine would block.
fn close_session<E: Engine, W: Waiter + ?Sized>(
    engine: &E,
    driver: &RetryDriver<'_, W>,
) -> Result<()> {
    driver
        .run(engine, || engine.close(DISCONNECT_DESCRIPTION))
        .map_err(|e| {
            SshError::driven(e, |e| SshError::session(format!("disconnect failed: {e}")))
        })?;
    tracing::debug!("session closed");
    Ok(())
}

/// Resolve `host` and connect to it in blocking mode, then switch the
/// stream to non-blocking mode.
///
/// Each resolved address is tried in turn; the last connection error is
/// reported if none accepts.
pub fn connect_socket(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| SshError::name_resolution(host, e))?
        .collect();
    if addrs.is_empty() {
        return Err(SshError::name_resolution(
            host,
            io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        ));
    }

    let mut last_error = None;
    for addr in addrs {
        tracing::debug!(%addr, "connecting");
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nonblocking(true).map_err(SshError::Transport)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connection attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(SshError::connection(
        host,
        port,
        last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused)),
    ))
}

#[cfg(all(feature = "libssh2", unix))]
mod connect {
    use std::os::fd::OwnedFd;

    use nbssh_io::SocketWaiter;

    use super::{SshClient, connect_socket};
    use crate::config::ClientConfig;
    use crate::error::{Result, SshError};
    use crate::libssh2::Ssh2Engine;

    impl SshClient<Ssh2Engine, SocketWaiter> {
        /// Connect, negotiate, and authenticate.
        ///
        /// Name resolution and connection failures surface before any
        /// protocol traffic.
        pub fn connect(config: ClientConfig) -> Result<Self> {
            config.validate()?;
            let user = config.resolved_user();
            let span = tracing::info_span!(
                "ssh",
                host = %config.host,
                port = config.port,
                user = %user,
            );

            let stream = {
                let _enter = span.enter();
                connect_socket(&config.host, config.port, config.timeouts.connect)?
            };
            let waiter = SocketWaiter::new(OwnedFd::from(
                stream.try_clone().map_err(SshError::Transport)?,
            ));
            let engine = Ssh2Engine::from_stream(stream)?;

            Self::bootstrap(config, user, engine, waiter, span)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;
    use crate::mock::{CountingWaiter, MockChannel, MockEngine};

    fn config() -> ClientConfig {
        ClientConfig::new("test-host").user("tester").identities(Vec::<String>::new())
    }

    #[test]
    fn bootstrap_runs_handshake_auth_and_channel() {
        let engine = MockEngine::new()
            .handshake_would_block(2)
            .agent_accepts(true)
            .open_not_ready(1)
            .with_channel(MockChannel::new());
        let handle = engine.clone();
        let waiter = CountingWaiter::new();

        let client = SshClient::from_engine(config(), engine, waiter).unwrap();

        let stats = handle.stats();
        assert_eq!(stats.handshake_calls, 3);
        assert_eq!(stats.open_calls, 2);
        assert_eq!(client.auth_method(), &AuthMethod::Agent);
        assert_eq!(client.host(), "test-host");
        assert_eq!(client.user(), "tester");
    }

    #[test]
    fn handshake_failure_is_session_error() {
        let engine = MockEngine::new().handshake_fails("kex failed");
        let err = SshClient::from_engine(config(), engine, CountingWaiter::new()).unwrap_err();
        assert!(matches!(err, SshError::Session { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_before_engine_calls() {
        let engine = MockEngine::new();
        let handle = engine.clone();
        let err = SshClient::from_engine(ClientConfig::new(""), engine, CountingWaiter::new())
            .unwrap_err();
        assert!(matches!(err, SshError::Config { .. }));
        assert_eq!(handle.stats().handshake_calls, 0);
    }

    #[test]
    fn failed_authentication_still_closes_session() {
        let engine = MockEngine::new();
        let handle = engine.clone();
        let err = SshClient::from_engine(config(), engine, CountingWaiter::new()).unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(handle.stats().close_calls, 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let engine = MockEngine::new()
            .agent_accepts(true)
            .with_channel(MockChannel::new());
        let handle = engine.clone();
        let mut client = SshClient::from_engine(config(), engine, CountingWaiter::new()).unwrap();

        client.disconnect().unwrap();
        client.disconnect().unwrap();
        assert!(client.is_closed());
        drop(client);
        assert_eq!(handle.stats().close_calls, 1);
    }

    #[test]
    fn refused_connection_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_socket("127.0.0.1", port, Some(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, SshError::Connection { .. }));
        assert!(err.is_connect());
    }

    #[test]
    fn unresolvable_host_is_name_resolution_error() {
        let err = connect_socket("nonexistent.invalid", 22, Some(Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(
            err,
            SshError::NameResolution { ref host, .. } if host == "nonexistent.invalid"
        ));
        assert!(err.is_connect());
    }

    #[test]
    fn connected_socket_is_non_blocking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut stream = connect_socket("127.0.0.1", port, None).unwrap();
        let mut buf = [0u8; 1];
        let err = io::Read::read(&mut stream, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}

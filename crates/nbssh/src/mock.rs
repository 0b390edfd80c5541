//! In-memory engine for testing.
//!
//! [`MockEngine`] implements the engine contract without a network. Each
//! operation can be scripted to answer "would block" a number of times before
//! completing, and every call is counted so tests can assert how the client
//! drove the engine. Channels are scripted with [`ReadStep`]s.
//!
//! Handles are cheap clones over shared state, so a test keeps a copy of an
//! engine or channel after handing it to a client and inspects it later.
//!
//! # Example
//!
//! ```
//! use nbssh::mock::{MockChannel, MockEngine};
//!
//! let channel = MockChannel::new().output(b"me\n").exit_status(0);
//! let engine = MockEngine::new()
//!     .handshake_would_block(2)
//!     .agent_accepts(true)
//!     .with_channel(channel);
//! assert_eq!(engine.stats().handshake_calls, 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nbssh_io::{BlockDirections, Directions, WaitOutcome, Waiter};

use crate::engine::{Engine, EngineChannel, EngineError, EngineResult};

/// Error code used for scripted failures.
pub const MOCK_FAILURE: i32 = -1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume one scripted would-block, if any remain.
fn take_block(remaining: &mut u32) -> bool {
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

/// Call counters recorded by a [`MockEngine`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Handshake invocations, including would-block answers.
    pub handshake_calls: u32,
    /// Agent authentication invocations.
    pub agent_calls: u32,
    /// Private keys passed to public-key authentication, one entry per call.
    pub pubkey_calls: Vec<PathBuf>,
    /// Public keys passed alongside, one entry per call.
    pub pubkey_public_keys: Vec<Option<PathBuf>>,
    /// Successful authentications.
    pub auth_successes: u32,
    /// Channel open invocations.
    pub open_calls: u32,
    /// Session close invocations.
    pub close_calls: u32,
    /// Session closes that completed.
    pub closes_completed: u32,
    /// Blocking mode switches, in order.
    pub blocking_changes: Vec<bool>,
}

#[derive(Debug)]
struct EngineState {
    directions: Directions,
    blocking: bool,
    authenticated: bool,
    handshake_would_block: u32,
    handshake_failure: Option<EngineError>,
    agent_accepts: bool,
    agent_would_block: u32,
    accepted_keys: Vec<PathBuf>,
    pubkey_would_block: HashMap<PathBuf, u32>,
    open_not_ready: u32,
    channels: VecDeque<MockChannel>,
    close_would_block: u32,
    close_failure: Option<EngineError>,
    stats: EngineStats,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            directions: Directions::READ,
            blocking: false,
            authenticated: false,
            handshake_would_block: 0,
            handshake_failure: None,
            agent_accepts: false,
            agent_would_block: 0,
            accepted_keys: Vec::new(),
            pubkey_would_block: HashMap::new(),
            open_not_ready: 0,
            channels: VecDeque::new(),
            close_would_block: 0,
            close_failure: None,
            stats: EngineStats::default(),
        }
    }
}

/// A scripted engine session.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    /// Create an engine that completes every call immediately, rejects the
    /// agent and every key, and has no channels to open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        lock(&self.state)
    }

    /// Direction mask reported while blocked.
    #[must_use]
    pub fn directions(self, directions: Directions) -> Self {
        self.state().directions = directions;
        self
    }

    /// Answer would-block to the first `n` handshake calls.
    #[must_use]
    pub fn handshake_would_block(self, n: u32) -> Self {
        self.state().handshake_would_block = n;
        self
    }

    /// Fail the handshake.
    #[must_use]
    pub fn handshake_fails(self, message: &str) -> Self {
        self.state().handshake_failure = Some(EngineError::failure(MOCK_FAILURE, message));
        self
    }

    /// Whether the agent accepts the user.
    #[must_use]
    pub fn agent_accepts(self, accepts: bool) -> Self {
        self.state().agent_accepts = accepts;
        self
    }

    /// Answer would-block to the first `n` non-blocking agent calls.
    #[must_use]
    pub fn agent_would_block(self, n: u32) -> Self {
        self.state().agent_would_block = n;
        self
    }

    /// Accept public-key authentication with this private key.
    #[must_use]
    pub fn accept_key(self, private_key: impl Into<PathBuf>) -> Self {
        self.state().accepted_keys.push(private_key.into());
        self
    }

    /// Answer would-block to the first `n` authentication calls with a key.
    #[must_use]
    pub fn pubkey_would_block(self, private_key: impl Into<PathBuf>, n: u32) -> Self {
        self.state()
            .pubkey_would_block
            .insert(private_key.into(), n);
        self
    }

    /// Return no channel from the first `n` open calls.
    #[must_use]
    pub fn open_not_ready(self, n: u32) -> Self {
        self.state().open_not_ready = n;
        self
    }

    /// Queue a channel for the next open call.
    #[must_use]
    pub fn with_channel(self, channel: MockChannel) -> Self {
        self.state().channels.push_back(channel);
        self
    }

    /// Answer would-block to the first `n` close calls.
    #[must_use]
    pub fn close_would_block(self, n: u32) -> Self {
        self.state().close_would_block = n;
        self
    }

    /// Fail the session close.
    #[must_use]
    pub fn close_fails(self, message: &str) -> Self {
        self.state().close_failure = Some(EngineError::failure(MOCK_FAILURE, message));
        self
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.state().stats.clone()
    }

    /// Whether the engine is currently in blocking mode.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.state().blocking
    }

    /// Whether the session was closed successfully.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().stats.closes_completed > 0
    }
}

impl BlockDirections for MockEngine {
    fn block_directions(&self) -> Directions {
        self.state().directions
    }
}

impl Engine for MockEngine {
    type Channel = MockChannel;

    fn set_blocking(&self, blocking: bool) {
        let mut state = self.state();
        state.blocking = blocking;
        state.stats.blocking_changes.push(blocking);
    }

    fn handshake(&self) -> EngineResult<()> {
        let mut state = self.state();
        state.stats.handshake_calls += 1;
        if take_block(&mut state.handshake_would_block) {
            return Err(EngineError::WouldBlock);
        }
        state.handshake_failure.clone().map_or(Ok(()), Err)
    }

    fn userauth_agent(&self, _user: &str) -> EngineResult<()> {
        let mut state = self.state();
        state.stats.agent_calls += 1;
        if !state.blocking && take_block(&mut state.agent_would_block) {
            return Err(EngineError::WouldBlock);
        }
        if state.agent_accepts {
            state.authenticated = true;
            state.stats.auth_successes += 1;
            Ok(())
        } else {
            Err(EngineError::failure(MOCK_FAILURE, "no identities accepted by agent"))
        }
    }

    fn userauth_pubkey_file(
        &self,
        _user: &str,
        public_key: Option<&Path>,
        private_key: &Path,
        _passphrase: Option<&str>,
    ) -> EngineResult<()> {
        let mut state = self.state();
        state.stats.pubkey_calls.push(private_key.to_path_buf());
        state
            .stats
            .pubkey_public_keys
            .push(public_key.map(Path::to_path_buf));
        if let Some(remaining) = state.pubkey_would_block.get_mut(private_key) {
            if take_block(remaining) {
                return Err(EngineError::WouldBlock);
            }
        }
        if state.accepted_keys.iter().any(|k| k == private_key) {
            state.authenticated = true;
            state.stats.auth_successes += 1;
            Ok(())
        } else {
            Err(EngineError::failure(
                MOCK_FAILURE,
                "Username/PublicKey combination invalid",
            ))
        }
    }

    fn authenticated(&self) -> bool {
        self.state().authenticated
    }

    fn open_session(&self) -> EngineResult<Option<MockChannel>> {
        let mut state = self.state();
        state.stats.open_calls += 1;
        if take_block(&mut state.open_not_ready) {
            return Ok(None);
        }
        state
            .channels
            .pop_front()
            .map(Some)
            .ok_or_else(|| EngineError::failure(MOCK_FAILURE, "channel open failure"))
    }

    fn close(&self, _description: &str) -> EngineResult<()> {
        let mut state = self.state();
        state.stats.close_calls += 1;
        if take_block(&mut state.close_would_block) {
            return Err(EngineError::WouldBlock);
        }
        if let Some(err) = state.close_failure.clone() {
            return Err(err);
        }
        state.stats.closes_completed += 1;
        Ok(())
    }
}

/// One scripted answer to a channel read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Bytes to return, split across reads if the buffer is smaller.
    Data(Vec<u8>),
    /// Answer would-block once.
    WouldBlock,
    /// Return zero bytes once without signalling end of stream.
    Empty,
    /// Fail the read.
    Fail(String),
    /// Standard error bytes, discarded by the next read as engines do.
    Stderr(Vec<u8>),
}

#[derive(Debug, Default)]
struct ChannelState {
    script: VecDeque<ReadStep>,
    exit_status: i32,
    exec_would_block: u32,
    exec_failure: Option<EngineError>,
    pty_would_block: u32,
    pty_failure: Option<EngineError>,
    close_would_block: u32,
    commands: Vec<String>,
    pty: Option<String>,
    stderr_discarded: usize,
    read_calls: u32,
    close_calls: u32,
    closed: bool,
}

/// A scripted channel.
///
/// Once the script is consumed the channel reports end of stream.
#[derive(Debug, Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl MockChannel {
    /// Create a channel with an empty script and exit status 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        lock(&self.state)
    }

    /// Append a read step.
    #[must_use]
    pub fn step(self, step: ReadStep) -> Self {
        self.state().script.push_back(step);
        self
    }

    /// Append output bytes.
    #[must_use]
    pub fn output(self, data: &[u8]) -> Self {
        self.step(ReadStep::Data(data.to_vec()))
    }

    /// Append standard error bytes.
    #[must_use]
    pub fn stderr(self, data: &[u8]) -> Self {
        self.step(ReadStep::Stderr(data.to_vec()))
    }

    /// Append one would-block answer.
    #[must_use]
    pub fn would_block(self) -> Self {
        self.step(ReadStep::WouldBlock)
    }

    /// Set the exit status.
    #[must_use]
    pub fn exit_status(self, status: i32) -> Self {
        self.state().exit_status = status;
        self
    }

    /// Answer would-block to the first `n` exec calls.
    #[must_use]
    pub fn exec_would_block(self, n: u32) -> Self {
        self.state().exec_would_block = n;
        self
    }

    /// Fail exec.
    #[must_use]
    pub fn exec_fails(self, message: &str) -> Self {
        self.state().exec_failure = Some(EngineError::failure(MOCK_FAILURE, message));
        self
    }

    /// Answer would-block to the first `n` PTY requests.
    #[must_use]
    pub fn pty_would_block(self, n: u32) -> Self {
        self.state().pty_would_block = n;
        self
    }

    /// Fail PTY requests.
    #[must_use]
    pub fn pty_fails(self, message: &str) -> Self {
        self.state().pty_failure = Some(EngineError::failure(MOCK_FAILURE, message));
        self
    }

    /// Answer would-block to the first `n` close calls.
    #[must_use]
    pub fn close_would_block(self, n: u32) -> Self {
        self.state().close_would_block = n;
        self
    }

    /// Commands executed on this channel.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Terminal type requested, if a PTY was requested.
    #[must_use]
    pub fn pty(&self) -> Option<String> {
        self.state().pty.clone()
    }

    /// Standard error bytes dropped by reads so far.
    #[must_use]
    pub fn stderr_discarded(&self) -> usize {
        self.state().stderr_discarded
    }

    /// Number of read calls.
    #[must_use]
    pub fn read_calls(&self) -> u32 {
        self.state().read_calls
    }

    /// Number of close calls.
    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.state().close_calls
    }

    /// Whether the channel was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl EngineChannel for MockChannel {
    fn request_pty(&mut self, term: &str) -> EngineResult<()> {
        let mut state = self.state();
        if take_block(&mut state.pty_would_block) {
            return Err(EngineError::WouldBlock);
        }
        if let Some(err) = state.pty_failure.clone() {
            return Err(err);
        }
        state.pty = Some(term.to_string());
        Ok(())
    }

    fn exec(&mut self, command: &str) -> EngineResult<()> {
        let mut state = self.state();
        if take_block(&mut state.exec_would_block) {
            return Err(EngineError::WouldBlock);
        }
        if let Some(err) = state.exec_failure.clone() {
            return Err(err);
        }
        state.commands.push(command.to_string());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        let mut state = self.state();
        state.read_calls += 1;
        let step = loop {
            match state.script.pop_front() {
                Some(ReadStep::Stderr(data)) => state.stderr_discarded += data.len(),
                step => break step,
            }
        };
        match step {
            None | Some(ReadStep::Empty | ReadStep::Stderr(_)) => Ok(0),
            Some(ReadStep::WouldBlock) => Err(EngineError::WouldBlock),
            Some(ReadStep::Fail(message)) => Err(EngineError::failure(MOCK_FAILURE, message)),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.script.push_front(ReadStep::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn eof(&self) -> bool {
        self.state().script.is_empty()
    }

    fn close(&mut self) -> EngineResult<()> {
        let mut state = self.state();
        state.close_calls += 1;
        if take_block(&mut state.close_would_block) {
            return Err(EngineError::WouldBlock);
        }
        state.closed = true;
        Ok(())
    }

    fn exit_status(&self) -> EngineResult<i32> {
        Ok(self.state().exit_status)
    }
}

/// A waiter that never blocks and counts its calls.
#[derive(Debug, Default)]
pub struct CountingWaiter {
    waits: AtomicU32,
    timeouts_after: Option<u32>,
    last: Mutex<Option<Directions>>,
}

impl CountingWaiter {
    /// Create a waiter that always reports readiness.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a timeout once `n` waits have completed.
    #[must_use]
    pub fn time_out_after(mut self, n: u32) -> Self {
        self.timeouts_after = Some(n);
        self
    }

    /// Number of waits so far.
    #[must_use]
    pub fn waits(&self) -> u32 {
        self.waits.load(Ordering::SeqCst)
    }

    /// Directions of the most recent wait.
    #[must_use]
    pub fn last_directions(&self) -> Option<Directions> {
        *lock(&self.last)
    }
}

impl Waiter for CountingWaiter {
    fn wait(&self, directions: Directions, _timeout: Option<Duration>) -> io::Result<WaitOutcome> {
        let previous = self.waits.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last) = Some(directions);
        match self.timeouts_after {
            Some(n) if previous >= n => Ok(WaitOutcome::TimedOut),
            _ => Ok(WaitOutcome::Ready),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_handles_share_state() {
        let engine = MockEngine::new().handshake_would_block(1);
        let handle = engine.clone();

        assert_eq!(engine.handshake(), Err(EngineError::WouldBlock));
        assert_eq!(engine.handshake(), Ok(()));
        assert_eq!(handle.stats().handshake_calls, 2);
    }

    #[test]
    fn agent_does_not_block_in_blocking_mode() {
        let engine = MockEngine::new().agent_would_block(5).agent_accepts(true);
        engine.set_blocking(true);
        assert_eq!(engine.userauth_agent("me"), Ok(()));
        assert!(engine.authenticated());
    }

    #[test]
    fn channel_splits_data_across_small_buffers() {
        let mut channel = MockChannel::new().output(b"hello");
        let mut buf = [0u8; 3];

        assert_eq!(channel.read(&mut buf), Ok(3));
        assert_eq!(&buf, b"hel");
        assert!(!channel.eof());
        assert_eq!(channel.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"lo");
        assert!(channel.eof());
        assert_eq!(channel.read(&mut buf), Ok(0));
    }

    #[test]
    fn open_without_channels_fails() {
        let engine = MockEngine::new().open_not_ready(1);
        assert!(matches!(engine.open_session(), Ok(None)));
        assert!(engine.open_session().is_err());
    }

    #[test]
    fn counting_waiter_times_out_on_schedule() {
        let waiter = CountingWaiter::new().time_out_after(1);
        assert!(waiter.wait(Directions::READ, None).unwrap().is_ready());
        assert_eq!(
            waiter.wait(Directions::WRITE, None).unwrap(),
            WaitOutcome::TimedOut
        );
        assert_eq!(waiter.waits(), 2);
        assert_eq!(waiter.last_directions(), Some(Directions::WRITE));
    }
}

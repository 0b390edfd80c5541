//! The retry loop that drives non-blocking engine operations.
//!
//! Every engine call that may answer "would block" goes through a
//! [`RetryDriver`]: while the call reports would-block, the driver asks the
//! engine which directions it is waiting on, waits for the socket through a
//! [`Waiter`], and invokes the call again with the same arguments. Engines
//! must tolerate that re-invocation; libssh2 documents it as the required way
//! to resume a non-blocking call.

use std::time::Duration;

use crate::deadline::Deadline;
use crate::direction::BlockDirections;
use crate::error::{DriveError, Result};
use crate::waiter::{WaitOutcome, Waiter};

/// Errors that can carry the engine's "would block" status.
pub trait WouldBlock {
    /// Whether this is the would-block sentinel rather than a failure.
    fn is_would_block(&self) -> bool;
}

impl WouldBlock for std::io::Error {
    fn is_would_block(&self) -> bool {
        self.kind() == std::io::ErrorKind::WouldBlock
    }
}

/// Re-invokes blocked operations after waiting for readiness.
///
/// The driver holds no engine state; the engine is passed to each call so the
/// same driver serves the session and its channels.
#[derive(Debug)]
pub struct RetryDriver<'w, W: ?Sized> {
    waiter: &'w W,
    timeout: Option<Duration>,
}

impl<W: ?Sized> Clone for RetryDriver<'_, W> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<W: ?Sized> Copy for RetryDriver<'_, W> {}

impl<'w, W: Waiter + ?Sized> RetryDriver<'w, W> {
    /// Create a driver with no deadline.
    pub const fn new(waiter: &'w W) -> Self {
        Self {
            waiter,
            timeout: None,
        }
    }

    /// Limit each driven operation to `timeout` (`None` waits forever).
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The per-operation deadline.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The waiter used between attempts.
    #[must_use]
    pub const fn waiter(&self) -> &'w W {
        self.waiter
    }

    /// Run `op` until it returns something other than would-block.
    ///
    /// There is no bound on the number of attempts; only the deadline, if
    /// any, ends the loop early.
    pub fn run<S, T, E, F>(&self, engine: &S, mut op: F) -> Result<T, E>
    where
        S: BlockDirections + ?Sized,
        E: WouldBlock,
        F: FnMut() -> std::result::Result<T, E>,
    {
        let deadline = Deadline::new(self.timeout);
        loop {
            match op() {
                Err(e) if e.is_would_block() => self.wait::<S, E>(engine, &deadline)?,
                other => return other.map_err(DriveError::Engine),
            }
        }
    }

    /// Run `op` with a bounded number of retries.
    ///
    /// The operation is invoked at most `max_retries + 1` times. A would-block
    /// result with no retries left ends the loop with
    /// [`DriveError::Exhausted`]. Each retry still waits for readiness first.
    pub fn run_bounded<S, T, E, F>(&self, engine: &S, max_retries: u32, mut op: F) -> Result<T, E>
    where
        S: BlockDirections + ?Sized,
        E: WouldBlock,
        F: FnMut() -> std::result::Result<T, E>,
    {
        let deadline = Deadline::new(self.timeout);
        let mut retries = 0u32;
        loop {
            match op() {
                Err(e) if e.is_would_block() => {
                    if retries >= max_retries {
                        return Err(DriveError::Exhausted {
                            attempts: retries + 1,
                        });
                    }
                    retries += 1;
                    self.wait::<S, E>(engine, &deadline)?;
                }
                other => return other.map_err(DriveError::Engine),
            }
        }
    }

    /// Run `op` until it yields a value.
    ///
    /// For engine calls that signal "not yet" by returning nothing instead of
    /// a would-block error, such as opening a channel. Both sentinels lead to
    /// a readiness wait and another attempt.
    pub fn run_until_some<S, T, E, F>(&self, engine: &S, mut op: F) -> Result<T, E>
    where
        S: BlockDirections + ?Sized,
        E: WouldBlock,
        F: FnMut() -> std::result::Result<Option<T>, E>,
    {
        let deadline = Deadline::new(self.timeout);
        loop {
            match op() {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => self.wait::<S, E>(engine, &deadline)?,
                Err(e) if e.is_would_block() => self.wait::<S, E>(engine, &deadline)?,
                Err(e) => return Err(DriveError::Engine(e)),
            }
        }
    }

    /// Wait once for whatever the engine is blocked on.
    ///
    /// Returns immediately when the engine reports no pending direction.
    pub fn wait<S, E>(&self, engine: &S, deadline: &Deadline) -> Result<(), E>
    where
        S: BlockDirections + ?Sized,
    {
        if deadline.is_expired() {
            return Err(self.timed_out(deadline));
        }

        let directions = engine.block_directions();
        tracing::trace!(?directions, "engine would block, waiting for readiness");

        match self
            .waiter
            .wait(directions, deadline.remaining())
            .map_err(DriveError::Wait)?
        {
            WaitOutcome::Ready => Ok(()),
            WaitOutcome::TimedOut => Err(self.timed_out(deadline)),
        }
    }

    fn timed_out<E>(&self, deadline: &Deadline) -> DriveError<E> {
        DriveError::Timeout {
            duration: deadline.budget().or(self.timeout).unwrap_or_default(),
        }
    }
}

//! nbssh-io: readiness-driven retries for non-blocking protocol engines
//!
//! Protocol engines such as libssh2 run in non-blocking mode and answer
//! "would block" when an operation cannot make progress yet. Alongside that
//! status they report which direction of the socket they are stuck on. This
//! crate turns that signal back into synchronous-looking calls:
//!
//! - [`Directions`] is the direction mask reported by the engine
//! - [`Waiter`] blocks until the socket satisfies a mask ([`SocketWaiter`] on Unix)
//! - [`RetryDriver`] re-invokes an operation until it stops answering "would block"
//!
//! # Quick Start
//!
//! ```ignore
//! use nbssh_io::{RetryDriver, SocketWaiter};
//!
//! let waiter = SocketWaiter::new(stream.try_clone()?);
//! let driver = RetryDriver::new(&waiter).with_timeout(Some(Duration::from_secs(30)));
//!
//! // `session` implements `BlockDirections`, its errors implement `WouldBlock`.
//! driver.run(&session, || session.handshake())?;
//! ```
//!
//! Every wait is a suspension point; nothing else in the crate blocks.

pub mod deadline;
pub mod direction;
pub mod error;
pub mod retry;
pub mod waiter;

// Re-export primary types
pub use deadline::Deadline;
pub use direction::{BlockDirections, Directions};
pub use error::{DriveError, Result};
pub use retry::{RetryDriver, WouldBlock};
#[cfg(unix)]
pub use waiter::SocketWaiter;
pub use waiter::{WaitOutcome, Waiter};

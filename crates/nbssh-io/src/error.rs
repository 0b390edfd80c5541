//! Error types for the nbssh-io crate.
//!
//! [`DriveError`] covers everything that can end a retry loop other than
//! success. "Would block" is not one of them: it is consumed by the loop.

use std::io;
use std::time::Duration;

/// The error type for driven engine operations.
///
/// `E` is the engine's own error type, passed through untouched.
#[derive(Debug, thiserror::Error)]
pub enum DriveError<E> {
    /// The engine reported a failure other than "would block".
    #[error("engine error: {0}")]
    Engine(E),

    /// Waiting for socket readiness failed.
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    /// The operation was still blocked when its deadline passed.
    #[error("operation timed out after {duration:?}")]
    Timeout {
        /// The configured deadline.
        duration: Duration,
    },

    /// A bounded retry ran out of attempts.
    #[error("operation still blocked after {attempts} attempts")]
    Exhausted {
        /// How many times the operation was invoked.
        attempts: u32,
    },
}

/// Result type for driven operations.
pub type Result<T, E> = std::result::Result<T, DriveError<E>>;

impl<E> DriveError<E> {
    /// Check if this is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if a bounded retry gave up.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// The engine error, if that is what ended the loop.
    #[must_use]
    pub const fn engine(&self) -> Option<&E> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }

    /// Convert the engine error with `f`, keeping the other variants.
    pub fn map_engine<F, G>(self, f: G) -> DriveError<F>
    where
        G: FnOnce(E) -> F,
    {
        match self {
            Self::Engine(e) => DriveError::Engine(f(e)),
            Self::Wait(e) => DriveError::Wait(e),
            Self::Timeout { duration } => DriveError::Timeout { duration },
            Self::Exhausted { attempts } => DriveError::Exhausted { attempts },
        }
    }
}

//! Readiness waiting.
//!
//! A [`Waiter`] suspends the caller until a socket satisfies the directions a
//! protocol engine is blocked on. [`SocketWaiter`] does this with `poll(2)`
//! through rustix, with an empty exceptional-conditions set.

use std::io;
use std::time::Duration;

use crate::direction::Directions;

/// What a readiness wait ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The socket is ready, or nothing was pending.
    Ready,
    /// The timeout elapsed first.
    TimedOut,
}

impl WaitOutcome {
    /// Whether the wait ended because the socket became ready.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Blocks until a socket is ready in the requested directions.
pub trait Waiter {
    /// Wait for readiness.
    ///
    /// Returns [`WaitOutcome::Ready`] immediately when `directions` is empty.
    /// A `timeout` of `None` waits indefinitely.
    fn wait(&self, directions: Directions, timeout: Option<Duration>) -> io::Result<WaitOutcome>;
}

impl<W: Waiter + ?Sized> Waiter for &W {
    fn wait(&self, directions: Directions, timeout: Option<Duration>) -> io::Result<WaitOutcome> {
        (**self).wait(directions, timeout)
    }
}

impl<W: Waiter + ?Sized> Waiter for Box<W> {
    fn wait(&self, directions: Directions, timeout: Option<Duration>) -> io::Result<WaitOutcome> {
        (**self).wait(directions, timeout)
    }
}

#[cfg(unix)]
mod socket {
    use std::io;
    use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
    use std::time::Duration;

    use rustix::event::{PollFd, PollFlags, Timespec, poll};
    use rustix::io::Errno;

    use super::{WaitOutcome, Waiter};
    use crate::deadline::Deadline;
    use crate::direction::Directions;

    /// Waits on a socket file descriptor with `poll(2)`.
    ///
    /// The waiter owns its descriptor, typically a duplicate of the stream
    /// handed to the protocol engine, so both refer to the same socket.
    #[derive(Debug)]
    pub struct SocketWaiter<F = OwnedFd> {
        fd: F,
    }

    impl<F: AsFd> SocketWaiter<F> {
        /// Create a waiter over a socket.
        pub const fn new(fd: F) -> Self {
            Self { fd }
        }

        /// Borrow the underlying descriptor.
        pub fn as_fd(&self) -> BorrowedFd<'_> {
            self.fd.as_fd()
        }

        /// Consume the waiter and return the descriptor.
        pub fn into_inner(self) -> F {
            self.fd
        }
    }

    impl<F: AsFd> Waiter for SocketWaiter<F> {
        fn wait(
            &self,
            directions: Directions,
            timeout: Option<Duration>,
        ) -> io::Result<WaitOutcome> {
            if directions.is_empty() {
                return Ok(WaitOutcome::Ready);
            }

            let mut flags = PollFlags::empty();
            if directions.wants_read() {
                flags |= PollFlags::IN;
            }
            if directions.wants_write() {
                flags |= PollFlags::OUT;
            }

            let deadline = Deadline::new(timeout);
            loop {
                let mut fds = [PollFd::new(&self.fd, flags)];
                let limit = deadline.remaining().map(to_timespec);
                match poll(&mut fds, limit.as_ref()) {
                    Ok(0) => return Ok(WaitOutcome::TimedOut),
                    Ok(_) => return Ok(WaitOutcome::Ready),
                    Err(Errno::INTR) => {
                        tracing::trace!("poll interrupted, retrying");
                    }
                    Err(errno) => return Err(io::Error::from(errno)),
                }
            }
        }
    }

    fn to_timespec(duration: Duration) -> Timespec {
        Timespec {
            tv_sec: duration.as_secs().try_into().unwrap_or(i64::MAX),
            tv_nsec: duration.subsec_nanos() as _,
        }
    }
}

#[cfg(unix)]
pub use socket::SocketWaiter;

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    use super::*;

    #[test]
    fn empty_mask_returns_without_polling() {
        let (a, _b) = UnixStream::pair().unwrap();
        let waiter = SocketWaiter::new(a);

        let started = Instant::now();
        // Even a zero timeout would report TimedOut if poll ran on a quiet socket.
        let outcome = waiter.wait(Directions::empty(), Some(Duration::ZERO)).unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn writable_socket_is_ready() {
        let (a, _b) = UnixStream::pair().unwrap();
        let waiter = SocketWaiter::new(a);

        let outcome = waiter
            .wait(Directions::WRITE, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(outcome.is_ready());
    }

    #[test]
    fn quiet_socket_times_out_for_read() {
        let (a, _b) = UnixStream::pair().unwrap();
        let waiter = SocketWaiter::new(a);

        let outcome = waiter
            .wait(Directions::READ, Some(Duration::from_millis(20)))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn pending_data_makes_socket_readable() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let waiter = SocketWaiter::new(a);
        b.write_all(b"ping").unwrap();

        let outcome = waiter
            .wait(Directions::READ, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(outcome.is_ready());
    }

    #[test]
    fn both_directions_ready_when_either_is() {
        let (a, _b) = UnixStream::pair().unwrap();
        let waiter = SocketWaiter::new(a);

        // Not readable, but writable.
        let outcome = waiter.wait(Directions::BOTH, None).unwrap();
        assert!(outcome.is_ready());
    }
}

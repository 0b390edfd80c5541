//! Command execution and line streaming.
//!
//! [`OutputLines`] pulls bytes from a channel only when the caller asks for
//! the next line. Bytes are accumulated in a [`LineSplitter`], which yields
//! every complete line and carries the unterminated suffix over to the next
//! read, so the result does not depend on how the stream was chunked.
//!
//! The engine's end-of-stream flag is authoritative: an empty read before it
//! is set means "no data yet" and leads to another readiness wait.

use std::io;
use std::iter::FusedIterator;
use std::time::Duration;

use nbssh_io::{BlockDirections, Deadline, Directions, RetryDriver, Waiter};
use tracing::Span;

use crate::config::{ExecConfig, TimeoutConfig};
use crate::engine::{Engine, EngineChannel, EngineError};
use crate::error::{Result, SshError};

/// Incremental splitter of a byte stream into `\n`-terminated lines.
///
/// Holds exactly the bytes read since the last terminator. A `\r` directly
/// before the terminator is removed with it. Lines are decoded (lossily) only
/// once complete, so multi-byte characters split across chunks survive.
#[derive(Debug, Clone)]
pub struct LineSplitter {
    buf: Vec<u8>,
    /// Start of the unterminated fragment.
    start: usize,
    /// Bytes from `start` up to here are known to contain no terminator.
    scanned: usize,
    trim: bool,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LineSplitter {
    /// Create an empty splitter.
    ///
    /// With `trim`, surrounding whitespace is removed from every line.
    #[must_use]
    pub const fn new(trim: bool) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            scanned: 0,
            trim,
        }
    }

    /// Append newly read bytes.
    pub fn push(&mut self, data: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete line, if one has been read.
    pub fn next_line(&mut self) -> Option<String> {
        match self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                let line = self.decode(self.start, end);
                self.start = end + 1;
                self.scanned = self.start;
                if self.start == self.buf.len() {
                    self.clear();
                }
                Some(line)
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Flush the unterminated fragment at end of stream.
    ///
    /// Returns `None` when nothing (or, when trimming, only whitespace) is left.
    pub fn finish(&mut self) -> Option<String> {
        if self.start == self.buf.len() {
            self.clear();
            return None;
        }
        let line = self.decode(self.start, self.buf.len());
        self.clear();
        if self.trim && line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// The bytes read since the last terminator.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
        self.scanned = 0;
    }

    fn decode(&self, start: usize, end: usize) -> String {
        let mut bytes = &self.buf[start..end];
        if let [rest @ .., b'\r'] = bytes {
            bytes = rest;
        }
        let line = String::from_utf8_lossy(bytes);
        if self.trim {
            line.trim().to_string()
        } else {
            line.into_owned()
        }
    }
}

/// Waits for reads even when the engine reports no pending direction.
///
/// An empty mask would make the waiter return immediately and the read loop
/// spin while the remote is silent.
struct ReadInterest<'a, E: ?Sized>(&'a E);

impl<E: BlockDirections + ?Sized> BlockDirections for ReadInterest<'_, E> {
    fn block_directions(&self) -> Directions {
        let directions = self.0.block_directions();
        if directions.is_empty() {
            Directions::READ
        } else {
            directions
        }
    }
}

/// Lazy sequence of output lines from a running command.
///
/// Yields `Err` at most once, when a read or wait fails; the sequence ends
/// afterwards. A sequence that ends without an error reached end of stream.
pub struct OutputLines<'a, E: Engine, W: Waiter> {
    engine: &'a E,
    waiter: &'a W,
    channel: &'a mut E::Channel,
    splitter: LineSplitter,
    buf: Vec<u8>,
    read_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
    span: Span,
    eof: bool,
    done: bool,
    lines: u64,
    bytes: u64,
}

impl<'a, E: Engine, W: Waiter> OutputLines<'a, E, W> {
    pub(crate) fn new(
        engine: &'a E,
        waiter: &'a W,
        channel: &'a mut E::Channel,
        exec: &ExecConfig,
        timeouts: &TimeoutConfig,
        span: Span,
    ) -> Self {
        Self {
            engine,
            waiter,
            channel,
            splitter: LineSplitter::new(exec.trim),
            buf: vec![0; exec.read_buffer.max(1)],
            read_timeout: timeouts.read,
            io_timeout: timeouts.io,
            span,
            eof: false,
            done: false,
            lines: 0,
            bytes: 0,
        }
    }

    /// The channel the command runs on.
    pub fn channel(&mut self) -> &mut E::Channel {
        &mut *self.channel
    }

    /// Whether the remote end has finished sending output.
    #[must_use]
    pub fn exit_status_ready(&self) -> bool {
        exit_status_ready(&*self.channel)
    }

    /// Drain any remaining output, close the channel and return the exit status.
    pub fn recv_exit_status(&mut self) -> Result<i32> {
        for line in self.by_ref() {
            line?;
        }
        let _enter = self.span.enter();
        let driver = RetryDriver::new(self.waiter).with_timeout(self.io_timeout);
        recv_exit_status(self.engine, &driver, self.channel)
    }

    /// Read once, waiting for readiness if nothing was available.
    fn fill(&mut self) -> Result<()> {
        match self.channel.read(&mut self.buf) {
            Ok(n) if n > 0 => {
                self.bytes += n as u64;
                self.splitter.push(&self.buf[..n]);
                Ok(())
            }
            Ok(_) | Err(EngineError::WouldBlock) => {
                if self.channel.eof() {
                    self.eof = true;
                    return Ok(());
                }
                let driver = RetryDriver::new(self.waiter);
                let deadline = Deadline::new(self.read_timeout);
                driver
                    .wait::<_, EngineError>(&ReadInterest(self.engine), &deadline)
                    .map_err(|e| SshError::driven(e, |e| SshError::Transport(io::Error::other(e))))
            }
            Err(e) => Err(SshError::Transport(io::Error::other(e))),
        }
    }
}

impl<E: Engine, W: Waiter> Iterator for OutputLines<'_, E, W> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let span = self.span.clone();
        let _enter = span.enter();

        loop {
            if let Some(line) = self.splitter.next_line() {
                self.lines += 1;
                return Some(Ok(line));
            }
            if self.eof {
                self.done = true;
                let last = self.splitter.finish();
                self.lines += u64::from(last.is_some());
                tracing::debug!(lines = self.lines, bytes = self.bytes, "command output finished");
                return last.map(Ok);
            }
            if let Err(e) = self.fill() {
                self.done = true;
                tracing::warn!(error = %e, lines = self.lines, "command output aborted");
                return Some(Err(e));
            }
        }
    }
}

impl<E: Engine, W: Waiter> FusedIterator for OutputLines<'_, E, W> {}

impl<E: Engine, W: Waiter> std::fmt::Debug for OutputLines<'_, E, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLines")
            .field("pending", &self.splitter.pending().len())
            .field("eof", &self.eof)
            .field("done", &self.done)
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

/// Everything `exec_command` hands back for one command.
///
/// Standard error is not captured separately; [`CommandOutput::stderr`] is
/// always empty.
#[derive(Debug)]
pub struct CommandOutput<'a, E: Engine, W: Waiter> {
    /// The host the command runs on.
    pub host: &'a str,
    /// Standard output, line by line.
    pub stdout: OutputLines<'a, E, W>,
    /// Placeholder for standard error.
    pub stderr: std::iter::Empty<String>,
}

impl<E: Engine, W: Waiter> CommandOutput<'_, E, W> {
    /// The channel the command runs on.
    pub fn channel(&mut self) -> &mut E::Channel {
        self.stdout.channel()
    }

    /// Whether the remote end has finished sending output.
    #[must_use]
    pub fn exit_status_ready(&self) -> bool {
        self.stdout.exit_status_ready()
    }

    /// Drain remaining output and return the exit status.
    pub fn recv_exit_status(&mut self) -> Result<i32> {
        self.stdout.recv_exit_status()
    }
}

/// Send `command` on `channel` and stream its output.
pub(crate) fn start<'a, E: Engine, W: Waiter>(
    engine: &'a E,
    waiter: &'a W,
    channel: &'a mut E::Channel,
    command: &str,
    exec: &ExecConfig,
    timeouts: &TimeoutConfig,
    span: Span,
) -> Result<OutputLines<'a, E, W>> {
    {
        let _enter = span.enter();
        tracing::debug!(command, "executing command");
        RetryDriver::new(waiter)
            .with_timeout(timeouts.io)
            .run(engine, || channel.exec(command))
            .map_err(|e| {
                SshError::driven(e, |e| {
                    SshError::channel(format!("failed to execute '{command}': {e}"))
                })
            })?;
    }
    Ok(OutputLines::new(engine, waiter, channel, exec, timeouts, span))
}

/// Whether the channel has reached end of stream.
pub fn exit_status_ready<C: EngineChannel + ?Sized>(channel: &C) -> bool {
    channel.eof()
}

/// Close `channel` through the retry driver and return its exit status.
pub fn recv_exit_status<E: Engine, W: Waiter + ?Sized>(
    engine: &E,
    driver: &RetryDriver<'_, W>,
    channel: &mut E::Channel,
) -> Result<i32> {
    driver
        .run(engine, || channel.close())
        .map_err(|e| {
            SshError::driven(e, |e| SshError::channel(format!("failed to close channel: {e}")))
        })?;
    let status = channel
        .exit_status()
        .map_err(|e| SshError::channel(format!("failed to read exit status: {e}")))?;
    tracing::debug!(status, "command exited");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CountingWaiter, MockChannel, MockEngine, ReadStep};

    fn collect(splitter: &mut LineSplitter) -> Vec<String> {
        std::iter::from_fn(|| splitter.next_line()).collect()
    }

    #[test]
    fn splits_complete_lines() {
        let mut splitter = LineSplitter::default();
        splitter.push(b"one\ntwo\nthr");
        assert_eq!(collect(&mut splitter), ["one", "two"]);
        assert_eq!(splitter.pending(), b"thr");

        splitter.push(b"ee\n");
        assert_eq!(collect(&mut splitter), ["three"]);
        assert!(splitter.pending().is_empty());
    }

    #[test]
    fn strips_carriage_return() {
        let mut splitter = LineSplitter::new(false);
        splitter.push(b"a\r\n b \r\n");
        assert_eq!(collect(&mut splitter), ["a", " b "]);
    }

    #[test]
    fn trims_when_enabled() {
        let mut splitter = LineSplitter::new(true);
        splitter.push(b"  padded\t\n\n");
        assert_eq!(collect(&mut splitter), ["padded", ""]);
    }

    #[test]
    fn terminator_split_from_cr() {
        let mut splitter = LineSplitter::new(false);
        splitter.push(b"x\r");
        assert!(splitter.next_line().is_none());
        splitter.push(b"\n");
        assert_eq!(splitter.next_line().as_deref(), Some("x"));
    }

    #[test]
    fn multibyte_character_across_chunks() {
        let mut splitter = LineSplitter::default();
        let text = "héllo\n".as_bytes();
        splitter.push(&text[..2]);
        assert!(splitter.next_line().is_none());
        splitter.push(&text[2..]);
        assert_eq!(splitter.next_line().as_deref(), Some("héllo"));
    }

    #[test]
    fn finish_flushes_fragment() {
        let mut splitter = LineSplitter::default();
        splitter.push(b"done\npartial");
        assert_eq!(collect(&mut splitter), ["done"]);
        assert_eq!(splitter.finish().as_deref(), Some("partial"));
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn finish_drops_whitespace_when_trimming() {
        let mut splitter = LineSplitter::new(true);
        splitter.push(b"  ");
        assert!(splitter.finish().is_none());

        let mut splitter = LineSplitter::new(false);
        splitter.push(b"  ");
        assert_eq!(splitter.finish().as_deref(), Some("  "));
    }

    fn run(channel: MockChannel, waiter: &CountingWaiter) -> Vec<Result<String>> {
        let engine = MockEngine::new();
        let mut channel = channel;
        let exec = ExecConfig::default();
        let timeouts = TimeoutConfig::none();
        start(&engine, waiter, &mut channel, "cmd", &exec, &timeouts, Span::none())
            .unwrap()
            .collect()
    }

    #[test]
    fn empty_read_before_eof_waits_again() {
        let channel = MockChannel::new()
            .output(b"first\n")
            .step(ReadStep::Empty)
            .would_block()
            .output(b"second\n");
        let waiter = CountingWaiter::new();

        let lines: Vec<String> = run(channel, &waiter).into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, ["first", "second"]);
        assert_eq!(waiter.waits(), 2);
    }

    #[test]
    fn read_failure_ends_sequence_with_error() {
        let channel = MockChannel::new()
            .output(b"ok\n")
            .step(ReadStep::Fail("connection reset".into()))
            .output(b"never\n");
        let waiter = CountingWaiter::new();

        let results = run(channel, &waiter);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_deref().ok(), Some("ok"));
        assert!(matches!(results[1], Err(SshError::Transport(_))));
    }

    #[test]
    fn read_wait_timeout_surfaces() {
        let engine = MockEngine::new();
        let mut channel = MockChannel::new().would_block().output(b"late\n");
        let waiter = CountingWaiter::new().time_out_after(0);
        let timeouts = TimeoutConfig::none().read(Some(Duration::from_millis(10)));

        let mut lines = start(
            &engine,
            &waiter,
            &mut channel,
            "sleep 60",
            &ExecConfig::default(),
            &timeouts,
            Span::none(),
        )
        .unwrap();

        assert!(lines.next().unwrap().unwrap_err().is_timeout());
        assert!(lines.next().is_none());
    }

    #[test]
    fn empty_mask_still_waits_for_reads() {
        let engine = MockEngine::new().directions(Directions::empty());
        let mut channel = MockChannel::new().would_block().output(b"x\n");
        let waiter = CountingWaiter::new();

        let lines: Vec<_> = start(
            &engine,
            &waiter,
            &mut channel,
            "cmd",
            &ExecConfig::default(),
            &TimeoutConfig::none(),
            Span::none(),
        )
        .unwrap()
        .collect();

        assert_eq!(lines.len(), 1);
        assert_eq!(waiter.last_directions(), Some(Directions::READ));
    }

    #[test]
    fn exit_status_after_drain() {
        let engine = MockEngine::new();
        let mut channel = MockChannel::new().output(b"a\nb\n").exit_status(3);
        let handle = channel.clone();
        let waiter = CountingWaiter::new();

        let mut lines = start(
            &engine,
            &waiter,
            &mut channel,
            "false",
            &ExecConfig::default(),
            &TimeoutConfig::none(),
            Span::none(),
        )
        .unwrap();

        assert_eq!(lines.next().unwrap().unwrap(), "a");
        assert_eq!(lines.recv_exit_status().unwrap(), 3);
        assert!(lines.exit_status_ready());
        assert!(handle.is_closed());
    }

    #[test]
    fn exec_failure_is_channel_error() {
        let engine = MockEngine::new();
        let mut channel = MockChannel::new().exec_would_block(2).exec_fails("refused");
        let waiter = CountingWaiter::new();

        let err = start(
            &engine,
            &waiter,
            &mut channel,
            "ls",
            &ExecConfig::default(),
            &TimeoutConfig::none(),
            Span::none(),
        )
        .unwrap_err();

        assert!(matches!(err, SshError::Channel { .. }));
        assert_eq!(waiter.waits(), 2);
    }
}

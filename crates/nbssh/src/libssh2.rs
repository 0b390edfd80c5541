//! libssh2 engine, through the `ssh2` crate.
//!
//! The session runs in non-blocking mode. libssh2 reports "would block" as
//! `LIBSSH2_ERROR_EAGAIN` and documents that the interrupted call must be
//! repeated with the same arguments, which is what the retry driver does.

use std::io::{self, Read};
use std::net::TcpStream;
use std::path::Path;

use nbssh_io::{BlockDirections, Directions};
use ssh2::{Channel, ErrorCode, Session};

use crate::engine::{Engine, EngineChannel, EngineError, EngineResult};
use crate::error::{Result, SshError};

/// libssh2's "would block" status.
pub const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// Code reported for I/O errors that carry no OS error number.
const UNKNOWN_ERROR: i32 = -1;

/// Size of the scratch buffer used to discard standard error.
const STDERR_SCRATCH: usize = 4096;

fn engine_error(err: &ssh2::Error) -> EngineError {
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_EAGAIN) => EngineError::WouldBlock,
        ErrorCode::Session(code) | ErrorCode::SFTP(code) => {
            EngineError::failure(code, err.message())
        }
    }
}

fn io_engine_error(err: &io::Error) -> EngineError {
    if err.kind() == io::ErrorKind::WouldBlock {
        EngineError::WouldBlock
    } else {
        EngineError::failure(err.raw_os_error().unwrap_or(UNKNOWN_ERROR), err.to_string())
    }
}

fn directions(value: ssh2::BlockDirections) -> Directions {
    match value {
        ssh2::BlockDirections::None => Directions::empty(),
        ssh2::BlockDirections::Inbound => Directions::READ,
        ssh2::BlockDirections::Outbound => Directions::WRITE,
        ssh2::BlockDirections::Both => Directions::BOTH,
    }
}

/// A libssh2 session in non-blocking mode.
pub struct Ssh2Engine {
    session: Session,
}

impl Ssh2Engine {
    /// Wrap an existing session and switch it to non-blocking mode.
    #[must_use]
    pub fn new(session: Session) -> Self {
        session.set_blocking(false);
        Self { session }
    }

    /// Create a session over a connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let mut session = Session::new()
            .map_err(|e| SshError::session(format!("failed to create session: {e}")))?;
        session.set_tcp_stream(stream);
        Ok(Self::new(session))
    }

    /// The wrapped session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }
}

impl std::fmt::Debug for Ssh2Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssh2Engine")
            .field("authenticated", &self.session.authenticated())
            .finish_non_exhaustive()
    }
}

impl BlockDirections for Ssh2Engine {
    fn block_directions(&self) -> Directions {
        directions(self.session.block_directions())
    }
}

impl Engine for Ssh2Engine {
    type Channel = Ssh2Channel;

    fn set_blocking(&self, blocking: bool) {
        self.session.set_blocking(blocking);
    }

    fn handshake(&self) -> EngineResult<()> {
        // Session handles share one libssh2 session.
        self.session.clone().handshake().map_err(|e| engine_error(&e))
    }

    fn userauth_agent(&self, user: &str) -> EngineResult<()> {
        self.session.userauth_agent(user).map_err(|e| engine_error(&e))
    }

    fn userauth_pubkey_file(
        &self,
        user: &str,
        public_key: Option<&Path>,
        private_key: &Path,
        passphrase: Option<&str>,
    ) -> EngineResult<()> {
        self.session
            .userauth_pubkey_file(user, public_key, private_key, passphrase)
            .map_err(|e| engine_error(&e))
    }

    fn authenticated(&self) -> bool {
        self.session.authenticated()
    }

    fn open_session(&self) -> EngineResult<Option<Ssh2Channel>> {
        match self.session.channel_session() {
            Ok(channel) => Ok(Some(Ssh2Channel::new(channel))),
            Err(e) => match engine_error(&e) {
                EngineError::WouldBlock => Ok(None),
                failure => Err(failure),
            },
        }
    }

    fn close(&self, description: &str) -> EngineResult<()> {
        self.session
            .disconnect(None, description, None)
            .map_err(|e| engine_error(&e))
    }
}

/// A libssh2 channel.
///
/// Standard error is read and discarded on every read so the remote's EOF
/// can be observed even when a command writes only to standard error.
pub struct Ssh2Channel {
    channel: Channel,
    close_sent: bool,
    scratch: Vec<u8>,
}

impl Ssh2Channel {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            close_sent: false,
            scratch: vec![0; STDERR_SCRATCH],
        }
    }

    /// The wrapped channel.
    #[must_use]
    pub const fn inner(&self) -> &Channel {
        &self.channel
    }

    fn drain_stderr(&mut self) {
        let discarded = discard(&mut self.channel.stderr(), &mut self.scratch);
        if discarded > 0 {
            tracing::trace!(bytes = discarded, "discarded standard error");
        }
    }
}

/// Read and drop whatever `reader` has available, stopping at the first
/// empty read, would-block or error. Returns the number of bytes dropped.
fn discard(reader: &mut impl Read, scratch: &mut [u8]) -> usize {
    let mut total = 0;
    while let Ok(n) = reader.read(scratch) {
        if n == 0 {
            break;
        }
        total += n;
    }
    total
}

impl std::fmt::Debug for Ssh2Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssh2Channel")
            .field("eof", &self.channel.eof())
            .field("close_sent", &self.close_sent)
            .finish_non_exhaustive()
    }
}

impl EngineChannel for Ssh2Channel {
    fn request_pty(&mut self, term: &str) -> EngineResult<()> {
        self.channel
            .request_pty(term, None, None)
            .map_err(|e| engine_error(&e))
    }

    fn exec(&mut self, command: &str) -> EngineResult<()> {
        self.channel.exec(command).map_err(|e| engine_error(&e))
    }

    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        self.drain_stderr();
        self.channel.read(buf).map_err(|e| io_engine_error(&e))
    }

    fn eof(&self) -> bool {
        self.channel.eof()
    }

    fn close(&mut self) -> EngineResult<()> {
        if !self.close_sent {
            self.channel.close().map_err(|e| engine_error(&e))?;
            self.close_sent = true;
        }
        self.channel.wait_close().map_err(|e| engine_error(&e))
    }

    fn exit_status(&self) -> EngineResult<i32> {
        self.channel.exit_status().map_err(|e| engine_error(&e))
    }
}

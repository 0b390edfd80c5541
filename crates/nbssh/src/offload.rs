//! Running a client from async code.
//!
//! A client blocks its thread while it waits for the socket. [`spawn_exec`]
//! moves it onto tokio's blocking pool and hands the output back as a
//! stream, so an async caller yields instead of blocking its worker.

use nbssh_io::Waiter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::client::SshClient;
use crate::engine::Engine;
use crate::error::Result;

/// Lines buffered between the blocking reader and the stream consumer.
const LINE_BUFFER: usize = 256;

/// Output lines of a spawned command.
pub type LineStream = ReceiverStream<String>;

/// Handle resolving to the client and the command's exit status.
pub type ExecHandle<E, W> = JoinHandle<(SshClient<E, W>, Result<i32>)>;

/// Run `command` on a blocking thread, streaming its output lines.
///
/// The handle resolves once the command has exited, returning the client so
/// it can be reused. A failure while reading ends the stream early and is
/// reported through the handle. Dropping the stream stops forwarding lines;
/// the remaining output is still drained before the exit status is read.
pub fn spawn_exec<E, W>(
    mut client: SshClient<E, W>,
    command: impl Into<String>,
) -> (LineStream, ExecHandle<E, W>)
where
    E: Engine + Send + 'static,
    E::Channel: Send,
    W: Waiter + Send + 'static,
{
    let command = command.into();
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    let handle = tokio::task::spawn_blocking(move || {
        let status = forward(&mut client, &command, &tx);
        (client, status)
    });
    (ReceiverStream::new(rx), handle)
}

fn forward<E: Engine, W: Waiter>(
    client: &mut SshClient<E, W>,
    command: &str,
    tx: &mpsc::Sender<String>,
) -> Result<i32> {
    let mut output = client.exec_command(command, false)?;
    for line in output.stdout.by_ref() {
        if tx.blocking_send(line?).is_err() {
            tracing::debug!("line receiver dropped, discarding remaining output");
            break;
        }
    }
    output.recv_exit_status()
}

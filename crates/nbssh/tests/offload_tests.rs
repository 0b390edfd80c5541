//! Integration tests for running a client on tokio's blocking pool.
//!
//! These tests require the `tokio` feature to be enabled.

#![cfg(feature = "tokio")]

use nbssh::mock::{CountingWaiter, MockChannel, MockEngine, ReadStep};
use nbssh::{ClientConfig, SshClient, SshError, spawn_exec};
use tokio_stream::StreamExt;

fn client(channels: Vec<MockChannel>) -> SshClient<MockEngine, CountingWaiter> {
    let engine = channels
        .into_iter()
        .fold(MockEngine::new().agent_accepts(true), MockEngine::with_channel);
    let config = ClientConfig::new("test-host")
        .user("tester")
        .identities(Vec::<String>::new());
    SshClient::from_engine(config, engine, CountingWaiter::new()).unwrap()
}

#[tokio::test]
async fn streams_lines_and_returns_client() {
    let channel = MockChannel::new()
        .output(b"one\ntw")
        .would_block()
        .output(b"o\n")
        .exit_status(7);
    let client = client(vec![channel, MockChannel::new().output(b"again\n")]);

    let (lines, handle) = spawn_exec(client, "seq");
    let lines: Vec<String> = lines.collect().await;
    let (mut client, status) = handle.await.unwrap();

    assert_eq!(lines, ["one", "two"]);
    assert_eq!(status.unwrap(), 7);

    // The returned client is still usable.
    let again: Vec<_> = client
        .exec_command("echo again", false)
        .unwrap()
        .stdout
        .map(Result::unwrap)
        .collect();
    assert_eq!(again, ["again"]);
}

#[tokio::test]
async fn read_failure_is_reported_through_handle() {
    let channel = MockChannel::new()
        .output(b"before\n")
        .step(ReadStep::Fail("connection reset".into()));
    let (lines, handle) = spawn_exec(client(vec![channel]), "cat");

    let lines: Vec<String> = lines.collect().await;
    let (_client, status) = handle.await.unwrap();

    assert_eq!(lines, ["before"]);
    assert!(matches!(status, Err(SshError::Transport(_))));
}

#[tokio::test]
async fn dropped_stream_still_yields_status() {
    let channel = MockChannel::new()
        .output(b"1\n2\n3\n")
        .exit_status(0);
    let handle_channel = channel.clone();
    let (lines, handle) = spawn_exec(client(vec![channel]), "seq 3");
    drop(lines);

    let (_client, status) = handle.await.unwrap();
    assert_eq!(status.unwrap(), 0);
    assert!(handle_channel.is_closed());
}

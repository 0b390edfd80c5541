//! Integration tests for session bootstrap and teardown.

use std::time::Duration;

use nbssh::mock::{CountingWaiter, MockChannel, MockEngine};
use nbssh::{ClientConfig, Directions, SshClient, SshError, TimeoutConfig};

fn config() -> ClientConfig {
    ClientConfig::new("test-host")
        .user("tester")
        .identities(Vec::<String>::new())
}

fn engine() -> MockEngine {
    MockEngine::new()
        .agent_accepts(true)
        .with_channel(MockChannel::new())
}

#[test]
fn teardown_closes_once_after_would_blocks() {
    let engine = engine().close_would_block(4).directions(Directions::WRITE);
    let handle = engine.clone();
    let waiter = CountingWaiter::new();

    let client = SshClient::from_engine(config(), engine, &waiter).unwrap();
    let waits_before = waiter.waits();
    drop(client);

    let stats = handle.stats();
    assert_eq!(stats.close_calls, 5);
    assert_eq!(stats.closes_completed, 1);
    assert_eq!(waiter.waits() - waits_before, 4);
    assert_eq!(waiter.last_directions(), Some(Directions::WRITE));
}

#[test]
fn teardown_after_commands_still_closes_once() {
    let engine = MockEngine::new()
        .agent_accepts(true)
        .with_channel(MockChannel::new().output(b"a\n"))
        .with_channel(MockChannel::new().output(b"b\n"));
    let handle = engine.clone();
    let mut client = SshClient::from_engine(config(), engine, CountingWaiter::new()).unwrap();

    for command in ["echo a", "echo b"] {
        let output = client.exec_command(command, false).unwrap();
        assert_eq!(output.stdout.count(), 1);
    }
    drop(client);

    assert_eq!(handle.stats().close_calls, 1);
    assert!(handle.is_closed());
}

#[test]
fn close_failure_during_drop_is_swallowed() {
    let engine = engine().close_fails("socket already closed");
    let handle = engine.clone();

    let client = SshClient::from_engine(config(), engine, CountingWaiter::new()).unwrap();
    drop(client);

    assert_eq!(handle.stats().close_calls, 1);
    assert!(!handle.is_closed());
}

#[test]
fn explicit_disconnect_reports_failure_once() {
    let engine = engine().close_fails("socket already closed");
    let handle = engine.clone();
    let mut client = SshClient::from_engine(config(), engine, CountingWaiter::new()).unwrap();

    let err = client.disconnect().unwrap_err();
    assert!(matches!(err, SshError::Session { .. }));
    assert!(client.disconnect().is_ok());
    drop(client);

    assert_eq!(handle.stats().close_calls, 1);
}

#[test]
fn handshake_deadline_surfaces_as_timeout() {
    let engine = engine().handshake_would_block(u32::MAX);
    let waiter = CountingWaiter::new().time_out_after(2);
    let config = config().timeouts(TimeoutConfig::none().io(Some(Duration::from_secs(1))));

    let err = SshClient::from_engine(config, engine, waiter).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "SSH operation timed out after 1s");
}

#[test]
fn channel_open_waits_while_not_ready() {
    let engine = engine().open_not_ready(3);
    let handle = engine.clone();
    let waiter = CountingWaiter::new();

    SshClient::from_engine(config(), engine, &waiter).unwrap();

    assert_eq!(handle.stats().open_calls, 4);
    assert_eq!(waiter.waits(), 3);
}

#[test]
fn default_user_is_resolved() {
    let client = SshClient::from_engine(
        ClientConfig::new("test-host").identities(Vec::<String>::new()),
        engine(),
        CountingWaiter::new(),
    )
    .unwrap();

    assert!(!client.user().is_empty());
    assert_eq!(client.port(), 22);
    assert_eq!(client.config().host, "test-host");
}

#[test]
fn caller_supplied_span() {
    let span = tracing::info_span!("deploy", stage = "canary");
    let client = SshClient::from_engine_with_span(config(), engine(), CountingWaiter::new(), span)
        .unwrap();

    assert_eq!(client.host(), "test-host");
    assert!(format!("{client:?}").contains("test-host"));
}

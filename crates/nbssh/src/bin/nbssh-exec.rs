//! Run one command on a remote host and print its output.
//!
//! ```text
//! nbssh-exec [--config FILE] [--pty] HOST COMMAND...
//! ```
//!
//! Settings come from the optional TOML file, then `NBSSH_*` environment
//! variables, then the command line. Logging is controlled with `RUST_LOG`.

use std::process::ExitCode;

use nbssh::{ClientConfig, EnvConfig, SshClient, SshError};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: nbssh-exec [--config FILE] [--pty] HOST COMMAND...";

struct Args {
    config: Option<String>,
    pty: bool,
    host: String,
    command: String,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut pty = false;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(args.next().ok_or("--config needs a file")?),
            "--pty" => pty = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => {
                positional.push(arg);
                positional.extend(args.by_ref());
            }
        }
    }

    let mut positional = positional.into_iter();
    let host = positional.next().ok_or(USAGE)?;
    let command = positional.collect::<Vec<_>>().join(" ");
    if command.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(Args {
        config,
        pty,
        host,
        command,
    })
}

fn run(args: &Args) -> Result<i32, SshError> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    config.apply_env(&EnvConfig::default())?;
    config.host.clone_from(&args.host);

    let mut client = SshClient::connect(config)?;
    let mut output = client.exec_command(&args.command, args.pty)?;
    for line in output.stdout.by_ref() {
        println!("{}", line?);
    }
    let status = output.recv_exit_status()?;
    drop(output);
    client.disconnect()?;
    Ok(status)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    match run(&args) {
        Ok(status) => {
            eprintln!("exit status: {status}");
            ExitCode::from(u8::try_from(status).unwrap_or(1))
        }
        Err(e) => {
            eprintln!("nbssh-exec: {e}");
            ExitCode::from(255)
        }
    }
}

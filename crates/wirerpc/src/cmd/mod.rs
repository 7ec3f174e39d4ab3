use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use wirerpc_transport::Endpoint;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod ping;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an echo server.
    Serve(ServeArgs),
    /// Issue a single request and print the response.
    Call(CallArgs),
    /// Measure round-trip time with `$ping` probes.
    Ping(PingArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => block_on(serve::run(args, format)),
        Command::Call(args) => block_on(call::run(args, format)),
        Command::Ping(args) => block_on(ping::run(args, format)),
        Command::Version(args) => version::run(args, format),
    }
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: Future<Output = CliResult<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
    runtime.block_on(future)
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to bind (`unix:/path`, `tcp://host:port` or `host:port`).
    pub endpoint: Endpoint,
    /// Require `$auth` with this credential before `echo` is served.
    #[arg(long, env = "WIRERPC_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,
    /// Drop connections accepted beyond this many.
    #[arg(long)]
    pub max_connections: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Endpoint to connect to.
    pub endpoint: Endpoint,
    /// Method to invoke.
    #[arg(long, short = 'm')]
    pub method: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Log in with this credential before the call.
    #[arg(long, env = "WIRERPC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Identity presented with --token.
    #[arg(long, default_value = "wirerpc-cli")]
    pub identity: String,
    /// Maximum time for connect and for the call (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Probe the connection at this interval while the call is outstanding.
    #[arg(long)]
    pub keepalive: Option<String>,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Endpoint to probe.
    pub endpoint: Endpoint,
    /// Number of probes.
    #[arg(long, short = 'c', default_value = "1")]
    pub count: u64,
    /// Delay between probes (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Maximum wait for each pong.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        for bad in ["", "0s", "bad", "-1s", "1.5s"] {
            let err = parse_duration(bad).unwrap_err();
            assert_eq!(err.code, USAGE, "{bad:?}");
        }
    }
}

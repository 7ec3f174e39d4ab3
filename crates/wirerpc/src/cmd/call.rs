use std::fs;
use std::time::Duration;

use bytes::Bytes;
use wirerpc_conn::{login, Client, ConnConfig, KeepaliveConfig};
use wirerpc_frame::{AuthData, Request};
use wirerpc_transport::Endpoint;

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{io_error, response_code, rpc_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::{print_response, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let keepalive = args.keepalive.as_deref().map(parse_duration).transpose()?;
    let body = resolve_payload(&args)?;

    let client = connect(&args.endpoint, timeout).await?;
    if let Some(interval) = keepalive {
        client.spawn_keepalive(KeepaliveConfig { interval, timeout });
    }
    let writer = client.open();

    if let Some(token) = &args.token {
        let auth = AuthData::new(args.identity.clone(), token.clone());
        tokio::time::timeout(timeout, login(&writer, &auth))
            .await
            .map_err(|_| CliError::new(TIMEOUT, "login timed out"))?
            .map_err(|err| rpc_error("login failed", err))?;
    }

    let (response, payload) = writer
        .call_timeout(Request::new(args.method.as_str()), body, timeout)
        .await
        .map_err(|err| rpc_error("call failed", err))?;
    client.close();

    print_response(&response, &payload, format);
    if !response.code.is_success() {
        tracing::warn!(code = %response.code, message = %response.message, "call returned an error response");
    }
    Ok(response_code(response.code))
}

pub(crate) async fn connect(endpoint: &Endpoint, timeout: Duration) -> CliResult<Client> {
    tokio::time::timeout(timeout, Client::connect(endpoint, ConnConfig::default()))
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("connect to {endpoint} timed out")))?
        .map_err(|err| rpc_error("connect failed", err))
}

fn resolve_payload(args: &CallArgs) -> CliResult<Option<Bytes>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Some(Bytes::from(json.clone())));
    }
    if let Some(data) = &args.data {
        return Ok(Some(Bytes::from(data.clone())));
    }
    if let Some(path) = &args.file {
        let contents = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(Some(Bytes::from(contents)));
    }
    Ok(None)
}

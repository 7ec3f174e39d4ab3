use wirerpc_conn::ping_once;

use crate::cmd::call::connect;
use crate::cmd::{parse_duration, PingArgs};
use crate::exit::{rpc_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_ping_report, OutputFormat, PingSample};

pub async fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let timeout = parse_duration(&args.timeout)?;
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }

    let client = connect(&args.endpoint, timeout).await?;
    let writer = client.open();

    let mut samples = Vec::with_capacity(args.count as usize);
    for seq in 0..args.count {
        if seq > 0 {
            tokio::time::sleep(interval).await;
        }
        let rtt = ping_once(&writer, seq, timeout)
            .await
            .map_err(|err| rpc_error("ping failed", err))?;
        tracing::debug!(seq, rtt_us = rtt.as_micros() as u64, "pong");
        samples.push(PingSample::new(seq, rtt));
    }
    client.close();

    print_ping_report(&args.endpoint.to_string(), &samples, format);
    Ok(SUCCESS)
}

use std::io::{IsTerminal, Write};
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use wirerpc_frame::{ExtKv, Response};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    request_id: u64,
    code: u32,
    code_name: &'a str,
    message: &'a str,
    has_payload: bool,
    payload_size: usize,
    payload: String,
    #[serde(skip_serializing_if = "no_ext")]
    ext_kv: &'a ExtKv,
}

fn no_ext(ext_kv: &&ExtKv) -> bool {
    ext_kv.is_empty()
}

pub fn print_response(response: &Response, body: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                request_id: response.request_id,
                code: response.code.as_u32(),
                code_name: response.code.as_str(),
                message: &response.message,
                has_payload: response.has_payload,
                payload_size: body.len(),
                payload: payload_preview(body),
                ext_kv: &response.ext_kv,
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "CODE", "MESSAGE", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    response.request_id.to_string(),
                    format!("{} ({})", response.code.as_u32(), response.code.as_str()),
                    response.message.clone(),
                    body.len().to_string(),
                    payload_preview(body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={} code={} ({}) message={:?} size={} payload={}",
                response.request_id,
                response.code.as_u32(),
                response.code.as_str(),
                response.message,
                body.len(),
                payload_preview(body)
            );
        }
        OutputFormat::Raw => print_raw(body),
    }
}

/// One successful probe.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PingSample {
    pub seq: u64,
    pub rtt_us: u64,
}

impl PingSample {
    pub fn new(seq: u64, rtt: Duration) -> Self {
        Self {
            seq,
            rtt_us: u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Serialize)]
struct PingReport<'a> {
    endpoint: &'a str,
    count: usize,
    min_us: u64,
    avg_us: u64,
    max_us: u64,
    samples: &'a [PingSample],
}

impl<'a> PingReport<'a> {
    fn new(endpoint: &'a str, samples: &'a [PingSample]) -> Self {
        let rtts = samples.iter().map(|s| s.rtt_us);
        let min_us = rtts.clone().min().unwrap_or(0);
        let max_us = rtts.clone().max().unwrap_or(0);
        let avg_us = if samples.is_empty() {
            0
        } else {
            rtts.sum::<u64>() / samples.len() as u64
        };
        Self {
            endpoint,
            count: samples.len(),
            min_us,
            avg_us,
            max_us,
            samples,
        }
    }
}

pub fn print_ping_report(endpoint: &str, samples: &[PingSample], format: OutputFormat) {
    let report = PingReport::new(endpoint, samples);
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "RTT"]);
            for sample in samples {
                table.add_row(vec![sample.seq.to_string(), format_micros(sample.rtt_us)]);
            }
            println!("{table}");
            println!(
                "{} probes to {}: min {} avg {} max {}",
                report.count,
                endpoint,
                format_micros(report.min_us),
                format_micros(report.avg_us),
                format_micros(report.max_us)
            );
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for sample in samples {
                println!("pong seq={} rtt={}", sample.seq, format_micros(sample.rtt_us));
            }
            println!(
                "{} probes: min={} avg={} max={}",
                report.count,
                format_micros(report.min_us),
                format_micros(report.avg_us),
                format_micros(report.max_us)
            );
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn format_micros(micros: u64) -> String {
    if micros >= 1000 {
        format!("{:.2}ms", micros as f64 / 1000.0)
    } else {
        format!("{micros}us")
    }
}

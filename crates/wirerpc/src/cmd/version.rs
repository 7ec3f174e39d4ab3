use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
    protocol_version: u8,
    target: &'static str,
    profile: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
}

impl VersionInfo {
    fn current() -> Self {
        Self {
            name: "wirerpc",
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: wirerpc_frame::PREAMBLE[wirerpc_frame::PREAMBLE_SIZE - 1],
            target: option_env!("WIRERPC_BUILD_TARGET").unwrap_or("unknown"),
            profile: option_env!("WIRERPC_BUILD_PROFILE").unwrap_or("unknown"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let info = VersionInfo::current();
    if matches!(format, OutputFormat::Json) && args.extended {
        print_json(&info);
        return Ok(SUCCESS);
    }
    if !args.extended {
        println!("{} {}", info.name, info.version);
        return Ok(SUCCESS);
    }

    println!("name: {}", info.name);
    println!("version: {}", info.version);
    println!("protocol_version: {}", info.protocol_version);
    println!("target: {}", info.target);
    println!("profile: {}", info.profile);
    println!("target_os: {}", info.target_os);
    println!("target_arch: {}", info.target_arch);

    Ok(SUCCESS)
}

use std::fmt;
use std::io;

use wirerpc_conn::RpcError;
use wirerpc_frame::{Code, FrameError};
use wirerpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const AUTH_FAILED: i32 = 77;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(&err), format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(transport_code(&err), format!("{context}: {err}"))
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    CliError::new(rpc_code(&err), format!("{context}: {err}"))
}

/// Exit code for a call answered with a non-success Response.
pub fn response_code(code: Code) -> i32 {
    match code {
        Code::Success => SUCCESS,
        Code::ReqNoAuth => AUTH_FAILED,
        Code::ReqBadParams | Code::ReqUnknownCompressType => DATA_INVALID,
        Code::ReqNoService | Code::ReqNoMethod => USAGE,
        _ => FAILURE,
    }
}

fn io_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => TRANSPORT_ERROR,
    }
}

fn transport_code(err: &TransportError) -> i32 {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_code(source),
        TransportError::PathTooLong { .. } | TransportError::InvalidEndpoint(_) => USAGE,
    }
}

fn frame_code(err: &FrameError) -> i32 {
    match err {
        FrameError::Io(source) => io_code(source),
        FrameError::FrameTooLarge { .. }
        | FrameError::Encode(_)
        | FrameError::Decode(_)
        | FrameError::UnsupportedCompression(_)
        | FrameError::Compression(_) => DATA_INVALID,
        FrameError::InvalidPreamble(_)
        | FrameError::UnknownFrameType(_)
        | FrameError::ShortRead { .. }
        | FrameError::ConnectionClosed => FAILURE,
    }
}

fn rpc_code(err: &RpcError) -> i32 {
    match err {
        RpcError::Transport(err) => transport_code(err),
        RpcError::Frame(err) => frame_code(err),
        RpcError::Closed(inner) => rpc_code(inner),
        RpcError::Timeout(_) => TIMEOUT,
        RpcError::AuthFailed(_) => AUTH_FAILED,
        RpcError::DuplicateRequestId(_)
        | RpcError::PayloadMisuse(_)
        | RpcError::ResponseAlreadyWritten(_) => INTERNAL,
        _ => FAILURE,
    }
}

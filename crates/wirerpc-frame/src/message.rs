//! Message types carried inside frames.
//!
//! Bodies are MessagePack maps keyed by field name (`rmp_serde::to_vec_named`),
//! so fields can be added later without breaking older peers.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Method name of the login handshake.
pub const AUTH_METHOD: &str = "$auth";

/// Method name of the liveness probe.
pub const PING_METHOD: &str = "$ping";

/// Free-form extension key/values attached to requests and responses.
pub type ExtKv = BTreeMap<String, serde_json::Value>;

/// Encode a message body.
pub fn encode_message<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a message body.
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Payload compression selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CompressType {
    #[default]
    None,
    Gzip,
}

impl From<CompressType> for u8 {
    fn from(value: CompressType) -> Self {
        match value {
            CompressType::None => 0,
            CompressType::Gzip => 1,
        }
    }
}

impl TryFrom<u8> for CompressType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressType::None),
            1 => Ok(CompressType::Gzip),
            other => Err(format!("unknown compress type {other}")),
        }
    }
}

/// Response status code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum Code {
    #[default]
    Success,
    ReqNoAuth,
    ReqNoService,
    ReqNoMethod,
    ReqUnknownCompressType,
    ReqBadParams,
    SerInternal,
    SerShutdown,
    SerLimit,
    SerBadConn,
}

impl Code {
    pub fn as_u32(self) -> u32 {
        match self {
            Code::Success => 0,
            Code::ReqNoAuth => 1001,
            Code::ReqNoService => 1002,
            Code::ReqNoMethod => 1003,
            Code::ReqUnknownCompressType => 1004,
            Code::ReqBadParams => 1005,
            Code::SerInternal => 2001,
            Code::SerShutdown => 2002,
            Code::SerLimit => 2003,
            Code::SerBadConn => 2004,
        }
    }

    pub fn is_success(self) -> bool {
        self == Code::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Code::Success => "success",
            Code::ReqNoAuth => "request not authenticated",
            Code::ReqNoService => "no such service",
            Code::ReqNoMethod => "no such method",
            Code::ReqUnknownCompressType => "unknown compress type",
            Code::ReqBadParams => "bad parameters",
            Code::SerInternal => "internal server error",
            Code::SerShutdown => "server shutting down",
            Code::SerLimit => "server over limit",
            Code::SerBadConn => "bad connection",
        }
    }
}

impl From<Code> for u32 {
    fn from(value: Code) -> Self {
        value.as_u32()
    }
}

impl TryFrom<u32> for Code {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0 => Code::Success,
            1001 => Code::ReqNoAuth,
            1002 => Code::ReqNoService,
            1003 => Code::ReqNoMethod,
            1004 => Code::ReqUnknownCompressType,
            1005 => Code::ReqBadParams,
            2001 => Code::SerInternal,
            2002 => Code::SerShutdown,
            2003 => Code::SerLimit,
            2004 => Code::SerBadConn,
            other => return Err(format!("unknown response code {other}")),
        })
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u32(), self.as_str())
    }
}

/// A call issued by a client. `id` correlates every Response and Payload
/// frame belonging to the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub id: u64,
    #[serde(rename = "hasPayload", default)]
    pub has_payload: bool,
    #[serde(rename = "compressType", default)]
    pub compress_type: CompressType,
    #[serde(rename = "logID", default)]
    pub log_id: String,
    #[serde(rename = "traceID", default)]
    pub trace_id: String,
    #[serde(rename = "spanID", default)]
    pub span_id: String,
    #[serde(rename = "parentSpanID", default)]
    pub parent_span_id: String,
    #[serde(rename = "extKV", default)]
    pub ext_kv: ExtKv,
}

impl Request {
    /// A request for `method`; id 0 lets the client assign one.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Mark the request as followed by a payload stream.
    pub fn with_payload(mut self) -> Self {
        self.has_payload = true;
        self
    }

    pub fn with_compress(mut self, compress_type: CompressType) -> Self {
        self.compress_type = compress_type;
        self
    }

    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.log_id = log_id.into();
        self
    }

    pub fn with_trace(
        mut self,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_span_id: impl Into<String>,
    ) -> Self {
        self.trace_id = trace_id.into();
        self.span_id = span_id.into();
        self.parent_span_id = parent_span_id.into();
        self
    }

    pub fn with_ext(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.ext_kv.insert(key.into(), value);
        self
    }
}

/// The single answer to a Request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: Code,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "requestID")]
    pub request_id: u64,
    #[serde(rename = "hasPayload", default)]
    pub has_payload: bool,
    #[serde(rename = "compressType", default)]
    pub compress_type: CompressType,
    #[serde(rename = "extKV", default)]
    pub ext_kv: ExtKv,
}

impl Response {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    pub fn ok() -> Self {
        Self::new(Code::Success)
    }

    /// An error response whose message defaults to the code's description.
    pub fn error(code: Code, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            message: if message.is_empty() {
                code.as_str().to_string()
            } else {
                message
            },
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = request_id;
        self
    }

    /// Mark the response as followed by a payload stream.
    pub fn with_payload(mut self) -> Self {
        self.has_payload = true;
        self
    }

    pub fn with_compress(mut self, compress_type: CompressType) -> Self {
        self.compress_type = compress_type;
        self
    }

    pub fn with_ext(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.ext_kv.insert(key.into(), value);
        self
    }
}

/// Wire header of a payload chunk; `length` raw bytes follow it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadHeader {
    pub index: u32,
    pub rid: u64,
    pub more: bool,
    pub length: u32,
}

/// One chunk of a streamed body, as delivered to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadChunk {
    pub index: u32,
    pub rid: u64,
    pub more: bool,
    pub data: Bytes,
}

impl PayloadChunk {
    pub fn new(rid: u64, index: u32, more: bool, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            rid,
            more,
            data: data.into(),
        }
    }

    /// True for the final chunk of its stream.
    pub fn is_terminal(&self) -> bool {
        !self.more
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Payload(PayloadChunk),
}

/// Login credentials sent as the payload of an [`AUTH_METHOD`] request.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthData {
    pub identity: String,
    /// Opaque credential material; redacted in debug output.
    pub credential: String,
    #[serde(rename = "extKV", default)]
    pub ext_kv: ExtKv,
}

impl AuthData {
    pub fn new(identity: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            credential: credential.into(),
            ext_kv: ExtKv::new(),
        }
    }
}

impl fmt::Debug for AuthData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthData")
            .field("identity", &self.identity)
            .field(
                "credential",
                &format_args!("<redacted:{} bytes>", self.credential.len()),
            )
            .field("ext_kv", &self.ext_kv)
            .finish()
    }
}

/// Liveness probe, sent as the payload of a [`PING_METHOD`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub id: u64,
}

/// Echo of a [`Ping`], sent as the response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub id: u64,
}

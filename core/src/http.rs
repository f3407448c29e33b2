//! Plain-data types crossing the transport boundary.
//!
//! # Design
//! The core builds `PreparedRequest` values and consumes `Transfer` values
//! without touching the network; a `Transport` implementation executes the
//! actual I/O in between. All fields are owned so values can move into
//! transport tasks without lifetime concerns.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::options::TransportOptions;

/// Form fields sent as the body of a POST request.
pub type FormBody = BTreeMap<String, String>;

/// HTTP method for a request. Only GET and POST are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Resolve a caller-supplied method string.
    ///
    /// `GET` and `POST` (any case) are kept, except that a GET carrying a
    /// body becomes a POST. Any other value is replaced by POST when a body
    /// is present and GET otherwise.
    pub fn coerce(requested: &str, has_body: bool) -> Self {
        match requested.trim().to_ascii_uppercase().as_str() {
            "POST" => Method::Post,
            "GET" if !has_body => Method::Get,
            _ if has_body => Method::Post,
            _ => Method::Get,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully merged request, ready for a transport to execute.
///
/// Produced by [`crate::options::prepare`]. The transport applies `headers`
/// verbatim and interprets `options` by key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedRequest {
    pub target: String,
    pub method: Method,
    pub body: Option<FormBody>,
    pub headers: Vec<String>,
    pub options: TransportOptions,
}

/// Classification of a failed transfer.
///
/// Codes are stable and match the libcurl numbering where a counterpart
/// exists, so hosts that already branch on those codes keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Malformed,
    Resolve,
    Connect,
    Tls,
    Timeout,
    TooManyRedirects,
    Receive,
    Other,
}

impl TransportErrorKind {
    pub fn code(self) -> i32 {
        match self {
            TransportErrorKind::Other => 1,
            TransportErrorKind::Malformed => 3,
            TransportErrorKind::Resolve => 6,
            TransportErrorKind::Connect => 7,
            TransportErrorKind::Timeout => 28,
            TransportErrorKind::Tls => 35,
            TransportErrorKind::TooManyRedirects => 47,
            TransportErrorKind::Receive => 56,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            1 => TransportErrorKind::Other,
            3 => TransportErrorKind::Malformed,
            6 => TransportErrorKind::Resolve,
            7 => TransportErrorKind::Connect,
            28 => TransportErrorKind::Timeout,
            35 => TransportErrorKind::Tls,
            47 => TransportErrorKind::TooManyRedirects,
            56 => TransportErrorKind::Receive,
            _ => return None,
        };
        Some(kind)
    }
}

/// Transport-reported metadata for one finished transfer.
///
/// `error_code` is 0 and `error_message` empty when the transfer succeeded.
/// A non-2xx status is still a successful transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMeta {
    pub status: u16,
    pub elapsed: Duration,
    pub error_code: i32,
    pub error_message: String,
    /// Opaque transport fields such as `effective_url` or `size_download`.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TransportMeta {
    pub fn succeeded(status: u16, elapsed: Duration) -> Self {
        Self {
            status,
            elapsed,
            error_code: 0,
            error_message: String::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn failed(kind: TransportErrorKind, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: 0,
            elapsed,
            error_code: kind.code(),
            error_message: message.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }

    pub fn error_kind(&self) -> Option<TransportErrorKind> {
        if self.is_ok() {
            None
        } else {
            Some(
                TransportErrorKind::from_code(self.error_code)
                    .unwrap_or(TransportErrorKind::Other),
            )
        }
    }
}

/// Raw outcome of one transfer, as reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub body: Vec<u8>,
    pub meta: TransportMeta,
}

impl Transfer {
    pub fn failed(kind: TransportErrorKind, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            body: Vec::new(),
            meta: TransportMeta::failed(kind, message, elapsed),
        }
    }
}

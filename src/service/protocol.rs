//! Newline-delimited JSON framing between clients and the daemon.
//!
//! A client writes one object (`{"user": "alice"}`) followed by `\n`, or
//! half-closes its write side. The daemon answers with one object followed
//! by `\n` and closes the connection.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    #[serde(default)]
    pub user: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Completed verification. Confidence is rounded to three decimals.
    pub fn verdict(ok: bool, confidence: f64) -> Self {
        Self {
            ok,
            confidence: Some((confidence * 1000.0).round() / 1000.0),
            error: None,
        }
    }

    pub fn error(code: ErrorCode) -> Self {
        Self {
            ok: false,
            confidence: None,
            error: Some(code.as_str().to_string()),
        }
    }
}

/// Request-level failures reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    EmptyRequest,
    InvalidJson,
    RequestTooLarge,
    MissingUsername,
    InvalidUsername,
    NotEnrolled,
    Busy,
    CameraUnavailable,
    Timeout,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EmptyRequest => "Empty request",
            ErrorCode::InvalidJson => "Invalid JSON",
            ErrorCode::RequestTooLarge => "Request too large",
            ErrorCode::MissingUsername => "No username",
            ErrorCode::InvalidUsername => "Invalid username",
            ErrorCode::NotEnrolled => "Not enrolled",
            ErrorCode::Busy => "Camera busy",
            ErrorCode::CameraUnavailable => "Camera unavailable",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::InternalError => "Internal error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads up to the first `\n` or end of stream.
///
/// Never consumes more than `max_bytes + 1` bytes. A line longer than
/// `max_bytes` is `RequestTooLarge`; a timed-out read is `Timeout`.
pub fn read_frame<R: Read>(reader: &mut R, max_bytes: usize) -> Result<Vec<u8>, ErrorCode> {
    let mut frame = Vec::with_capacity(max_bytes.min(1024));
    let mut chunk = [0u8; 256];

    loop {
        let room = (max_bytes + 1).saturating_sub(frame.len()).min(chunk.len());
        let n = match reader.read(&mut chunk[..room]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                return Err(ErrorCode::Timeout);
            }
            Err(e) => {
                tracing::debug!("Request read failed: {}", e);
                return Err(ErrorCode::InternalError);
            }
        };
        if n == 0 {
            break;
        }

        if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
            frame.extend_from_slice(&chunk[..pos]);
            break;
        }
        frame.extend_from_slice(&chunk[..n]);

        if frame.len() > max_bytes {
            return Err(ErrorCode::RequestTooLarge);
        }
    }

    if frame.len() > max_bytes {
        return Err(ErrorCode::RequestTooLarge);
    }
    Ok(frame)
}

/// Parses a framed request and returns the trimmed username.
pub fn parse_request(frame: &[u8]) -> Result<String, ErrorCode> {
    let text = std::str::from_utf8(frame).map_err(|_| ErrorCode::InvalidJson)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ErrorCode::EmptyRequest);
    }

    let request: Request = serde_json::from_str(text).map_err(|_| ErrorCode::InvalidJson)?;
    let user = request.user.trim();
    if user.is_empty() {
        return Err(ErrorCode::MissingUsername);
    }
    Ok(user.to_string())
}

pub fn encode_request(user: &str) -> serde_json::Result<Vec<u8>> {
    encode_line(&Request { user: user.to_string() })
}

pub fn encode_response(response: &Response) -> serde_json::Result<Vec<u8>> {
    encode_line(response)
}

pub fn decode_response(frame: &[u8]) -> serde_json::Result<Response> {
    serde_json::from_slice(frame)
}

fn encode_line<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-RPC messages and `Content-Length` framing.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::MonitorError;

/// Upper bound on a single frame body.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// A request sent in either direction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RequestMessage {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Parameters, `null` when absent.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

impl RequestMessage {
    /// Builds a 2.0 request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A response to a request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Id of the request being answered.
    pub id: Option<RequestId>,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A message that expects no response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NotificationMessage {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Parameters, `null` when absent.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

impl NotificationMessage {
    /// Builds a 2.0 notification.
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Request id: integer or string.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

/// Error payload of a failed response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Error text.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// Serializes `message` and prefixes the `Content-Length` header.
///
/// # Errors
///
/// Returns [`MonitorError::Protocol`] if the message cannot be serialized.
pub fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>, MonitorError> {
    let body = serde_json::to_string(message)?;
    // String::len is the UTF-8 byte count
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());
    Ok(frame)
}

/// Reads framed message bodies from a byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Reads the next message body.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Protocol`] on a malformed or missing header,
    /// a non UTF-8 body, or a stream that ends before the body is complete.
    pub async fn read_frame(&mut self) -> Result<Option<String>, MonitorError> {
        let Some(length) = self.read_headers().await? else {
            return Ok(None);
        };

        if length > MAX_FRAME_BYTES {
            return Err(MonitorError::Protocol(format!(
                "Content-Length {length} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            MonitorError::Protocol(format!("short read: expected {length} byte body ({e})"))
        })?;

        String::from_utf8(body)
            .map(Some)
            .map_err(|e| MonitorError::Protocol(format!("body is not UTF-8: {e}")))
    }

    /// Consumes header lines through the blank separator and returns the
    /// body length, or `None` on EOF before any header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>, MonitorError> {
        let mut content_length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| MonitorError::Protocol(format!("reading header: {e}")))?;

            if read == 0 {
                if started {
                    return Err(MonitorError::Protocol(
                        "stream ended inside header block".to_string(),
                    ));
                }
                return Ok(None);
            }
            started = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                return Err(MonitorError::Protocol(format!(
                    "malformed header line: {trimmed:?}"
                )));
            };
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    MonitorError::Protocol(format!("invalid Content-Length: {:?}", value.trim()))
                })?;
                content_length = Some(length);
            }
        }

        content_length
            .map(Some)
            .ok_or_else(|| MonitorError::Protocol("missing Content-Length header".to_string()))
    }
}

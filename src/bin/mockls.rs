// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A scriptable stand-in for sourcekit-lsp.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout. CLI flags
//! control which diagnostics are published and how the server misbehaves.
//! No tokio; deferred notifications use `std::thread`.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock language server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
#[allow(
    clippy::struct_excessive_bools,
    reason = "CLI flags are inherently boolean"
)]
struct Args {
    /// Publish one error diagnostic for this file after `initialized` (repeatable).
    #[arg(long = "diagnose")]
    diagnose: Vec<String>,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Exit after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Write a frame with a malformed header after `initialized`.
    #[arg(long)]
    malformed_after_init: bool,

    /// Write a truncated frame and exit after `initialized`.
    #[arg(long)]
    short_body_after_init: bool,

    /// Send a workspace/configuration request after initialize.
    #[arg(long)]
    send_configuration_request: bool,
}

/// A JSON-RPC request or notification.
#[derive(Debug, Deserialize)]
struct Request {
    id: Option<Value>,
    method: Option<String>,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// How the server ends a session.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    /// Input closed.
    Eof,
    /// `exit` received.
    Requested,
    /// A failure mode asked the process to die.
    Crash,
}

struct MockServer {
    args: Args,
    response_count: u64,
    writer: Writer,
    stopped: Arc<AtomicBool>,
    next_request_id: Arc<AtomicU64>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            response_count: 0,
            writer,
            stopped: Arc::new(AtomicBool::new(false)),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Serves until EOF, `exit`, or a scripted crash.
    fn run(&mut self, reader: &mut dyn Read) -> Exit {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => return Exit::Eof,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(request) = serde_json::from_str::<Request>(&message) else {
                    continue;
                };
                if let Some(exit) = self.handle_message(request) {
                    self.stopped.store(true, Ordering::SeqCst);
                    return exit;
                }
            }
        }
    }

    fn handle_message(&mut self, request: Request) -> Option<Exit> {
        let method = request.method?;
        match request.id {
            Some(id) => self.handle_request(&method, id),
            None => self.handle_notification(&method),
        }
    }

    fn handle_request(&mut self, method: &str, id: Value) -> Option<Exit> {
        if self.args.hang_on.iter().any(|m| m == method) {
            return None;
        }

        let (result, error) = if self.args.fail_on.iter().any(|m| m == method) {
            (
                None,
                Some(RpcError {
                    code: -32603,
                    message: format!("mockls: configured to fail on {method}"),
                }),
            )
        } else {
            match method {
                "initialize" => (Some(initialize_result()), None),
                "shutdown" => (Some(Value::Null), None),
                _ => (
                    None,
                    Some(RpcError {
                        code: -32601,
                        message: format!("mockls: method not found: {method}"),
                    }),
                ),
            }
        };

        let exit = self.send_response(&Response {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error,
        });
        if exit.is_some() {
            return exit;
        }

        if method == "initialize" && self.args.send_configuration_request {
            self.send_configuration_request();
        }
        None
    }

    fn handle_notification(&self, method: &str) -> Option<Exit> {
        match method {
            "initialized" => {
                if self.args.malformed_after_init {
                    write_raw(&self.writer, b"this is not a header\r\n\r\n{}");
                    return None;
                }
                if self.args.short_body_after_init {
                    write_raw(&self.writer, b"Content-Length: 100\r\n\r\n{\"jsonrpc\":");
                    return Some(Exit::Crash);
                }
                self.publish_diagnostics();
                None
            }
            "exit" => Some(Exit::Requested),
            _ => None,
        }
    }

    fn publish_diagnostics(&self) {
        let files = self.args.diagnose.clone();
        if files.is_empty() {
            return;
        }
        let writer = self.writer.clone();
        let delay = self.args.diagnostics_delay;
        let stopped = self.stopped.clone();

        let publish = move || {
            for file in &files {
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                send_diagnostics_notification(&writer, &file_uri(file));
            }
        };

        if delay > 0 {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                publish();
            });
        } else {
            publish();
        }
    }

    fn send_configuration_request(&self) {
        let req_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        send_message(
            &self.writer,
            &serde_json::json!({
                "jsonrpc": "2.0",
                "id": format!("mockls-{req_id}"),
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "sourcekit-lsp" }] }
            }),
        );
    }

    fn send_response(&mut self, response: &Response) -> Option<Exit> {
        let json = serde_json::to_string(response).ok()?;
        write_framed(&self.writer, &json);
        self.response_count += 1;

        match self.args.drop_after {
            Some(max) if self.response_count >= max => Some(Exit::Crash),
            _ => None,
        }
    }
}

fn initialize_result() -> Value {
    serde_json::json!({
        "capabilities": {
            "textDocumentSync": { "openClose": true, "change": 1 },
            "diagnosticProvider": {
                "interFileDependencies": true,
                "workspaceDiagnostics": false
            }
        },
        "serverInfo": { "name": "mockls" }
    })
}

/// Accepts either a `file://` URI or a plain absolute path.
fn file_uri(file: &str) -> String {
    if file.starts_with("file://") {
        file.to_string()
    } else {
        format!("file://{file}")
    }
}

fn write_raw(writer: &Writer, bytes: &[u8]) {
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(bytes);
    let _ = w.flush();
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let mut frame = format!("Content-Length: {}\r\n\r\n", json.len()).into_bytes();
    frame.extend_from_slice(json.as_bytes());
    write_raw(writer, &frame);
}

fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Send a `publishDiagnostics` notification with one error on line 3.
fn send_diagnostics_notification(writer: &Writer, uri: &str) {
    send_message(
        writer,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": uri,
                "diagnostics": [{
                    "range": {
                        "start": { "line": 2, "character": 4 },
                        "end": { "line": 2, "character": 9 }
                    },
                    "severity": 1,
                    "source": "mockls",
                    "message": "mockls: mock diagnostic"
                }]
            }
        }),
    );
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let content_length: usize = headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse().ok())?
    })?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

fn main() {
    let args = Args::parse();
    let mut server = MockServer::new(args, stdout_writer());
    let mut stdin = std::io::stdin().lock();
    let code = match server.run(&mut stdin) {
        Exit::Eof | Exit::Requested => 0,
        Exit::Crash => 1,
    };
    std::process::exit(code);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("mockls").chain(extra.iter().copied()))
    }

    fn frame(body: &Value) -> Vec<u8> {
        let body = body.to_string();
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server(args: Args, input: &[u8]) -> (Exit, Vec<u8>) {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let exit = server.run(&mut Cursor::new(input.to_vec()));
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        (exit, data)
    }

    fn handshake() -> Vec<u8> {
        let mut input = frame(&serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": { "processId": null, "capabilities": {} }
        }));
        input.extend(frame(&serde_json::json!({
            "jsonrpc": "2.0", "method": "initialized", "params": {}
        })));
        input
    }

    #[test]
    fn test_initialize_and_publish() {
        let (exit, data) = run_server(args(&["--diagnose", "/src/App/main.swift"]), &handshake());
        assert_eq!(exit, Exit::Eof);

        let messages = extract_messages(&data);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["id"], 1);
        assert!(messages[0]["result"]["capabilities"].is_object());
        assert_eq!(messages[1]["method"], "textDocument/publishDiagnostics");
        assert_eq!(messages[1]["params"]["uri"], "file:///src/App/main.swift");
        assert_eq!(messages[1]["params"]["diagnostics"][0]["severity"], 1);
    }

    #[test]
    fn test_shutdown_then_exit() {
        let mut input = handshake();
        input.extend(frame(&serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "shutdown"})));
        input.extend(frame(&serde_json::json!({"jsonrpc": "2.0", "method": "exit"})));

        let (exit, data) = run_server(args(&[]), &input);
        assert_eq!(exit, Exit::Requested);
        let messages = extract_messages(&data);
        assert_eq!(messages.last().unwrap()["id"], 2);
        assert!(messages.last().unwrap()["result"].is_null());
    }

    #[test]
    fn test_fail_and_hang() {
        let mut input = frame(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "shutdown"}));
        input.extend(frame(&serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "initialize"})));

        let (_, data) = run_server(args(&["--fail-on", "shutdown", "--hang-on", "initialize"]), &input);
        let messages = extract_messages(&data);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["error"]["code"], -32603);
    }

    #[test]
    fn test_drop_after_crashes() {
        let (exit, _) = run_server(args(&["--drop-after", "1"]), &handshake());
        assert_eq!(exit, Exit::Crash);
    }

    #[test]
    fn test_short_body_after_init() {
        let (exit, data) = run_server(args(&["--short-body-after-init"]), &handshake());
        assert_eq!(exit, Exit::Crash);
        assert!(data.ends_with(b"{\"jsonrpc\":"));
    }

    #[test]
    fn test_content_length_framing() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let mut input = frame(&body);
        // Trailing partial frame is ignored
        input.extend(b"Content-Length: 40\r\n\r\n{");
        let (_, data) = run_server(args(&[]), &input);
        assert_eq!(extract_messages(&data).len(), 1);
    }
}

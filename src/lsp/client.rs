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

use lsp_types::{
    ClientCapabilities, Diagnostic, DiagnosticClientCapabilities, InitializeParams,
    InitializeResult, InitializedParams, PublishDiagnosticsClientCapabilities,
    PublishDiagnosticsParams, TextDocumentClientCapabilities, Uri, WorkspaceFolder,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::protocol::{
    self, FrameReader, NotificationMessage, RequestId, RequestMessage, ResponseMessage,
};
use crate::error::MonitorError;

/// Cached diagnostics for a file.
pub type DiagnosticsCache = Arc<Mutex<HashMap<Uri, Vec<Diagnostic>>>>;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>;
type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// How long `shutdown` waits for the process to exit on its own.
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Manages communication with a language server process.
///
/// Requests carry no timeout. Once the connection breaks (malformed frame,
/// short read, closed stream) the client is dead for good; every further
/// request fails and the owner must construct a new client.
pub struct LspClient {
    next_id: AtomicI64,
    writer: SharedWriter,
    pending: PendingMap,
    diagnostics: DiagnosticsCache,
    alive: Arc<AtomicBool>,
    reader_handle: JoinHandle<()>,
    child: Option<Child>,
}

impl LspClient {
    /// Spawns the server process and starts the response reader task.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ToolUnavailable`] if `program` does not exist
    /// and [`MonitorError::Io`] for any other launch failure.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, MonitorError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MonitorError::ToolUnavailable(program.to_string())
                } else {
                    MonitorError::Io(e)
                }
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MonitorError::Protocol("server stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MonitorError::Protocol("server stdout not captured".to_string()))?;

        debug!("Spawned language server {} (pid {:?})", program, child.id());
        Ok(Self::from_streams(stdout, stdin, Some(child)))
    }

    /// Builds a client over an existing pair of streams.
    pub fn from_streams<R, W>(reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics: DiagnosticsCache = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(Self::reader_task(
            FrameReader::new(reader),
            writer.clone(),
            pending.clone(),
            diagnostics.clone(),
            alive.clone(),
        ));

        Self {
            next_id: AtomicI64::new(1),
            writer,
            pending,
            diagnostics,
            alive,
            reader_handle,
            child,
        }
    }

    /// Background task that reads frames and routes them.
    async fn reader_task<R: AsyncRead + Unpin>(
        mut reader: FrameReader<R>,
        writer: SharedWriter,
        pending: PendingMap,
        diagnostics: DiagnosticsCache,
        alive: Arc<AtomicBool>,
    ) {
        loop {
            let body = match reader.read_frame().await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("Language server stdout closed");
                    break;
                }
                Err(e) => {
                    error!("Language server protocol error: {}", e);
                    break;
                }
            };
            trace!("Received LSP message: {}", body);

            let value: serde_json::Value = match serde_json::from_str(&body) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Failed to parse JSON: {}", e);
                    continue;
                }
            };

            if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
                if let Some(id) = value.get("id") {
                    // Server request (e.g. workspace/configuration): refuse it so the
                    // server does not wait on us
                    debug!("Received server request: {} (id: {})", method, id);
                    let response = ResponseMessage {
                        jsonrpc: "2.0".to_string(),
                        id: serde_json::from_value(id.clone()).ok(),
                        result: None,
                        error: Some(protocol::ResponseError {
                            code: protocol::METHOD_NOT_FOUND,
                            message: format!("Method '{method}' not supported by client"),
                            data: None,
                        }),
                    };
                    if let Err(e) = write_message(&writer, &response).await {
                        warn!("Failed to answer server request: {}", e);
                    }
                } else if let Ok(notification) = serde_json::from_value::<NotificationMessage>(value)
                {
                    Self::handle_notification(&notification, &diagnostics).await;
                }
            } else if value.get("id").is_some() {
                if let Ok(response) = serde_json::from_value::<ResponseMessage>(value)
                    && let Some(id) = &response.id
                {
                    if let Some(sender) = pending.lock().await.remove(id) {
                        let _ = sender.send(response);
                    } else {
                        warn!("Received response for unknown request id: {:?}", id);
                    }
                }
            } else {
                warn!("Unknown message format: {}", body);
            }
        }

        alive.store(false, Ordering::SeqCst);
        // Dropping the senders fails every in-flight request
        pending.lock().await.clear();
        warn!("Language server connection lost");
    }

    async fn handle_notification(notification: &NotificationMessage, diagnostics: &DiagnosticsCache) {
        match notification.method.as_str() {
            "textDocument/publishDiagnostics" => {
                match serde_json::from_value::<PublishDiagnosticsParams>(
                    notification.params.clone(),
                ) {
                    Ok(params) => {
                        debug!(
                            "Received {} diagnostics for {}",
                            params.diagnostics.len(),
                            params.uri.as_str()
                        );
                        diagnostics.lock().await.insert(params.uri, params.diagnostics);
                    }
                    Err(e) => warn!("Failed to parse publishDiagnostics params: {}", e),
                }
            }
            "window/logMessage" | "window/showMessage" => {
                if let Some(message) = notification.params.get("message").and_then(|m| m.as_str()) {
                    debug!("Language server message: {}", message);
                }
            }
            _ => trace!("Ignoring notification: {}", notification.method),
        }
    }

    /// Sends a request and waits for its response.
    async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<R, MonitorError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if !self.is_alive() {
                return Err(MonitorError::Protocol("client is dead".to_string()));
            }
            pending.insert(id.clone(), tx);
        }

        let request = RequestMessage::new(id.clone(), method, params);
        if let Err(e) = write_message(&self.writer, &request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = rx.await.map_err(|_| {
            MonitorError::Protocol(format!("connection lost while waiting for '{method}'"))
        })?;

        if let Some(error) = response.error {
            return Err(MonitorError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a notification.
    async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), MonitorError> {
        if !self.is_alive() {
            return Err(MonitorError::Protocol("client is dead".to_string()));
        }
        let notification = NotificationMessage::new(method, serde_json::to_value(params)?);
        write_message(&self.writer, &notification).await
    }

    /// Performs the initialize handshake for `root`.
    ///
    /// `initialized` is only sent once the server has answered.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be expressed as a URI, the server
    /// rejects the request, or the connection breaks.
    #[allow(deprecated, reason = "some servers still only read rootUri")]
    pub async fn initialize(&self, root: &Path) -> Result<InitializeResult, MonitorError> {
        let url = url::Url::from_directory_path(root).map_err(|()| {
            MonitorError::Configuration(format!("root is not absolute: {}", root.display()))
        })?;
        let root_uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| MonitorError::Configuration(format!("invalid root URI {url}: {e:?}")))?;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            capabilities: ClientCapabilities {
                text_document: Some(TextDocumentClientCapabilities {
                    diagnostic: Some(DiagnosticClientCapabilities {
                        dynamic_registration: Some(true),
                        ..Default::default()
                    }),
                    publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                        related_information: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: root
                    .file_name()
                    .map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().into_owned()),
            }]),
            ..Default::default()
        };

        let result: InitializeResult = self.request("initialize", serde_json::to_value(params)?).await?;
        self.notify("initialized", InitializedParams {}).await?;
        Ok(result)
    }

    /// Sends `shutdown` and `exit`, then terminates the process.
    ///
    /// Protocol steps are skipped once the connection is gone, and each is
    /// bounded by the exit grace period so an unresponsive server is killed
    /// rather than waited on.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process cannot be reaped.
    pub async fn shutdown(&mut self) -> Result<(), MonitorError> {
        if self.is_alive() {
            // Reply varies by server (null, true, ...) so the result is ignored
            let reply = tokio::time::timeout(
                EXIT_GRACE,
                self.request::<serde_json::Value>("shutdown", serde_json::Value::Null),
            )
            .await;
            match reply {
                Ok(Ok(_)) => {
                    match tokio::time::timeout(
                        EXIT_GRACE,
                        self.notify("exit", serde_json::Value::Null),
                    )
                    .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("exit notification failed: {}", e),
                        Err(_) => debug!("exit notification timed out"),
                    }
                }
                Ok(Err(e)) => debug!("shutdown request failed: {}", e),
                Err(_) => warn!("Language server ignored shutdown for {:?}", EXIT_GRACE),
            }
        }

        if let Some(child) = self.child.as_mut() {
            if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
                debug!("Language server did not exit, killing it");
                child.kill().await?;
            }
        }
        self.alive.store(false, Ordering::SeqCst);
        self.reader_handle.abort();
        Ok(())
    }

    /// Every cached `publishDiagnostics` payload, ordered by URI.
    pub async fn diagnostics_snapshot(&self) -> Vec<(Uri, Vec<Diagnostic>)> {
        let cache = self.diagnostics.lock().await;
        let mut entries: Vec<(Uri, Vec<Diagnostic>)> =
            cache.iter().map(|(u, d)| (u.clone(), d.clone())).collect();
        drop(cache);
        entries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        entries
    }

    /// Returns true while the connection is usable.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// OS process id of the server, if it was spawned by this client.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Frames and writes one message.
async fn write_message<T: Serialize>(writer: &SharedWriter, message: &T) -> Result<(), MonitorError> {
    let frame = protocol::encode_message(message)?;
    trace!("Sending LSP frame of {} bytes", frame.len());

    let mut writer = writer.lock().await;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

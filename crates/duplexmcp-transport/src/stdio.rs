//! Standard I/O transport.
//!
//! Framing is one JSON value per line; multiple concatenated objects
//! separated by newlines are tolerated by the codec upstream. The client
//! side can run over the current process's stdio or spawn a child server,
//! in which case the child receives a sanitized environment: only a
//! whitelist of variables is forwarded and values starting with `"()"` are
//! dropped (function-definition leak guard).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, warn};

use duplexmcp_protocol::codec;
use duplexmcp_protocol::jsonrpc::JsonRpcMessage;
use duplexmcp_protocol::service::McpService;
use duplexmcp_protocol::version::SUPPORTED_PROTOCOL_VERSIONS;

use crate::core::{Transport, TransportError, TransportEvent, TransportKind, TransportResult};

/// Environment variables forwarded to spawned servers on Unix.
const UNIX_ENV_WHITELIST: &[&str] = &["HOME", "PATH", "SHELL", "TERM", "USER", "LOGNAME"];

/// Environment variables forwarded to spawned servers on Windows.
const WINDOWS_ENV_WHITELIST: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// The environment passed to spawned server processes.
///
/// Only whitelisted variables are forwarded; values starting with `"()"`
/// (exported shell functions) are dropped.
pub fn sanitized_environment() -> HashMap<String, String> {
    let whitelist = if cfg!(windows) {
        WINDOWS_ENV_WHITELIST
    } else {
        UNIX_ENV_WHITELIST
    };
    whitelist
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| ((*name).to_string(), v)))
        .filter(|(_, value)| !value.starts_with("()"))
        .collect()
}

type BoxedWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LinesCodec>;

enum StreamSource {
    /// The current process's stdin/stdout
    ProcessStdio,
    /// A server child process to spawn at start
    Spawn {
        program: String,
        args: Vec<String>,
    },
}

/// Client-side stdio transport.
pub struct StdioTransport {
    source: StreamSource,
    writer: Arc<TokioMutex<Option<BoxedWriter>>>,
    inbound: Arc<TokioMutex<Option<mpsc::Receiver<TransportEvent>>>>,
    child: Option<Child>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("spawned", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Transport over the current process's stdin/stdout.
    pub fn new() -> Self {
        Self {
            source: StreamSource::ProcessStdio,
            writer: Arc::new(TokioMutex::new(None)),
            inbound: Arc::new(TokioMutex::new(None)),
            child: None,
            reader_task: None,
        }
    }

    /// Transport that spawns `program` with `args` at [`Transport::start`]
    /// and speaks over its stdio.
    pub fn spawn<S: Into<String>, I: IntoIterator<Item = S>>(program: impl Into<String>, args: I) -> Self {
        Self {
            source: StreamSource::Spawn {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            writer: Arc::new(TokioMutex::new(None)),
            inbound: Arc::new(TokioMutex::new(None)),
            child: None,
            reader_task: None,
        }
    }

    async fn wire<R, W>(&mut self, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed_writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        *self.writer.lock().await = Some(FramedWrite::new(boxed_writer, LinesCodec::new()));

        let (tx, rx) = mpsc::channel(64);
        *self.inbound.lock().await = Some(rx);

        let mut lines = FramedRead::new(BufReader::new(reader), LinesCodec::new());
        self.reader_task = Some(tokio::spawn(async move {
            while let Some(next) = lines.next().await {
                match next {
                    Ok(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if tx.send(TransportEvent::Frame(line)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "stdio read error");
                        break;
                    }
                }
            }
            let _ = tx
                .send(TransportEvent::Closed {
                    code: None,
                    reason: None,
                })
                .await;
        }));
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn supported_protocol_versions(&self) -> &'static [&'static str] {
        SUPPORTED_PROTOCOL_VERSIONS
    }

    async fn start(&mut self) -> TransportResult<()> {
        match &self.source {
            StreamSource::ProcessStdio => {
                let stdin = tokio::io::stdin();
                let stdout = tokio::io::stdout();
                self.wire(stdin, stdout).await;
            }
            StreamSource::Spawn { program, args } => {
                let mut child = Command::new(program)
                    .args(args)
                    .env_clear()
                    .envs(sanitized_environment())
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
                let child_stdout = child.stdout.take().ok_or_else(|| {
                    TransportError::ConnectionFailed("child stdout not piped".into())
                })?;
                let child_stdin = child.stdin.take().ok_or_else(|| {
                    TransportError::ConnectionFailed("child stdin not piped".into())
                })?;
                self.wire(child_stdout, child_stdin).await;
                self.child = Some(child);
            }
        }
        Ok(())
    }

    async fn send(&self, frame: String) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        writer
            .send(frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> TransportResult<Option<TransportEvent>> {
        let mut inbound = self.inbound.lock().await;
        let Some(rx) = inbound.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        Ok(rx.recv().await)
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        *self.writer.lock().await = None;
        *self.inbound.lock().await = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}

/// Server loop over the current process's stdio.
///
/// One stdio pipe is one session: it is resolved at startup and terminated
/// when stdin closes.
pub struct StdioServer {
    service: Arc<dyn McpService>,
}

impl StdioServer {
    /// Bind the server loop to a protocol engine.
    pub fn new(service: Arc<dyn McpService>) -> Self {
        Self { service }
    }

    /// Run until stdin closes.
    pub async fn run(self) -> TransportResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run_on(stdin, stdout).await
    }

    /// Run over arbitrary streams (used by tests).
    pub async fn run_on<R, W>(self, reader: R, writer: W) -> TransportResult<()>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let session_id = self
            .service
            .resolve_session(None, SUPPORTED_PROTOCOL_VERSIONS)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(%session_id, "stdio session open");

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        self.service.attach_outbound(&session_id, outbound_tx);

        let mut lines = FramedRead::new(reader, LinesCodec::new());
        let mut out = FramedWrite::new(writer, LinesCodec::new());

        loop {
            tokio::select! {
                line = lines.next() => {
                    let Some(line) = line else { break };
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            error!(error = %e, "stdio read error");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    for reply in dispatch_raw_frame(self.service.as_ref(), &session_id, &line).await {
                        match codec::encode(&reply) {
                            Ok(frame) => write_frame(&mut out, &frame).await?,
                            Err(e) => warn!(error = %e, "failed to encode reply"),
                        }
                    }
                }
                message = outbound_rx.recv() => {
                    let Some(message) = message else { break };
                    match codec::encode(&message) {
                        Ok(frame) => write_frame(&mut out, &frame).await?,
                        Err(e) => warn!(error = %e, "failed to encode outbound frame"),
                    }
                }
            }
        }

        self.service.detach_outbound(&session_id);
        self.service.terminate_session(&session_id).await;
        debug!(%session_id, "stdio session closed");
        Ok(())
    }
}

async fn write_frame<W>(out: &mut FramedWrite<W, LinesCodec>, frame: &str) -> TransportResult<()>
where
    W: AsyncWrite + Send + Unpin,
{
    out.send(frame.to_string())
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Decode a raw frame and dispatch every message in it, collecting replies.
///
/// Undecodable frames produce a `parse_error` reply when an id can be
/// recovered from the raw JSON; otherwise they are logged and dropped.
pub(crate) async fn dispatch_raw_frame(
    service: &dyn McpService,
    session_id: &str,
    raw: &str,
) -> Vec<JsonRpcMessage> {
    let messages = match codec::decode_str(raw) {
        Ok(messages) => messages,
        Err(e) => {
            return match recovered_error_message(raw, &e) {
                Some(reply) => vec![reply],
                None => {
                    debug!(error = %e, "dropping undecodable frame without recoverable id");
                    Vec::new()
                }
            };
        }
    };

    let mut replies = Vec::new();
    for message in messages {
        if let Some(reply) = service.handle_message(session_id, message).await {
            replies.push(reply);
        }
    }
    replies
}

/// Build an error reply for an undecodable frame when its id is recoverable.
pub(crate) fn recovered_error_message(
    raw: &str,
    error: &duplexmcp_protocol::Error,
) -> Option<JsonRpcMessage> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let id: duplexmcp_protocol::RequestId = serde_json::from_value(value.get("id")?.clone()).ok()?;
    Some(JsonRpcMessage::Response(
        duplexmcp_protocol::JsonRpcResponse::error(error.to_json_rpc(), id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_is_whitelisted() {
        let env = sanitized_environment();
        for key in env.keys() {
            assert!(
                UNIX_ENV_WHITELIST.contains(&key.as_str())
                    || WINDOWS_ENV_WHITELIST.contains(&key.as_str()),
                "{key} is not whitelisted"
            );
        }
    }

    #[test]
    fn function_definitions_are_dropped() {
        // The filter itself, exercised directly.
        let filtered: HashMap<String, String> = [
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("SHELL".to_string(), "() {{ :; }}; echo owned".to_string()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.starts_with("()"))
        .collect();
        assert!(filtered.contains_key("PATH"));
        assert!(!filtered.contains_key("SHELL"));
    }

    #[test]
    fn stdio_supports_all_protocol_versions() {
        let t = StdioTransport::new();
        assert_eq!(t.supported_protocol_versions(), SUPPORTED_PROTOCOL_VERSIONS);
    }

    #[test]
    fn error_reply_recovers_id() {
        // Valid JSON, but not a classifiable JSON-RPC message.
        let raw = r#"{"id": 7, "bogus": true}"#;
        let err = duplexmcp_protocol::Error::Parse("unclassifiable".into());
        let JsonRpcMessage::Response(reply) = recovered_error_message(raw, &err).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(reply.id, Some(duplexmcp_protocol::RequestId::Number(7)));
        assert_eq!(reply.error_object().unwrap().code, -32700);

        // Unparseable JSON yields nothing.
        assert!(recovered_error_message("{broken", &err).is_none());
    }
}

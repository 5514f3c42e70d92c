use crate::McpError;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Calls waiting for their response. Once the stream is gone no call can be registered.
#[derive(Debug, Default)]
struct PendingCalls {
    closed: bool,
    calls: HashMap<u64, oneshot::Sender<JsonRpcMessage>>,
}

type Pending = Arc<Mutex<PendingCalls>>;

fn lock(pending: &Pending) -> MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn register(pending: &Pending, id: u64) -> Result<oneshot::Receiver<JsonRpcMessage>, McpError> {
    let mut pending = lock(pending);
    if pending.closed {
        return Err(McpError::Closed);
    }
    let (tx, rx) = oneshot::channel();
    pending.calls.insert(id, tx);
    Ok(rx)
}

/// A tool as listed by the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: InputSchema,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputSchema {
    #[serde(rename = "type", default = "object_type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

fn object_type() -> String {
    "object".to_string()
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            kind: object_type(),
            properties: Map::new(),
            required: vec![],
        }
    }
}

/// Routes events from the server's stream: the first `endpoint` event and responses to pending calls.
#[derive(Debug)]
struct Inbox {
    pending: Pending,
    endpoint: Option<oneshot::Sender<Result<String, McpError>>>,
}

impl Inbox {
    fn handle(&mut self, event: &str, data: String) {
        match event {
            "endpoint" => {
                if let Some(tx) = self.endpoint.take() {
                    let _ = tx.send(Ok(data));
                }
            }
            "message" => {
                let message = match serde_json::from_str::<JsonRpcMessage>(&data) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Unparsed message from server: {e}: {data}");
                        return;
                    }
                };
                let Some(id) = message.response_id() else {
                    debug!(method = ?message.method, "Ignoring server-initiated message");
                    return;
                };
                match lock(&self.pending).calls.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => warn!(id, "Response for unknown request"),
                }
            }
            other => debug!("Ignoring `{other}` event"),
        }
    }

    /// Fails the connection attempt if it is still waiting, and every call still pending.
    fn close(&mut self, error: McpError) {
        if let Some(tx) = self.endpoint.take() {
            let _ = tx.send(Err(error));
        }
        let mut pending = lock(&self.pending);
        pending.closed = true;
        // Dropping the senders wakes each waiting call with `Closed`
        pending.calls.clear();
    }
}

fn stream_error(err: reqwest_eventsource::Error) -> McpError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => McpError::Status(status.as_u16()),
        reqwest_eventsource::Error::Transport(err) => McpError::Http(err),
        reqwest_eventsource::Error::StreamEnded => McpError::Closed,
        other => McpError::Stream(other.to_string()),
    }
}

#[derive(Debug)]
pub struct McpClient {
    http: reqwest::Client,
    endpoint: Url,
    next_id: AtomicU64,
    pending: Pending,
    reader: JoinHandle<()>,
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl McpClient {
    /// Opens the event stream at `url`, waits for the message endpoint and runs the initialize handshake.
    pub async fn connect(url: &str) -> Result<Self, McpError> {
        let base = Url::parse(url)?;
        let http = reqwest::Client::new();

        let mut source =
            EventSource::new(http.get(base.clone())).map_err(|err| McpError::Stream(err.to_string()))?;

        let pending: Pending = Arc::default();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let mut inbox = Inbox {
            pending: pending.clone(),
            endpoint: Some(endpoint_tx),
        };

        let reader = tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Event::Open)) => debug!("Event stream open"),
                    Some(Ok(Event::Message(message))) => inbox.handle(&message.event, message.data),
                    Some(Err(err)) => {
                        warn!("Event stream failed: {err}");
                        break stream_error(err);
                    }
                    None => break McpError::Closed,
                }
            };
            // No reconnects: a new stream would be a new session on the server
            source.close();
            inbox.close(reason);
        });

        let endpoint = match endpoint_rx.await {
            Ok(Ok(path)) => base.join(&path)?,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                reader.abort();
                return Err(McpError::Closed);
            }
        };
        info!(%endpoint, "Connected to tool server");

        let client = Self {
            http,
            endpoint,
            next_id: AtomicU64::new(1),
            pending,
            reader,
        };
        client.initialize().await?;
        Ok(client)
    }

    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rx = register(&self.pending, id)?;

        debug!(id, method, "Sending request");
        if let Err(err) = self.post(&JsonRpcRequest::call(id, method, params)).await {
            lock(&self.pending).calls.remove(&id);
            return Err(err);
        }

        let response = rx.await.map_err(|_| McpError::Closed)?;
        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or(McpError::MissingResult)
    }

    pub async fn notify(&self, method: &str) -> Result<(), McpError> {
        self.post(&JsonRpcRequest::notification(method)).await
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<(), McpError> {
        let response = self.http.post(self.endpoint.clone()).json(request).send().await?;
        if !response.status().is_success() {
            return Err(McpError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "todo-agent-chat",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self.call("initialize", Some(params)).await?;
        debug!("Initialized: {result}");
        self.notify("notifications/initialized").await
    }

    /// The server's whole tool catalog, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        let mut tools = vec![];
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|cursor| json!({ "cursor": cursor }));
            let result = self.call("tools/list", params).await?;
            let page: ToolPage = serde_json::from_value(result).map_err(|source| McpError::Decode {
                what: "tool list",
                source,
            })?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!(count = tools.len(), "Listed remote tools");
        Ok(tools)
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ToolPage {
    #[serde(default)]
    tools: Vec<RemoteTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

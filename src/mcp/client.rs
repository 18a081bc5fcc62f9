//! MCP client.
//!
//! Keeps one WebSocket per configured server, merges their catalogs and
//! routes each invocation to the server that owns the tool. Replies are
//! matched to callers by correlation id, so invocations may complete in any
//! order. Lost connections are re-established in the background with
//! exponential backoff while the other servers keep working.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::catalog::{Catalog, CatalogEntry};
use super::error::McpError;
use super::pending::PendingRequests;
use super::protocol::{Arguments, Message, MessageBody, Parameters, ServerInfo, ToolResult};
use super::server::TOOL_UPDATE_EVENT;
use crate::core::{retry_async_if, RetryConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URLs (`ws://` or `wss://`)
    pub servers: Vec<String>,
    /// Deadline for one request, including any wait for a reconnect
    pub request_timeout: Duration,
    /// Transport-level retry of invocations
    pub invoke_retry: RetryConfig,
    /// Whether a timed-out invocation is retried as well
    pub retry_on_timeout: bool,
    /// Backoff for re-establishing a lost connection
    pub reconnect: RetryConfig,
    /// Keepalive ping interval
    pub ping_interval: Option<Duration>,
    /// Identifier sent with subscriptions
    pub client_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            request_timeout: Duration::from_secs(60),
            invoke_retry: RetryConfig::invocation(),
            retry_on_timeout: false,
            reconnect: RetryConfig::reconnect(),
            ping_interval: Some(Duration::from_secs(30)),
            client_id: new_client_id(),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given servers with default policies.
    pub fn with_servers<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { servers: servers.into_iter().map(Into::into).collect(), ..Self::default() }
    }
}

/// Connection state of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Connected and catalog discovered
    Connected,
    /// Connection lost, re-establishing
    Reconnecting,
    /// Gave up; the server is out of rotation
    Failed,
}

/// Health report of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Reported status
    pub status: String,
    /// Clients connected to the server
    pub connected_clients: usize,
    /// Tools registered on the server
    pub registered_tools: usize,
}

struct Link {
    rank: usize,
    state: watch::Sender<ConnectionState>,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    generation: u64,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    reconnector: Option<JoinHandle<()>>,
}

impl Link {
    fn new(rank: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { rank, state, outbound: None, generation: 0, reader: None, writer: None, reconnector: None }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

struct ClientInner {
    config: ClientConfig,
    links: Mutex<HashMap<String, Link>>,
    catalog: Mutex<Catalog>,
    pending: Mutex<PendingRequests>,
    next_rank: AtomicUsize,
}

/// Multi-server MCP client. Cheap to clone; clones share connections.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

impl McpClient {
    /// Create a client. No connection is made until [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                links: Mutex::new(HashMap::new()),
                catalog: Mutex::new(Catalog::new()),
                pending: Mutex::new(PendingRequests::new()),
                next_rank: AtomicUsize::new(0),
            }),
        }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Get the identifier sent with subscriptions.
    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    /// Connect to the servers listed in the configuration.
    pub async fn connect_configured(&self) -> Result<usize, McpError> {
        let servers = self.inner.config.servers.clone();
        self.connect(&servers).await
    }

    /// Connect to every URL and discover its tools.
    ///
    /// Each URL is tried independently; failures are logged. Succeeds with
    /// the number of live servers if at least one connection is up.
    pub async fn connect(&self, urls: &[String]) -> Result<usize, McpError> {
        if urls.is_empty() {
            tracing::warn!("No MCP server URLs provided");
            return Err(McpError::NoServersAvailable);
        }

        // Ranks follow the order given here, not completion order
        let ranked: Vec<(String, usize)> = urls.iter().map(|url| (url.clone(), self.rank_for(url))).collect();

        let attempts = ranked.into_iter().map(|(url, rank)| {
            let client = self.clone();
            async move {
                let result = client.connect_server(&url, rank).await;
                (url, result)
            }
        });

        let mut connected = 0;
        for (url, result) in join_all(attempts).await {
            match result {
                Ok(tools) => {
                    connected += 1;
                    tracing::info!(server = %url, tools, "Connected to MCP server");
                }
                Err(e) => tracing::error!(server = %url, error = %e, "Failed to connect to MCP server"),
            }
        }

        if connected == 0 {
            return Err(McpError::NoServersAvailable);
        }
        Ok(self.connected_count())
    }

    /// Close every connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let links: Vec<(String, Link)> = self.inner.links.lock().drain().collect();
        let mut writers = Vec::new();

        for (url, mut link) in links {
            link.state.send_replace(ConnectionState::Disconnected);
            if let Some(handle) = link.reconnector.take() {
                handle.abort();
            }
            if let Some(handle) = link.reader.take() {
                handle.abort();
            }
            if let Some(tx) = link.outbound.take() {
                let _ = tx.send(WsMessage::Close(None));
            }
            if let Some(handle) = link.writer.take() {
                writers.push(handle);
            }
            tracing::info!(server = %url, "Disconnected from MCP server");
        }

        self.inner.catalog.lock().clear();
        self.inner.pending.lock().clear();

        // Give writers a moment to flush their close frames
        for writer in writers {
            let abort = writer.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
                abort.abort();
            }
        }
    }

    /// Get every visible tool with its owning server.
    pub fn list_tools(&self) -> Vec<CatalogEntry> {
        self.inner.catalog.lock().entries()
    }

    /// Look up a tool.
    pub fn get_tool(&self, tool_id: &str) -> Option<CatalogEntry> {
        self.inner.catalog.lock().resolve(tool_id)
    }

    /// Get the description a server sent with its catalog.
    pub fn server_info(&self, url: &str) -> Option<ServerInfo> {
        self.inner.catalog.lock().server_info(url).cloned()
    }

    /// Get tools in the format used by LLM tool-selection prompts.
    pub fn prompt_tools(&self) -> Vec<Value> {
        self.list_tools()
            .into_iter()
            .map(|entry| {
                let mut tool = entry.tool.to_prompt_tool();
                if let Some(object) = tool.as_object_mut() {
                    object.insert("id".to_string(), Value::String(entry.tool.id.clone()));
                    object.insert("server".to_string(), Value::String(entry.server));
                }
                tool
            })
            .collect()
    }

    /// Get the state of a server, if it was ever connected.
    pub fn server_state(&self, url: &str) -> Option<ConnectionState> {
        self.inner.links.lock().get(url).map(Link::state)
    }

    /// Get the number of servers currently connected.
    pub fn connected_count(&self) -> usize {
        self.inner.links.lock().values().filter(|l| l.state() == ConnectionState::Connected).count()
    }

    /// Get the number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Re-request the catalog of every connected server.
    pub async fn refresh_tools(&self) -> Result<usize, McpError> {
        let connected: Vec<String> = self
            .inner
            .links
            .lock()
            .iter()
            .filter(|(_, link)| link.state() == ConnectionState::Connected)
            .map(|(url, _)| url.clone())
            .collect();

        let mut total = 0;
        for url in connected {
            let outbound = self.outbound_for(&url)?;
            let deadline = Instant::now() + self.inner.config.request_timeout;
            total += self.discover(&url, &outbound, deadline).await?;
        }
        Ok(total)
    }

    /// Ask a connected server for its health.
    pub async fn health(&self, url: &str) -> Result<HealthReport, McpError> {
        let outbound = self.outbound_for(url)?;
        let deadline = Instant::now() + self.inner.config.request_timeout;
        let reply = self.round_trip(url, &outbound, Message::request(new_request_id(), MessageBody::Health {}), deadline).await?;

        match reply.body {
            MessageBody::HealthResponse { status, connected_clients, registered_tools } => {
                Ok(HealthReport { status, connected_clients, registered_tools })
            }
            MessageBody::Error { error } => Err(McpError::Remote(error)),
            other => Err(McpError::UnexpectedResponse { expected: "health_response", actual: other.kind().to_string() }),
        }
    }

    /// Invoke a tool on whichever server owns it.
    ///
    /// A `success: false` result is returned as `Ok`; only transport
    /// failures become errors, after the retry policy is exhausted.
    pub async fn invoke(&self, tool_id: &str, parameters: impl Into<Parameters>) -> Result<ToolResult, McpError> {
        let entry = self
            .inner
            .catalog
            .lock()
            .resolve(tool_id)
            .ok_or_else(|| McpError::UnknownTool(tool_id.to_string()))?;
        let args = parameters.into().into_map().map_err(McpError::InvalidParameters)?;

        let include_timeout = self.inner.config.retry_on_timeout;
        let (client, args, server) = (self, &args, entry.server.as_str());
        let outcome = retry_async_if(
            &self.inner.config.invoke_retry,
            |e: &McpError| {
                let retry = e.is_transient(include_timeout);
                if retry {
                    tracing::warn!(tool = %tool_id, error = %e, "Retrying tool invocation");
                }
                retry
            },
            move || client.invoke_once(tool_id, args, server),
        )
        .await;

        if outcome.was_retried {
            tracing::debug!(
                tool = %tool_id,
                attempts = outcome.attempts,
                elapsed_ms = outcome.total_time.as_millis() as u64,
                "Invocation needed retries"
            );
        }
        outcome.into_result()
    }

    async fn invoke_once(&self, tool_id: &str, args: &Arguments, fallback_server: &str) -> Result<ToolResult, McpError> {
        let timeout = self.inner.config.request_timeout;
        let deadline = Instant::now() + timeout;

        // The owner may have changed since the first attempt
        let server = self
            .inner
            .catalog
            .lock()
            .owner_of(tool_id)
            .map_or_else(|| fallback_server.to_string(), str::to_string);

        let mut outbound = self.outbound_or_wait(&server, deadline).await?;
        let mut resent = false;

        loop {
            let request = Message::tool_request(new_request_id(), tool_id, args.clone());
            match self.round_trip(&server, &outbound, request, deadline).await {
                Ok(reply) => return into_tool_result(reply),
                Err(McpError::ConnectionLost(_)) if !resent => {
                    tracing::warn!(tool = %tool_id, server = %server, "Connection lost mid-request, resending after reconnect");
                    outbound = self.wait_for_reconnect(&server, deadline).await?;
                    resent = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send one request and wait for its correlated reply.
    async fn round_trip(
        &self,
        server: &str,
        outbound: &mpsc::UnboundedSender<WsMessage>,
        message: Message,
        deadline: Instant,
    ) -> Result<Message, McpError> {
        let id = message.id.clone().unwrap_or_default();
        let rx = self
            .inner
            .pending
            .lock()
            .register(&id, server)
            .ok_or_else(|| McpError::MalformedMessage(format!("request id {} already in flight", id)))?;

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                self.inner.pending.lock().cancel(&id);
                return Err(e.into());
            }
        };
        tracing::debug!(server = %server, id = %id, kind = message.kind(), "Sending request");

        if outbound.send(WsMessage::Text(json)).is_err() {
            self.inner.pending.lock().cancel(&id);
            return Err(McpError::ConnectionLost(server.to_string()));
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(McpError::ConnectionLost(server.to_string())),
            Err(_) => {
                // Releasing the slot turns a late reply into a no-op
                self.inner.pending.lock().cancel(&id);
                tracing::error!(server = %server, id = %id, "Timeout waiting for response");
                Err(McpError::Timeout { request_id: id, after: self.inner.config.request_timeout })
            }
        }
    }

    fn rank_for(&self, url: &str) -> usize {
        if let Some(link) = self.inner.links.lock().get(url) {
            return link.rank;
        }
        self.inner.next_rank.fetch_add(1, Ordering::SeqCst)
    }

    async fn connect_server(&self, url: &str, rank: usize) -> Result<usize, McpError> {
        validate_url(url)?;

        let previous = {
            let mut links = self.inner.links.lock();
            let link = links.entry(url.to_string()).or_insert_with(|| Link::new(rank));
            let previous = link.state();
            if matches!(previous, ConnectionState::Disconnected | ConnectionState::Failed) {
                link.state.send_replace(ConnectionState::Connecting);
            }
            previous
        };

        match previous {
            ConnectionState::Connected => {
                let tools = self.list_tools().iter().filter(|e| e.server == url).count();
                return Ok(tools);
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                return Err(McpError::ConnectionFailed {
                    url: url.to_string(),
                    reason: "connection attempt already in progress".to_string(),
                });
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {}
        }

        let result = self.establish(url).await;
        if result.is_err() {
            self.set_state_if(url, ConnectionState::Connecting, ConnectionState::Failed);
        }
        result
    }

    /// Open the socket, start its tasks and discover the catalog.
    async fn establish(&self, url: &str) -> Result<usize, McpError> {
        let timeout = self.inner.config.request_timeout;
        let deadline = Instant::now() + timeout;

        let (ws, _) = match tokio::time::timeout_at(deadline, tokio_tungstenite::connect_async(url)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(McpError::ConnectionFailed { url: url.to_string(), reason: e.to_string() }),
            Err(_) => {
                return Err(McpError::ConnectionFailed {
                    url: url.to_string(),
                    reason: format!("handshake timed out after {:?}", timeout),
                })
            }
        };

        let (sink, stream) = ws.split();
        // Queue depth is bounded by in-flight requests, each of which holds a deadline
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, rx, self.inner.config.ping_interval));

        let generation = {
            let mut links = self.inner.links.lock();
            let Some(link) = links.get_mut(url) else {
                writer.abort();
                return Err(McpError::NotConnected(url.to_string()));
            };
            link.generation += 1;
            link.outbound = Some(tx.clone());
            if let Some(old) = link.writer.replace(writer) {
                old.abort();
            }
            link.generation
        };

        let reader = tokio::spawn(self.clone().read_loop(url.to_string(), generation, stream));
        if let Some(link) = self.inner.links.lock().get_mut(url) {
            if let Some(old) = link.reader.replace(reader) {
                old.abort();
            }
        }

        let subscribe = Message::request(
            new_request_id(),
            MessageBody::Subscribe {
                client_id: Some(self.inner.config.client_id.clone()),
                event: Some(TOOL_UPDATE_EVENT.to_string()),
            },
        );
        let discovered = match subscribe.to_json() {
            Ok(json) => {
                if tx.send(WsMessage::Text(json)).is_ok() {
                    self.discover(url, &tx, deadline).await
                } else {
                    Err(McpError::ConnectionLost(url.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        };

        let tools = match discovered {
            Ok(tools) => tools,
            Err(e) => {
                self.teardown(url, generation);
                return Err(e);
            }
        };

        let committed = {
            let links = self.inner.links.lock();
            match links.get(url) {
                Some(link) if link.generation == generation => {
                    link.state.send_replace(ConnectionState::Connected);
                    true
                }
                _ => false,
            }
        };

        if committed {
            Ok(tools)
        } else {
            // Disconnected while the handshake was in flight
            self.inner.catalog.lock().remove_server(url);
            Err(McpError::NotConnected(url.to_string()))
        }
    }

    /// Request a server's catalog and store it.
    async fn discover(&self, url: &str, outbound: &mpsc::UnboundedSender<WsMessage>, deadline: Instant) -> Result<usize, McpError> {
        let request = Message::tool_list_request(new_request_id(), None);
        let reply = self.round_trip(url, outbound, request, deadline).await?;

        match reply.body {
            MessageBody::ToolListResponse { tools, server_info } => {
                let count = tools.len();
                let rank = self.inner.links.lock().get(url).map_or(usize::MAX, |l| l.rank);
                self.inner.catalog.lock().set_server_tools(url, rank, server_info, tools);
                tracing::info!(server = %url, tools = count, "Discovered tools");
                Ok(count)
            }
            MessageBody::Error { error } => Err(McpError::Remote(error)),
            other => Err(McpError::UnexpectedResponse {
                expected: "tool_list_response",
                actual: other.kind().to_string(),
            }),
        }
    }

    async fn read_loop(self, url: String, generation: u64, mut stream: SplitStream<WsStream>) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => self.handle_frame(&url, &text),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_frame(&url, &text),
                    Err(_) => tracing::warn!(server = %url, "Ignoring non UTF-8 binary frame"),
                },
                Ok(WsMessage::Close(frame)) => {
                    tracing::debug!(server = %url, frame = ?frame, "Server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(server = %url, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
        self.connection_lost(&url, generation);
    }

    fn handle_frame(&self, url: &str, text: &str) {
        let message = match Message::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(server = %url, error = %e, "Invalid message from server");
                return;
            }
        };

        match message {
            Message { body: MessageBody::ToolUpdate { tools }, .. } => {
                let rank = self.inner.links.lock().get(url).map_or(usize::MAX, |l| l.rank);
                tracing::info!(server = %url, tools = tools.len(), "Received catalog update");
                self.inner.catalog.lock().set_server_tools(url, rank, None, tools);
            }
            message if message.id.is_some() => {
                let kind = message.kind();
                if !self.inner.pending.lock().complete(message) {
                    tracing::debug!(server = %url, kind, "Dropping reply with no pending request");
                }
            }
            Message { body: MessageBody::Error { error }, .. } => {
                tracing::warn!(server = %url, error = %error, "Server reported an error");
            }
            other => tracing::debug!(server = %url, kind = other.kind(), "Ignoring unsolicited message"),
        }
    }

    fn connection_lost(&self, url: &str, generation: u64) {
        let was_connected = {
            let mut links = self.inner.links.lock();
            let Some(link) = links.get_mut(url) else { return };
            if link.generation != generation {
                return;
            }
            link.outbound = None;
            match link.state() {
                ConnectionState::Disconnected | ConnectionState::Failed => return,
                ConnectionState::Connected => {
                    link.state.send_replace(ConnectionState::Reconnecting);
                    true
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => false,
            }
        };

        let removed = self.inner.catalog.lock().remove_server(url);
        let failed = self.inner.pending.lock().fail_server(url);
        tracing::warn!(server = %url, tools_removed = removed, requests_failed = failed, "Connection lost");

        if was_connected {
            let client = self.clone();
            let target = url.to_string();
            let handle = tokio::spawn(async move { client.reconnect_loop(target).await });
            if let Some(link) = self.inner.links.lock().get_mut(url) {
                if let Some(old) = link.reconnector.replace(handle) {
                    old.abort();
                }
            }
        }
    }

    async fn reconnect_loop(self, url: String) {
        let policy = self.inner.config.reconnect.clone();
        let total = policy.total_attempts();

        for attempt in 1..=total {
            if self.server_state(&url) != Some(ConnectionState::Reconnecting) {
                return;
            }
            match self.establish(&url).await {
                Ok(tools) => {
                    tracing::info!(server = %url, attempt, tools, "Reconnected to MCP server");
                    return;
                }
                Err(e) if attempt < total => {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        server = %url,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnect attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => tracing::warn!(server = %url, attempt, error = %e, "Reconnect attempt failed"),
            }
        }

        if self.set_state_if(&url, ConnectionState::Reconnecting, ConnectionState::Failed) {
            tracing::error!(server = %url, attempts = total, "Giving up on MCP server");
        }
    }

    /// Stop the tasks of a failed connection attempt.
    fn teardown(&self, url: &str, generation: u64) {
        let mut links = self.inner.links.lock();
        if let Some(link) = links.get_mut(url).filter(|l| l.generation == generation) {
            link.outbound = None;
            if let Some(handle) = link.reader.take() {
                handle.abort();
            }
            if let Some(handle) = link.writer.take() {
                handle.abort();
            }
        }
        drop(links);
        self.inner.catalog.lock().remove_server(url);
        self.inner.pending.lock().fail_server(url);
    }

    fn set_state_if(&self, url: &str, expected: ConnectionState, next: ConnectionState) -> bool {
        let links = self.inner.links.lock();
        match links.get(url) {
            Some(link) if link.state() == expected => {
                link.state.send_replace(next);
                true
            }
            _ => false,
        }
    }

    fn outbound_for(&self, url: &str) -> Result<mpsc::UnboundedSender<WsMessage>, McpError> {
        let links = self.inner.links.lock();
        match links.get(url) {
            Some(link) if link.state() == ConnectionState::Connected => {
                link.outbound.clone().ok_or_else(|| McpError::NotConnected(url.to_string()))
            }
            _ => Err(McpError::NotConnected(url.to_string())),
        }
    }

    async fn outbound_or_wait(&self, url: &str, deadline: Instant) -> Result<mpsc::UnboundedSender<WsMessage>, McpError> {
        match self.server_state(url) {
            Some(ConnectionState::Connected) => self.outbound_for(url),
            Some(ConnectionState::Reconnecting | ConnectionState::Connecting) => {
                self.wait_for_reconnect(url, deadline).await
            }
            _ => Err(McpError::NotConnected(url.to_string())),
        }
    }

    async fn wait_for_reconnect(&self, url: &str, deadline: Instant) -> Result<mpsc::UnboundedSender<WsMessage>, McpError> {
        let Some(mut state) = self.inner.links.lock().get(url).map(|l| l.state.subscribe()) else {
            return Err(McpError::ConnectionLost(url.to_string()));
        };

        let settled = state.wait_for(|s| !matches!(s, ConnectionState::Connecting | ConnectionState::Reconnecting));
        let reconnected = match tokio::time::timeout_at(deadline, settled).await {
            Ok(Ok(current)) => *current == ConnectionState::Connected,
            _ => false,
        };

        if reconnected {
            self.outbound_for(url).map_err(|_| McpError::ConnectionLost(url.to_string()))
        } else {
            Err(McpError::ConnectionLost(url.to_string()))
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<WsMessage>,
    ping_interval: Option<Duration>,
) {
    let mut ticker = ping_interval.map(|every| tokio::time::interval_at(Instant::now() + every, every));

    loop {
        let frame = match ticker.as_mut() {
            Some(ticker) => tokio::select! {
                frame = rx.recv() => frame,
                _ = ticker.tick() => Some(WsMessage::Ping(Vec::new())),
            },
            None => rx.recv().await,
        };
        let Some(frame) = frame else { break };

        let closing = matches!(frame, WsMessage::Close(_));
        if let Err(e) = sink.send(frame).await {
            tracing::debug!(error = %e, "Failed to write frame");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

fn into_tool_result(reply: Message) -> Result<ToolResult, McpError> {
    match reply.body {
        MessageBody::ToolResponse { result } => Ok(result),
        MessageBody::Error { error } => Err(McpError::Remote(error)),
        other => Err(McpError::UnexpectedResponse { expected: "tool_response", actual: other.kind().to_string() }),
    }
}

/// Check that a URL uses a WebSocket scheme.
pub fn validate_url(url: &str) -> Result<(), McpError> {
    let invalid = |reason: &str| McpError::InvalidUrl { url: url.to_string(), reason: reason.to_string() };

    let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
    if !matches!(scheme.to_ascii_lowercase().as_str(), "ws" | "wss") {
        return Err(invalid(&format!("unsupported scheme '{}', expected ws or wss", scheme)));
    }
    if rest.is_empty() || rest.starts_with('/') {
        return Err(invalid("missing host"));
    }
    Ok(())
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn new_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("client_{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("ws://localhost:8081").is_ok());
        assert!(validate_url("WSS://example.com/mcp").is_ok());

        assert!(matches!(validate_url("http://localhost:8081"), Err(McpError::InvalidUrl { .. })));
        assert!(matches!(validate_url("localhost:8081"), Err(McpError::InvalidUrl { .. })));
        assert!(matches!(validate_url("ws://"), Err(McpError::InvalidUrl { .. })));
    }

    #[test]
    fn test_client_id_format() {
        let config = ClientConfig::default();
        assert!(config.client_id.starts_with("client_"));
        assert_eq!(config.client_id.len(), "client_".len() + 8);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert!(!config.retry_on_timeout);
    }

    #[tokio::test]
    async fn test_unknown_tool_without_network() {
        let client = McpClient::new(ClientConfig::default());
        let err = client.invoke("does_not_exist", Parameters::default()).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownTool(ref id) if id == "does_not_exist"));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected_before_lookup() {
        let client = McpClient::new(ClientConfig::default());
        let err = client.invoke("anything", "[1, 2, 3]").await.unwrap_err();
        assert!(matches!(err, McpError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_schemes() {
        let client = McpClient::new(ClientConfig::default());
        let urls = vec!["http://localhost:1".to_string(), "ftp://localhost:2".to_string()];
        assert!(matches!(client.connect(&urls).await, Err(McpError::NoServersAvailable)));
        assert_eq!(client.connected_count(), 0);
        assert_eq!(client.server_state("http://localhost:1"), None);
    }

    #[tokio::test]
    async fn test_connect_without_urls() {
        let client = McpClient::new(ClientConfig::default());
        assert!(matches!(client.connect_configured().await, Err(McpError::NoServersAvailable)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = McpClient::new(ClientConfig::default());
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.connected_count(), 0);
        assert!(client.list_tools().is_empty());
    }
}

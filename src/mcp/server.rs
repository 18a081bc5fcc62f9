//! MCP server.
//!
//! Accepts WebSocket clients and routes each inbound message to the tool
//! registry. Every connection runs as its own task; tool invocations are
//! dispatched on separate tasks so a slow tool never stalls the socket.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::error::McpError;
use super::protocol::{
    peek_id, FailureKind, Message, MessageBody, Parameters, ServerInfo, ToolResult, PROTOCOL_VERSION,
};
use super::registry::ToolRegistry;

/// Event name clients subscribe to for catalog pushes.
pub const TOOL_UPDATE_EVENT: &str = "tool_update";

/// Capability flags advertised in discovery responses.
const SERVER_CAPABILITIES: &[&str] = &["tools", "subscriptions", "health"];

/// MCP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name reported to clients
    pub name: String,
    /// Interface to listen on
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Version reported to clients
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "finmcp".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a config listening on `host:port`.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { name: name.into(), host: host.into(), port, ..Self::default() }
    }

    /// Get the listen address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One connected client.
struct Session {
    outbound: mpsc::UnboundedSender<WsMessage>,
    subscriptions: HashSet<String>,
}

struct ServerInner {
    config: ServerConfig,
    registry: ToolRegistry,
    sessions: Mutex<HashMap<String, Session>>,
    shutdown: watch::Sender<bool>,
}

/// MCP server instance. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl McpServer {
    /// Create a server for a populated registry.
    pub fn new(config: ServerConfig, registry: ToolRegistry) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                config,
                registry,
                sessions: Mutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get the tool registry.
    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// Get the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Get the static server description.
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.inner.config.name.clone(),
            version: self.inner.config.version.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: SERVER_CAPABILITIES.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, McpError> {
        let listener = TcpListener::bind(self.inner.config.addr()).await?;
        Ok(listener)
    }

    /// Bind and serve until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<(), McpError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind and serve in the background, returning the bound address.
    pub async fn spawn(&self) -> Result<SocketAddr, McpError> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                tracing::error!(error = %e, "MCP server stopped with error");
            }
        });
        Ok(addr)
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), McpError> {
        let mut shutdown = self.inner.shutdown.subscribe();
        let local = listener.local_addr()?;
        tracing::info!(
            server = %self.inner.config.name,
            addr = %local,
            tools = self.inner.registry.len(),
            "MCP server listening"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        tokio::spawn(async move { server.handle_connection(stream, peer).await });
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
                },
            }
        }

        tracing::info!(server = %self.inner.config.name, "MCP server stopped");
        Ok(())
    }

    /// Stop accepting connections and close every session.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let sessions: Vec<_> = self.inner.sessions.lock().drain().collect();
        for (client_id, session) in sessions {
            tracing::debug!(client = %client_id, "Closing session for shutdown");
            let _ = session.outbound.send(WsMessage::Close(None));
        }
    }

    async fn handle_connection(self, stream: TcpStream, peer: SocketAddr) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let client_id = peer.to_string();
        let (mut sink, mut source) = ws.split();
        // Holds one reply per request the peer sent, plus broadcasts
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        self.inner
            .sessions
            .lock()
            .insert(client_id.clone(), Session { outbound: tx.clone(), subscriptions: HashSet::new() });
        tracing::info!(server = %self.inner.config.name, client = %client_id, "Client connected");

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
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
        });

        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                let _ = tx.send(WsMessage::Close(None));
                break;
            }
            let frame = tokio::select! {
                _ = shutdown.changed() => continue,
                frame = source.next() => frame,
            };

            match frame {
                Some(Ok(WsMessage::Text(text))) => self.spawn_dispatch(&client_id, text, tx.clone()),
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => self.spawn_dispatch(&client_id, text, tx.clone()),
                    Err(_) => send_message(&tx, &Message::error(None, "Malformed message: binary frame is not UTF-8")),
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client = %client_id, error = %e, "Read error");
                    break;
                }
            }
        }

        self.inner.sessions.lock().remove(&client_id);
        tracing::info!(server = %self.inner.config.name, client = %client_id, "Client disconnected");
    }

    fn spawn_dispatch(&self, client_id: &str, text: String, tx: mpsc::UnboundedSender<WsMessage>) {
        let server = self.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            let reply = server.handle_text(&client_id, &text).await;
            send_message(&tx, &reply);
        });
    }

    /// Decode a raw frame and handle it.
    ///
    /// Undecodable input yields an `error` message carrying whatever id
    /// could be recovered from the frame.
    pub async fn handle_text(&self, client_id: &str, text: &str) -> Message {
        match Message::from_json(text) {
            Ok(message) => self.handle_message(client_id, message).await,
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "Malformed message");
                Message::error(peek_id(text), format!("Malformed message: {}", e))
            }
        }
    }

    /// Handle one decoded message and build the reply.
    pub async fn handle_message(&self, client_id: &str, message: Message) -> Message {
        let id = message.id;
        tracing::trace!(client = %client_id, kind = message.body.kind(), "Dispatching message");

        let body = match message.body {
            MessageBody::ToolListRequest { category } => self.handle_discover(category.as_deref()),
            MessageBody::ToolRequest { tool_id, parameters } => {
                MessageBody::ToolResponse { result: self.handle_invoke(&tool_id, parameters).await }
            }
            MessageBody::Subscribe { event, .. } => self.handle_subscribe(client_id, event),
            MessageBody::Unsubscribe { event } => self.handle_unsubscribe(client_id, event),
            MessageBody::Health {} => self.handle_health(),
            other => {
                return Message::error(id, format!("Unexpected message type: {}", other.kind()));
            }
        };

        Message::new(id, body)
    }

    /// Build the catalog reply, optionally filtered by category.
    pub fn handle_discover(&self, category: Option<&str>) -> MessageBody {
        MessageBody::ToolListResponse {
            tools: self.inner.registry.list(category),
            server_info: Some(self.server_info()),
        }
    }

    /// Run a tool. Failures are reported in the result, never as errors.
    pub async fn handle_invoke(&self, tool_id: &str, parameters: Parameters) -> ToolResult {
        match parameters.into_map() {
            Ok(args) => self.inner.registry.invoke(tool_id, args).await,
            Err(e) => {
                tracing::warn!(tool = %tool_id, error = %e, "Undecodable tool parameters");
                ToolResult::failure(tool_id, FailureKind::Parameter, format!("Parameter error: {}", e))
            }
        }
    }

    /// Record a subscription. Always succeeds.
    pub fn handle_subscribe(&self, client_id: &str, event: Option<String>) -> MessageBody {
        let name = event.clone().unwrap_or_else(|| TOOL_UPDATE_EVENT.to_string());
        if let Some(session) = self.inner.sessions.lock().get_mut(client_id) {
            session.subscriptions.insert(name);
        }
        MessageBody::SubscribeResponse { event, subscribed: true }
    }

    /// Drop a subscription. Always succeeds.
    pub fn handle_unsubscribe(&self, client_id: &str, event: Option<String>) -> MessageBody {
        let name = event.clone().unwrap_or_else(|| TOOL_UPDATE_EVENT.to_string());
        if let Some(session) = self.inner.sessions.lock().get_mut(client_id) {
            session.subscriptions.remove(&name);
        }
        MessageBody::UnsubscribeResponse { event, unsubscribed: true }
    }

    /// Report liveness.
    pub fn handle_health(&self) -> MessageBody {
        MessageBody::HealthResponse {
            status: "healthy".to_string(),
            connected_clients: self.client_count(),
            registered_tools: self.inner.registry.len(),
        }
    }

    /// Send a message to every connected client.
    ///
    /// Returns the number of sessions the message was queued for; a closed
    /// session is skipped without affecting the others.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.fan_out(message, |_| true)
    }

    /// Push the full catalog to clients subscribed to catalog updates.
    pub fn announce_tools(&self) -> usize {
        let message = Message::new(None, MessageBody::ToolUpdate { tools: self.inner.registry.list(None) });
        self.fan_out(&message, |session| session.subscriptions.contains(TOOL_UPDATE_EVENT))
    }

    fn fan_out(&self, message: &Message, include: impl Fn(&Session) -> bool) -> usize {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let sessions = self.inner.sessions.lock();
        let mut delivered = 0;
        for (client_id, session) in sessions.iter().filter(|(_, s)| include(s)) {
            if session.outbound.send(WsMessage::Text(json.clone())).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(client = %client_id, "Broadcast skipped closed session");
            }
        }
        delivered
    }

    #[cfg(test)]
    fn attach_session(&self, client_id: &str) -> mpsc::UnboundedReceiver<WsMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sessions
            .lock()
            .insert(client_id.to_string(), Session { outbound: tx, subscriptions: HashSet::new() });
        rx
    }
}

fn send_message(tx: &mpsc::UnboundedSender<WsMessage>, message: &Message) {
    match message.to_json() {
        Ok(json) => {
            if tx.send(WsMessage::Text(json)).is_err() {
                tracing::debug!(kind = message.kind(), "Reply dropped, connection closed");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
    }
}

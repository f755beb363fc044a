use crate::config::Endpoint;
use crate::points::{PointStore, MAX_POINTS};
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const MAX_REQUEST_SIZE: usize = 512;
/// Namespace indexes 0 and 1 are reserved by convention; registered points
/// live in the application namespace.
pub const NAMESPACE_INDEX: u16 = 2;

pub type RequestBuffer = ArrayString<MAX_REQUEST_SIZE>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind protocol endpoint {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("node registry full ({MAX_POINTS} slots)")]
    Full,
    #[error("point `{0}` already exposed")]
    Duplicate(String),
}

/// Stable node ids handed to sampling clients at startup.
#[derive(Debug, Clone)]
pub struct NodeIds {
    pub temperature: String,
    pub pressure: String,
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    node_id: String,
    point: String,
}

/// Maps stable node identifiers to point names. Filled once at startup,
/// immutable while the server runs.
#[derive(Debug, Default)]
pub struct PointRegistry {
    entries: heapless::Vec<RegistryEntry, MAX_POINTS>,
}

impl PointRegistry {
    pub fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Assign a node id (`ns=<idx>;s=<name>`) to a point and return it.
    pub fn register(&mut self, point: &str) -> Result<String, RegistryError> {
        if self.entries.iter().any(|e| e.point == point) {
            return Err(RegistryError::Duplicate(point.to_string()));
        }
        let node_id = format!("ns={NAMESPACE_INDEX};s={point}");
        self.entries
            .push(RegistryEntry {
                node_id: node_id.clone(),
                point: point.to_string(),
            })
            .map_err(|_| RegistryError::Full)?;
        Ok(node_id)
    }

    pub fn resolve(&self, node_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.node_id == node_id)
            .map(|e| e.point.as_str())
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|e| (e.node_id.as_str(), e.point.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PointRequest {
    Read { node: String },
    Write { node: String, value: f64 },
    Browse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointInfo {
    pub node: String,
    pub name: String,
    pub value: f64,
    pub writable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<PointInfo>>,
}

impl PointResponse {
    fn value(node: &str, value: f64) -> Self {
        Self {
            ok: true,
            node: Some(node.to_string()),
            value: Some(value),
            error: None,
            points: None,
        }
    }

    fn written(node: &str) -> Self {
        Self {
            ok: true,
            node: Some(node.to_string()),
            value: None,
            error: None,
            points: None,
        }
    }

    fn failure(message: &str) -> Self {
        Self {
            ok: false,
            node: None,
            value: None,
            error: Some(message.to_string()),
            points: None,
        }
    }

    fn browse(points: Vec<PointInfo>) -> Self {
        Self {
            ok: true,
            node: None,
            value: None,
            error: None,
            points: Some(points),
        }
    }
}

/// TCP endpoint serving point reads and writes as newline-delimited JSON.
/// This is the only boundary between the simulator task and everything else.
pub struct PointServer {
    listener: TcpListener,
    store: Arc<PointStore>,
    registry: Arc<PointRegistry>,
}

impl PointServer {
    /// Bind the endpoint address. Failure here is fatal to startup: without
    /// an addressable endpoint there is nothing to bridge.
    pub async fn bind(
        endpoint: &Endpoint,
        store: Arc<PointStore>,
        registry: PointRegistry,
    ) -> Result<Self, ServerError> {
        let addr = endpoint.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            store,
            registry: Arc::new(registry),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the cancellation token fires; each client is
    /// served on its own task.
    pub async fn serve(self, cancel: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => info!("protocol endpoint listening on {}", addr),
            Err(e) => warn!("protocol endpoint address unavailable: {}", e),
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("client connected: {}", peer);
                        let store = Arc::clone(&self.store);
                        let registry = Arc::clone(&self.registry);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, store, registry).await {
                                warn!("client {} error: {}", peer, e);
                            }
                            debug!("client disconnected: {}", peer);
                        });
                    }
                    Err(e) => error!("failed to accept connection: {}", e),
                }
            }
        }
        info!("protocol endpoint stopped");
    }
}

async fn handle_client(
    stream: TcpStream,
    store: Arc<PointStore>,
    registry: Arc<PointRegistry>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut request_buffer = RequestBuffer::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        request_buffer.clear();
        if request_buffer.try_push_str(trimmed).is_err() {
            send_response(&mut writer, &PointResponse::failure("request exceeds maximum size")).await?;
            continue;
        }

        let response = match serde_json::from_str::<PointRequest>(&request_buffer) {
            Ok(request) => execute(request, &store, &registry).await,
            Err(e) => PointResponse::failure(&format!("invalid request: {e}")),
        };
        send_response(&mut writer, &response).await?;
    }
}

async fn execute(request: PointRequest, store: &PointStore, registry: &PointRegistry) -> PointResponse {
    match request {
        PointRequest::Read { node } => match registry.resolve(&node) {
            Some(point) => match store.read(point).await {
                Ok(value) => PointResponse::value(&node, value),
                Err(e) => PointResponse::failure(&e.to_string()),
            },
            None => PointResponse::failure(&format!("unknown node `{node}`")),
        },
        PointRequest::Write { node, value } => match registry.resolve(&node) {
            Some(point) => match store.write_external(point, value).await {
                Ok(()) => PointResponse::written(&node),
                Err(e) => PointResponse::failure(&e.to_string()),
            },
            None => PointResponse::failure(&format!("unknown node `{node}`")),
        },
        PointRequest::Browse => {
            let snapshot = store.snapshot().await;
            let points = registry
                .iter()
                .filter_map(|(node_id, point)| {
                    snapshot.iter().find(|p| p.name == point).map(|p| PointInfo {
                        node: node_id.to_string(),
                        name: p.name.clone(),
                        value: p.value,
                        writable: p.writable,
                    })
                })
                .collect();
            PointResponse::browse(points)
        }
    }
}

async fn send_response(writer: &mut OwnedWriteHalf, response: &PointResponse) -> std::io::Result<()> {
    let payload = serde_json::to_string(response)
        .unwrap_or_else(|_| r#"{"ok":false,"error":"response serialization failed"}"#.to_string());
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_assigns_stable_node_ids() {
        let mut registry = PointRegistry::new();
        let node = registry.register("Temperature").unwrap();
        assert_eq!(node, "ns=2;s=Temperature");
        assert_eq!(registry.resolve(&node), Some("Temperature"));
        assert_eq!(registry.resolve("ns=2;s=Flow"), None);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = PointRegistry::new();
        registry.register("Temperature").unwrap();
        assert!(matches!(
            registry.register("Temperature"),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn test_request_wire_format() {
        let request: PointRequest =
            serde_json::from_str(r#"{"op":"read","node":"ns=2;s=Temperature"}"#).unwrap();
        assert!(matches!(request, PointRequest::Read { .. }));

        let request: PointRequest =
            serde_json::from_str(r#"{"op":"write","node":"ns=2;s=Pressure","value":1.05}"#).unwrap();
        assert!(matches!(request, PointRequest::Write { .. }));
    }

    #[test]
    fn test_response_omits_empty_fields() {
        let payload = serde_json::to_string(&PointResponse::value("ns=2;s=Temperature", 21.5)).unwrap();
        assert!(!payload.contains("error"));
        assert!(!payload.contains("points"));
    }
}

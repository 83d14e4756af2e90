//! Node status: what each host has built, and whether its consensus client is following the chain.

use futures::future::join_all;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::flake::{ArtifactPresence, FlakeRepository};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

const BEACON_HEAD_PATH: &str = "eth/v1/beacon/headers/head";

/// What we know about one host in the flake.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub hostname: String,
    pub artifacts: ArtifactPresence,
    pub ssv_key: Option<String>,
    pub config: Option<Value>,
}

/// Fetches every host's status.  Hosts are queried concurrently and one host's failures only
/// leave that host's fields empty.
pub async fn refresh_nodes(flake: &FlakeRepository) -> Vec<NodeInfo> {
    let hostnames = flake.fetch_hostnames().await;
    join_all(hostnames.into_iter().map(|hostname| async move {
        let (config, artifacts, ssv_key) = tokio::join!(
            flake.fetch_host_config(&hostname),
            flake.probe_artifacts(&hostname),
            flake.fetch_ssv_key(&hostname),
        );
        NodeInfo {
            hostname,
            artifacts,
            ssv_key,
            config,
        }
    }))
    .await
}

/// The consensus endpoint a host's configuration points at.
pub fn consensus_endpoint(config: &Value) -> Option<&str> {
    config
        .pointer("/consensus/lighthouse/endpoint")
        .and_then(Value::as_str)
}

pub fn config_hostname(config: &Value) -> Option<&str> {
    config
        .pointer("/localization/hostname")
        .and_then(Value::as_str)
}

/// Asks a beacon node for its head block, giving up after a fixed timeout.
#[derive(Debug, Clone)]
pub struct BeaconProbe {
    client: Client,
    timeout: Duration,
}

impl Default for BeaconProbe {
    fn default() -> Self {
        Self::new(Client::new(), DEFAULT_PROBE_TIMEOUT)
    }
}

impl BeaconProbe {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// The head header response, or None if the node is unreachable, slow or answers garbage.
    pub async fn head(&self, endpoint: &str) -> Option<Value> {
        let url = format!("{}/{}", endpoint.trim_end_matches('/'), BEACON_HEAD_PATH);
        let request = async {
            self.client
                .get(&url)
                .header(ACCEPT, "application/json")
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await
        };
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(head)) => Some(head),
            Ok(Err(e)) => {
                debug!("Beacon node at '{}' unreachable: {}", endpoint, e);
                None
            }
            Err(_) => {
                debug!("Beacon node at '{}' timed out after {:?}", endpoint, self.timeout);
                None
            }
        }
    }
}

/// Consensus liveness of one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockStatus {
    pub host: String,
    pub head: Option<Value>,
}

impl BlockStatus {
    pub fn is_reachable(&self) -> bool {
        self.head.is_some()
    }

    /// Reachable, but the execution client hasn't verified the head yet.
    pub fn is_optimistic(&self) -> bool {
        self.head
            .as_ref()
            .and_then(|head| head.get("execution_optimistic"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn message(&self) -> &'static str {
        match (self.is_reachable(), self.is_optimistic()) {
            (false, _) => {
                "Could not connect to JSON-RPC endpoint. Is your VPN connection to this node online?"
            }
            (true, true) => "Node is online but optimistic",
            (true, false) => "Node OK",
        }
    }
}

/// Probes every node's consensus endpoint concurrently.  Nodes without an endpoint are reported as
/// unreachable.
pub async fn block_statuses(probe: &BeaconProbe, nodes: &[Value]) -> Vec<BlockStatus> {
    join_all(nodes.iter().map(|node| async move {
        let head = match consensus_endpoint(node) {
            Some(endpoint) => probe.head(endpoint).await,
            None => None,
        };
        BlockStatus {
            host: config_hostname(node).unwrap_or_default().to_string(),
            head,
        }
    }))
    .await
}

/// Everything the status page shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub backend_available: bool,
    pub nodes: Vec<NodeInfo>,
    pub blocks: Vec<BlockStatus>,
}

pub async fn snapshot(
    flake: &FlakeRepository,
    backend: &Backend,
    probe: &BeaconProbe,
) -> StatusSnapshot {
    let (backend_available, nodes) = tokio::join!(backend.is_available(), refresh_nodes(flake));
    let configs: Vec<Value> = nodes.iter().filter_map(|n| n.config.clone()).collect();
    let blocks = block_statuses(probe, &configs).await;
    StatusSnapshot {
        backend_available,
        nodes,
        blocks,
    }
}

/// Re-fetches the status snapshot on a fixed interval in a background task.  Polls that overlap
/// are not coalesced.  The task stops when the monitor is dropped.
#[derive(Debug)]
pub struct StatusMonitor {
    task: JoinHandle<()>,
    latest: watch::Receiver<Option<StatusSnapshot>>,
}

impl StatusMonitor {
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        flake: FlakeRepository,
        backend: Backend,
        probe: BeaconProbe,
        interval: Duration,
    ) -> Self {
        let (tx, latest) = watch::channel(None);
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            loop {
                ticks.tick().await;
                let status = snapshot(&flake, &backend, &probe).await;
                trace!("Status refreshed: {} nodes", status.nodes.len());
                if tx.send(Some(status)).is_err() {
                    break;
                }
            }
        });
        Self { task, latest }
    }

    pub fn latest(&self) -> Option<StatusSnapshot> {
        self.latest.borrow().clone()
    }

    /// Waits for the next snapshot.  Returns None once the poller has stopped.
    pub async fn next(&mut self) -> Option<StatusSnapshot> {
        self.latest.changed().await.ok()?;
        self.latest()
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_messages() {
        let down = BlockStatus {
            host: "a".to_string(),
            head: None,
        };
        assert!(!down.is_reachable());
        assert!(down.message().starts_with("Could not connect"));

        let optimistic = BlockStatus {
            host: "b".to_string(),
            head: Some(json!({ "execution_optimistic": true, "data": {} })),
        };
        assert!(optimistic.is_optimistic());
        assert_eq!(optimistic.message(), "Node is online but optimistic");

        let ok = BlockStatus {
            host: "c".to_string(),
            head: Some(json!({ "execution_optimistic": false })),
        };
        assert_eq!(ok.message(), "Node OK");
    }

    #[test]
    fn endpoint_lookup() {
        let config = json!({
            "localization": { "hostname": "ponkila-1" },
            "consensus": { "lighthouse": { "endpoint": "http://192.168.100.10:5052" } }
        });
        assert_eq!(consensus_endpoint(&config), Some("http://192.168.100.10:5052"));
        assert_eq!(config_hostname(&config), Some("ponkila-1"));
        assert_eq!(consensus_endpoint(&json!({})), None);
    }
}

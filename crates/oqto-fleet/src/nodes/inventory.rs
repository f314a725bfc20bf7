//! Fleet manager node listing.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{NodeAvailability, NodeError, NodeResult, WorkerNode};
use crate::remote::{RemoteExecutor, shell_quote};

/// Where and how to query the fleet manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Host running the fleet manager (swarm manager) CLI.
    pub manager_host: String,
    /// Node label marking hosts that may hold session volumes.
    pub storage_label: String,
    /// Fleet manager CLI binary on the manager host.
    pub cli: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            manager_host: "localhost".to_string(),
            storage_label: "oqto.storage=true".to_string(),
            cli: "docker".to_string(),
        }
    }
}

/// Source of worker nodes that can host session volumes.
#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// List active nodes eligible for session volumes, sorted by hostname.
    async fn storage_nodes(&self) -> NodeResult<Vec<WorkerNode>>;

    /// List every storage node, including drained, paused and down ones.
    ///
    /// Nodes out of rotation still hold volumes, so sweeps and editor
    /// replication walk this listing rather than [`NodeInventory::storage_nodes`].
    async fn all_storage_nodes(&self) -> NodeResult<Vec<WorkerNode>> {
        self.storage_nodes().await
    }
}

/// One line of `docker node ls --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct NodeListEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Hostname")]
    hostname: String,
    #[serde(rename = "Availability", default)]
    availability: String,
    #[serde(rename = "Status", default)]
    status: String,
}

/// Node inventory backed by the fleet manager CLI, reached over the remote executor.
#[derive(Clone)]
pub struct FleetInventory {
    executor: Arc<dyn RemoteExecutor>,
    config: FleetConfig,
}

impl FleetInventory {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: FleetConfig) -> Self {
        Self { executor, config }
    }

    async fn list_with_filter(
        &self,
        filter: &str,
        include_unavailable: bool,
    ) -> NodeResult<Vec<WorkerNode>> {
        let command = format!(
            "{} node ls --filter {} --format '{{{{json .}}}}'",
            self.config.cli,
            shell_quote(filter)
        );
        let stdout = self
            .executor
            .run(&self.config.manager_host, &command)
            .await?
            .into_result(&self.config.manager_host, &command)?;

        parse_node_list(&stdout, include_unavailable)
    }

    /// Storage-labelled nodes, or every worker when no host carries the label yet.
    async fn list_storage(&self, include_unavailable: bool) -> NodeResult<Vec<WorkerNode>> {
        let labelled = self
            .list_with_filter(
                &format!("node.label={}", self.config.storage_label),
                include_unavailable,
            )
            .await?;
        if !labelled.is_empty() {
            debug!("{} storage-labelled node(s) available", labelled.len());
            return Ok(labelled);
        }

        // Labelling hosts is an operational step that may not have happened yet.
        warn!(
            "No nodes carry label {}, falling back to all worker nodes",
            self.config.storage_label
        );
        let workers = self
            .list_with_filter("role=worker", include_unavailable)
            .await?;
        info!("{} worker node(s) available", workers.len());
        Ok(workers)
    }
}

#[async_trait]
impl NodeInventory for FleetInventory {
    async fn storage_nodes(&self) -> NodeResult<Vec<WorkerNode>> {
        self.list_storage(false).await
    }

    async fn all_storage_nodes(&self) -> NodeResult<Vec<WorkerNode>> {
        self.list_storage(true).await
    }
}

/// Parse JSON-lines node listing.
///
/// Unless `include_unavailable`, only nodes that can take new work are kept.
fn parse_node_list(stdout: &str, include_unavailable: bool) -> NodeResult<Vec<WorkerNode>> {
    let mut nodes = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let entry: NodeListEntry =
            serde_json::from_str(line).map_err(|e| NodeError::ParseError(e.to_string()))?;

        let Ok(availability) = entry.availability.parse::<NodeAvailability>();
        if !include_unavailable {
            if !availability.is_active() {
                debug!(
                    "Skipping node {} (availability {})",
                    entry.hostname, availability
                );
                continue;
            }
            if entry.status.eq_ignore_ascii_case("down") {
                debug!("Skipping node {} (status down)", entry.hostname);
                continue;
            }
        }

        nodes.push(WorkerNode {
            hostname: entry.hostname,
            cluster_id: entry.id,
            availability,
        });
    }

    nodes.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{CommandOutput, RemoteResult};
    use std::sync::Mutex;

    /// Replies to `node ls` depending on which filter was requested.
    struct FakeManager {
        labelled: String,
        workers: String,
        commands: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RemoteExecutor for FakeManager {
        async fn run(&self, host: &str, command: &str) -> RemoteResult<CommandOutput> {
            self.commands
                .lock()
                .unwrap()
                .push((host.to_string(), command.to_string()));
            let stdout = if command.contains("node.label=") {
                self.labelled.clone()
            } else {
                self.workers.clone()
            };
            Ok(CommandOutput {
                stdout,
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn line(id: &str, host: &str, availability: &str, status: &str) -> String {
        format!(
            r#"{{"Availability":"{availability}","EngineVersion":"27.3.1","Hostname":"{host}","ID":"{id}","ManagerStatus":"","Self":false,"Status":"{status}","TLSStatus":"Ready"}}"#
        )
    }

    #[test]
    fn test_parse_node_list_filters_and_sorts() {
        let stdout = [
            line("id-c", "node-c", "Active", "Ready"),
            line("id-a", "node-a", "Active", "Ready"),
            line("id-d", "node-d", "Drain", "Ready"),
            line("id-e", "node-e", "Active", "Down"),
        ]
        .join("\n");

        let nodes = parse_node_list(&stdout, false).unwrap();
        let hosts: Vec<_> = nodes.iter().map(|n| n.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["node-a", "node-c"]);
        assert_eq!(nodes[0].cluster_id, "id-a");
        assert_eq!(nodes[0].availability, NodeAvailability::Active);
    }

    #[test]
    fn test_parse_node_list_can_keep_unavailable_nodes() {
        let stdout = [
            line("id-c", "node-c", "Pause", "Ready"),
            line("id-a", "node-a", "Active", "Ready"),
            line("id-b", "node-b", "Drain", "Ready"),
            line("id-d", "node-d", "Active", "Down"),
        ]
        .join("\n");

        let nodes = parse_node_list(&stdout, true).unwrap();
        let hosts: Vec<_> = nodes.iter().map(|n| n.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["node-a", "node-b", "node-c", "node-d"]);
        assert_eq!(nodes[1].availability, NodeAvailability::Drain);
        assert_eq!(nodes[2].availability, NodeAvailability::Pause);
    }

    #[test]
    fn test_parse_node_list_rejects_garbage() {
        assert!(matches!(
            parse_node_list("not json", false),
            Err(NodeError::ParseError(_))
        ));
        assert!(parse_node_list("\n\n", true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_nodes_prefers_labelled_hosts() {
        let manager = Arc::new(FakeManager {
            labelled: line("id-s", "storage-1", "Active", "Ready"),
            workers: line("id-w", "worker-1", "Active", "Ready"),
            commands: Mutex::new(Vec::new()),
        });
        let inventory = FleetInventory::new(manager.clone(), FleetConfig::default());

        let nodes = inventory.storage_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].hostname, "storage-1");

        let commands = manager.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "localhost");
        assert!(commands[0].1.contains("node.label=oqto.storage=true"));
    }

    #[tokio::test]
    async fn test_storage_nodes_falls_back_to_workers() {
        let manager = Arc::new(FakeManager {
            labelled: String::new(),
            workers: [
                line("id-2", "worker-2", "Active", "Ready"),
                line("id-1", "worker-1", "Active", "Ready"),
            ]
            .join("\n"),
            commands: Mutex::new(Vec::new()),
        });
        let inventory = FleetInventory::new(manager.clone(), FleetConfig::default());

        let nodes = inventory.storage_nodes().await.unwrap();
        let hosts: Vec<_> = nodes.iter().map(|n| n.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["worker-1", "worker-2"]);

        let commands = manager.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands[1].1.contains("role=worker"));
    }

    #[tokio::test]
    async fn test_drained_storage_node_only_in_full_listing() {
        let manager = Arc::new(FakeManager {
            labelled: [
                line("id-b", "B", "Drain", "Ready"),
                line("id-a", "A", "Active", "Ready"),
            ]
            .join("\n"),
            workers: String::new(),
            commands: Mutex::new(Vec::new()),
        });
        let inventory = FleetInventory::new(manager.clone(), FleetConfig::default());

        let active: Vec<_> = inventory
            .storage_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.hostname)
            .collect();
        assert_eq!(active, vec!["A"]);

        let all: Vec<_> = inventory
            .all_storage_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.hostname)
            .collect();
        assert_eq!(all, vec!["A", "B"]);
    }
}

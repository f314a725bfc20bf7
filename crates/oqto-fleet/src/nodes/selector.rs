//! Round-robin node selection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use super::{NodeError, NodeInventory, NodeResult, WorkerNode};

/// Picks a placement host for each new session volume.
///
/// The cursor lives for the lifetime of the process and is shared by every
/// caller, so concurrent provisioning spreads over the fleet without locking.
/// It is not persisted: a restart begins again at the first node.
pub struct NodeSelector {
    inventory: Arc<dyn NodeInventory>,
    cursor: AtomicUsize,
}

impl NodeSelector {
    pub fn new(inventory: Arc<dyn NodeInventory>) -> Self {
        Self {
            inventory,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Current storage nodes, straight from the inventory.
    pub async fn nodes(&self) -> NodeResult<Vec<WorkerNode>> {
        self.inventory.storage_nodes().await
    }

    /// Hostname of the next node in rotation.
    pub async fn select_node(&self) -> NodeResult<String> {
        let nodes = self.inventory.storage_nodes().await?;
        if nodes.is_empty() {
            return Err(NodeError::NoCapacity);
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % nodes.len();
        let hostname = nodes[index].hostname.clone();
        debug!("Selected node {} ({} of {})", hostname, index + 1, nodes.len());
        Ok(hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::NodeAvailability;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StaticInventory {
        nodes: Mutex<Vec<WorkerNode>>,
    }

    impl StaticInventory {
        fn new(hosts: &[&str]) -> Self {
            Self {
                nodes: Mutex::new(hosts.iter().map(|h| node(h)).collect()),
            }
        }
    }

    #[async_trait]
    impl NodeInventory for StaticInventory {
        async fn storage_nodes(&self) -> NodeResult<Vec<WorkerNode>> {
            Ok(self.nodes.lock().unwrap().clone())
        }
    }

    fn node(hostname: &str) -> WorkerNode {
        WorkerNode {
            hostname: hostname.to_string(),
            cluster_id: format!("id-{hostname}"),
            availability: NodeAvailability::Active,
        }
    }

    #[tokio::test]
    async fn test_select_node_rotates() {
        let selector = NodeSelector::new(Arc::new(StaticInventory::new(&["A", "B", "C"])));

        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(selector.select_node().await.unwrap());
        }
        assert_eq!(picks, vec!["A", "B", "C", "A"]);
    }

    #[tokio::test]
    async fn test_select_node_distributes_evenly() {
        let selector = NodeSelector::new(Arc::new(StaticInventory::new(&["a", "b", "c"])));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..30 {
            *counts.entry(selector.select_node().await.unwrap()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 10));
    }

    #[tokio::test]
    async fn test_select_node_no_capacity() {
        let selector = NodeSelector::new(Arc::new(StaticInventory::new(&[])));
        let err = selector.select_node().await.unwrap_err();
        assert!(matches!(err, NodeError::NoCapacity));
    }

    #[tokio::test]
    async fn test_select_node_follows_inventory_changes() {
        let inventory = Arc::new(StaticInventory::new(&["a", "b"]));
        let selector = NodeSelector::new(inventory.clone());

        assert_eq!(selector.select_node().await.unwrap(), "a");
        inventory.nodes.lock().unwrap().clear();
        assert!(matches!(
            selector.select_node().await,
            Err(NodeError::NoCapacity)
        ));
        inventory.nodes.lock().unwrap().push(node("z"));
        assert_eq!(selector.select_node().await.unwrap(), "z");
    }

    #[tokio::test]
    async fn test_select_node_concurrent_callers() {
        let selector = Arc::new(NodeSelector::new(Arc::new(StaticInventory::new(&[
            "a", "b", "c", "d",
        ]))));

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let selector = selector.clone();
                tokio::spawn(async move { selector.select_node().await.unwrap() })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_default() += 1;
        }
        assert!(counts.values().all(|&c| c == 10));
    }
}

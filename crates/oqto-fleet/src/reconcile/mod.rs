//! Orphan session volume reconciliation.
//!
//! Teardown is not guaranteed to run: a process can crash mid-provisioning, a
//! record can be deleted directly, a volume removal can fail. Volumes are named
//! after their session, so comparing what is on disk against the record store
//! finds every volume whose session is gone.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::nodes::{NodeInventory, NodeResult, for_each_node};
use crate::service::ServiceRepository;
use crate::volume::{VolumeManager, session_id_from_volume};

/// Orphan volumes grouped by node.
pub type OrphanMap = BTreeMap<String, Vec<String>>;

/// Reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Run reconciliation in the background while serving.
    pub enabled: bool,
    /// Seconds between background runs.
    pub interval_seconds: u64,
    /// Remove orphans in the background run instead of only reporting them.
    pub delete_orphans: bool,
    /// Per-node limit for listing volumes.
    pub node_timeout_seconds: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 3600,
            delete_orphans: false,
            node_timeout_seconds: 30,
        }
    }
}

/// Result of removing orphans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// `"<volume> on <node>"` for each removed volume.
    pub deleted: Vec<String>,
    /// `"<volume> on <node>: <reason>"` for each volume that could not be removed.
    pub errors: Vec<String>,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub orphans: OrphanMap,
    /// Present when orphans were removed.
    pub cleanup: Option<CleanupReport>,
}

impl ReconcileReport {
    pub fn orphan_count(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }
}

/// Finds and removes session volumes without a service record.
#[derive(Clone)]
pub struct Reconciler {
    inventory: Arc<dyn NodeInventory>,
    volumes: Arc<dyn VolumeManager>,
    node_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        inventory: Arc<dyn NodeInventory>,
        volumes: Arc<dyn VolumeManager>,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            inventory,
            volumes,
            node_timeout: Duration::from_secs(config.node_timeout_seconds),
        }
    }

    /// Session volumes on storage nodes whose session is not in `active_session_ids`.
    ///
    /// Drained and paused nodes are swept too. Nodes are listed concurrently.
    /// A node that cannot be listed is logged and skipped; nodes without
    /// orphans are left out of the map.
    pub async fn find_orphans(&self, active_session_ids: &HashSet<String>) -> NodeResult<OrphanMap> {
        let hosts: Vec<String> = self
            .inventory
            .all_storage_nodes()
            .await?
            .into_iter()
            .map(|n| n.hostname)
            .collect();

        let listings = for_each_node(hosts, self.node_timeout, |node| async move {
            self.volumes.list_volumes(&node).await
        })
        .await;

        let mut orphans = OrphanMap::new();
        for (node, listing) in listings {
            let volumes = match listing {
                Ok(volumes) => volumes,
                Err(reason) => {
                    warn!("Skipping node {} during reconciliation: {}", node, reason);
                    continue;
                }
            };

            let mut found: Vec<String> = volumes
                .into_iter()
                .filter(|v| {
                    session_id_from_volume(v).is_some_and(|id| !active_session_ids.contains(id))
                })
                .collect();
            if found.is_empty() {
                continue;
            }

            found.sort();
            debug!("{} orphan volume(s) on {}", found.len(), node);
            orphans.insert(node, found);
        }

        Ok(orphans)
    }

    /// Remove every listed orphan. Failures are collected and never stop the sweep.
    pub async fn cleanup(&self, orphans_by_node: &OrphanMap) -> CleanupReport {
        let mut report = CleanupReport::default();

        for (node, volumes) in orphans_by_node {
            for volume in volumes {
                match self.volumes.remove_volume_on_node(volume, node).await {
                    Ok(()) => report.deleted.push(format!("{} on {}", volume, node)),
                    Err(e) => report
                        .errors
                        .push(format!("{} on {}: {}", volume, node, e)),
                }
            }
        }

        if !report.errors.is_empty() {
            warn!(
                "Orphan cleanup left {} volume(s) behind",
                report.errors.len()
            );
        }
        report
    }

    /// Diff every storage node against all recorded sessions, removing orphans when `delete`.
    ///
    /// Every record counts as active whatever its status, so a session that is
    /// still being provisioned never loses its volume.
    pub async fn reconcile(
        &self,
        repo: &ServiceRepository,
        delete: bool,
    ) -> anyhow::Result<ReconcileReport> {
        let active: HashSet<String> = repo.list_session_ids().await?.into_iter().collect();
        let orphans = self.find_orphans(&active).await?;

        let cleanup = if delete {
            Some(self.cleanup(&orphans).await)
        } else {
            None
        };

        let report = ReconcileReport { orphans, cleanup };
        info!(
            "Reconciliation found {} orphan volume(s) across {} node(s)",
            report.orphan_count(),
            report.orphans.len()
        );
        Ok(report)
    }

    /// Run [`Reconciler::reconcile`] every `interval` on a background task.
    pub fn start_periodic_task(
        self: Arc<Self>,
        repo: ServiceRepository,
        interval: Duration,
        delete: bool,
    ) -> tokio::task::JoinHandle<()> {
        info!(
            "Starting orphan reconciliation task (interval: {}s, delete: {})",
            interval.as_secs(),
            delete
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.reconcile(&repo, delete).await {
                    Ok(report) => {
                        if let Some(ref cleanup) = report.cleanup {
                            for line in &cleanup.errors {
                                warn!("Orphan cleanup error: {}", line);
                            }
                        } else {
                            for (node, volumes) in &report.orphans {
                                info!("Orphans on {}: {}", node, volumes.join(", "));
                            }
                        }
                    }
                    Err(e) => error!("Orphan reconciliation failed: {:#}", e),
                }
            }
        })
    }
}

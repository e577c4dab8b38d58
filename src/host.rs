use concepts::{HostSnapshotProvider, NodeInfo};
use serde::Deserialize;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// A compute node as reported by the CI host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ReportedNode {
    pub(crate) name: String,
    pub(crate) online: bool,
    pub(crate) executors: u32,
    #[serde(default)]
    pub(crate) busy_executors: u32,
}

/// Host state pushed to the sidecar over the API.
#[derive(Debug)]
pub(crate) struct InventoryHost {
    root_url: Option<String>,
    nodes: RwLock<Vec<ReportedNode>>,
}

impl InventoryHost {
    pub(crate) fn new(root_url: Option<String>) -> Self {
        Self {
            root_url,
            nodes: RwLock::default(),
        }
    }

    pub(crate) fn replace_nodes(&self, nodes: Vec<ReportedNode>) {
        debug!(count = nodes.len(), "Replacing node inventory");
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) = nodes;
    }
}

impl HostSnapshotProvider for InventoryHost {
    fn list_online_nodes(&self) -> Vec<NodeInfo> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|node| node.online)
            .map(|node| NodeInfo {
                name: node.name.clone(),
                executors: node.executors,
                busy_executors: node.busy_executors,
            })
            .collect()
    }

    fn root_url(&self) -> Option<String> {
        self.root_url.clone()
    }
}

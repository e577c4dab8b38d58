use concepts::{HostSnapshotProvider, NodeInfo};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct SimNode {
    pub name: String,
    pub online: bool,
    pub executors: u32,
    pub busy_executors: u32,
}

impl SimNode {
    #[must_use]
    pub fn online(name: &str, executors: u32, busy_executors: u32) -> Self {
        Self {
            name: name.to_string(),
            online: true,
            executors,
            busy_executors,
        }
    }

    #[must_use]
    pub fn offline(name: &str, executors: u32, busy_executors: u32) -> Self {
        Self {
            online: false,
            ..Self::online(name, executors, busy_executors)
        }
    }
}

/// Host whose node inventory can be changed while notifications are pending.
#[derive(Debug, Clone, Default)]
pub struct SimHost {
    nodes: Arc<Mutex<Vec<SimNode>>>,
    root_url: Option<String>,
}

impl SimHost {
    #[must_use]
    pub fn new(root_url: Option<&str>, nodes: Vec<SimNode>) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(nodes)),
            root_url: root_url.map(ToString::to_string),
        }
    }

    pub fn set_nodes(&self, nodes: Vec<SimNode>) {
        *self.nodes.lock().unwrap() = nodes;
    }
}

impl HostSnapshotProvider for SimHost {
    fn list_online_nodes(&self) -> Vec<NodeInfo> {
        self.nodes
            .lock()
            .unwrap()
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

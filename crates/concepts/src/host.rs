//! Narrow view of the host's job/run/executor model.
//!
//! The host owns its object model; the notifier only reads the handful of
//! values it needs through these traits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The parent definition a run belongs to.
pub trait HostJob {
    fn display_name(&self) -> String;
    /// URL relative to the host's root URL, e.g. `job/my-job/`.
    fn url(&self) -> String;
}

/// One execution of a [`HostJob`].
///
/// Some values, notably [`HostRun::duration`] and
/// [`HostRun::build_status_summary`], are only reliable while the lifecycle
/// callback is running, so they are read exactly once per event.
pub trait HostRun {
    fn build_status_summary(&self) -> String;
    fn display_name(&self) -> String;
    /// Zero until the run has finished.
    fn duration(&self) -> Duration;
    /// URL relative to the host's root URL, e.g. `job/my-job/42/`.
    fn url(&self) -> String;
    fn parent(&self) -> &dyn HostJob;
}

/// Read-only queries against the host's current state.
pub trait HostSnapshotProvider: Send + Sync {
    /// Compute nodes that are currently online. Offline nodes must not be listed.
    fn list_online_nodes(&self) -> Vec<NodeInfo>;
    fn root_url(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    pub executors: u32,
    pub busy_executors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobRecord {
    pub display_name: String,
    pub url: String,
}

impl HostJob for JobRecord {
    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }
}

/// Plain-data run, used when the host reports events over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunRecord {
    pub display_name: String,
    #[serde(default)]
    pub build_status_summary: String,
    #[serde(default)]
    pub duration_millis: u64,
    pub url: String,
    pub job: JobRecord,
}

impl HostRun for RunRecord {
    fn build_status_summary(&self) -> String {
        self.build_status_summary.clone()
    }

    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_millis)
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn parent(&self) -> &dyn HostJob {
        &self.job
    }
}

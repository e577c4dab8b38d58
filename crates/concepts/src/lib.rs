use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;

pub mod host;
pub mod target;
pub mod time;

pub use host::{HostJob, HostRun, HostSnapshotProvider, JobRecord, NodeInfo, RunRecord};
pub use target::{NotificationTarget, TargetSource, ValidationError};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Started,
    Completed,
    Finalized,
}

/// Resolve a host-relative URL against the host's root URL.
///
/// Returns `None` when the host does not know its root URL.
#[must_use]
pub fn absolute_uri(root_url: Option<&str>, relative: &str) -> Option<String> {
    root_url.map(|root| format!("{root}{relative}"))
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Run state as seen while the lifecycle callback was running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    build_status_summary: String,
    name: String,
    duration: u64,
    status: LifecyclePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
}

impl RunSnapshot {
    #[must_use]
    pub fn capture(phase: LifecyclePhase, run: &dyn HostRun, root_url: Option<&str>) -> Self {
        Self {
            build_status_summary: run.build_status_summary(),
            name: run.display_name(),
            duration: duration_millis(run.duration()),
            status: phase,
            uri: absolute_uri(root_url, &run.url()),
        }
    }

    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        self.status
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn duration_millis(&self) -> u64 {
        self.duration
    }

    #[must_use]
    pub fn build_status_summary(&self) -> &str {
        &self.build_status_summary
    }

    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
}

impl JobSnapshot {
    #[must_use]
    pub fn capture(job: &dyn HostJob, root_url: Option<&str>) -> Self {
        Self {
            name: job.display_name(),
            uri: absolute_uri(root_url, &job.url()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }
}

/// Executor utilization across online nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorPoolSnapshot {
    pub total_executors: u32,
    pub busy_executors: u32,
}

impl ExecutorPoolSnapshot {
    #[must_use]
    pub fn capture(host: &dyn HostSnapshotProvider) -> Self {
        Self::from_nodes(&host.list_online_nodes())
    }

    #[must_use]
    pub fn from_nodes(nodes: &[NodeInfo]) -> Self {
        nodes.iter().fold(Self::default(), |acc, node| Self {
            total_executors: acc.total_executors.saturating_add(node.executors),
            busy_executors: acc.busy_executors.saturating_add(node.busy_executors),
        })
    }
}

/// The JSON body of a single notification.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope<'a> {
    #[serde(flatten)]
    pub executors: ExecutorPoolSnapshot,
    #[serde(serialize_with = "serialize_millis_utc")]
    pub datetime: DateTime<Utc>,
    pub run: &'a RunSnapshot,
    pub job: &'a JobSnapshot,
}

impl<'a> NotificationEnvelope<'a> {
    #[must_use]
    pub fn new(
        executors: ExecutorPoolSnapshot,
        datetime: DateTime<Utc>,
        run: &'a RunSnapshot,
        job: &'a JobSnapshot,
    ) -> Self {
        Self {
            executors,
            datetime,
            run,
            job,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

// `2024-05-06T07:08:09.123Z`
fn serialize_millis_utc<S: Serializer>(
    datetime: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&datetime.to_rfc3339_opts(SecondsFormat::Millis, true))
}

use crate::stats::DeliveryStats;
use concepts::time::ClockFn;
use concepts::{
    ExecutorPoolSnapshot, HostSnapshotProvider, JobSnapshot, NotificationEnvelope, RunSnapshot,
    TargetSource,
};
use reqwest::{StatusCode, header::CONTENT_TYPE};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const CONTENT_TYPE_JSON_UTF8: &str = "application/json; charset=utf-8";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("cannot serialize the notification")]
    SerializationFailure(#[source] serde_json::Error),
    #[error("cannot connect to `{uri}`")]
    ConnectionFailure {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to `{uri}` failed")]
    ProtocolFailure {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to `{uri}` timed out")]
    Timeout {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
}

impl DeliveryError {
    fn from_reqwest(uri: &str, source: reqwest::Error) -> Self {
        let uri = uri.to_string();
        if source.is_timeout() {
            DeliveryError::Timeout { uri, source }
        } else if source.is_connect() {
            DeliveryError::ConnectionFailure { uri, source }
        } else {
            DeliveryError::ProtocolFailure { uri, source }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Delivered { status: StatusCode },
    NoTarget,
}

pub(crate) struct DeliveryContext<C: ClockFn> {
    pub(crate) host: Arc<dyn HostSnapshotProvider>,
    pub(crate) targets: Arc<dyn TargetSource>,
    pub(crate) clock_fn: C,
    pub(crate) client: reqwest::Client,
    pub(crate) stats: Arc<DeliveryStats>,
}

/// Snapshots captured at event time, waiting for their delivery time.
#[derive(Debug)]
pub(crate) struct PendingDelivery {
    pub(crate) run: RunSnapshot,
    pub(crate) job: JobSnapshot,
    pub(crate) enqueued_at: Instant,
    pub(crate) deliver_at: Instant,
}

impl PendingDelivery {
    /// Sleep until the delivery time, then post once a delivery slot is free.
    pub(crate) async fn deliver_when_due<C: ClockFn>(
        self,
        ctx: &DeliveryContext<C>,
        inflight: &Semaphore,
    ) {
        tokio::time::sleep_until(self.deliver_at).await;
        let Ok(_permit) = inflight.acquire().await else {
            debug!("Delivery slots are closed, dropping notification");
            return;
        };
        trace!(
            "Delivering after {:?}, {:?} past due",
            self.enqueued_at.elapsed(),
            self.deliver_at.elapsed()
        );
        match deliver(ctx, &self.run, &self.job).await {
            Ok(DeliveryOutcome::Delivered { status }) => {
                ctx.stats.record_delivered();
                debug!(%status, "Notification delivered");
            }
            Ok(DeliveryOutcome::NoTarget) => {
                ctx.stats.record_skipped();
                debug!("No notification target configured, skipping");
            }
            Err(err) => {
                ctx.stats.record_failed();
                warn!("Unable to send notification - {err:?}");
            }
        }
    }
}

/// Post one notification to the current target.
///
/// The target and the executor pool are read now, not when the event fired.
pub(crate) async fn deliver<C: ClockFn>(
    ctx: &DeliveryContext<C>,
    run: &RunSnapshot,
    job: &JobSnapshot,
) -> Result<DeliveryOutcome, DeliveryError> {
    let target = ctx.targets.current_target();
    let Some(uri) = target.as_str() else {
        return Ok(DeliveryOutcome::NoTarget);
    };
    let executors = ExecutorPoolSnapshot::capture(ctx.host.as_ref());
    let envelope = NotificationEnvelope::new(executors, ctx.clock_fn.now(), run, job);
    let body = envelope
        .to_json()
        .map_err(DeliveryError::SerializationFailure)?;
    trace!(uri, ?executors, "Posting notification");
    let response = ctx
        .client
        .post(uri)
        .header(CONTENT_TYPE, CONTENT_TYPE_JSON_UTF8)
        .body(body)
        .send()
        .await
        .map_err(|err| DeliveryError::from_reqwest(uri, err))?;
    let status = response.status();
    response
        .error_for_status()
        .map_err(|err| DeliveryError::from_reqwest(uri, err))?;
    Ok(DeliveryOutcome::Delivered { status })
}

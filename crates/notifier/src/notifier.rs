use crate::delivery::{DeliveryContext, PendingDelivery};
use crate::dispatcher::{self, DispatchLimits};
use crate::stats::{DeliveryStats, DeliveryStatsSnapshot};
use concepts::time::ClockFn;
use concepts::{
    HostJob, HostRun, HostSnapshotProvider, JobSnapshot, LifecyclePhase, RunSnapshot,
    TargetSource,
};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{Level, debug, instrument, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("cannot build the HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

/// How long after the lifecycle event each notification is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    pub started: Duration,
    pub completed: Duration,
    pub finalized: Duration,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            started: Duration::ZERO,
            completed: Duration::from_secs(1),
            finalized: Duration::from_secs(1),
        }
    }
}

impl DelayPolicy {
    #[must_use]
    pub fn delay(&self, phase: LifecyclePhase) -> Duration {
        match phase {
            LifecyclePhase::Started => self.started,
            LifecyclePhase::Completed => self.completed,
            LifecyclePhase::Finalized => self.finalized,
        }
    }
}

const DEFAULT_QUEUE_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();
const DEFAULT_MAX_INFLIGHT_DELIVERIES: NonZeroUsize = NonZeroUsize::new(8).unwrap();

#[derive(Debug, Clone, Copy)]
pub struct NotifierConfig {
    pub queue_capacity: NonZeroUsize,
    pub max_inflight_deliveries: NonZeroUsize,
    pub request_timeout: Duration,
    pub delays: DelayPolicy,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_inflight_deliveries: DEFAULT_MAX_INFLIGHT_DELIVERIES,
            request_timeout: Duration::from_secs(5),
            delays: DelayPolicy::default(),
        }
    }
}

/// Entry points called by the host on run lifecycle events.
///
/// Calls never block on the network: the run and job are captured
/// immediately and handed over to the dispatcher task.
#[derive(Clone, derive_more::Debug)]
pub struct Notifier {
    #[debug(skip)]
    sender: mpsc::Sender<PendingDelivery>,
    #[debug(skip)]
    host: Arc<dyn HostSnapshotProvider>,
    delays: DelayPolicy,
    stats: Arc<DeliveryStats>,
}

impl Notifier {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn spawn_new<C: ClockFn>(
        config: NotifierConfig,
        host: Arc<dyn HostSnapshotProvider>,
        targets: Arc<dyn TargetSource>,
        clock_fn: C,
    ) -> Result<(Notifier, NotifierTaskHandle), NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(NotifierError::HttpClient)?;
        let stats = Arc::new(DeliveryStats::default());
        let ctx = Arc::new(DeliveryContext {
            host: host.clone(),
            targets,
            clock_fn,
            client,
            stats: stats.clone(),
        });
        let (sender, receiver) = mpsc::channel(config.queue_capacity.get());
        let (closing_sender, closing_receiver) = watch::channel(false);
        let abort_handle = tokio::spawn(dispatcher::dispatch(
            receiver,
            closing_receiver,
            ctx,
            DispatchLimits {
                max_scheduled: config.queue_capacity,
                max_inflight: config.max_inflight_deliveries,
            },
        ))
        .abort_handle();
        let notifier = Notifier {
            sender,
            host,
            delays: config.delays,
            stats,
        };
        let handle = NotifierTaskHandle {
            closing: closing_sender,
            abort_handle,
        };
        Ok((notifier, handle))
    }

    pub fn on_run_started(&self, run: &dyn HostRun, job: &dyn HostJob) {
        self.schedule(LifecyclePhase::Started, run, job);
    }

    pub fn on_run_completed(&self, run: &dyn HostRun, job: &dyn HostJob) {
        self.schedule(LifecyclePhase::Completed, run, job);
    }

    pub fn on_run_finalized(&self, run: &dyn HostRun) {
        self.schedule(LifecyclePhase::Finalized, run, run.parent());
    }

    #[must_use]
    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    fn schedule(&self, phase: LifecyclePhase, run: &dyn HostRun, job: &dyn HostJob) {
        let root_url = self.host.root_url();
        let run = RunSnapshot::capture(phase, run, root_url.as_deref());
        let job = JobSnapshot::capture(job, root_url.as_deref());
        let enqueued_at = Instant::now();
        let pending = PendingDelivery {
            deliver_at: enqueued_at + self.delays.delay(phase),
            enqueued_at,
            run,
            job,
        };
        match self.sender.try_send(pending) {
            Ok(()) => {
                self.stats.record_enqueued();
                trace!(%phase, "Notification enqueued");
            }
            Err(mpsc::error::TrySendError::Full(pending)) => {
                self.stats.record_dropped();
                warn!(
                    %phase,
                    run = pending.run.name(),
                    "Delivery queue is full, dropping notification"
                );
            }
            Err(mpsc::error::TrySendError::Closed(pending)) => {
                self.stats.record_dropped();
                debug!(
                    %phase,
                    run = pending.run.name(),
                    "Notifier is closed, dropping notification"
                );
            }
        }
    }
}

#[derive(derive_more::Debug)]
pub struct NotifierTaskHandle {
    #[debug(skip)]
    closing: watch::Sender<bool>,
    #[debug(skip)]
    abort_handle: AbortHandle,
}

impl NotifierTaskHandle {
    /// Stop accepting notifications and wait until every queued and
    /// scheduled delivery has finished.
    #[instrument(level = Level::DEBUG, name = "notifier.close", skip_all)]
    pub async fn close(&self) {
        trace!("Gracefully closing");
        self.closing.send_replace(true);
        while !self.abort_handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        debug!("Gracefully closed");
    }
}

impl Drop for NotifierTaskHandle {
    #[instrument(level = Level::DEBUG, name = "notifier.drop", skip_all)]
    fn drop(&mut self) {
        if self.abort_handle.is_finished() {
            return;
        }
        warn!("Aborting the notification dispatcher");
        self.abort_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use concepts::NotificationTarget;
    use target_store::{ConfigurationStore, MemoryPersistence};
    use test_utils::sim_clock::SimClock;
    use test_utils::sim_host::{SimHost, SimNode};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    const ROOT_URL: &str = "https://ci.example.test/";

    struct FixedTarget(NotificationTarget);

    impl TargetSource for FixedTarget {
        fn current_target(&self) -> NotificationTarget {
            self.0.clone()
        }
    }

    fn fixed_target(uri: &str) -> Arc<dyn TargetSource> {
        Arc::new(FixedTarget(NotificationTarget::parse(uri).unwrap()))
    }

    fn sim_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-06T07:08:09.123Z")
            .unwrap()
            .to_utc()
    }

    fn spawn(
        host: &SimHost,
        targets: Arc<dyn TargetSource>,
        config: NotifierConfig,
    ) -> (Notifier, NotifierTaskHandle) {
        test_utils::set_up();
        Notifier::spawn_new(
            config,
            Arc::new(host.clone()),
            targets,
            SimClock::new(sim_now()),
        )
        .unwrap()
    }

    fn default_host() -> SimHost {
        SimHost::new(Some(ROOT_URL), vec![SimNode::online("built-in", 4, 1)])
    }

    async fn mock_endpoint() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    async fn received_bodies(server: &MockServer) -> Vec<serde_json::Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| serde_json::from_slice(&request.body).unwrap())
            .collect()
    }

    async fn wait_until_finished(notifier: &Notifier, expected: u64) -> DeliveryStatsSnapshot {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let stats = notifier.stats();
                if stats.finished() >= expected {
                    return stats;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn started_is_delivered_without_delay() {
        let server = mock_endpoint().await;
        let (notifier, handle) = spawn(
            &default_host(),
            fixed_target(&format!("{}/hook", server.uri())),
            NotifierConfig::default(),
        );
        let record = test_utils::run_record("my-job", 42, 0);

        let stopwatch = std::time::Instant::now();
        notifier.on_run_started(&record, &record.job);
        handle.close().await;

        assert!(stopwatch.elapsed() < Duration::from_secs(1));
        let bodies = received_bodies(&server).await;
        assert_eq!(1, bodies.len());
        let body = &bodies[0];
        assert_eq!("started", body["run"]["status"]);
        assert_eq!(0, body["run"]["duration"]);
        assert_eq!("pending", body["run"]["buildStatusSummary"]);
        assert_eq!(
            "https://ci.example.test/job/my-job/42/",
            body["run"]["uri"]
        );
        assert_eq!(4, body["totalExecutors"]);
        assert_eq!(1, body["busyExecutors"]);
        assert_eq!("2024-05-06T07:08:09.123Z", body["datetime"]);
    }

    #[tokio::test]
    async fn completed_is_delayed_by_one_second() {
        let server = mock_endpoint().await;
        let (notifier, handle) = spawn(
            &default_host(),
            fixed_target(&format!("{}/hook", server.uri())),
            NotifierConfig::default(),
        );
        let record = test_utils::run_record("my-job", 42, 4500);

        let stopwatch = std::time::Instant::now();
        notifier.on_run_completed(&record, &record.job);
        handle.close().await;

        assert!(stopwatch.elapsed() >= Duration::from_secs(1));
        let bodies = received_bodies(&server).await;
        assert_eq!(1, bodies.len());
        let body = &bodies[0];
        assert_eq!("completed", body["run"]["status"]);
        assert_eq!("build-42", body["run"]["name"]);
        assert_eq!(4500, body["run"]["duration"]);
        assert_eq!("stable", body["run"]["buildStatusSummary"]);
        assert_eq!("my-job", body["job"]["name"]);
        assert_eq!("https://ci.example.test/job/my-job/", body["job"]["uri"]);
    }

    #[tokio::test]
    async fn finalized_reports_the_parent_job() {
        let server = mock_endpoint().await;
        let config = NotifierConfig {
            delays: DelayPolicy {
                finalized: Duration::ZERO,
                ..DelayPolicy::default()
            },
            ..NotifierConfig::default()
        };
        let (notifier, handle) = spawn(
            &default_host(),
            fixed_target(&format!("{}/hook", server.uri())),
            config,
        );
        let record = test_utils::run_record("parent-job", 3, 10);

        notifier.on_run_finalized(&record);
        handle.close().await;

        let bodies = received_bodies(&server).await;
        assert_eq!("finalized", bodies[0]["run"]["status"]);
        assert_eq!("parent-job", bodies[0]["job"]["name"]);
    }

    #[tokio::test]
    async fn absent_target_sends_nothing() {
        let server = mock_endpoint().await;
        let (notifier, handle) = spawn(
            &default_host(),
            fixed_target(""),
            NotifierConfig::default(),
        );
        let record = test_utils::run_record("my-job", 1, 0);

        notifier.on_run_started(&record, &record.job);
        notifier.on_run_completed(&record, &record.job);
        notifier.on_run_finalized(&record);
        handle.close().await;

        assert!(received_bodies(&server).await.is_empty());
        let stats = notifier.stats();
        assert_eq!(3, stats.enqueued);
        assert_eq!(3, stats.skipped);
        assert_eq!(0, stats.delivered);
    }

    #[tokio::test]
    async fn missing_root_url_omits_uris() {
        let server = mock_endpoint().await;
        let host = SimHost::new(None, vec![]);
        let (notifier, handle) = spawn(
            &host,
            fixed_target(&format!("{}/hook", server.uri())),
            NotifierConfig::default(),
        );
        let record = test_utils::run_record("my-job", 1, 0);

        notifier.on_run_started(&record, &record.job);
        handle.close().await;

        let bodies = received_bodies(&server).await;
        assert!(bodies[0]["run"].get("uri").is_none());
        assert!(bodies[0]["job"].get("uri").is_none());
        assert_eq!(0, bodies[0]["totalExecutors"]);
    }

    #[tokio::test]
    async fn failure_does_not_affect_later_notifications() {
        test_utils::set_up();
        let unreachable_port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let store = Arc::new(
            ConfigurationStore::open(MemoryPersistence::with_value(format!(
                "http://127.0.0.1:{unreachable_port}/hook"
            )))
            .unwrap(),
        );
        let server = mock_endpoint().await;
        let (notifier, handle) = spawn(&default_host(), store.clone(), NotifierConfig::default());
        let record = test_utils::run_record("my-job", 1, 0);

        notifier.on_run_started(&record, &record.job);
        let stats = wait_until_finished(&notifier, 1).await;
        assert_eq!(1, stats.failed);

        store.update(&format!("{}/hook", server.uri())).unwrap();
        notifier.on_run_started(&record, &record.job);
        handle.close().await;

        let stats = notifier.stats();
        assert_eq!(1, stats.failed);
        assert_eq!(1, stats.delivered);
        assert_eq!(1, received_bodies(&server).await.len());
    }

    #[tokio::test]
    async fn executor_counts_are_read_at_delivery_time() {
        let server = mock_endpoint().await;
        let host = default_host();
        let (notifier, handle) = spawn(
            &host,
            fixed_target(&format!("{}/hook", server.uri())),
            NotifierConfig::default(),
        );
        let record = test_utils::run_record("my-job", 5, 100);

        notifier.on_run_completed(&record, &record.job);
        host.set_nodes(vec![
            SimNode::online("built-in", 4, 0),
            SimNode::online("agent-1", 2, 2),
            SimNode::offline("agent-2", 8, 8),
        ]);
        handle.close().await;

        let bodies = received_bodies(&server).await;
        assert_eq!(6, bodies[0]["totalExecutors"]);
        assert_eq!(2, bodies[0]["busyExecutors"]);
    }

    #[tokio::test]
    async fn target_is_read_at_delivery_time() {
        test_utils::set_up();
        let server = mock_endpoint().await;
        let store = Arc::new(ConfigurationStore::open(MemoryPersistence::default()).unwrap());
        let (notifier, handle) = spawn(&default_host(), store.clone(), NotifierConfig::default());
        let record = test_utils::run_record("my-job", 5, 100);

        notifier.on_run_completed(&record, &record.job);
        store.update(&format!("{}/hook", server.uri())).unwrap();
        handle.close().await;

        assert_eq!(1, notifier.stats().delivered);
    }

    #[tokio::test]
    async fn full_queue_drops_newest() {
        let (notifier, handle) = spawn(
            &default_host(),
            fixed_target(""),
            NotifierConfig {
                queue_capacity: NonZeroUsize::new(1).unwrap(),
                ..NotifierConfig::default()
            },
        );
        let first = test_utils::run_record("my-job", 1, 0);
        let second = test_utils::run_record("my-job", 2, 0);
        let third = test_utils::run_record("my-job", 3, 0);

        // The dispatcher cannot run before the next await on this runtime.
        notifier.on_run_started(&first, &first.job);
        notifier.on_run_started(&second, &second.job);
        notifier.on_run_started(&third, &third.job);
        handle.close().await;

        let stats = notifier.stats();
        assert_eq!(1, stats.enqueued);
        assert_eq!(2, stats.dropped);
        assert_eq!(1, stats.skipped);
    }

    #[tokio::test]
    async fn events_after_close_are_dropped() {
        let server = mock_endpoint().await;
        let (notifier, handle) = spawn(
            &default_host(),
            fixed_target(&format!("{}/hook", server.uri())),
            NotifierConfig::default(),
        );
        handle.close().await;
        let record = test_utils::run_record("my-job", 1, 0);

        notifier.on_run_started(&record, &record.job);

        assert_eq!(1, notifier.stats().dropped);
        assert!(received_bodies(&server).await.is_empty());
    }

    #[tokio::test]
    async fn datetime_comes_from_the_clock() {
        test_utils::set_up();
        let server = mock_endpoint().await;
        let clock = SimClock::new(sim_now());
        let (notifier, handle) = Notifier::spawn_new(
            NotifierConfig::default(),
            Arc::new(default_host()),
            fixed_target(&format!("{}/hook", server.uri())),
            clock.clone(),
        )
        .unwrap();
        let record = test_utils::run_record("my-job", 1, 0);

        clock.move_time_forward(Duration::from_millis(877));
        notifier.on_run_completed(&record, &record.job);
        handle.close().await;

        let bodies = received_bodies(&server).await;
        assert_eq!("2024-05-06T07:08:10.000Z", bodies[0]["datetime"]);
    }

    async fn wait_for_status(server: &MockServer, status: &str) -> Duration {
        let stopwatch = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let bodies = received_bodies(server).await;
                if bodies.iter().any(|body| body["run"]["status"] == status) {
                    return stopwatch.elapsed();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn started_is_not_held_back_by_delayed_notifications() {
        let server = mock_endpoint().await;
        let config = NotifierConfig::default();
        let (notifier, handle) = spawn(
            &default_host(),
            fixed_target(&format!("{}/hook", server.uri())),
            config,
        );
        for number in 0..config.max_inflight_deliveries.get() {
            let record = test_utils::run_record("my-job", u32::try_from(number).unwrap(), 0);
            notifier.on_run_completed(&record, &record.job);
        }
        // Let the dispatcher pick up every delayed notification first.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let record = test_utils::run_record("my-job", 100, 0);

        notifier.on_run_started(&record, &record.job);

        let elapsed = wait_for_status(&server, "started").await;
        assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
        handle.close().await;
        assert_eq!(9, notifier.stats().delivered);
    }

    #[tokio::test]
    async fn slow_target_does_not_block_events_or_later_deliveries() {
        test_utils::set_up();
        let slow_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&slow_server)
            .await;
        let fast_server = mock_endpoint().await;
        let store = Arc::new(
            ConfigurationStore::open(MemoryPersistence::with_value(format!(
                "{}/hook",
                slow_server.uri()
            )))
            .unwrap(),
        );
        let config = NotifierConfig {
            delays: DelayPolicy {
                completed: Duration::ZERO,
                ..DelayPolicy::default()
            },
            ..NotifierConfig::default()
        };
        let (notifier, handle) = spawn(&default_host(), store.clone(), config);
        let record = test_utils::run_record("my-job", 1, 0);

        let stopwatch = std::time::Instant::now();
        notifier.on_run_completed(&record, &record.job);
        assert!(stopwatch.elapsed() < Duration::from_millis(50));

        // Wait until the slow request reached the target.
        tokio::time::timeout(Duration::from_secs(10), async {
            while slow_server.received_requests().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        store.update(&format!("{}/hook", fast_server.uri())).unwrap();
        notifier.on_run_started(&record, &record.job);

        let elapsed = wait_for_status(&fast_server, "started").await;
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
        let stats = wait_until_finished(&notifier, 1).await;
        assert!(stopwatch.elapsed() < Duration::from_secs(3), "{stats:?}");
        assert_eq!(1, stats.delivered);
        handle.close().await;
        assert_eq!(2, notifier.stats().delivered);
    }

    #[test]
    fn default_delays() {
        let delays = DelayPolicy::default();
        assert_eq!(Duration::ZERO, delays.delay(LifecyclePhase::Started));
        assert_eq!(Duration::from_secs(1), delays.delay(LifecyclePhase::Completed));
        assert_eq!(Duration::from_secs(1), delays.delay(LifecyclePhase::Finalized));
    }
}

use crate::delivery::{DeliveryContext, PendingDelivery};
use concepts::time::ClockFn;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info_span, trace};

#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchLimits {
    /// Deliveries received from the queue and waiting for their time.
    pub(crate) max_scheduled: NonZeroUsize,
    /// Deliveries talking to the target.
    pub(crate) max_inflight: NonZeroUsize,
}

/// Receive pending deliveries and run each in its own task.
///
/// A scheduling permit is taken before an item is received, so at most
/// `max_scheduled` deliveries sleep until their time and everything else
/// stays in the bounded queue. A delivery permit is only taken once the
/// item is due, so sleeping timers never hold back a due notification.
pub(crate) async fn dispatch<C: ClockFn>(
    mut receiver: mpsc::Receiver<PendingDelivery>,
    mut closing: watch::Receiver<bool>,
    ctx: Arc<DeliveryContext<C>>,
    limits: DispatchLimits,
) {
    debug!(?limits, "Spawned notification dispatcher");
    let scheduled = Arc::new(Semaphore::new(limits.max_scheduled.get()));
    let inflight = Arc::new(Semaphore::new(limits.max_inflight.get()));
    let mut tasks = JoinSet::new();
    loop {
        let permit = tokio::select! {
            permit = scheduled.clone().acquire_owned() => permit,
            _ = closing.changed() => break,
        };
        let Ok(permit) = permit else {
            break;
        };
        let pending = tokio::select! {
            pending = receiver.recv() => pending,
            _ = closing.changed() => break,
        };
        let Some(pending) = pending else {
            debug!("All notifiers were dropped");
            break;
        };
        spawn_delivery(&mut tasks, pending, permit, &ctx, &inflight);
        while let Some(res) = tasks.try_join_next() {
            log_join_error(res);
        }
    }

    receiver.close();
    let mut drained = 0_usize;
    while let Some(pending) = receiver.recv().await {
        let Ok(permit) = scheduled.clone().acquire_owned().await else {
            break;
        };
        spawn_delivery(&mut tasks, pending, permit, &ctx, &inflight);
        drained += 1;
    }
    debug!(
        drained,
        scheduled = tasks.len(),
        "Waiting for scheduled deliveries"
    );
    while let Some(res) = tasks.join_next().await {
        log_join_error(res);
    }
    debug!("Notification dispatcher finished");
}

fn spawn_delivery<C: ClockFn>(
    tasks: &mut JoinSet<()>,
    pending: PendingDelivery,
    permit: OwnedSemaphorePermit,
    ctx: &Arc<DeliveryContext<C>>,
    inflight: &Arc<Semaphore>,
) {
    let span = info_span!(
        parent: None,
        "delivery",
        phase = %pending.run.phase(),
        run = pending.run.name()
    );
    trace!(parent: &span, "Scheduling delivery");
    let ctx = ctx.clone();
    let inflight = inflight.clone();
    tasks.spawn(
        async move {
            pending.deliver_when_due(&ctx, &inflight).await;
            drop(permit);
        }
        .instrument(span),
    );
}

fn log_join_error(res: Result<(), JoinError>) {
    if let Err(err) = res {
        error!("Delivery task failed - {err:?}");
    }
}

use std::sync::Arc;
use std::time::Duration;

use foundation::CaseId;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{BoxFuture, CaseEventSource, GeodataBackend, LiveChange, Subscription};
use crate::error::BackendError;
use crate::records::TimelineEvent;
use crate::timeline::{LiveStatus, TimelineState};

/// Keeps one case's `TimelineState` current.
///
/// `open` starts the live subscription and the snapshot read together on a
/// background task; observers read the state through a `watch` channel.
/// A snapshot failure ends the task. A dropped subscription marks the
/// state `Degraded` and is reopened after `resubscribe_delay` without
/// touching the events already merged.
///
/// Must be opened from within a tokio runtime.
#[derive(Debug)]
pub struct TimelineReconciler {
    case_id: CaseId,
    state: watch::Receiver<TimelineState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TimelineReconciler {
    pub fn open(
        case_id: CaseId,
        backend: Arc<dyn GeodataBackend>,
        source: Arc<dyn CaseEventSource>,
        resubscribe_delay: Duration,
    ) -> Self {
        info!(%case_id, "opening timeline");
        let (state_tx, state) = watch::channel(TimelineState::new(case_id));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            case_id,
            backend,
            source,
            resubscribe_delay,
            state_tx,
            shutdown_rx,
        ));
        Self {
            case_id,
            state,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub fn case_id(&self) -> CaseId {
        self.case_id
    }

    /// New observer of the live state.
    pub fn subscribe(&self) -> watch::Receiver<TimelineState> {
        self.state.clone()
    }

    pub fn current(&self) -> TimelineState {
        self.state.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }

    /// True once the task has stopped, by `close` or after a snapshot
    /// failure. An ended timeline never changes again.
    pub fn has_ended(&self) -> bool {
        self.is_closed()
            || self.state.borrow().snapshot_error().is_some()
            || self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the background task and releases the live subscription.
    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            info!(case_id = %self.case_id, "closing timeline");
            // The task may already have ended after a snapshot failure.
            let _ = shutdown.send(());
        }
    }

    /// Closes and waits for the background task to finish.
    pub async fn close_and_wait(&mut self) {
        self.close();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(case_id = %self.case_id, error = %err, "timeline task failed");
        }
    }
}

impl Drop for TimelineReconciler {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(
    case_id: CaseId,
    backend: Arc<dyn GeodataBackend>,
    source: Arc<dyn CaseEventSource>,
    resubscribe_delay: Duration,
    state: watch::Sender<TimelineState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    // Subscribe before reading the snapshot so no change falls in between.
    let mut subscribing = Some(subscribe(&source, case_id));
    let mut snapshot = Some(fetch_snapshot(&backend, case_id));
    let mut subscription: Option<Subscription> = None;

    let retry = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(retry);
    let mut retry_armed = false;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            result = poll_slot(&mut snapshot) => {
                snapshot = None;
                match result {
                    Ok(events) => {
                        debug!(%case_id, events = events.len(), "snapshot loaded");
                        state.send_modify(|s| s.apply_snapshot(events));
                    }
                    Err(err) => {
                        warn!(%case_id, error = %err, "snapshot failed");
                        state.send_modify(|s| s.fail_snapshot(err));
                        break;
                    }
                }
            }
            result = poll_slot(&mut subscribing) => {
                subscribing = None;
                match result {
                    Ok(sub) => {
                        debug!(%case_id, "live subscription open");
                        subscription = Some(sub);
                        state.send_if_modified(|s| s.set_live_status(LiveStatus::Live));
                    }
                    Err(err) => {
                        warn!(%case_id, error = %err, "live subscription failed");
                        state.send_if_modified(|s| s.set_live_status(LiveStatus::Degraded));
                        retry.as_mut().reset(Instant::now() + resubscribe_delay);
                        retry_armed = true;
                    }
                }
            }
            change = next_change(&mut subscription) => match change {
                Some(change) => {
                    state.send_if_modified(|s| apply_change(s, change));
                }
                None => {
                    warn!(%case_id, "live subscription dropped");
                    subscription = None;
                    state.send_if_modified(|s| s.set_live_status(LiveStatus::Degraded));
                    retry.as_mut().reset(Instant::now() + resubscribe_delay);
                    retry_armed = true;
                }
            },
            () = &mut retry, if retry_armed => {
                retry_armed = false;
                debug!(%case_id, "resubscribing");
                subscribing = Some(subscribe(&source, case_id));
            }
        }
    }

    if let Some(mut sub) = subscription.take() {
        sub.close();
    }
    state.send_if_modified(|s| s.set_live_status(LiveStatus::Closed));
    debug!(%case_id, "timeline task finished");
}

/// Observers also hear about buffered changes, not only merged ones.
fn apply_change(state: &mut TimelineState, change: LiveChange) -> bool {
    let buffered = state.buffered();
    state.apply_live(change) || state.buffered() != buffered
}

fn subscribe(
    source: &Arc<dyn CaseEventSource>,
    case_id: CaseId,
) -> BoxFuture<'static, Result<Subscription, BackendError>> {
    let source = Arc::clone(source);
    Box::pin(async move { source.subscribe_case_events(case_id).await })
}

fn fetch_snapshot(
    backend: &Arc<dyn GeodataBackend>,
    case_id: CaseId,
) -> BoxFuture<'static, Result<Vec<TimelineEvent>, BackendError>> {
    let backend = Arc::clone(backend);
    Box::pin(async move { backend.fetch_case_snapshot(case_id).await })
}

/// Polls the future in `slot`; pends forever when the slot is empty.
async fn poll_slot<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_change(subscription: &mut Option<Subscription>) -> Option<LiveChange> {
    match subscription {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use foundation::CaseId;
    use pretty_assertions::assert_eq;

    use super::TimelineReconciler;
    use crate::backend::LiveChange;
    use crate::error::BackendError;
    use crate::testing::{Reply, ScriptedBackend, ScriptedEvents, event};
    use crate::timeline::LiveStatus;

    const RESUBSCRIBE: Duration = Duration::from_secs(2);

    async fn until(mut cond: impl FnMut() -> bool) {
        while !cond() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn live_changes_around_the_snapshot_are_merged_once() {
        let case = CaseId::random();
        let (a, b, c, d) = (event(case, 10), event(case, 20), event(case, 15), event(case, 30));

        let backend = Arc::new(ScriptedBackend::manual());
        let (source, mut feeds) = ScriptedEvents::new();
        let mut timeline =
            TimelineReconciler::open(case, backend.clone(), Arc::new(source), RESUBSCRIBE);
        let mut rx = timeline.subscribe();

        let feed = feeds.recv().await.unwrap();
        until(|| backend.calls().len() == 1).await;

        feed.push(LiveChange::Insert(c.clone())).await;
        rx.wait_for(|s| s.buffered() == 1).await.unwrap();

        backend.resolve(0, Reply::Snapshot(Ok(vec![a.clone(), b.clone()])));
        rx.wait_for(|s| s.snapshot_loaded()).await.unwrap();

        feed.push(LiveChange::Insert(b.clone())).await;
        feed.push(LiveChange::Insert(d.clone())).await;
        rx.wait_for(|s| s.events().len() == 4).await.unwrap();

        let state = timeline.current();
        let ids: Vec<_> = state.events().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![d.id, b.id, c.id, a.id]);
        assert_eq!(state.live_status(), LiveStatus::Live);

        timeline.close_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_subscription_is_reopened_and_keeps_events() {
        let case = CaseId::random();
        let a = event(case, 10);
        let backend = Arc::new(ScriptedBackend::immediate().with_snapshot(vec![a.clone()]));
        let (source, mut feeds) = ScriptedEvents::new();
        let source = Arc::new(source);
        let timeline = TimelineReconciler::open(case, backend, source.clone(), RESUBSCRIBE);
        let mut rx = timeline.subscribe();

        let first = feeds.recv().await.unwrap();
        rx.wait_for(|s| s.snapshot_loaded() && s.live_status() == LiveStatus::Live)
            .await
            .unwrap();

        drop(first);
        rx.wait_for(|s| s.live_status() == LiveStatus::Degraded)
            .await
            .unwrap();
        assert_eq!(timeline.current().events().len(), 1);

        let second = feeds.recv().await.unwrap();
        rx.wait_for(|s| s.live_status() == LiveStatus::Live)
            .await
            .unwrap();
        second.push(LiveChange::Insert(event(case, 20))).await;
        rx.wait_for(|s| s.events().len() == 2).await.unwrap();

        assert_eq!(source.subscribes(), vec![case, case]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscribe_is_retried_after_delay() {
        let case = CaseId::random();
        let backend = Arc::new(ScriptedBackend::immediate());
        let (source, mut feeds) = ScriptedEvents::new();
        source.fail_next(1);
        let timeline = TimelineReconciler::open(case, backend, Arc::new(source), RESUBSCRIBE);
        let mut rx = timeline.subscribe();

        rx.wait_for(|s| s.live_status() == LiveStatus::Degraded)
            .await
            .unwrap();
        let started = tokio::time::Instant::now();
        feeds.recv().await.unwrap();
        assert!(started.elapsed() >= RESUBSCRIBE);
        rx.wait_for(|s| s.live_status() == LiveStatus::Live)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_failure_is_terminal_and_releases_subscription() {
        let case = CaseId::random();
        let backend = Arc::new(ScriptedBackend::manual());
        let (source, mut feeds) = ScriptedEvents::new();
        let timeline =
            TimelineReconciler::open(case, backend.clone(), Arc::new(source), RESUBSCRIBE);
        let mut rx = timeline.subscribe();

        let mut feed = feeds.recv().await.unwrap();
        until(|| backend.calls().len() == 1).await;
        backend.resolve(0, Reply::Snapshot(Err(BackendError::transport("offline"))));

        rx.wait_for(|s| s.snapshot_error().is_some()).await.unwrap();
        assert!(timeline.has_ended());
        until(|| feed.was_closed()).await;
        assert!(!timeline.current().is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_releases_subscription() {
        let case = CaseId::random();
        let backend = Arc::new(ScriptedBackend::immediate());
        let (source, mut feeds) = ScriptedEvents::new();
        let mut timeline = TimelineReconciler::open(case, backend, Arc::new(source), RESUBSCRIBE);

        let mut feed = feeds.recv().await.unwrap();
        timeline.close();
        timeline.close();
        assert!(timeline.is_closed());
        timeline.close_and_wait().await;

        assert!(feed.was_closed());
        assert_eq!(timeline.current().live_status(), LiveStatus::Closed);
    }
}

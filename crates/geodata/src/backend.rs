use std::future::Future;
use std::pin::Pin;

use foundation::{CaseId, EventId, GeoBounds};
use tokio::sync::{mpsc, oneshot};

use crate::error::BackendError;
use crate::model::PoiType;
use crate::records::{CaseSummary, JurisdictionCollection, PoiCollection, TimelineEvent};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote reads the map screen depends on.
///
/// Implementations decode responses into typed records before returning, so
/// a payload that does not fit surfaces as `BackendError::Malformed`.
pub trait GeodataBackend: Send + Sync {
    fn fetch_jurisdiction_boundaries(
        &self,
        bounds: GeoBounds,
        zoom: f64,
    ) -> BoxFuture<'_, Result<JurisdictionCollection, BackendError>>;

    fn fetch_points_of_interest(
        &self,
        bounds: GeoBounds,
        types: Vec<PoiType>,
    ) -> BoxFuture<'_, Result<PoiCollection, BackendError>>;

    fn search_cases(
        &self,
        text: String,
        limit: u32,
        offset: u32,
    ) -> BoxFuture<'_, Result<Vec<CaseSummary>, BackendError>>;

    fn fetch_case_snapshot(
        &self,
        case_id: CaseId,
    ) -> BoxFuture<'_, Result<Vec<TimelineEvent>, BackendError>>;
}

/// Source of live change notifications for one case at a time.
pub trait CaseEventSource: Send + Sync {
    fn subscribe_case_events(
        &self,
        case_id: CaseId,
    ) -> BoxFuture<'_, Result<Subscription, BackendError>>;
}

/// One live change to a case's history.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveChange {
    Insert(TimelineEvent),
    Update(TimelineEvent),
    /// Delete notifications may only carry the row id.
    Delete { id: EventId, case_id: Option<CaseId> },
}

impl LiveChange {
    pub fn id(&self) -> EventId {
        match self {
            LiveChange::Insert(ev) | LiveChange::Update(ev) => ev.id,
            LiveChange::Delete { id, .. } => *id,
        }
    }

    pub fn case_id(&self) -> Option<CaseId> {
        match self {
            LiveChange::Insert(ev) | LiveChange::Update(ev) => Some(ev.case_id),
            LiveChange::Delete { case_id, .. } => *case_id,
        }
    }
}

/// Handle to an open live subscription.
///
/// `next` yields changes until the underlying channel drops. Closing is
/// idempotent and also happens on drop.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<LiveChange>,
    closer: Option<oneshot::Sender<()>>,
}

impl Subscription {
    /// `closer` is signalled once when the subscriber closes or drops the handle.
    pub fn new(events: mpsc::Receiver<LiveChange>, closer: oneshot::Sender<()>) -> Self {
        Self {
            events,
            closer: Some(closer),
        }
    }

    /// Next change, or `None` once the channel has dropped.
    pub async fn next(&mut self) -> Option<LiveChange> {
        self.events.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_none()
    }

    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            // The producer may already be gone.
            let _ = closer.send(());
            self.events.close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

//! Scripted in-memory collaborators for tests.

use std::sync::Mutex;

use foundation::{CaseId, EventId, GeoBounds, JurisdictionId, Timestamp};
use tokio::sync::{mpsc, oneshot};

use crate::backend::{BoxFuture, CaseEventSource, GeodataBackend, LiveChange, Subscription};
use crate::error::BackendError;
use crate::model::{EventKind, JurisdictionLevel, PoiType};
use crate::records::{
    CaseSummary, Feature, FeatureCollection, JurisdictionCollection, JurisdictionProperties,
    MultiPolygon, PoiCollection, TimelineEvent, decode_json,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Jurisdictions { bounds: GeoBounds, zoom: f64 },
    Pois { bounds: GeoBounds, types: Vec<PoiType> },
    Search { text: String, limit: u32, offset: u32 },
    Snapshot { case_id: CaseId },
}

#[derive(Debug)]
pub(crate) enum Reply {
    Jurisdictions(Result<JurisdictionCollection, BackendError>),
    Pois(Result<PoiCollection, BackendError>),
    Search(Result<Vec<CaseSummary>, BackendError>),
    Snapshot(Result<Vec<TimelineEvent>, BackendError>),
    /// Raw response body, decoded the way an HTTP backend decodes it.
    Body(String),
}

/// Records every call. In immediate mode each call resolves right away with
/// a canned reply; in manual mode it waits until the test calls `resolve`.
/// An unresolved manual call never completes.
pub(crate) struct ScriptedBackend {
    manual: bool,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    replies: Vec<Option<oneshot::Sender<Reply>>>,
    snapshot: Vec<TimelineEvent>,
}

impl ScriptedBackend {
    pub(crate) fn immediate() -> Self {
        Self {
            manual: false,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub(crate) fn manual() -> Self {
        Self {
            manual: true,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Snapshot returned by immediate-mode `fetch_case_snapshot`.
    pub(crate) fn with_snapshot(self, events: Vec<TimelineEvent>) -> Self {
        self.inner.lock().unwrap().snapshot = events;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub(crate) fn jurisdiction_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Jurisdictions { .. }))
            .collect()
    }

    /// Resolves the manual call with index `index` (in call order).
    pub(crate) fn resolve(&self, index: usize, reply: Reply) {
        let tx = self.inner.lock().unwrap().replies[index]
            .take()
            .expect("call already resolved");
        tx.send(reply).expect("caller went away");
    }

    fn record(&self, call: Call) -> (usize, Option<oneshot::Receiver<Reply>>) {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.calls.len();
        inner.calls.push(call);
        if self.manual {
            let (tx, rx) = oneshot::channel();
            inner.replies.push(Some(tx));
            (index, Some(rx))
        } else {
            inner.replies.push(None);
            (index, None)
        }
    }
}

async fn wait_for(rx: oneshot::Receiver<Reply>) -> Reply {
    match rx.await {
        Ok(reply) => reply,
        Err(_) => std::future::pending().await,
    }
}

fn wrong_reply(reply: Reply) -> BackendError {
    BackendError::malformed(format!("unexpected scripted reply {reply:?}"))
}

impl GeodataBackend for ScriptedBackend {
    fn fetch_jurisdiction_boundaries(
        &self,
        bounds: GeoBounds,
        zoom: f64,
    ) -> BoxFuture<'_, Result<JurisdictionCollection, BackendError>> {
        let (index, rx) = self.record(Call::Jurisdictions { bounds, zoom });
        Box::pin(async move {
            match rx {
                None => Ok(jurisdictions(&[&format!("call-{index}")])),
                Some(rx) => match wait_for(rx).await {
                    Reply::Jurisdictions(r) => r,
                    Reply::Body(body) => decode_json(&body),
                    other => Err(wrong_reply(other)),
                },
            }
        })
    }

    fn fetch_points_of_interest(
        &self,
        bounds: GeoBounds,
        types: Vec<PoiType>,
    ) -> BoxFuture<'_, Result<PoiCollection, BackendError>> {
        let (_, rx) = self.record(Call::Pois { bounds, types });
        Box::pin(async move {
            match rx {
                None => Ok(FeatureCollection::new(Vec::new())),
                Some(rx) => match wait_for(rx).await {
                    Reply::Pois(r) => r,
                    Reply::Body(body) => decode_json(&body),
                    other => Err(wrong_reply(other)),
                },
            }
        })
    }

    fn search_cases(
        &self,
        text: String,
        limit: u32,
        offset: u32,
    ) -> BoxFuture<'_, Result<Vec<CaseSummary>, BackendError>> {
        let (_, rx) = self.record(Call::Search {
            text,
            limit,
            offset,
        });
        Box::pin(async move {
            match rx {
                None => Ok(Vec::new()),
                Some(rx) => match wait_for(rx).await {
                    Reply::Search(r) => r,
                    Reply::Body(body) => decode_json(&body),
                    other => Err(wrong_reply(other)),
                },
            }
        })
    }

    fn fetch_case_snapshot(
        &self,
        case_id: CaseId,
    ) -> BoxFuture<'_, Result<Vec<TimelineEvent>, BackendError>> {
        let (_, rx) = self.record(Call::Snapshot { case_id });
        let canned = self.inner.lock().unwrap().snapshot.clone();
        Box::pin(async move {
            match rx {
                None => Ok(canned),
                Some(rx) => match wait_for(rx).await {
                    Reply::Snapshot(r) => r,
                    Reply::Body(body) => decode_json(&body),
                    other => Err(wrong_reply(other)),
                },
            }
        })
    }
}

/// Live channel of one scripted subscription.
pub(crate) struct LiveFeed {
    pub(crate) sender: mpsc::Sender<LiveChange>,
    pub(crate) closed: oneshot::Receiver<()>,
}

impl LiveFeed {
    pub(crate) async fn push(&self, change: LiveChange) {
        self.sender.send(change).await.expect("subscriber went away");
    }

    pub(crate) fn was_closed(&mut self) -> bool {
        // A dropped `Subscription` also counts as closed.
        !matches!(
            self.closed.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

/// Event source handing out one `LiveFeed` per subscribe call.
pub(crate) struct ScriptedEvents {
    feeds: Mutex<mpsc::UnboundedSender<LiveFeed>>,
    fail_next: Mutex<u32>,
    subscribes: Mutex<Vec<CaseId>>,
}

impl ScriptedEvents {
    /// Returns the source and the receiving end of its feeds.
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<LiveFeed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Self {
            feeds: Mutex::new(tx),
            fail_next: Mutex::new(0),
            subscribes: Mutex::new(Vec::new()),
        };
        (events, rx)
    }

    /// Makes the next `n` subscribe calls fail.
    pub(crate) fn fail_next(&self, n: u32) {
        *self.fail_next.lock().unwrap() = n;
    }

    pub(crate) fn subscribes(&self) -> Vec<CaseId> {
        self.subscribes.lock().unwrap().clone()
    }
}

impl CaseEventSource for ScriptedEvents {
    fn subscribe_case_events(
        &self,
        case_id: CaseId,
    ) -> BoxFuture<'_, Result<Subscription, BackendError>> {
        Box::pin(async move {
            self.subscribes.lock().unwrap().push(case_id);
            {
                let mut fail = self.fail_next.lock().unwrap();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(BackendError::transport("subscribe refused"));
                }
            }
            let (tx, rx) = mpsc::channel(16);
            let (close_tx, close_rx) = oneshot::channel();
            let feed = LiveFeed {
                sender: tx,
                closed: close_rx,
            };
            self.feeds
                .lock()
                .unwrap()
                .send(feed)
                .map_err(|_| BackendError::Closed)?;
            Ok(Subscription::new(rx, close_tx))
        })
    }
}

pub(crate) fn square() -> MultiPolygon {
    MultiPolygon::new(vec![vec![vec![
        [0.0, 0.0],
        [1.0, 0.0],
        [1.0, 1.0],
        [0.0, 0.0],
    ]]])
    .unwrap()
}

pub(crate) fn jurisdictions(names: &[&str]) -> JurisdictionCollection {
    FeatureCollection::new(
        names
            .iter()
            .map(|name| {
                Feature::new(
                    square(),
                    JurisdictionProperties {
                        id: JurisdictionId::random(),
                        name: name.to_string(),
                        level: JurisdictionLevel::Municipality,
                        authority_name: None,
                    },
                )
            })
            .collect(),
    )
}

/// Event for `case_id` that occurred `secs` seconds after the epoch.
pub(crate) fn event(case_id: CaseId, secs: i64) -> TimelineEvent {
    TimelineEvent {
        id: EventId::random(),
        case_id,
        actor_id: None,
        kind: EventKind::Comment,
        occurred_at: Timestamp::from_unix_millis(secs * 1_000).unwrap(),
        payload: serde_json::Map::new(),
    }
}

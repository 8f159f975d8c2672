use std::collections::BTreeSet;

use foundation::{CaseId, EventId};
use serde::Serialize;
use tracing::warn;

use crate::backend::LiveChange;
use crate::error::BackendError;
use crate::records::TimelineEvent;

/// Health of the live subscription behind a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Connecting,
    Live,
    /// The subscription dropped; live updates may be delayed until it is
    /// re-established. Already merged events stay valid.
    Degraded,
    Closed,
}

/// Deduplicated, time-ordered history of one case.
///
/// Merges a one-shot snapshot with live changes that may arrive before,
/// during or after it. `events` is always sorted by `occurred_at`
/// descending; ties keep their previous relative order.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineState {
    case_id: CaseId,
    events: Vec<TimelineEvent>,
    snapshot_loaded: bool,
    live_buffer: Vec<LiveChange>,
    tombstones: BTreeSet<EventId>,
    snapshot_error: Option<BackendError>,
    live: LiveStatus,
}

impl TimelineState {
    pub fn new(case_id: CaseId) -> Self {
        Self {
            case_id,
            events: Vec::new(),
            snapshot_loaded: false,
            live_buffer: Vec::new(),
            tombstones: BTreeSet::new(),
            snapshot_error: None,
            live: LiveStatus::Connecting,
        }
    }

    pub fn case_id(&self) -> CaseId {
        self.case_id
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn snapshot_loaded(&self) -> bool {
        self.snapshot_loaded
    }

    pub fn buffered(&self) -> usize {
        self.live_buffer.len()
    }

    pub fn snapshot_error(&self) -> Option<&BackendError> {
        self.snapshot_error.as_ref()
    }

    pub fn live_status(&self) -> LiveStatus {
        self.live
    }

    pub fn is_loading(&self) -> bool {
        !self.snapshot_loaded && self.snapshot_error.is_none()
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.position(id).is_some()
    }

    /// Installs the snapshot and merges everything buffered before it.
    ///
    /// The snapshot wins for ids it contains. Buffered deletes always apply.
    /// Ignored once a snapshot has been installed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<TimelineEvent>) {
        if self.snapshot_loaded {
            return;
        }

        let mut from_snapshot = BTreeSet::new();
        self.events = snapshot
            .into_iter()
            .filter(|ev| from_snapshot.insert(ev.id))
            .collect();

        for change in std::mem::take(&mut self.live_buffer) {
            match change {
                LiveChange::Insert(ev) | LiveChange::Update(ev) => {
                    if from_snapshot.contains(&ev.id) || self.tombstones.contains(&ev.id) {
                        continue;
                    }
                    self.upsert(ev);
                }
                LiveChange::Delete { id, .. } => self.remove(id),
            }
        }

        self.snapshot_loaded = true;
        self.snapshot_error = None;
        self.sort();
    }

    /// Records a terminal snapshot failure. Buffered changes are dropped.
    pub fn fail_snapshot(&mut self, err: BackendError) {
        self.snapshot_error = Some(err);
        self.live_buffer.clear();
    }

    /// Applies one live change. Returns `true` if `events` changed.
    ///
    /// Before the snapshot loads changes are only buffered.
    pub fn apply_live(&mut self, change: LiveChange) -> bool {
        if let Some(case_id) = change.case_id()
            && case_id != self.case_id
        {
            warn!(
                case_id = %self.case_id,
                other = %case_id,
                event_id = %change.id(),
                "dropping live change for another case"
            );
            return false;
        }

        if !self.snapshot_loaded {
            if self.snapshot_error.is_none() {
                self.live_buffer.push(change);
            }
            return false;
        }

        let changed = match change {
            LiveChange::Insert(ev) => {
                if self.tombstones.contains(&ev.id) || self.contains(ev.id) {
                    false
                } else {
                    self.events.push(ev);
                    true
                }
            }
            // An update for an unseen id was missed earlier; keep it.
            LiveChange::Update(ev) => !self.tombstones.contains(&ev.id) && self.upsert(ev),
            LiveChange::Delete { id, .. } => {
                let present = self.contains(id);
                self.remove(id);
                present
            }
        };
        if changed {
            self.sort();
        }
        changed
    }

    /// Returns `true` if the status changed.
    pub fn set_live_status(&mut self, status: LiveStatus) -> bool {
        if self.live == status {
            return false;
        }
        self.live = status;
        true
    }

    fn position(&self, id: EventId) -> Option<usize> {
        self.events.iter().position(|ev| ev.id == id)
    }

    fn upsert(&mut self, ev: TimelineEvent) -> bool {
        match self.position(ev.id) {
            Some(i) if self.events[i] == ev => false,
            Some(i) => {
                self.events[i] = ev;
                true
            }
            None => {
                self.events.push(ev);
                true
            }
        }
    }

    fn remove(&mut self, id: EventId) {
        self.tombstones.insert(id);
        self.events.retain(|ev| ev.id != id);
    }

    fn sort(&mut self) {
        // Stable: equal timestamps keep their relative order.
        self.events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use foundation::{CaseId, GeoBounds};
use tokio::sync::watch;
use tracing::debug;

use crate::backend::{CaseEventSource, GeodataBackend};
use crate::config::GeodataConfig;
use crate::fetcher::{Delivery, ViewportFetcher};
use crate::filters::{FilterState, FilterToggle};
use crate::key::ViewportQuery;
use crate::kinds::{JurisdictionsKind, PoisKind, SearchKind};
use crate::reconciler::TimelineReconciler;
use crate::records::{CaseSummary, JurisdictionCollection, PoiCollection};
use crate::timeline::TimelineState;

/// Last viewport reported by the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub bounds: GeoBounds,
    pub zoom: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScreenUpdate {
    Jurisdictions(Delivery<JurisdictionCollection>),
    Pois(Delivery<PoiCollection>),
    Search(Delivery<Vec<CaseSummary>>),
}

/// State behind one mounted map screen.
///
/// Owns one fetcher per data kind plus the open case timelines. Nothing is
/// shared with other screens; a new screen starts with empty caches.
/// `close` (or drop) cancels pending work and releases every live
/// subscription.
pub struct MapScreen {
    config: GeodataConfig,
    backend: Arc<dyn GeodataBackend>,
    events: Arc<dyn CaseEventSource>,
    filters: FilterState,
    viewport: Option<Viewport>,
    jurisdictions: ViewportFetcher<JurisdictionsKind>,
    pois: ViewportFetcher<PoisKind>,
    search: ViewportFetcher<SearchKind>,
    timelines: BTreeMap<CaseId, TimelineReconciler>,
    closed: bool,
}

impl MapScreen {
    pub fn new(
        config: GeodataConfig,
        backend: Arc<dyn GeodataBackend>,
        events: Arc<dyn CaseEventSource>,
    ) -> Self {
        let key = config.bounds_key();
        let quiet = config.quiet_period();
        let max_entries = config.cache_max_entries;
        Self {
            jurisdictions: ViewportFetcher::new(
                JurisdictionsKind::new(backend.clone(), key),
                quiet,
                max_entries,
            ),
            pois: ViewportFetcher::new(PoisKind::new(backend.clone(), key), quiet, max_entries),
            search: ViewportFetcher::new(
                SearchKind::new(backend.clone(), config.search_limit),
                quiet,
                max_entries,
            ),
            config,
            backend,
            events,
            filters: FilterState::new(),
            viewport: None,
            timelines: BTreeMap::new(),
            closed: false,
        }
    }

    /// Starts from `filters` instead of the unfiltered default.
    pub fn with_filters(mut self, filters: FilterState) -> Self {
        self.filters = filters;
        self
    }

    pub fn on_viewport_change(&mut self, bounds: GeoBounds, zoom: f64) -> Vec<ScreenUpdate> {
        if self.closed {
            return Vec::new();
        }
        self.viewport = Some(Viewport { bounds, zoom });
        self.request_viewport()
    }

    pub fn on_filter_toggle(&mut self, toggle: FilterToggle) -> Vec<ScreenUpdate> {
        if self.closed {
            return Vec::new();
        }
        self.filters.apply(toggle);
        debug!(filters = %self.filters.current().canonical(), "filter toggled");
        self.request_viewport()
    }

    pub fn on_filter_reset(&mut self) -> Vec<ScreenUpdate> {
        if self.closed {
            return Vec::new();
        }
        self.filters.reset();
        self.request_viewport()
    }

    /// Blank text cancels a pending search instead of querying.
    pub fn on_search_text_change(&mut self, text: &str) -> Vec<ScreenUpdate> {
        if self.closed {
            return Vec::new();
        }
        self.search
            .request(text.to_string())
            .map(ScreenUpdate::Search)
            .into_iter()
            .collect()
    }

    /// Next asynchronous result from any fetcher. Cancel-safe.
    pub async fn next_update(&mut self) -> ScreenUpdate {
        tokio::select! {
            d = self.jurisdictions.next_delivery() => ScreenUpdate::Jurisdictions(d),
            d = self.pois.next_delivery() => ScreenUpdate::Pois(d),
            d = self.search.next_delivery() => ScreenUpdate::Search(d),
        }
    }

    /// Live timeline of `case_id`, opening it on first use.
    ///
    /// A timeline whose snapshot failed is replaced by a fresh one, so
    /// opening the case again retries the read.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_timeline(&mut self, case_id: CaseId) -> watch::Receiver<TimelineState> {
        match self.timelines.get(&case_id) {
            Some(timeline) if !timeline.has_ended() => return timeline.subscribe(),
            Some(_) => debug!(%case_id, "reopening ended timeline"),
            None => {}
        }
        let timeline = TimelineReconciler::open(
            case_id,
            self.backend.clone(),
            self.events.clone(),
            self.config.resubscribe_delay(),
        );
        let rx = timeline.subscribe();
        self.timelines.insert(case_id, timeline);
        rx
    }

    /// Returns `true` if a timeline was open.
    pub fn close_timeline(&mut self, case_id: CaseId) -> bool {
        match self.timelines.remove(&case_id) {
            Some(mut timeline) => {
                timeline.close();
                true
            }
            None => false,
        }
    }

    pub fn open_timelines(&self) -> impl Iterator<Item = CaseId> + '_ {
        self.timelines.keys().copied()
    }

    /// Cancels pending fetches and closes every timeline. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.jurisdictions.cancel();
        self.pois.cancel();
        self.search.cancel();
        for (_, mut timeline) in std::mem::take(&mut self.timelines) {
            timeline.close();
        }
        debug!(
            jurisdictions = %self.jurisdictions.metrics().snapshot(),
            pois = %self.pois.metrics().snapshot(),
            search = %self.search.metrics().snapshot(),
            "map screen closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_loading(&self) -> bool {
        self.jurisdictions.is_loading() || self.pois.is_loading() || self.search.is_loading()
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn viewport_query(&self) -> Option<ViewportQuery> {
        self.viewport
            .map(|vp| ViewportQuery::new(vp.bounds, vp.zoom, self.filters.current().clone()))
    }

    pub fn jurisdictions(&self) -> &ViewportFetcher<JurisdictionsKind> {
        &self.jurisdictions
    }

    pub fn pois(&self) -> &ViewportFetcher<PoisKind> {
        &self.pois
    }

    pub fn search(&self) -> &ViewportFetcher<SearchKind> {
        &self.search
    }

    fn request_viewport(&mut self) -> Vec<ScreenUpdate> {
        let Some(query) = self.viewport_query() else {
            return Vec::new();
        };
        let mut updates = Vec::new();
        if let Some(d) = self.jurisdictions.request(query.clone()) {
            updates.push(ScreenUpdate::Jurisdictions(d));
        }
        if let Some(d) = self.pois.request(query) {
            updates.push(ScreenUpdate::Pois(d));
        }
        updates
    }
}

impl Drop for MapScreen {
    fn drop(&mut self) {
        self.close();
    }
}

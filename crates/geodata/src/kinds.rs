//! The three data kinds behind the map screen.

use std::sync::Arc;

use crate::backend::{BoxFuture, GeodataBackend};
use crate::error::BackendError;
use crate::fetcher::FetchKind;
use crate::key::{BoundsKey, CacheKey, KeyScope, ViewportQuery};
use crate::records::{CaseSummary, JurisdictionCollection, PoiCollection};

/// Administrative boundaries for the visible area.
#[derive(Clone)]
pub struct JurisdictionsKind {
    backend: Arc<dyn GeodataBackend>,
    key: BoundsKey,
}

impl JurisdictionsKind {
    pub fn new(backend: Arc<dyn GeodataBackend>, key: BoundsKey) -> Self {
        Self { backend, key }
    }
}

impl FetchKind for JurisdictionsKind {
    type Query = ViewportQuery;
    type Output = JurisdictionCollection;

    const NAME: &'static str = "jurisdictions";

    fn cache_key(&self, query: &ViewportQuery) -> Option<CacheKey> {
        query
            .bounds
            .is_valid()
            .then(|| self.key.canonicalize_scoped(query, KeyScope::JURISDICTIONS))
    }

    fn fetch(
        &self,
        query: ViewportQuery,
    ) -> BoxFuture<'static, Result<JurisdictionCollection, BackendError>> {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            backend
                .fetch_jurisdiction_boundaries(query.bounds, query.zoom)
                .await
        })
    }
}

/// Points of interest for the enabled POI layers.
#[derive(Clone)]
pub struct PoisKind {
    backend: Arc<dyn GeodataBackend>,
    key: BoundsKey,
}

impl PoisKind {
    pub fn new(backend: Arc<dyn GeodataBackend>, key: BoundsKey) -> Self {
        Self { backend, key }
    }
}

impl FetchKind for PoisKind {
    type Query = ViewportQuery;
    type Output = PoiCollection;

    const NAME: &'static str = "pois";

    fn cache_key(&self, query: &ViewportQuery) -> Option<CacheKey> {
        if !query.bounds.is_valid() || query.filters.poi_types.is_empty() {
            return None;
        }
        Some(self.key.canonicalize_scoped(query, KeyScope::POIS))
    }

    fn fetch(&self, query: ViewportQuery) -> BoxFuture<'static, Result<PoiCollection, BackendError>> {
        let backend = Arc::clone(&self.backend);
        let types = query.filters.enabled_poi_types();
        Box::pin(async move { backend.fetch_points_of_interest(query.bounds, types).await })
    }
}

/// Full-text case search. Always reads the first page.
#[derive(Clone)]
pub struct SearchKind {
    backend: Arc<dyn GeodataBackend>,
    limit: u32,
}

impl SearchKind {
    pub fn new(backend: Arc<dyn GeodataBackend>, limit: u32) -> Self {
        Self { backend, limit }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl FetchKind for SearchKind {
    type Query = String;
    type Output = Vec<CaseSummary>;

    const NAME: &'static str = "search";

    fn cache_key(&self, text: &String) -> Option<CacheKey> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(CacheKey::new(format!("{text}|{}|0", self.limit)))
    }

    fn fetch(&self, text: String) -> BoxFuture<'static, Result<Vec<CaseSummary>, BackendError>> {
        let backend = Arc::clone(&self.backend);
        let limit = self.limit;
        Box::pin(async move {
            backend
                .search_cases(text.trim().to_string(), limit, 0)
                .await
        })
    }
}

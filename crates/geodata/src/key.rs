use std::fmt;

use foundation::GeoBounds;
use serde::Serialize;

use crate::filters::FilterSet;

/// Everything that determines one viewport read: the visible rectangle,
/// the (fractional) zoom level and the active filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportQuery {
    pub bounds: GeoBounds,
    pub zoom: f64,
    pub filters: FilterSet,
}

impl ViewportQuery {
    pub fn new(bounds: GeoBounds, zoom: f64, filters: FilterSet) -> Self {
        Self {
            bounds,
            zoom,
            filters,
        }
    }
}

/// Canonical identity of a read, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which parts of a `ViewportQuery` a read depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyScope {
    pub zoom: bool,
    pub case_facets: bool,
    pub poi_types: bool,
}

impl KeyScope {
    pub const FULL: Self = Self {
        zoom: true,
        case_facets: true,
        poi_types: true,
    };
    /// Boundaries are simplified per zoom level and ignore every filter.
    pub const JURISDICTIONS: Self = Self {
        zoom: true,
        case_facets: false,
        poi_types: false,
    };
    /// POI reads take the bounds and the enabled layers only.
    pub const POIS: Self = Self {
        zoom: false,
        case_facets: false,
        poi_types: true,
    };
}

/// Turns a `ViewportQuery` into a stable `CacheKey`.
///
/// Viewports that are "close enough" share a key:
/// - edges are rounded to `precision` decimal degrees,
/// - zoom is floored to an integer,
/// - filters are serialised in a fixed field order.
///
/// Total and deterministic; non-finite input still yields a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundsKey {
    precision: u32,
}

impl Default for BoundsKey {
    fn default() -> Self {
        Self {
            precision: Self::DEFAULT_PRECISION,
        }
    }
}

impl BoundsKey {
    /// About 11 m at the equator, well below one screen pixel at city zooms.
    pub const DEFAULT_PRECISION: u32 = 4;
    const MAX_PRECISION: u32 = 10;

    pub fn new(precision: u32) -> Self {
        Self {
            precision: precision.min(Self::MAX_PRECISION),
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Full key: bounds, zoom bucket and every filter field.
    pub fn canonicalize(&self, query: &ViewportQuery) -> CacheKey {
        self.canonicalize_scoped(query, KeyScope::FULL)
    }

    /// Key over the parts of `query` selected by `scope`. Bounds are always
    /// included; the other fields keep their position in the full layout.
    pub fn canonicalize_scoped(&self, query: &ViewportQuery, scope: KeyScope) -> CacheKey {
        let b = &query.bounds;
        let p = self.precision as usize;
        let mut key = format!(
            "{:.p$},{:.p$},{:.p$},{:.p$}",
            self.round(b.west),
            self.round(b.south),
            self.round(b.east),
            self.round(b.north),
        );
        if scope.zoom {
            key.push_str(&format!("@{}", zoom_bucket(query.zoom)));
        }
        if scope.case_facets {
            key.push('|');
            key.push_str(&query.filters.canonical_facets());
        }
        if scope.poi_types {
            key.push('|');
            key.push_str(&query.filters.canonical_poi_types());
        }
        CacheKey(key)
    }

    fn round(&self, v: f64) -> f64 {
        let scale = 10f64.powi(self.precision as i32);
        let r = (v * scale).round() / scale;
        // Fold -0.0 into 0.0 so both render identically.
        if r == 0.0 { 0.0 } else { r }
    }
}

/// Canonicalises with the default precision.
pub fn canonicalize(query: &ViewportQuery) -> CacheKey {
    BoundsKey::default().canonicalize(query)
}

fn zoom_bucket(zoom: f64) -> i64 {
    // `as` saturates and maps NaN to 0.
    zoom.floor() as i64
}

//! Typed shapes of everything the backend returns.
//!
//! Every response is decoded into these records at the boundary. Missing
//! required fields, unknown enum values, wrong GeoJSON tags and
//! out-of-range coordinates all fail decoding, and the caller sees a
//! `BackendError::Malformed` instead of a partially-populated value.

use foundation::{
    ActorId, CaseId, EventId, JurisdictionId, PoiId, Timestamp, is_valid_position,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::model::{
    AnimalType, Category, EventKind, JurisdictionLevel, PoiType, Status, UrgencyLevel, VetSubtype,
};

/// `[lng, lat]`
pub type Position = [f64; 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointTag {
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiPolygonTag {
    MultiPolygon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureTag {
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureCollectionTag {
    FeatureCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPoint")]
pub struct Point {
    #[serde(rename = "type")]
    kind: PointTag,
    pub coordinates: Position,
}

#[derive(Deserialize)]
struct RawPoint {
    #[serde(rename = "type")]
    _kind: PointTag,
    coordinates: Position,
}

impl TryFrom<RawPoint> for Point {
    type Error = String;

    fn try_from(raw: RawPoint) -> Result<Self, Self::Error> {
        let [lng, lat] = raw.coordinates;
        Point::new(lng, lat)
    }
}

impl Point {
    pub fn new(lng: f64, lat: f64) -> Result<Self, String> {
        if !is_valid_position(lng, lat) {
            return Err(format!("position out of range: [{lng}, {lat}]"));
        }
        Ok(Self {
            kind: PointTag::Point,
            coordinates: [lng, lat],
        })
    }

    pub fn lng(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }
}

/// Area geometry. `Polygon` input is accepted and normalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArea")]
pub struct MultiPolygon {
    #[serde(rename = "type")]
    kind: MultiPolygonTag,
    pub coordinates: Vec<Vec<Vec<Position>>>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawArea {
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
}

impl TryFrom<RawArea> for MultiPolygon {
    type Error = String;

    fn try_from(raw: RawArea) -> Result<Self, Self::Error> {
        let polygons = match raw {
            RawArea::Polygon { coordinates } => vec![coordinates],
            RawArea::MultiPolygon { coordinates } => coordinates,
        };
        MultiPolygon::new(polygons)
    }
}

impl MultiPolygon {
    pub fn new(polygons: Vec<Vec<Vec<Position>>>) -> Result<Self, String> {
        for polygon in &polygons {
            if polygon.is_empty() {
                return Err("polygon without rings".to_string());
            }
            for ring in polygon {
                if ring.len() < 4 {
                    return Err(format!("ring has {} positions, need at least 4", ring.len()));
                }
                if let Some([lng, lat]) = ring.iter().find(|[lng, lat]| !is_valid_position(*lng, *lat)) {
                    return Err(format!("position out of range: [{lng}, {lat}]"));
                }
            }
        }
        Ok(Self {
            kind: MultiPolygonTag::MultiPolygon,
            coordinates: polygons,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature<G, P> {
    #[serde(rename = "type")]
    kind: FeatureTag,
    pub geometry: G,
    pub properties: P,
}

impl<G, P> Feature<G, P> {
    pub fn new(geometry: G, properties: P) -> Self {
        Self {
            kind: FeatureTag::Feature,
            geometry,
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection<G, P> {
    #[serde(rename = "type")]
    kind: FeatureCollectionTag,
    pub features: Vec<Feature<G, P>>,
}

impl<G, P> FeatureCollection<G, P> {
    pub fn new(features: Vec<Feature<G, P>>) -> Self {
        Self {
            kind: FeatureCollectionTag::FeatureCollection,
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionProperties {
    pub id: JurisdictionId,
    pub name: String,
    pub level: JurisdictionLevel,
    #[serde(default)]
    pub authority_name: Option<String>,
}

pub type JurisdictionCollection = FeatureCollection<MultiPolygon, JurisdictionProperties>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiRecord {
    pub id: PoiId,
    pub poi_type: PoiType,
    #[serde(default)]
    pub vet_subtype: Option<VetSubtype>,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub hours: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    pub lng: f64,
    pub lat: f64,
    #[serde(default)]
    pub jurisdiction_id: Option<JurisdictionId>,
}

pub type PoiCollection = FeatureCollection<Point, PoiRecord>;

impl PoiCollection {
    /// Builds point features from POI rows, rejecting rows with invalid positions.
    pub fn from_rows(rows: Vec<PoiRecord>) -> Result<Self, BackendError> {
        let features = rows
            .into_iter()
            .map(|row| {
                let point = Point::new(row.lng, row.lat)
                    .map_err(|e| BackendError::Malformed(format!("poi {}: {e}", row.id)))?;
                Ok(Feature::new(point, row))
            })
            .collect::<Result<Vec<_>, BackendError>>()?;
        Ok(Self::new(features))
    }
}

/// One full-text search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: CaseId,
    pub category: Category,
    pub animal_type: AnimalType,
    pub description: String,
    pub status: Status,
    pub urgency: UrgencyLevel,
    #[serde(default)]
    pub folio: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub location_geojson: Option<Point>,
    pub rank: f64,
}

/// One entry of a case's history.
///
/// `id` is the de-duplication key; `occurred_at` orders the display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: EventId,
    pub case_id: CaseId,
    #[serde(default)]
    pub actor_id: Option<ActorId>,
    #[serde(rename = "action")]
    pub kind: EventKind,
    #[serde(rename = "created_at")]
    pub occurred_at: Timestamp,
    #[serde(rename = "details", default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Decodes a JSON body into a typed record.
pub fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    Ok(serde_json::from_str(body)?)
}

/// Decodes an already-parsed JSON value into a typed record.
pub fn decode_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, BackendError> {
    Ok(serde_json::from_value(value)?)
}

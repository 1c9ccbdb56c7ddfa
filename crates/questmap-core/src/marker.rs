//! Marker data model
//!
//! A marker is a labeled point on the map. The remote store assigns its
//! identifier; the description is fixed at creation and only the position
//! changes afterwards.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque identifier assigned by the remote store when a marker is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(String);

impl MarkerId {
    /// Wrap a store-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MarkerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MarkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// Position
// ============================================================================

/// Rejected coordinates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}

/// A latitude/longitude pair.
///
/// Field names match the persisted record (`{lat, lng}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    /// Build a validated position.
    pub fn new(lat: f64, lng: f64) -> Result<Self, PositionError> {
        let position = Self { lat, lng };
        position.validate()?;
        Ok(position)
    }

    /// Check that both coordinates are finite and in range.
    ///
    /// Positions decoded from the store skip this check, so the repository
    /// calls it again before issuing a mutation.
    pub fn validate(&self) -> Result<(), PositionError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(PositionError::Latitude(self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(PositionError::Longitude(self.lng));
        }
        Ok(())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.lat, self.lng)
    }
}

// ============================================================================
// Mirror entries
// ============================================================================

/// A marker as held in the repository mirror.
///
/// `id` is `None` while the create call for an optimistic entry is still in
/// flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: Option<MarkerId>,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Marker {
    /// Whether the store has acknowledged this marker.
    pub fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }
}

impl From<MarkerDocument> for Marker {
    fn from(doc: MarkerDocument) -> Self {
        Self {
            id: Some(doc.id),
            position: doc.position,
            description: doc.description,
        }
    }
}

// ============================================================================
// Remote records
// ============================================================================

/// A marker document as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDocument {
    pub id: MarkerId,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Server-assigned creation time; listing order is ascending on this field.
    pub created_at: DateTime<Utc>,
    /// Extra string fields, e.g. the `quest` field some scopes filter on.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl MarkerDocument {
    /// Look up a string field by name, including `description`.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "description" => self.description.as_deref(),
            other => self.tags.get(other).map(String::as_str),
        }
    }
}

/// Attributes for a document about to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMarker {
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl NewMarker {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            description: None,
            tags: BTreeMap::new(),
        }
    }

    /// Builder-style: set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder-style: set an extra string field
    #[must_use]
    pub fn with_tag(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(field.into(), value.into());
        self
    }
}

/// Partial update of an existing document. Only the position is mutable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerPatch {
    pub position: Position,
}

impl MarkerPatch {
    pub fn position(position: Position) -> Self {
        Self { position }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_accepts_bounds() {
        assert!(Position::new(90.0, 180.0).is_ok());
        assert!(Position::new(-90.0, -180.0).is_ok());
        assert!(Position::new(49.842, 24.031).is_ok());
    }

    #[test]
    fn position_rejects_out_of_range() {
        assert_eq!(
            Position::new(90.5, 0.0),
            Err(PositionError::Latitude(90.5))
        );
        assert_eq!(
            Position::new(0.0, -180.1),
            Err(PositionError::Longitude(-180.1))
        );
        assert!(Position::new(f64::NAN, 0.0).is_err());
        assert!(Position::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn document_field_lookup_covers_description_and_tags() {
        let doc = MarkerDocument {
            id: MarkerId::new("a"),
            position: Position { lat: 1.0, lng: 2.0 },
            description: Some("ring".to_string()),
            created_at: Utc::now(),
            tags: BTreeMap::from([("quest".to_string(), "ring".to_string())]),
        };

        assert_eq!(doc.field("description"), Some("ring"));
        assert_eq!(doc.field("quest"), Some("ring"));
        assert_eq!(doc.field("missing"), None);
    }

    #[test]
    fn marker_from_document_is_confirmed() {
        let doc = MarkerDocument {
            id: MarkerId::new("abc"),
            position: Position { lat: 1.0, lng: 2.0 },
            description: None,
            created_at: Utc::now(),
            tags: BTreeMap::new(),
        };

        let marker = Marker::from(doc);
        assert!(marker.is_confirmed());
        assert_eq!(marker.id.as_ref().map(MarkerId::as_str), Some("abc"));
    }

    #[test]
    fn position_serializes_as_lat_lng() {
        let json = serde_json::to_value(Position { lat: 49.8, lng: 24.0 }).unwrap();
        assert_eq!(json, serde_json::json!({"lat": 49.8, "lng": 24.0}));
    }
}

//! Firestore REST wire types
//!
//! Only the parts of the `v1` JSON surface the marker store touches:
//! documents, typed values, commit writes and structured queries.
//!
//! Remote document schema:
//!
//! ```text
//! { position: { lat: double, lng: double },
//!   description?: string,
//!   createdAt: timestamp,
//!   <scope field>?: string }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use questmap_core::{MarkerDocument, MarkerId, NewMarker, Position, ScopeFilter};
use serde::{Deserialize, Serialize};

pub const FIELD_POSITION: &str = "position";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_CREATED_AT: &str = "createdAt";

pub type Fields = BTreeMap<String, Value>;

/// A typed Firestore value, e.g. `{"stringValue": "ring"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(Option<()>),
    BooleanValue(bool),
    /// int64 travels as a decimal string
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(serde_json::Value),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

impl Value {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::StringValue(s) => Some(s),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::DoubleValue(v) => Some(*v),
            Self::IntegerValue(v) => v.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default)]
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name, `projects/{p}/databases/(default)/documents/{collection}/{id}`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

// ============================================================================
// Encoding
// ============================================================================

pub fn position_value(position: Position) -> Value {
    let mut fields = Fields::new();
    fields.insert("lat".to_string(), Value::DoubleValue(position.lat));
    fields.insert("lng".to_string(), Value::DoubleValue(position.lng));
    Value::MapValue(MapValue { fields })
}

/// Fields written for a new marker. `createdAt` is set by a server transform.
pub fn new_marker_fields(marker: &NewMarker) -> Fields {
    let mut fields = Fields::new();
    fields.insert(FIELD_POSITION.to_string(), position_value(marker.position));
    if let Some(description) = &marker.description {
        fields.insert(
            FIELD_DESCRIPTION.to_string(),
            Value::StringValue(description.clone()),
        );
    }
    for (key, value) in &marker.tags {
        fields.insert(key.clone(), Value::StringValue(value.clone()));
    }
    fields
}

// ============================================================================
// Decoding
// ============================================================================

/// Why a remote document could not be mirrored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing position")]
    MissingPosition,
    #[error("invalid position: {0}")]
    InvalidPosition(String),
    #[error("missing document name")]
    MissingName,
}

/// Last path segment of a resource name.
pub fn document_id(name: &str) -> Option<&str> {
    name.rsplit('/').next().filter(|id| !id.is_empty())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl TryFrom<Document> for MarkerDocument {
    type Error = DecodeError;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        let id = document_id(&doc.name).ok_or(DecodeError::MissingName)?;

        let Some(Value::MapValue(position)) = doc.fields.get(FIELD_POSITION) else {
            return Err(DecodeError::MissingPosition);
        };
        let coord = |key: &str| position.fields.get(key).and_then(Value::as_f64);
        let (Some(lat), Some(lng)) = (coord("lat"), coord("lng")) else {
            return Err(DecodeError::MissingPosition);
        };
        let position =
            Position::new(lat, lng).map_err(|e| DecodeError::InvalidPosition(e.to_string()))?;

        let created_at = match doc.fields.get(FIELD_CREATED_AT) {
            Some(Value::TimestampValue(raw)) => parse_timestamp(raw),
            _ => None,
        }
        .or_else(|| doc.create_time.as_deref().and_then(parse_timestamp))
        .unwrap_or_default();

        let description = doc
            .fields
            .get(FIELD_DESCRIPTION)
            .and_then(Value::as_str)
            .map(str::to_string);

        let tags = doc
            .fields
            .iter()
            .filter(|(key, _)| key.as_str() != FIELD_DESCRIPTION)
            .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
            .collect();

        Ok(MarkerDocument {
            id: MarkerId::new(id),
            position,
            description,
            created_at,
            tags,
        })
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CommitRequest {
    pub writes: Vec<Write>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Document>,
    /// Resource name of the document to delete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub update_transforms: Vec<FieldTransform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_document: Option<Precondition>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTransform {
    pub field_path: String,
    pub set_to_server_value: &'static str,
}

impl FieldTransform {
    pub fn request_time(field_path: &str) -> Self {
        Self {
            field_path: field_path.to_string(),
            set_to_server_value: "REQUEST_TIME",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Precondition {
    pub exists: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

#[derive(Debug, Serialize)]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field_filter: FieldFilter,
}

#[derive(Debug, Serialize)]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: &'static str,
    pub value: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

impl RunQueryRequest {
    pub fn new(collection: &str, filter: &ScopeFilter) -> Self {
        let filter = match filter {
            ScopeFilter::All => None,
            ScopeFilter::NonEmpty(field) => Some(Filter {
                field_filter: FieldFilter {
                    field: FieldReference {
                        field_path: field.clone(),
                    },
                    op: "NOT_EQUAL",
                    value: Value::StringValue(String::new()),
                },
            }),
        };
        Self {
            structured_query: StructuredQuery {
                from: vec![CollectionSelector {
                    collection_id: collection.to_string(),
                }],
                filter,
            },
        }
    }
}

/// One element of the `runQuery` response array. Elements without a
/// document only carry progress metadata.
#[derive(Debug, Deserialize)]
pub struct RunQueryItem {
    #[serde(default)]
    pub document: Option<Document>,
}

/// Body of a non-2xx response.
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

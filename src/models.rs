// Core data structures shared by the query pipeline and the HTTP surface

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};

use crate::error::{Error, QueryError, Result};

/// Inclusive time window a query covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// One query of a batch, as received from the host
///
/// The `json` payload is opaque to this crate. It is forwarded to the
/// upstream service as the query's target description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub ref_id: String,

    #[serde(rename = "json", with = "raw_json")]
    pub payload: Bytes,

    pub time_range: TimeRange,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_data_points: Option<u64>,
}

impl Query {
    /// Create a query from a raw JSON payload
    pub fn new(ref_id: impl Into<String>, payload: impl Into<Bytes>, time_range: TimeRange) -> Self {
        Self {
            ref_id: ref_id.into(),
            payload: payload.into(),
            time_range,
            interval_ms: None,
            max_data_points: None,
        }
    }

    /// Set the suggested interval between points
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }

    /// Set the maximum number of points the host can render
    pub fn with_max_data_points(mut self, max_data_points: u64) -> Self {
        self.max_data_points = Some(max_data_points);
        self
    }
}

/// Host-side context identifying which datasource instance a batch targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginContext {
    pub datasource_id: i64,
}

/// A batch of independent queries against one datasource instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub plugin_context: PluginContext,

    #[serde(default)]
    pub queries: Vec<Query>,
}

impl BatchRequest {
    /// Check that every query carries a non-empty, unique ref id
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.queries.len());
        for query in &self.queries {
            if query.ref_id.is_empty() {
                return Err(Error::invalid_batch("query with empty refId"));
            }
            if !seen.insert(query.ref_id.as_str()) {
                return Err(Error::invalid_batch(format!(
                    "duplicate refId: {}",
                    query.ref_id
                )));
            }
        }
        Ok(())
    }
}

/// Logical type of a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Time,
    Number,
    String,
}

impl FieldType {
    /// Parse an upstream column type name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "time" => Some(Self::Time),
            "number" => Some(Self::Number),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Number => "number",
            Self::String => "string",
        }
    }
}

/// Typed column values; `None` marks a null cell
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    Time(Vec<Option<DateTime<Utc>>>),
    Number(Vec<Option<f64>>),
    String(Vec<Option<String>>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Time(v) => v.len(),
            Self::Number(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Time(_) => FieldType::Time,
            Self::Number(_) => FieldType::Number,
            Self::String(_) => FieldType::String,
        }
    }
}

// Times go out as epoch milliseconds, which is what the host expects.
impl Serialize for FieldValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Time(v) => {
                serializer.collect_seq(v.iter().map(|t| t.map(|t| t.timestamp_millis())))
            }
            Self::Number(v) => serializer.collect_seq(v),
            Self::String(v) => serializer.collect_seq(v),
        }
    }
}

/// A named column of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub values: FieldValues,
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn field_type(&self) -> FieldType {
        self.values.field_type()
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Field", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("type", &self.field_type())?;
        state.serialize_field("values", &self.values)?;
        state.end()
    }
}

/// Columnar result table: named fields of equal length
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub name: String,
    pub ref_id: String,
    pub fields: Vec<Field>,
}

impl Frame {
    pub fn new(name: impl Into<String>, ref_id: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            ref_id: ref_id.into(),
            fields,
        }
    }

    /// Number of rows, taken from the first field
    pub fn row_count(&self) -> usize {
        self.fields.first().map(Field::len).unwrap_or(0)
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// First field of type time
    pub fn time_field(&self) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.field_type() == FieldType::Time)
    }

    /// A frame needs a time field and every field must have the same length
    pub fn validate(&self) -> std::result::Result<(), QueryError> {
        let time = self.time_field().ok_or_else(|| {
            QueryError::decode(format!("frame '{}' has no time column", self.name))
        })?;

        let expected = time.len();
        for field in &self.fields {
            if field.len() != expected {
                return Err(QueryError::decode(format!(
                    "frame '{}': column '{}' has {} values, time column '{}' has {}",
                    self.name,
                    field.name,
                    field.len(),
                    time.name,
                    expected
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of one query: decoded frames or the error that stopped it
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Frames(Vec<Frame>),
    Error(QueryError),
}

impl QueryResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Frames(_))
    }

    pub fn frames(&self) -> Option<&[Frame]> {
        match self {
            Self::Frames(frames) => Some(frames),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            Self::Frames(_) => None,
            Self::Error(err) => Some(err),
        }
    }
}

impl From<std::result::Result<Vec<Frame>, QueryError>> for QueryResult {
    fn from(result: std::result::Result<Vec<Frame>, QueryError>) -> Self {
        match result {
            Ok(frames) => Self::Frames(frames),
            Err(err) => Self::Error(err),
        }
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Frames(frames) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("frames", frames)?;
                map.end()
            }
            Self::Error(err) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("error", &err.to_string())?;
                map.serialize_entry("errorCategory", err.category().as_str())?;
                map.end()
            }
        }
    }
}

/// Per-batch results keyed by ref id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet {
    results: HashMap<String, QueryResult>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: HashMap::with_capacity(capacity),
        }
    }

    /// Store the result for a ref id, returning any result it replaced
    pub fn insert(&mut self, ref_id: impl Into<String>, result: QueryResult) -> Option<QueryResult> {
        self.results.insert(ref_id.into(), result)
    }

    pub fn get(&self, ref_id: &str) -> Option<&QueryResult> {
        self.results.get(ref_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &QueryResult)> {
        self.results.iter()
    }

    /// Number of entries holding an error
    pub fn error_count(&self) -> usize {
        self.results.values().filter(|r| !r.is_ok()).count()
    }
}

/// Serde adapter keeping the query payload as raw JSON bytes.
///
/// A JSON string is taken verbatim as the payload text, anything else is
/// re-encoded.
mod raw_json {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) => value.serialize(serializer),
            Err(_) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Bytes, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(text) => Ok(Bytes::from(text)),
            value => serde_json::to_vec(&value)
                .map(Bytes::from)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn range() -> TimeRange {
        TimeRange::new(
            Utc.timestamp_millis_opt(1_450_754_160_000).unwrap(),
            Utc.timestamp_millis_opt(1_450_754_220_000).unwrap(),
        )
    }

    #[test]
    fn test_query_deserialize_object_payload() {
        let json = r#"{
            "refId": "A",
            "json": {"target": "upper_50", "type": "timeserie"},
            "timeRange": {"from": "2015-12-22T03:16:00Z", "to": "2015-12-22T03:17:00Z"},
            "maxDataPoints": 500
        }"#;

        let query: Query = serde_json::from_str(json).unwrap();
        assert_eq!(query.ref_id, "A");
        assert_eq!(query.max_data_points, Some(500));
        assert_eq!(query.interval_ms, None);

        let payload: serde_json::Value = serde_json::from_slice(&query.payload).unwrap();
        assert_eq!(payload["target"], "upper_50");
    }

    #[test]
    fn test_query_deserialize_string_payload_is_kept_verbatim() {
        let json = r#"{
            "refId": "B",
            "json": "{not json",
            "timeRange": {"from": "2015-12-22T03:16:00Z", "to": "2015-12-22T03:17:00Z"}
        }"#;

        let query: Query = serde_json::from_str(json).unwrap();
        assert_eq!(&query.payload[..], b"{not json");
    }

    #[test]
    fn test_batch_validate_rejects_duplicates() {
        let batch = BatchRequest {
            plugin_context: PluginContext { datasource_id: 1 },
            queries: vec![
                Query::new("A", "{}", range()),
                Query::new("A", "{}", range()),
            ],
        };

        let err = batch.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidBatch(_)));
    }

    #[test]
    fn test_batch_validate_rejects_empty_ref_id() {
        let batch = BatchRequest {
            plugin_context: PluginContext { datasource_id: 1 },
            queries: vec![Query::new("", "{}", range())],
        };
        assert!(batch.validate().is_err());
    }

    #[test]
    fn test_empty_batch_is_valid() {
        let batch: BatchRequest =
            serde_json::from_str(r#"{"pluginContext": {"datasourceId": 3}}"#).unwrap();
        assert!(batch.queries.is_empty());
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn test_frame_validate_requires_time_field() {
        let frame = Frame::new(
            "cpu",
            "A",
            vec![Field::new("value", FieldValues::Number(vec![Some(1.0)]))],
        );
        assert!(matches!(frame.validate(), Err(QueryError::Decode(_))));
    }

    #[test]
    fn test_frame_validate_rejects_mismatched_lengths() {
        let r = range();
        let frame = Frame::new(
            "cpu",
            "A",
            vec![
                Field::new("time", FieldValues::Time(vec![Some(r.from), Some(r.to)])),
                Field::new("value", FieldValues::Number(vec![Some(1.0)])),
            ],
        );
        let err = frame.validate().unwrap_err();
        assert!(err.to_string().contains("'value' has 1 values"));
    }

    #[test]
    fn test_field_serializes_times_as_millis() {
        let r = range();
        let field = Field::new("time", FieldValues::Time(vec![Some(r.from), None]));
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "time", "type": "time", "values": [1450754160000i64, null]})
        );
    }

    #[test]
    fn test_query_result_serialization() {
        let err = QueryResult::Error(QueryError::Cancelled);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "Query cancelled");
        assert_eq!(json["errorCategory"], "cancelled");

        let ok = QueryResult::Frames(vec![]);
        assert_eq!(serde_json::to_value(&ok).unwrap(), serde_json::json!({"frames": []}));
    }

    #[test]
    fn test_result_set_counts() {
        let mut results = ResultSet::new();
        results.insert("A", QueryResult::Frames(vec![]));
        results.insert("B", QueryResult::Error(QueryError::decode("bad")));

        assert_eq!(results.len(), 2);
        assert_eq!(results.error_count(), 1);
        assert!(results.get("A").unwrap().is_ok());
    }
}

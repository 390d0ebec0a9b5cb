//! Translation of a host query into an upstream request
//!
//! The upstream expects
//! `{"range": {"from": ..., "to": ...}, "targets": [...]}` posted to
//! `<base url>/query`. This step is pure: no I/O and no shared state.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use super::instance::InstanceSettings;
use crate::error::QueryError;
use crate::models::Query;

/// A serialized request for one query, ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub ref_id: String,
    pub url: String,
    pub body: Bytes,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryPayload {
    range: RangePayload,
    targets: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_data_points: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RangePayload {
    from: String,
    to: String,
}

/// Format an instant the way the upstream expects, e.g. `2016-10-31T06:33:44.866Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the upstream request for a query
///
/// # Errors
///
/// Returns `QueryError::MalformedQuery` if the payload is not JSON, is not an
/// object or array, or if the time range is inverted.
pub fn build_query_request(
    query: &Query,
    settings: &InstanceSettings,
) -> Result<UpstreamRequest, QueryError> {
    let range = &query.time_range;
    if range.from > range.to {
        return Err(QueryError::malformed(format!(
            "time range start {} is after end {}",
            format_timestamp(&range.from),
            format_timestamp(&range.to)
        )));
    }

    let payload = QueryPayload {
        range: RangePayload {
            from: format_timestamp(&range.from),
            to: format_timestamp(&range.to),
        },
        targets: parse_targets(query)?,
        interval_ms: query.interval_ms,
        max_data_points: query.max_data_points,
    };

    let body = serde_json::to_vec(&payload)
        .map_err(|e| QueryError::malformed(format!("failed to serialize payload: {e}")))?;

    Ok(UpstreamRequest {
        ref_id: query.ref_id.clone(),
        url: settings.query_url(),
        body: Bytes::from(body),
    })
}

fn parse_targets(query: &Query) -> Result<Vec<Value>, QueryError> {
    let value: Value = serde_json::from_slice(&query.payload)
        .map_err(|e| QueryError::malformed(format!("query payload is not valid JSON: {e}")))?;

    match value {
        Value::Array(targets) => Ok(targets),
        Value::Object(mut target) => {
            target
                .entry("refId")
                .or_insert_with(|| Value::String(query.ref_id.clone()));
            Ok(vec![Value::Object(target)])
        }
        other => Err(QueryError::malformed(format!(
            "query payload must be a JSON object or array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeRange;
    use chrono::TimeZone;
    use serde_json::json;

    fn settings() -> InstanceSettings {
        InstanceSettings::new(1, "test", "http://localhost:3003").unwrap()
    }

    fn range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2016, 10, 31, 6, 33, 44).unwrap(),
            Utc.with_ymd_and_hms(2016, 10, 31, 12, 33, 44).unwrap(),
        )
    }

    fn body_of(request: &UpstreamRequest) -> Value {
        serde_json::from_slice(&request.body).unwrap()
    }

    #[test]
    fn test_object_payload_is_wrapped_and_tagged() {
        let query = Query::new("A", r#"{"target":"upper_50","type":"timeserie"}"#, range());
        let request = build_query_request(&query, &settings()).unwrap();

        assert_eq!(request.url, "http://localhost:3003/query");
        assert_eq!(request.ref_id, "A");
        assert_eq!(
            body_of(&request),
            json!({
                "range": {"from": "2016-10-31T06:33:44.000Z", "to": "2016-10-31T12:33:44.000Z"},
                "targets": [{"target": "upper_50", "type": "timeserie", "refId": "A"}]
            })
        );
    }

    #[test]
    fn test_existing_ref_id_is_not_overwritten() {
        let query = Query::new("A", r#"{"target":"x","refId":"custom"}"#, range());
        let body = body_of(&build_query_request(&query, &settings()).unwrap());
        assert_eq!(body["targets"][0]["refId"], "custom");
    }

    #[test]
    fn test_array_payload_passes_through() {
        let query = Query::new("B", r#"[{"target":"a"},{"target":"b"}]"#, range());
        let body = body_of(&build_query_request(&query, &settings()).unwrap());
        assert_eq!(body["targets"], json!([{"target": "a"}, {"target": "b"}]));
    }

    #[test]
    fn test_optional_hints_are_forwarded() {
        let query = Query::new("C", r#"{"target":"a"}"#, range())
            .with_interval_ms(30_000)
            .with_max_data_points(1_000);
        let body = body_of(&build_query_request(&query, &settings()).unwrap());
        assert_eq!(body["intervalMs"], 30_000);
        assert_eq!(body["maxDataPoints"], 1_000);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let query = Query::new("A", "{not json", range());
        let err = build_query_request(&query, &settings()).unwrap_err();
        assert!(matches!(err, QueryError::MalformedQuery(_)));
    }

    #[test]
    fn test_scalar_payload_is_malformed() {
        let query = Query::new("A", "42", range());
        let err = build_query_request(&query, &settings()).unwrap_err();
        assert!(err.to_string().contains("got number"));
    }

    #[test]
    fn test_inverted_range_is_malformed() {
        let r = range();
        let query = Query::new("A", "{}", TimeRange::new(r.to, r.from));
        assert!(matches!(
            build_query_request(&query, &settings()),
            Err(QueryError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_format_timestamp_millis() {
        let ts = Utc.timestamp_millis_opt(1_477_895_624_866).unwrap();
        assert_eq!(format_timestamp(&ts), "2016-10-31T06:33:44.866Z");
    }
}

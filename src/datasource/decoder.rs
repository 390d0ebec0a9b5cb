//! Decoding of upstream response bodies into frames
//!
//! The upstream answers with a JSON array. Each element is one of:
//!
//! - a time series: `{"target": "cpu", "datapoints": [[value, epoch_ms], ...]}`
//! - a table: `{"type": "table", "columns": [{"text", "type"}], "rows": [[...]]}`
//! - a columnar frame: `{"name": "cpu", "fields": [{"name", "type", "values"}]}`
//!
//! Every element becomes one [`Frame`]. A frame must contain a time column and
//! all of its columns must have the same length, otherwise the whole query
//! fails with `QueryError::Decode`.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::QueryError;
use crate::models::{Field, FieldType, FieldValues, Frame, Query};

#[derive(Debug, Deserialize)]
struct SeriesItem {
    target: String,
    #[serde(default)]
    datapoints: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct TableColumn {
    text: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableItem {
    columns: Vec<TableColumn>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ColumnarField {
    name: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ColumnarItem {
    #[serde(default)]
    name: Option<String>,
    fields: Vec<ColumnarField>,
}

/// Decode an upstream body into the frames of `query`'s result
pub fn decode_response(query: &Query, body: Bytes) -> Result<Vec<Frame>, QueryError> {
    let items: Vec<Value> = serde_json::from_slice(&body)
        .map_err(|e| QueryError::decode(format!("response is not a JSON array: {e}")))?;

    let frames = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| decode_item(query, index, item))
        .collect::<Result<Vec<_>, _>>()?;

    for frame in &frames {
        frame.validate()?;
    }

    tracing::debug!(
        ref_id = %query.ref_id,
        frames = frames.len(),
        rows = frames.iter().map(Frame::row_count).sum::<usize>(),
        "Decoded upstream response"
    );

    Ok(frames)
}

fn decode_item(query: &Query, index: usize, item: Value) -> Result<Frame, QueryError> {
    let Value::Object(map) = &item else {
        return Err(QueryError::decode(format!(
            "response item {index} is not an object"
        )));
    };

    let is_frame = map.contains_key("fields");
    let is_table = map.get("type").and_then(Value::as_str) == Some("table")
        || map.contains_key("columns");
    let is_series = map.contains_key("datapoints");

    if is_frame {
        let parsed: ColumnarItem = from_item(index, item)?;
        decode_columnar(query, index, parsed)
    } else if is_table {
        let parsed: TableItem = from_item(index, item)?;
        decode_table(query, index, parsed)
    } else if is_series {
        let parsed: SeriesItem = from_item(index, item)?;
        decode_series(query, parsed)
    } else {
        Err(QueryError::decode(format!(
            "response item {index} is neither a series, a table nor a frame"
        )))
    }
}

fn from_item<T: for<'de> Deserialize<'de>>(index: usize, item: Value) -> Result<T, QueryError> {
    serde_json::from_value(item)
        .map_err(|e| QueryError::decode(format!("response item {index}: {e}")))
}

fn decode_series(query: &Query, series: SeriesItem) -> Result<Frame, QueryError> {
    let mut times = Vec::with_capacity(series.datapoints.len());
    let mut values = Vec::with_capacity(series.datapoints.len());

    for (i, point) in series.datapoints.iter().enumerate() {
        let [value, ts] = point.as_slice() else {
            return Err(QueryError::decode(format!(
                "series '{}': datapoint {i} has {} elements, expected [value, timestamp]",
                series.target,
                point.len()
            )));
        };
        values.push(number_cell(value).map_err(|e| cell_error(&series.target, "value", i, e))?);
        times.push(time_cell(ts).map_err(|e| cell_error(&series.target, "time", i, e))?);
    }

    Ok(Frame::new(
        series.target,
        query.ref_id.clone(),
        vec![
            Field::new("time", FieldValues::Time(times)),
            Field::new("value", FieldValues::Number(values)),
        ],
    ))
}

fn decode_table(query: &Query, index: usize, table: TableItem) -> Result<Frame, QueryError> {
    let width = table.columns.len();
    if let Some((row, cells)) = table
        .rows
        .iter()
        .enumerate()
        .find(|(_, cells)| cells.len() != width)
    {
        return Err(QueryError::decode(format!(
            "table {index}: row {row} has {} cells, expected {width} columns",
            cells.len()
        )));
    }

    let fields = table
        .columns
        .iter()
        .enumerate()
        .map(|(col, column)| {
            let cells: Vec<&Value> = table.rows.iter().map(|row| &row[col]).collect();
            let kind = column_type(column.kind.as_deref(), &cells, &column.text)?;
            build_field(&column.text, kind, cells)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Frame::new(format!("table_{index}"), query.ref_id.clone(), fields))
}

fn decode_columnar(query: &Query, index: usize, item: ColumnarItem) -> Result<Frame, QueryError> {
    let fields = item
        .fields
        .iter()
        .map(|field| {
            let cells: Vec<&Value> = field.values.iter().collect();
            let kind = column_type(field.kind.as_deref(), &cells, &field.name)?;
            build_field(&field.name, kind, cells)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let name = item.name.unwrap_or_else(|| format!("frame_{index}"));
    Ok(Frame::new(name, query.ref_id.clone(), fields))
}

/// Resolve a declared column type, inferring it when the upstream leaves it out
///
/// A column named `time` (any case) is a time column. Otherwise the first
/// non-null cell decides: RFC 3339 strings are times, numbers are numbers and
/// anything else is a string.
fn column_type(declared: Option<&str>, cells: &[&Value], name: &str) -> Result<FieldType, QueryError> {
    if let Some(kind) = declared {
        return FieldType::parse(kind).ok_or_else(|| {
            QueryError::decode(format!("column '{name}' has unknown type '{kind}'"))
        });
    }

    if name.eq_ignore_ascii_case("time") {
        return Ok(FieldType::Time);
    }

    Ok(match cells.iter().find(|v| !v.is_null()) {
        Some(Value::Number(_)) => FieldType::Number,
        Some(Value::String(s)) if DateTime::parse_from_rfc3339(s).is_ok() => FieldType::Time,
        _ => FieldType::String,
    })
}

fn build_field(name: &str, kind: FieldType, cells: Vec<&Value>) -> Result<Field, QueryError> {
    let err = |row: usize, e: String| cell_error(name, kind.as_str(), row, e);

    let values = match kind {
        FieldType::Time => FieldValues::Time(
            cells
                .into_iter()
                .enumerate()
                .map(|(row, v)| time_cell(v).map_err(|e| err(row, e)))
                .collect::<Result<_, _>>()?,
        ),
        FieldType::Number => FieldValues::Number(
            cells
                .into_iter()
                .enumerate()
                .map(|(row, v)| number_cell(v).map_err(|e| err(row, e)))
                .collect::<Result<_, _>>()?,
        ),
        FieldType::String => FieldValues::String(
            cells
                .into_iter()
                .enumerate()
                .map(|(row, v)| string_cell(v).map_err(|e| err(row, e)))
                .collect::<Result<_, _>>()?,
        ),
    };

    Ok(Field::new(name, values))
}

fn cell_error(column: &str, kind: &str, row: usize, reason: String) -> QueryError {
    QueryError::decode(format!("column '{column}' ({kind}), row {row}: {reason}"))
}

fn time_cell(value: &Value) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            // Fractional milliseconds round to the nearest millisecond.
            let millis = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .ok_or_else(|| format!("timestamp {n} is out of range"))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(Some)
                .ok_or_else(|| format!("timestamp {n} is out of range"))
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| format!("invalid timestamp '{s}': {e}")),
        other => Err(format!("expected a timestamp, got {other}")),
    }
}

fn number_cell(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("number {n} is not representable")),
        other => Err(format!("expected a number, got {other}")),
    }
}

fn string_cell(value: &Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(_) | Value::Bool(_) => Ok(Some(value.to_string())),
        other => Err(format!("expected a scalar, got {other}")),
    }
}

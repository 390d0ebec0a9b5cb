//! Common test utilities

use chrono::{DateTime, TimeZone, Utc};
use jsonbridge::datasource::{ClientConfig, HttpUpstreamClient, InstanceSettings, QueryCoordinator};
use jsonbridge::models::{Query, TimeRange};
use std::sync::Arc;

pub const T0_MS: i64 = 1_450_754_160_000;
pub const T1_MS: i64 = 1_450_754_220_000;

pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(T0_MS).unwrap()
}

pub fn t1() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(T1_MS).unwrap()
}

/// Create a query for a simple named target over [T0, T1]
pub fn target_query(ref_id: &str, target: &str) -> Query {
    Query::new(
        ref_id,
        format!(r#"{{"target":"{target}","type":"timeserie"}}"#),
        TimeRange::new(t0(), t1()),
    )
}

/// Two-point series body for the given target
pub fn two_point_series(target: &str) -> String {
    format!(r#"[{{"target":"{target}","datapoints":[[10,{T0_MS}],[20,{T1_MS}]]}}]"#)
}

/// Coordinator backed by a real HTTP client
#[allow(dead_code)]
pub fn http_coordinator(config: &ClientConfig) -> QueryCoordinator {
    let client = HttpUpstreamClient::new(config).unwrap();
    QueryCoordinator::new(Arc::new(client))
}

/// Settings pointing at a mock server
#[allow(dead_code)]
pub fn settings_for(uri: &str) -> Arc<InstanceSettings> {
    Arc::new(InstanceSettings::new(1, "mock", uri).unwrap())
}

//! Fan-out of a query batch to the upstream service
//!
//! Every query of a batch runs as its own tokio task:
//!
//! ```text
//! Created -> Translating -> Calling -> Decoding -> Succeeded
//!                 \             \           \
//!                  `-------------`-----------`--> Failed
//! ```
//!
//! Tasks share nothing but the upstream client's connection pool. Each one
//! hands back exactly one [`QueryResult`], and the coordinator waits for all
//! of them before returning. A failing query never cancels or delays its
//! siblings.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::client::UpstreamClient;
use super::decoder::decode_response;
use super::instance::InstanceSettings;
use super::request::build_query_request;
use crate::error::QueryError;
use crate::metrics;
use crate::models::{Frame, Query, QueryResult, ResultSet};

/// Lifecycle of a single query task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Created,
    Translating,
    Calling,
    Decoding,
    Succeeded,
    Failed,
}

impl QueryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Translating => "translating",
            Self::Calling => "calling",
            Self::Decoding => "decoding",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn enter(&mut self, next: QueryStage) {
        debug_assert!(!self.is_terminal(), "no transition out of {self}");
        tracing::debug!(from = %self, to = %next, "Query stage");
        *self = next;
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs batches of queries concurrently against one upstream client
#[derive(Clone)]
pub struct QueryCoordinator {
    client: Arc<dyn UpstreamClient>,
}

impl QueryCoordinator {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }

    /// Run every query of a batch and collect one result per ref id
    ///
    /// Blocks until all queries have finished. Cancelling `cancel` makes
    /// in-flight upstream calls return `QueryError::Cancelled`; dropping the
    /// returned future has the same effect on the spawned tasks.
    pub async fn query_data(
        &self,
        settings: Arc<InstanceSettings>,
        queries: Vec<Query>,
        cancel: &CancellationToken,
    ) -> ResultSet {
        if queries.is_empty() {
            return ResultSet::new();
        }

        let started = Instant::now();
        let total = queries.len();

        let batch_cancel = cancel.child_token();
        let _abort_on_drop = batch_cancel.clone().drop_guard();

        let (ref_ids, handles): (Vec<_>, Vec<_>) = queries
            .into_iter()
            .map(|query| {
                let ref_id = query.ref_id.clone();
                let span = tracing::debug_span!("query", ref_id = %ref_id);
                let task = run_query(
                    Arc::clone(&self.client),
                    Arc::clone(&settings),
                    query,
                    batch_cancel.clone(),
                );
                (ref_id, tokio::spawn(task.instrument(span)))
            })
            .unzip();

        let outcomes = futures::future::join_all(handles).await;

        let mut results = ResultSet::with_capacity(total);
        for (ref_id, outcome) in ref_ids.into_iter().zip(outcomes) {
            let result = outcome.unwrap_or_else(|e| {
                tracing::error!(ref_id = %ref_id, error = %e, "Query task did not complete");
                QueryResult::Error(QueryError::TaskFailed(e.to_string()))
            });
            metrics::record_query_outcome(outcome_label(&result));
            results.insert(ref_id, result);
        }

        let elapsed = started.elapsed();
        metrics::observe_batch_duration(elapsed.as_secs_f64());
        tracing::info!(
            queries = total,
            failed = results.error_count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Batch completed"
        );

        results
    }
}

fn outcome_label(result: &QueryResult) -> &'static str {
    match result {
        QueryResult::Frames(_) => "ok",
        QueryResult::Error(err) => err.category().as_str(),
    }
}

async fn run_query(
    client: Arc<dyn UpstreamClient>,
    settings: Arc<InstanceSettings>,
    query: Query,
    cancel: CancellationToken,
) -> QueryResult {
    let mut stage = QueryStage::Created;
    let result = run_stages(client.as_ref(), &settings, &query, &cancel, &mut stage).await;

    match &result {
        Ok(frames) => {
            stage.enter(QueryStage::Succeeded);
            tracing::debug!(frames = frames.len(), "Query succeeded");
        }
        Err(err) => {
            tracing::warn!(
                stage = %stage,
                error = %err,
                retryable = err.is_retryable(),
                "Query failed"
            );
            stage.enter(QueryStage::Failed);
        }
    }

    result.into()
}

async fn run_stages(
    client: &dyn UpstreamClient,
    settings: &InstanceSettings,
    query: &Query,
    cancel: &CancellationToken,
    stage: &mut QueryStage,
) -> Result<Vec<Frame>, QueryError> {
    stage.enter(QueryStage::Translating);
    let request = build_query_request(query, settings)?;

    stage.enter(QueryStage::Calling);
    let body = client.execute(request, cancel).await?;

    stage.enter(QueryStage::Decoding);
    decode_response(query, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::request::UpstreamRequest;
    use crate::models::TimeRange;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every request with a one-point series named after the ref id,
    /// except ref ids starting with "fail", which get a 500
    struct StubClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamClient for StubClient {
        async fn execute(
            &self,
            request: UpstreamRequest,
            _cancel: &CancellationToken,
        ) -> Result<Bytes, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.ref_id.starts_with("fail") {
                return Err(QueryError::UpstreamStatus {
                    status: 500,
                    message: "Internal Server Error".to_string(),
                });
            }
            let body = format!(
                r#"[{{"target":"{}","datapoints":[[1,1450754160000]]}}]"#,
                request.ref_id
            );
            Ok(Bytes::from(body))
        }
    }

    fn coordinator() -> (QueryCoordinator, Arc<StubClient>) {
        let client = Arc::new(StubClient {
            calls: AtomicUsize::new(0),
        });
        (QueryCoordinator::new(client.clone()), client)
    }

    fn settings() -> Arc<InstanceSettings> {
        Arc::new(InstanceSettings::new(1, "stub", "http://stub").unwrap())
    }

    fn query(ref_id: &str, payload: &str) -> Query {
        Query::new(
            ref_id,
            payload.to_string(),
            TimeRange::new(
                Utc.timestamp_millis_opt(1_450_754_160_000).unwrap(),
                Utc.timestamp_millis_opt(1_450_754_220_000).unwrap(),
            ),
        )
    }

    #[test]
    fn test_stage_terminal() {
        assert!(QueryStage::Succeeded.is_terminal());
        assert!(QueryStage::Failed.is_terminal());
        assert!(!QueryStage::Calling.is_terminal());
        assert_eq!(QueryStage::Decoding.to_string(), "decoding");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (coordinator, client) = coordinator();
        let results = coordinator
            .query_data(settings(), vec![], &CancellationToken::new())
            .await;

        assert!(results.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (coordinator, _client) = coordinator();
        let queries = vec![
            query("A", r#"{"target":"a"}"#),
            query("fail_B", r#"{"target":"b"}"#),
            query("C", "not json"),
        ];

        let results = coordinator
            .query_data(settings(), queries, &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.get("A").unwrap().frames().unwrap()[0].name, "A");
        assert!(matches!(
            results.get("fail_B").unwrap().error(),
            Some(QueryError::UpstreamStatus { status: 500, .. })
        ));
        assert!(matches!(
            results.get("C").unwrap().error(),
            Some(QueryError::MalformedQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_query_never_reaches_client() {
        let (coordinator, client) = coordinator();
        let results = coordinator
            .query_data(settings(), vec![query("A", "[")], &CancellationToken::new())
            .await;

        assert_eq!(results.error_count(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}

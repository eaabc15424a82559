use crate::metrics_defs::{REQUEST_DURATION, REQUESTS};
use async_trait::async_trait;
use http::HeaderValue;
use hyper::body::Bytes;
use hyper::{Request, Response};
use shared::http::TRACE_ID_HEADER;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Per-request correlation data, created by the trace filter and carried in
/// request extensions. Read-only for everything downstream.
#[derive(Clone, Debug)]
pub struct TraceContext {
    pub trace_id: String,
    pub start: Instant,
}

/// One stage of the gateway's request pipeline.
///
/// Filters may inspect or mutate the request, do work before and after the
/// downstream stages, or answer directly without forwarding.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Position in the chain; lower values run earlier.
    fn order(&self) -> i32;

    /// Handle the exchange. `next` is consumed by value, so a filter either
    /// runs the rest of the chain exactly once or deliberately
    /// short-circuits by returning its own response.
    async fn apply(&self, req: Request<Bytes>, next: Next<'_>) -> Response<Bytes>;
}

/// Terminal stage the chain dispatches into once every filter has run.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn handle(&self, req: Request<Bytes>) -> Response<Bytes>;
}

/// The remainder of the chain as seen by one filter.
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    endpoint: &'a dyn Endpoint,
}

impl Next<'_> {
    pub async fn run(self, req: Request<Bytes>) -> Response<Bytes> {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                filter
                    .apply(
                        req,
                        Next {
                            filters: rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.handle(req).await,
        }
    }
}

/// Ordered filter pipeline ending in an endpoint.
///
/// Filters are sorted ascending by their order value at construction, so
/// execution order within a request is fixed and deterministic.
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
    endpoint: Arc<dyn Endpoint>,
}

impl FilterChain {
    pub fn new(mut filters: Vec<Arc<dyn Filter>>, endpoint: Arc<dyn Endpoint>) -> Self {
        filters.sort_by_key(|filter| filter.order());
        FilterChain { filters, endpoint }
    }

    pub async fn run(&self, req: Request<Bytes>) -> Response<Bytes> {
        Next {
            filters: &self.filters,
            endpoint: self.endpoint.as_ref(),
        }
        .run(req)
        .await
    }
}

/// Runs first in the chain.
pub const TRACE_FILTER_ORDER: i32 = -100;

/// Assigns every inbound request a fresh trace id, forwards it as the
/// `x-trace-id` header and a `TraceContext` extension, and logs entry and
/// exit under that id so the two lines can be correlated.
pub struct TraceFilter;

impl TraceFilter {
    fn new_trace_id() -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        id
    }
}

#[async_trait]
impl Filter for TraceFilter {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn order(&self) -> i32 {
        TRACE_FILTER_ORDER
    }

    async fn apply(&self, mut req: Request<Bytes>, next: Next<'_>) -> Response<Bytes> {
        let trace_id = Self::new_trace_id();
        let origin = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_string();

        tracing::info!(
            trace_id,
            method = %req.method(),
            path = %req.uri().path(),
            origin,
            "request received"
        );

        let start = Instant::now();
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            req.headers_mut().insert(TRACE_ID_HEADER, value);
        }
        req.extensions_mut().insert(TraceContext {
            trace_id: trace_id.clone(),
            start,
        });

        let mut response = next.run(req).await;

        let status = response.status();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if status.is_server_error() {
            tracing::error!(trace_id, status = %status, elapsed_ms, "request failed");
        } else {
            tracing::info!(trace_id, status = %status, elapsed_ms, "request completed");
        }

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert(TRACE_ID_HEADER, value);
        }
        response
    }
}

/// Counts requests and records chain duration, tagged by status class.
pub struct MetricsFilter;

#[async_trait]
impl Filter for MetricsFilter {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn order(&self) -> i32 {
        0
    }

    async fn apply(&self, req: Request<Bytes>, next: Next<'_>) -> Response<Bytes> {
        counter!(REQUESTS).increment(1);
        let started = Instant::now();

        let response = next.run(req).await;

        let status_class = match response.status().as_u16() / 100 {
            2 => "2xx",
            4 => "4xx",
            5 => "5xx",
            _ => "other",
        };
        histogram!(REQUEST_DURATION, "status" => status_class)
            .record(started.elapsed().as_secs_f64());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn test_request() -> Request<Bytes> {
        Request::builder()
            .uri("/api/aggregate/user-1")
            .body(Bytes::new())
            .unwrap()
    }

    struct RecordingFilter {
        label: &'static str,
        order: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Filter for RecordingFilter {
        fn name(&self) -> &'static str {
            self.label
        }

        fn order(&self) -> i32 {
            self.order
        }

        async fn apply(&self, req: Request<Bytes>, next: Next<'_>) -> Response<Bytes> {
            self.log.lock().push(format!("{}:pre", self.label));
            let response = next.run(req).await;
            self.log.lock().push(format!("{}:post", self.label));
            response
        }
    }

    struct RecordingEndpoint {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Endpoint for RecordingEndpoint {
        async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
            self.log.lock().push("endpoint".to_string());
            // Echo what the filters attached, for assertions.
            let trace_header = req
                .headers()
                .get(TRACE_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let context_id = req
                .extensions()
                .get::<TraceContext>()
                .map(|context| context.trace_id.clone())
                .unwrap_or_default();
            Response::new(Bytes::from(format!("{trace_header}|{context_id}")))
        }
    }

    struct ShortCircuitFilter;

    #[async_trait]
    impl Filter for ShortCircuitFilter {
        fn name(&self) -> &'static str {
            "short-circuit"
        }

        fn order(&self) -> i32 {
            -50
        }

        async fn apply(&self, _req: Request<Bytes>, _next: Next<'_>) -> Response<Bytes> {
            Response::new(Bytes::from_static(b"blocked"))
        }
    }

    #[tokio::test]
    async fn filters_run_in_ascending_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(
            vec![
                Arc::new(RecordingFilter {
                    label: "late",
                    order: 10,
                    log: log.clone(),
                }),
                Arc::new(RecordingFilter {
                    label: "early",
                    order: -5,
                    log: log.clone(),
                }),
            ],
            Arc::new(RecordingEndpoint { log: log.clone() }),
        );

        chain.run(test_request()).await;

        assert_eq!(
            *log.lock(),
            vec!["early:pre", "late:pre", "endpoint", "late:post", "early:post"]
        );
    }

    #[tokio::test]
    async fn trace_filter_attaches_header_context_and_response_header() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(
            vec![Arc::new(TraceFilter)],
            Arc::new(RecordingEndpoint { log }),
        );

        let response = chain.run(test_request()).await;

        let response_id = response
            .headers()
            .get(TRACE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert_eq!(response_id.len(), 8);

        let body = String::from_utf8(response.body().to_vec()).unwrap();
        let (header_id, context_id) = body.split_once('|').unwrap();
        assert_eq!(header_id, response_id);
        assert_eq!(context_id, response_id);
    }

    #[tokio::test]
    async fn each_request_gets_its_own_trace_id() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(
            vec![Arc::new(TraceFilter)],
            Arc::new(RecordingEndpoint { log }),
        );

        let first = chain.run(test_request()).await;
        let second = chain.run(test_request()).await;

        let id = |response: &Response<Bytes>| {
            response
                .headers()
                .get(TRACE_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        assert_ne!(id(&first), id(&second));
    }

    #[tokio::test]
    async fn a_filter_can_short_circuit_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(
            vec![Arc::new(ShortCircuitFilter)],
            Arc::new(RecordingEndpoint { log: log.clone() }),
        );

        let response = chain.run(test_request()).await;

        assert_eq!(response.body().as_ref(), b"blocked");
        assert!(log.lock().is_empty());
    }
}

use crate::errors::GatewayError;
use crate::filter::{Endpoint, TraceContext};
use aggregator::{AggregateRecord, AggregationKey, Aggregator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use hyper::body::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

pub const AGGREGATE_PATH_PREFIX: &str = "/api/aggregate/";

/// Envelope wrapping every API answer, degraded or not.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<AggregateRecord>,
    pub message: String,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ApiResponse {
    pub fn success(data: AggregateRecord, message: impl Into<String>, trace_id: &str) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            message: message.into(),
            trace_id: trace_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>, trace_id: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            message: message.into(),
            trace_id: trace_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// API handler fronting the aggregator.
///
/// Upstream degradation is not an error here: a partial aggregate is a 200
/// with the note in the message. Only a malformed request or an unexpected
/// internal fault produces an error envelope.
pub struct ApiEndpoint {
    aggregator: Arc<Aggregator>,
}

impl ApiEndpoint {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        ApiEndpoint { aggregator }
    }

    async fn respond(
        &self,
        req: &Request<Bytes>,
        trace_id: &str,
    ) -> Result<Response<Bytes>, GatewayError> {
        let path = req.uri().path();
        match (req.method(), path.strip_prefix(AGGREGATE_PATH_PREFIX)) {
            (&Method::GET, Some(raw_key)) => match raw_key.parse::<AggregationKey>() {
                Ok(key) => {
                    let record = self.aggregator.get_aggregate(&key, trace_id).await;
                    let message = record
                        .note
                        .clone()
                        .unwrap_or_else(|| "Success".to_string());
                    json_response(
                        StatusCode::OK,
                        &ApiResponse::success(record, message, trace_id),
                    )
                }
                Err(e) => {
                    tracing::warn!(
                        trace_id,
                        key = raw_key,
                        error = %e,
                        "rejecting malformed aggregation key"
                    );
                    json_response(
                        StatusCode::BAD_REQUEST,
                        &ApiResponse::error(e.to_string(), trace_id),
                    )
                }
            },
            _ => json_response(
                StatusCode::NOT_FOUND,
                &ApiResponse::error("no such route", trace_id),
            ),
        }
    }
}

#[async_trait]
impl Endpoint for ApiEndpoint {
    async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        let trace_id = req
            .extensions()
            .get::<TraceContext>()
            .map(|context| context.trace_id.clone())
            .unwrap_or_default();

        match self.respond(&req, &trace_id).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    trace_id,
                    method = %req.method(),
                    path = %req.uri().path(),
                    error = %e,
                    "internal error handling request"
                );
                internal_error_response(&trace_id)
            }
        }
    }
}

fn json_response(
    status: StatusCode,
    envelope: &ApiResponse,
) -> Result<Response<Bytes>, GatewayError> {
    let body = serde_json::to_vec(envelope)?;
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Bytes::from(body))?)
}

/// Generic envelope for faults the handler did not anticipate. Built without
/// serialization so this path cannot itself fail.
fn internal_error_response(trace_id: &str) -> Response<Bytes> {
    let envelope = ApiResponse::error("internal server error", trace_id);
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub mod api;
pub mod config;
pub mod errors;
pub mod filter;
pub mod metrics_defs;

use crate::api::ApiEndpoint;
use crate::errors::GatewayError;
use crate::filter::{FilterChain, MetricsFilter, TraceFilter};
use aggregator::Aggregator;
use aggregator::config::AggregatorConfig;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::pin::Pin;
use std::sync::Arc;

/// Builds the aggregation pipeline from config and serves it until a
/// listener fails.
pub async fn run(
    config: config::Config,
    aggregator_config: AggregatorConfig,
) -> Result<(), GatewayError> {
    config.validate()?;
    aggregator_config.validate()?;

    let aggregator = Arc::new(Aggregator::from_config(&aggregator_config));
    let service = GatewayService::new(aggregator);

    let api_task = run_http_service(&config.listener.host, config.listener.port, service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, GatewayError>::new(|| true),
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

/// Hyper service that buffers the request and hands it to the filter chain.
pub struct GatewayService {
    chain: Arc<FilterChain>,
}

impl GatewayService {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        let endpoint = Arc::new(ApiEndpoint::new(aggregator));
        let chain = FilterChain::new(
            vec![Arc::new(TraceFilter), Arc::new(MetricsFilter)],
            endpoint,
        );
        GatewayService {
            chain: Arc::new(chain),
        }
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, GatewayError>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let chain = self.chain.clone();
        Box::pin(async move {
            // Aggregation requests carry no meaningful body; buffer whatever
            // is there so filters see a complete request.
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            let req = Request::from_parts(parts, bytes);

            let response = chain.run(req).await;

            let (parts, body) = response.into_parts();
            Ok(Response::from_parts(
                parts,
                Full::new(body).map_err(|e| match e {}).boxed(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggregator::breaker::BreakerRegistry;
    use aggregator::cache::ResultCache;
    use aggregator::config::{BreakerConfig, CacheConfig};
    use aggregator::upstream::{UpstreamClient, Upstreams};
    use aggregator::{AggregationKey, CallError};
    use async_trait::async_trait;
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct StubUpstream;

    #[async_trait]
    impl UpstreamClient for StubUpstream {
        fn name(&self) -> &str {
            "users"
        }

        async fn call(
            &self,
            key: &AggregationKey,
            _trace_id: &str,
            _timeout: Duration,
        ) -> Result<serde_json::Value, CallError> {
            Ok(serde_json::json!({"key": key.as_str()}))
        }
    }

    async fn start_gateway() -> u16 {
        let aggregator = Arc::new(Aggregator::new(
            Upstreams::new(vec![Arc::new(StubUpstream)]),
            BreakerRegistry::new(BreakerConfig::default()),
            ResultCache::new(&CacheConfig::default()),
            Duration::from_millis(200),
            Duration::from_secs(2),
        ));
        let service = Arc::new(GatewayService::new(aggregator));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let svc = service.clone();
                tokio::spawn(async move {
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await;
                });
            }
        });

        port
    }

    #[tokio::test]
    async fn gateway_serves_aggregates_end_to_end() {
        let port = start_gateway().await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/api/aggregate/user-1"))
            .await
            .expect("request gateway");

        assert_eq!(response.status(), 200);
        let trace_header = response
            .headers()
            .get(shared::http::TRACE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .expect("trace header")
            .to_string();
        assert_eq!(trace_header.len(), 8);

        let body: serde_json::Value = response.json().await.expect("json body");
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["sections"]["users"]["key"], "user-1");
        assert_eq!(body["traceId"], trace_header);
    }
}

use crate::config::UpstreamConfig;
use crate::errors::CallError;
use crate::record::AggregationKey;
use async_trait::async_trait;
use shared::http::TRACE_ID_HEADER;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// One backend service called during aggregation.
///
/// Implementations map their own failure signals onto the three `CallError`
/// kinds; the aggregator never sees transport-level error types.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Name keying this upstream's breaker and its section in the record.
    fn name(&self) -> &str;

    /// Fetch this upstream's contribution for the key. The timeout bounds
    /// the whole call, including reading the response body.
    async fn call(
        &self,
        key: &AggregationKey,
        trace_id: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallError>;
}

/// HTTP upstream client: `GET {base_url}/{key}` with the trace header,
/// expecting a JSON payload back.
pub struct HttpUpstreamClient {
    name: String,
    url: Url,
    client: reqwest::Client,
}

impl HttpUpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        HttpUpstreamClient {
            name: config.name,
            url: config.url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        key: &AggregationKey,
        trace_id: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallError> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CallError::Upstream(self.name.clone(), "upstream URL cannot be a base".into())
            })?
            .pop_if_empty()
            .push(key.as_str());

        let response = self
            .client
            .get(url)
            .header(TRACE_ID_HEADER, trace_id)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout(self.name.clone())
                } else {
                    CallError::Upstream(self.name.clone(), e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Upstream(
                self.name.clone(),
                format!("unexpected status {status}"),
            ));
        }

        response.json::<serde_json::Value>().await.map_err(|e| {
            if e.is_timeout() {
                CallError::Timeout(self.name.clone())
            } else {
                CallError::Upstream(self.name.clone(), e.to_string())
            }
        })
    }
}

/// The set of upstreams one aggregation fans out to, in configured order.
/// The order is load-bearing: it fixes section order in merged records.
pub struct Upstreams {
    clients: Vec<Arc<dyn UpstreamClient>>,
}

impl Upstreams {
    pub fn new(clients: Vec<Arc<dyn UpstreamClient>>) -> Self {
        Upstreams { clients }
    }

    pub fn from_config(configs: &[UpstreamConfig]) -> Self {
        let clients = configs
            .iter()
            .cloned()
            .map(|config| Arc::new(HttpUpstreamClient::new(config)) as Arc<dyn UpstreamClient>)
            .collect();
        Upstreams { clients }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn UpstreamClient>> {
        self.clients.iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no upstreams configured")]
    NoUpstreams,

    #[error("empty upstream name")]
    EmptyUpstreamName,

    #[error("duplicate upstream name: {0}")]
    DuplicateUpstream(String),

    #[error("breaker failure threshold cannot be 0")]
    ZeroFailureThreshold,

    #[error("{0} cannot be 0")]
    ZeroDuration(&'static str),
}

/// Aggregation core configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AggregatorConfig {
    /// Upstream services queried on every aggregation, in merge order.
    pub upstreams: Vec<UpstreamConfig>,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Budget for one upstream call, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Budget for the whole fan-out, in milliseconds. Calls still pending
    /// when it expires are abandoned and counted as timeouts.
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.upstreams.is_empty() {
            return Err(ValidationError::NoUpstreams);
        }

        let mut names = HashSet::new();
        for upstream in &self.upstreams {
            if upstream.name.is_empty() {
                return Err(ValidationError::EmptyUpstreamName);
            }
            if !names.insert(&upstream.name) {
                return Err(ValidationError::DuplicateUpstream(upstream.name.clone()));
            }
        }

        if self.call_timeout_ms == 0 {
            return Err(ValidationError::ZeroDuration("call_timeout_ms"));
        }
        if self.request_deadline_ms == 0 {
            return Err(ValidationError::ZeroDuration("request_deadline_ms"));
        }

        self.breaker.validate()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

/// Upstream service configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Unique identifier for this upstream; keys its breaker and its section
    /// in the aggregate record.
    pub name: String,
    /// Base URL of the upstream service.
    ///
    /// Note: Uses the `url::Url` type for compile-time URL validation.
    /// Invalid URLs will be rejected during config deserialization.
    pub url: Url,
}

/// Circuit breaker tuning, applied to every upstream.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BreakerConfig {
    /// Failures within the window that trip the breaker open.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Rolling window the failures are counted over, in milliseconds.
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,
    /// How long an open breaker rejects calls before letting a trial
    /// through, in milliseconds.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: default_failure_threshold(),
            failure_window_ms: default_failure_window_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::ZeroFailureThreshold);
        }
        if self.reset_timeout_ms == 0 {
            return Err(ValidationError::ZeroDuration("reset_timeout_ms"));
        }
        Ok(())
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Result cache tuning.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// How long a cached aggregate stays servable, in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    /// Entry count bound; eviction below the TTL is best-effort only.
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_ms: default_cache_ttl_ms(),
            max_capacity: default_cache_capacity(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_window_ms() -> u64 {
    30_000
}

fn default_reset_timeout_ms() -> u64 {
    10_000
}

fn default_call_timeout_ms() -> u64 {
    1_000
}

fn default_request_deadline_ms() -> u64 {
    5_000
}

fn default_cache_ttl_ms() -> u64 {
    30_000
}

fn default_cache_capacity() -> u64 {
    10_000
}

use crate::breaker::BreakerRegistry;
use crate::cache::ResultCache;
use crate::config::AggregatorConfig;
use crate::errors::CallError;
use crate::metrics_defs::{AGGREGATION_DURATION, BREAKER_REJECTED, UPSTREAM_CALLS};
use crate::record::{AggregateRecord, AggregationKey, DEGRADED_NOTE};
use crate::upstream::Upstreams;
use indexmap::IndexMap;
use shared::{counter, histogram};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

/// Fans one aggregation request out to every configured upstream in parallel
/// and merges whatever came back into a single record.
///
/// Upstream failure never escapes this type: a failed, timed-out, or
/// short-circuited call leaves its section absent and marks the record
/// degraded. Callers always get a usable record back.
pub struct Aggregator {
    upstreams: Upstreams,
    breakers: BreakerRegistry,
    cache: ResultCache,
    call_timeout: Duration,
    request_deadline: Duration,
}

impl Aggregator {
    pub fn new(
        upstreams: Upstreams,
        breakers: BreakerRegistry,
        cache: ResultCache,
        call_timeout: Duration,
        request_deadline: Duration,
    ) -> Self {
        Aggregator {
            upstreams,
            breakers,
            cache,
            call_timeout,
            request_deadline,
        }
    }

    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self::new(
            Upstreams::from_config(&config.upstreams),
            BreakerRegistry::new(config.breaker.clone()),
            ResultCache::new(&config.cache),
            config.call_timeout(),
            config.request_deadline(),
        )
    }

    /// Aggregate for `key`, consulting the result cache first.
    pub async fn get_aggregate(&self, key: &AggregationKey, trace_id: &str) -> AggregateRecord {
        if let Some(record) = self.cache.get(key) {
            tracing::debug!(trace_id, key = %key, "serving aggregate from cache");
            return record;
        }

        let started = Instant::now();
        let outcomes = self.fan_out(key, trace_id).await;
        let record = self.merge(outcomes);
        histogram!(AGGREGATION_DURATION).record(started.elapsed().as_secs_f64());

        // Degraded records are never cached; the next request for this key
        // re-queries the failed upstreams once their breakers allow it.
        if record.is_complete() {
            self.cache.insert(key, record.clone());
        } else {
            tracing::info!(trace_id, key = %key, "returning degraded aggregate");
        }

        record
    }

    /// Drops any cached record for the key, forcing the next request to
    /// re-query the upstreams.
    pub fn invalidate(&self, key: &AggregationKey) {
        self.cache.invalidate(key);
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Issues the per-upstream calls concurrently and waits for all of them
    /// to settle, bounded by the request deadline. Upstreams whose breaker is
    /// open are settled immediately as `CircuitOpen` without being contacted.
    async fn fan_out(
        &self,
        key: &AggregationKey,
        trace_id: &str,
    ) -> HashMap<String, Result<serde_json::Value, CallError>> {
        let mut outcomes = HashMap::with_capacity(self.upstreams.len());
        let mut join_set = JoinSet::new();
        let mut pending = HashSet::new();

        for client in self.upstreams.iter() {
            let name = client.name().to_string();
            if !self.breakers.allow(&name) {
                tracing::debug!(trace_id, upstream = %name, "short-circuited by open breaker");
                counter!(BREAKER_REJECTED, "upstream" => name.clone()).increment(1);
                outcomes.insert(name.clone(), Err(CallError::CircuitOpen(name)));
                continue;
            }

            pending.insert(name.clone());
            let client = client.clone();
            let key = key.clone();
            let trace_id = trace_id.to_string();
            let call_timeout = self.call_timeout;
            join_set.spawn(async move {
                let result = match timeout(call_timeout, client.call(&key, &trace_id, call_timeout))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CallError::Timeout(name.clone())),
                };
                (name, result)
            });
        }

        // Join-all barrier: the merged record is only assembled once every
        // call has settled. The pinned sleep bounds the wait so one hung
        // upstream cannot pin the whole request.
        let deadline = sleep(self.request_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!(
                        trace_id,
                        pending = pending.len(),
                        "request deadline expired with upstream calls still pending"
                    );
                    break;
                }
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok((name, result))) => {
                            pending.remove(&name);
                            self.settle(&name, &result);
                            outcomes.insert(name, result);
                        }
                        Some(Err(e)) => tracing::error!(trace_id, "aggregation task panicked: {e}"),
                        None => break,
                    }
                }
            }
        }

        join_set.abort_all();

        // Calls abandoned at the deadline count as timeouts against their
        // breakers, same as a call that hit its own timeout.
        for name in pending.drain() {
            let result = Err(CallError::Timeout(name.clone()));
            self.settle(&name, &result);
            outcomes.insert(name, result);
        }

        outcomes
    }

    /// Reports a settled call to its breaker and the outcome counters. Only
    /// calls that were actually attempted reach here; breaker rejections
    /// must not feed back into the breaker that produced them.
    fn settle(&self, name: &str, result: &Result<serde_json::Value, CallError>) {
        match result {
            Ok(_) => {
                self.breakers.record_success(name);
                counter!(UPSTREAM_CALLS, "upstream" => name.to_string(), "outcome" => "success")
                    .increment(1);
            }
            Err(e) => {
                tracing::warn!(upstream = %name, error = %e, "upstream call failed");
                self.breakers.record_failure(name);
                counter!(UPSTREAM_CALLS, "upstream" => name.to_string(), "outcome" => e.kind())
                    .increment(1);
            }
        }
    }

    /// Assembles the record in configured upstream order. Failed sections
    /// stay absent; any absence marks the whole record degraded.
    fn merge(
        &self,
        mut outcomes: HashMap<String, Result<serde_json::Value, CallError>>,
    ) -> AggregateRecord {
        let mut sections = IndexMap::with_capacity(self.upstreams.len());
        let mut degraded = false;

        for client in self.upstreams.iter() {
            let name = client.name();
            match outcomes.remove(name) {
                Some(Ok(payload)) => {
                    sections.insert(name.to_string(), Some(payload));
                }
                _ => {
                    sections.insert(name.to_string(), None);
                    degraded = true;
                }
            }
        }

        AggregateRecord {
            sections,
            note: degraded.then(|| DEGRADED_NOTE.to_string()),
        }
    }
}

//! Metrics definitions for the aggregation core.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RESULT_CACHE_HIT: MetricDef = MetricDef {
    name: "result_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of aggregations served from the result cache",
};

pub const RESULT_CACHE_MISS: MetricDef = MetricDef {
    name: "result_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of aggregations that missed the result cache",
};

pub const BREAKER_OPENED: MetricDef = MetricDef {
    name: "breaker.opened",
    metric_type: MetricType::Counter,
    description: "Number of breaker transitions to the open state",
};

pub const BREAKER_REJECTED: MetricDef = MetricDef {
    name: "breaker.rejected",
    metric_type: MetricType::Counter,
    description: "Number of calls short-circuited by an open breaker",
};

pub const UPSTREAM_CALLS: MetricDef = MetricDef {
    name: "upstream.calls",
    metric_type: MetricType::Counter,
    description: "Settled upstream calls. Tagged with upstream, outcome.",
};

pub const AGGREGATION_DURATION: MetricDef = MetricDef {
    name: "aggregate.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fan out and merge one aggregation, in seconds",
};

// TODO: collect these via a macro instead of listing them by hand.
pub const ALL_METRICS: &[MetricDef] = &[
    RESULT_CACHE_HIT,
    RESULT_CACHE_MISS,
    BREAKER_OPENED,
    BREAKER_REJECTED,
    UPSTREAM_CALLS,
    AGGREGATION_DURATION,
];

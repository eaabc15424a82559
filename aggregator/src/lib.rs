pub mod aggregator;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod record;
pub mod upstream;

pub use aggregator::Aggregator;
pub use errors::CallError;
pub use record::{AggregateRecord, AggregationKey};

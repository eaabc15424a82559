use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("invalid HTTP construct: {0}")]
    Http(#[from] http::Error),

    #[error("response serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("aggregator configuration error: {0}")]
    InvalidAggregatorConfig(#[from] aggregator::config::ValidationError),

    #[error("listener configuration error: {0}")]
    InvalidListenerConfig(#[from] crate::config::ValidationError),
}

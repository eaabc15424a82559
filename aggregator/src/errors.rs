use thiserror::Error;

/// Ways a single upstream call can fail. All of these are absorbed by the
/// aggregator into a degraded record; none cross the API boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The upstream answered with an error or could not be reached.
    #[error("upstream request failed for {0}: {1}")]
    Upstream(String, String),

    /// The call did not settle within its timeout.
    #[error("upstream timeout for {0}")]
    Timeout(String),

    /// The breaker rejected the call; the upstream was never contacted.
    #[error("circuit open for {0}")]
    CircuitOpen(String),
}

impl CallError {
    /// Stable tag used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Upstream(..) => "upstream_failure",
            CallError::Timeout(..) => "timeout",
            CallError::CircuitOpen(..) => "circuit_open",
        }
    }
}

use crate::config::BreakerConfig;
use crate::metrics_defs::BREAKER_OPENED;
use parking_lot::{Mutex, RwLock};
use shared::counter;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum State {
    Closed { failures: VecDeque<Instant> },
    Open { opened_at: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Observable snapshot of a breaker, for logs and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerView {
    Closed { recent_failures: u32 },
    Open,
    HalfOpen,
}

/// Failure-rate state machine shielding one upstream.
///
/// Closed counts failures over a rolling window; reaching the threshold opens
/// the breaker, which rejects calls until the reset timeout elapses. The
/// first caller after that becomes the single half-open trial: its success
/// closes the breaker, its failure re-opens it.
pub struct Breaker {
    name: String,
    failure_threshold: u32,
    failure_window: Duration,
    reset_timeout: Duration,
    state: Mutex<State>,
}

impl Breaker {
    fn new(name: &str, config: &BreakerConfig) -> Self {
        Breaker {
            name: name.to_string(),
            failure_threshold: config.failure_threshold,
            failure_window: config.failure_window(),
            reset_timeout: config.reset_timeout(),
            state: Mutex::new(State::Closed {
                failures: VecDeque::new(),
            }),
        }
    }

    /// Whether a call to this upstream may proceed. Holding the state lock
    /// for the whole decision keeps the half-open single-trial rule intact
    /// when callers race.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { .. } => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    tracing::info!(upstream = %self.name, "breaker half-open, admitting one trial");
                    *state = State::HalfOpen {
                        trial_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { trial_in_flight } => {
                if *trial_in_flight {
                    false
                } else {
                    *trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// A call to this upstream succeeded. Closes the breaker from any state
    /// and resets the failure window.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if !matches!(*state, State::Closed { .. }) {
            tracing::info!(upstream = %self.name, "breaker closed");
        }
        *state = State::Closed {
            failures: VecDeque::new(),
        };
    }

    /// A call to this upstream failed or timed out.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { failures } => {
                failures.push_back(now);
                while let Some(oldest) = failures.front() {
                    if now.duration_since(*oldest) > self.failure_window {
                        failures.pop_front();
                    } else {
                        break;
                    }
                }
                if failures.len() >= self.failure_threshold as usize {
                    tracing::warn!(
                        upstream = %self.name,
                        failures = failures.len(),
                        "failure threshold reached, breaker open"
                    );
                    counter!(BREAKER_OPENED, "upstream" => self.name.clone()).increment(1);
                    *state = State::Open { opened_at: now };
                }
            }
            State::HalfOpen { .. } => {
                tracing::warn!(upstream = %self.name, "trial call failed, breaker re-opened");
                *state = State::Open { opened_at: now };
            }
            // A failure from a call that was still in flight when another
            // caller opened the breaker; the existing opened_at stands.
            State::Open { .. } => {}
        }
    }

    pub fn view(&self) -> BreakerView {
        match &*self.state.lock() {
            State::Closed { failures } => BreakerView::Closed {
                recent_failures: failures.len() as u32,
            },
            State::Open { .. } => BreakerView::Open,
            State::HalfOpen { .. } => BreakerView::HalfOpen,
        }
    }
}

/// Per-upstream breakers, created lazily on first use and kept for the
/// process lifetime. Shared by every in-flight request.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        BreakerRegistry {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn breaker(&self, name: &str) -> Arc<Breaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }
        self.breakers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Breaker::new(name, &self.config)))
            .clone()
    }

    pub fn allow(&self, name: &str) -> bool {
        self.breaker(name).allow()
    }

    pub fn record_success(&self, name: &str) {
        self.breaker(name).record_success();
    }

    pub fn record_failure(&self, name: &str) {
        self.breaker(name).record_failure();
    }

    pub fn view(&self, name: &str) -> Option<BreakerView> {
        self.breakers.read().get(name).map(|b| b.view())
    }
}

//! Three-state circuit breaker shared by the session store and the
//! service hub.
//!
//! Closed → Open after a threshold of consecutive failures; Open holds
//! for a cool-down, then Half-Open admits exactly one probe. A probe
//! success closes the breaker, a probe failure reopens it. While open,
//! callers are told to short-circuit to their fallback without touching
//! the network.
//!
//! Failure tallies are atomics; state transitions happen under a mutex.
//! One logical call tallies once no matter how many internal retries it
//! performed.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Consecutive failures that trip the breaker.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// How long an open breaker refuses traffic before probing.
pub const DEFAULT_OPEN_FOR: Duration = Duration::from_secs(15);

/// Public view of the breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Verdict for one call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Call the primary dependency.
    Permit,
    /// Skip the primary and use the fallback.
    ShortCircuit,
}

#[derive(Debug)]
enum Inner {
    Closed,
    Open { since: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Circuit breaker guarding one unreliable dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    threshold: u32,
    open_for: Duration,
    state: Mutex<Inner>,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    total_short_circuits: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: &'static str) -> Self {
        Self::with_policy(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_FOR)
    }

    pub fn with_policy(name: &'static str, threshold: u32, open_for: Duration) -> Self {
        Self {
            name,
            threshold,
            open_for,
            state: Mutex::new(Inner::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_short_circuits: AtomicU64::new(0),
        }
    }

    /// Decide whether the caller may hit the primary dependency.
    pub fn admit(&self) -> Admission {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        match &mut *state {
            Inner::Closed => Admission::Permit,
            Inner::Open { since } => {
                if since.elapsed() >= self.open_for {
                    info!(breaker = self.name, "circuit half-open, admitting probe");
                    *state = Inner::HalfOpen {
                        probe_in_flight: true,
                    };
                    Admission::Permit
                } else {
                    self.total_short_circuits.fetch_add(1, Ordering::Relaxed);
                    Admission::ShortCircuit
                }
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    self.total_short_circuits.fetch_add(1, Ordering::Relaxed);
                    Admission::ShortCircuit
                } else {
                    *probe_in_flight = true;
                    Admission::Permit
                }
            }
        }
    }

    /// Record the outcome of one logical call that was admitted.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        match *state {
            Inner::HalfOpen { .. } => {
                info!(breaker = self.name, "probe succeeded, circuit closed");
                *state = Inner::Closed;
            }
            Inner::Open { .. } => {
                // A straggler from before the trip; the probe decides.
            }
            Inner::Closed => {}
        }
    }

    /// Record a failed logical call (retries inside the call do not
    /// tally separately).
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        let mut state = self.state.lock().expect("breaker mutex poisoned");
        match *state {
            Inner::Closed => {
                if failures >= self.threshold {
                    warn!(
                        breaker = self.name,
                        failures, "failure threshold reached, circuit open"
                    );
                    *state = Inner::Open {
                        since: Instant::now(),
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!(breaker = self.name, "probe failed, circuit reopened");
                *state = Inner::Open {
                    since: Instant::now(),
                };
            }
            Inner::Open { .. } => {}
        }
    }

    /// Current state, resolving an elapsed cool-down to half-open.
    pub fn state(&self) -> BreakerState {
        let state = self.state.lock().expect("breaker mutex poisoned");
        match &*state {
            Inner::Closed => BreakerState::Closed,
            Inner::Open { since } => {
                if since.elapsed() >= self.open_for {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Whether calls are currently short-circuiting.
    pub fn is_open(&self) -> bool {
        matches!(self.state(), BreakerState::Open)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_short_circuits(&self) -> u64 {
        self.total_short_circuits.load(Ordering::Relaxed)
    }
}

//! Sliding-window rate limiting with a failure-driven circuit breaker.
//!
//! The limiter keeps two trailing windows (one minute, one hour) of request
//! timestamps and denies a request when either window is full. Quota and
//! rate-limit failures reported by the remote side feed a consecutive
//! failure counter; once it exceeds the configured threshold the service is
//! marked unavailable and requests are blocked for an exponential backoff
//! delay. The breaker has three observable states:
//!
//! - **Closed**: service available, requests pass through
//! - **Open**: blocked until `block_until`
//! - **Half-Open**: the block expired but no request has succeeded since;
//!   the next request is a probe and its outcome decides the state
//!
//! # Usage
//!
//! ```rust
//! use citation_scout::config::RateLimitConfig;
//! use citation_scout::utils::{system_clock, CircuitState, RateLimiter};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::default(), system_clock());
//! assert!(limiter.check_and_record().is_allowed());
//! assert_eq!(limiter.circuit_state(), CircuitState::Closed);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::sources::SourceError;
use crate::utils::Clock;

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 3_600_000;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing - requests are rejected
    Open,
    /// Block expired - the next request tests recovery
    HalfOpen,
}

/// Failure classification used to decide whether the breaker counts it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    QuotaExceeded,
    RateLimit,
    Network,
    Other,
}

impl FailureKind {
    /// Classify a source error
    pub fn classify(err: &SourceError) -> Self {
        match err {
            SourceError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            SourceError::RateLimit(_) | SourceError::Blocked(_) => FailureKind::RateLimit,
            SourceError::Network(_) | SourceError::Timeout(_) => FailureKind::Network,
            SourceError::Api(msg) | SourceError::Other(msg) => Self::classify_message(msg),
            _ => FailureKind::Other,
        }
    }

    /// Heuristic classification of a free-form error message
    pub fn classify_message(msg: &str) -> Self {
        let msg = msg.to_lowercase();
        if msg.contains("quota") {
            FailureKind::QuotaExceeded
        } else if msg.contains("429")
            || msg.contains("rate limit")
            || msg.contains("too many requests")
        {
            FailureKind::RateLimit
        } else if msg.contains("timeout")
            || msg.contains("timed out")
            || msg.contains("connection")
            || msg.contains("network")
        {
            FailureKind::Network
        } else {
            FailureKind::Other
        }
    }

    /// Whether this failure counts toward tripping the breaker
    pub fn trips_breaker(&self) -> bool {
        matches!(self, FailureKind::QuotaExceeded | FailureKind::RateLimit)
    }
}

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The circuit breaker is open
    Blocked,
    /// The per-minute window is full
    MinuteLimit,
    /// The per-hour window is full
    HourLimit,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::Blocked => write!(f, "service temporarily blocked"),
            DenyReason::MinuteLimit => write!(f, "per-minute request limit reached"),
            DenyReason::HourLimit => write!(f, "per-hour request limit reached"),
        }
    }
}

/// Result of a rate-limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny {
        reason: DenyReason,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow)
    }
}

/// What recording a failure did to the limiter
#[derive(Debug, Clone, PartialEq)]
pub struct FailureOutcome {
    pub kind: FailureKind,
    pub consecutive_failures: u32,
    /// Suggested wait before the next attempt, for quota/rate-limit failures
    pub backoff: Option<Duration>,
    /// Whether this failure opened the breaker
    pub breaker_opened: bool,
}

/// Mutable limiter state
#[derive(Debug, Clone, Default, PartialEq)]
struct RateLimitState {
    requests_per_minute_window: VecDeque<u64>,
    requests_per_hour_window: VecDeque<u64>,
    is_blocked: bool,
    block_until: u64,
    consecutive_failures: u32,
    service_available: bool,
    last_successful_request: Option<u64>,
}

impl RateLimitState {
    fn fresh() -> Self {
        Self {
            service_available: true,
            ..Self::default()
        }
    }

    fn prune(&mut self, now: u64) {
        while self
            .requests_per_minute_window
            .front()
            .is_some_and(|&ts| now.saturating_sub(ts) >= MINUTE_MS)
        {
            self.requests_per_minute_window.pop_front();
        }
        while self
            .requests_per_hour_window
            .front()
            .is_some_and(|&ts| now.saturating_sub(ts) >= HOUR_MS)
        {
            self.requests_per_hour_window.pop_front();
        }
        if self.is_blocked && now >= self.block_until {
            self.is_blocked = false;
        }
    }
}

/// Point-in-time view of the limiter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub is_blocked: bool,
    pub block_until: u64,
    pub requests_in_last_minute: usize,
    pub requests_in_last_hour: usize,
    pub remaining_minute: usize,
    pub remaining_hour: usize,
    pub consecutive_failures: u32,
    pub service_available: bool,
    pub circuit_state: CircuitState,
    /// Milliseconds since the last success, if any
    pub time_since_last_success: Option<u64>,
}

/// Thread-safe rate limiter and circuit breaker
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<RateLimitState>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(RateLimitState::fresh()),
            config,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateLimitState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a request may go out now and, if so, count it
    pub fn check_and_record(&self) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        state.prune(now);

        if state.is_blocked {
            return RateLimitDecision::Deny {
                reason: DenyReason::Blocked,
                retry_after: Duration::from_millis(state.block_until - now),
            };
        }

        if state.requests_per_minute_window.len() >= self.config.requests_per_minute as usize {
            let oldest = state.requests_per_minute_window.front().copied().unwrap_or(now);
            return RateLimitDecision::Deny {
                reason: DenyReason::MinuteLimit,
                retry_after: Duration::from_millis((oldest + MINUTE_MS).saturating_sub(now)),
            };
        }

        if state.requests_per_hour_window.len() >= self.config.requests_per_hour as usize {
            let oldest = state.requests_per_hour_window.front().copied().unwrap_or(now);
            return RateLimitDecision::Deny {
                reason: DenyReason::HourLimit,
                retry_after: Duration::from_millis((oldest + HOUR_MS).saturating_sub(now)),
            };
        }

        state.requests_per_minute_window.push_back(now);
        state.requests_per_hour_window.push_back(now);
        RateLimitDecision::Allow
    }

    /// Record a successful request, closing the breaker
    pub fn record_success(&self) {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        if !state.service_available {
            tracing::info!("[rate-limiter] service recovered after {} failures", state.consecutive_failures);
        }
        state.consecutive_failures = 0;
        state.service_available = true;
        state.is_blocked = false;
        state.block_until = 0;
        state.last_successful_request = Some(now);
    }

    /// Record a failed request and return what it did to the breaker
    pub fn record_failure(&self, err: &SourceError) -> FailureOutcome {
        self.record_failure_kind(FailureKind::classify(err))
    }

    pub fn record_failure_kind(&self, kind: FailureKind) -> FailureOutcome {
        let now = self.clock.now_ms();
        let mut state = self.lock();

        if !kind.trips_breaker() {
            return FailureOutcome {
                kind,
                consecutive_failures: state.consecutive_failures,
                backoff: None,
                breaker_opened: false,
            };
        }

        state.consecutive_failures += 1;
        let delay = self.backoff_delay(state.consecutive_failures);
        let mut breaker_opened = false;

        if state.consecutive_failures > self.config.failure_threshold {
            breaker_opened = !state.is_blocked;
            state.service_available = false;
            state.is_blocked = true;
            state.block_until = now + u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                "[rate-limiter] circuit opened after {} consecutive {:?} failures, blocked for {:?}",
                state.consecutive_failures,
                kind,
                delay
            );
        }

        FailureOutcome {
            kind,
            consecutive_failures: state.consecutive_failures,
            backoff: Some(delay),
            breaker_opened,
        }
    }

    /// `min(base * multiplier^failures, max)`, plus up to 10% jitter when enabled
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let exp = i32::try_from(failures).unwrap_or(i32::MAX);
        let raw = base * self.config.backoff_multiplier.powi(exp);
        let mut delay = raw.min(self.config.max_delay_ms as f64);

        if self.config.jitter_enabled && delay > 0.0 {
            let jitter = rand::thread_rng().gen_range(0.0..=delay * 0.1);
            delay = (delay + jitter).min(self.config.max_delay_ms as f64);
        }

        Duration::from_millis(delay.max(0.0) as u64)
    }

    /// Current breaker state
    pub fn circuit_state(&self) -> CircuitState {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        state.prune(now);
        Self::circuit_of(&state)
    }

    fn circuit_of(state: &RateLimitState) -> CircuitState {
        if state.is_blocked {
            CircuitState::Open
        } else if !state.service_available {
            CircuitState::HalfOpen
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_service_available(&self) -> bool {
        self.lock().service_available
    }

    pub fn status(&self) -> RateLimitStatus {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        state.prune(now);

        let minute = state.requests_per_minute_window.len();
        let hour = state.requests_per_hour_window.len();

        RateLimitStatus {
            is_blocked: state.is_blocked,
            block_until: state.block_until,
            requests_in_last_minute: minute,
            requests_in_last_hour: hour,
            remaining_minute: (self.config.requests_per_minute as usize).saturating_sub(minute),
            remaining_hour: (self.config.requests_per_hour as usize).saturating_sub(hour),
            consecutive_failures: state.consecutive_failures,
            service_available: state.service_available,
            circuit_state: Self::circuit_of(&state),
            time_since_last_success: state
                .last_successful_request
                .map(|ts| now.saturating_sub(ts)),
        }
    }

    /// Zero all counters and close the breaker
    pub fn reset(&self) {
        *self.lock() = RateLimitState::fresh();
        tracing::debug!("[rate-limiter] state reset");
    }
}

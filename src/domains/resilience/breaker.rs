//! Circuit breaker - per-downstream-service failure isolation.
//!
//! Three states. Closed passes calls through and counts consecutive
//! transient failures; reaching the failure threshold opens the circuit.
//! Open fails fast until the open timeout elapses, then the next call is
//! let through as a half-open trial. Enough consecutive trial successes
//! close the circuit again; any trial failure reopens it immediately.
//!
//! Breakers are keyed by the capability's declared downstream service
//! name, never shared globally, so one sick dependency cannot starve the
//! rest of the gateway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::core::config::CircuitBreakerConfig;
use crate::domains::capabilities::CapabilityError;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failing fast; the downstream is isolated.
    Open,
    /// Probing recovery with trial calls.
    HalfOpen,
}

/// Mutable breaker state. Guarded by a single mutex so every transition
/// is an atomic read-modify-write; two concurrent failures can never
/// double-open the circuit.
struct BreakerState {
    state: CircuitState,
    /// Consecutive failures (meaningful in Closed).
    failure_count: u32,
    /// Consecutive trial successes (meaningful in HalfOpen).
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for one downstream service.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker for the named service.
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Gate a call. `Ok` means proceed (possibly as a half-open trial);
    /// `Err` is a fail-fast `CircuitOpen` with a retry-after hint.
    pub fn try_acquire(&self) -> Result<(), CapabilityError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let open_timeout = Duration::from_secs(self.config.open_timeout_secs);
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(open_timeout);

                if elapsed >= open_timeout {
                    info!("Circuit for '{}' half-open; trial call allowed", self.service);
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    Ok(())
                } else {
                    Err(CapabilityError::CircuitOpen {
                        service: self.service.clone(),
                        retry_after_ms: (open_timeout - elapsed).as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        if !self.config.enabled {
            return;
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_success_threshold {
                    info!("Circuit for '{}' closed after recovery", self.service);
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a transient failure.
    pub fn record_failure(&self) {
        if !self.config.enabled {
            return;
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit for '{}' opened after {} consecutive failures",
                        self.service, inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.success_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit for '{}' reopened: trial call failed", self.service);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state (testing and introspection).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }
}

/// Breakers keyed by downstream service name. Created lazily on first
/// observation of a service; persists for the process lifetime.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a registry applying the given config to every breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// The breaker for a service, creating it on first use.
    pub fn for_service(&self, service: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = breakers.get(service) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.config.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: u32, open_timeout_secs: u64, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold,
            open_timeout_secs,
            half_open_success_threshold: success_threshold,
        }
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("svc", config(3, 60, 1));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.try_acquire().unwrap_err();
        match err {
            CapabilityError::CircuitOpen {
                service,
                retry_after_ms,
            } => {
                assert_eq!(service, "svc");
                assert!(retry_after_ms <= 60_000);
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
    }

    #[test]
    fn test_success_in_closed_resets_failure_count() {
        let breaker = CircuitBreaker::new("svc", config(3, 60, 1));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        // Still closed: the success reset the streak.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout_then_closes() {
        // Zero timeout: the next acquire after opening is a trial.
        let breaker = CircuitBreaker::new("svc", config(1, 0, 2));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("svc", config(1, 0, 2));
        breaker.record_failure();
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_disabled_breaker_never_blocks() {
        let mut cfg = config(1, 60, 1);
        cfg.enabled = false;
        let breaker = CircuitBreaker::new("svc", cfg);

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_isolates_services() {
        let registry = CircuitBreakerRegistry::new(config(1, 60, 1));

        registry.for_service("mail-relay").record_failure();
        assert_eq!(registry.for_service("mail-relay").state(), CircuitState::Open);
        assert_eq!(
            registry.for_service("directory-db").state(),
            CircuitState::Closed
        );
    }

    #[test]
    fn test_registry_returns_same_breaker() {
        let registry = CircuitBreakerRegistry::new(config(2, 60, 1));
        registry.for_service("svc").record_failure();
        registry.for_service("svc").record_failure();
        assert_eq!(registry.for_service("svc").state(), CircuitState::Open);
    }
}

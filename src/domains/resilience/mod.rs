//! Resilience domain module.
//!
//! Everything between "the call is authorized and validated" and "the
//! capability ran": idempotency de-duplication, per-service circuit
//! breakers, timeout-bounded execution and retry with backoff, composed
//! into a single pipeline.

pub mod breaker;
pub mod idempotency;
pub mod pipeline;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use idempotency::{Claim, IdempotencyStore};
pub use pipeline::ResiliencePipeline;
pub use retry::{BackoffStrategy, RetryPolicy};

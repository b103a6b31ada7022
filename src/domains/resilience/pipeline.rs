//! Resilience pipeline - the correctness-under-failure contract.
//!
//! Wraps capability execution in, order: idempotency check, circuit
//! breaker gate, timeout-bounded execution, outcome recording, retry with
//! backoff, idempotency store. Validation and permission failures are
//! resolved by the adapter before a call ever reaches this pipeline, so
//! everything here is an execution-class outcome.
//!
//! Retries are never applied to a non-idempotent capability unless the
//! call carries an idempotency key, and breaker state is tracked per
//! downstream service, never globally.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::JsonObject;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::breaker::CircuitBreakerRegistry;
use super::idempotency::{Claim, IdempotencyStore};
use super::retry::RetryPolicy;
use crate::core::config::CircuitBreakerConfig;
use crate::domains::capabilities::{CallContext, CallResult, Capability, CapabilityError};

/// Executes capabilities under the gateway's resilience policies.
pub struct ResiliencePipeline {
    breakers: CircuitBreakerRegistry,
    idempotency: IdempotencyStore,
    retry: RetryPolicy,
    execution_timeout: Duration,
}

impl ResiliencePipeline {
    /// Assemble a pipeline from its policies.
    pub fn new(
        breaker_config: CircuitBreakerConfig,
        retry: RetryPolicy,
        idempotency_ttl: Duration,
        execution_timeout: Duration,
    ) -> Self {
        // Upper bound on how long one invocation can hold an idempotency
        // key: every attempt may run to the timeout and back off, plus
        // slack for the final attempt. Past that the owner is abandoned.
        let inflight_ttl = (execution_timeout + retry.max_delay)
            .saturating_mul(retry.max_attempts.max(1))
            .saturating_add(execution_timeout);
        Self {
            breakers: CircuitBreakerRegistry::new(breaker_config),
            idempotency: IdempotencyStore::new(idempotency_ttl, inflight_ttl),
            retry,
            execution_timeout,
        }
    }

    /// Invoke a capability with already-validated arguments.
    ///
    /// Always produces a `CallResult`; terminal failures are shaped into
    /// the failure variant with their taxonomy code.
    pub async fn invoke(
        &self,
        capability: &Arc<dyn Capability>,
        args: &JsonObject,
        ctx: &CallContext,
        idempotency_key: Option<&str>,
    ) -> CallResult {
        // Stage 1: a live record or an in-flight execution short-circuits.
        if let Some(key) = idempotency_key {
            match self.idempotency.claim(key) {
                Claim::Owner => {}
                Claim::Replay(result) => {
                    return result.with_metadata("idempotent_replay", "true");
                }
                Claim::Pending(rx) => {
                    debug!("Awaiting in-flight execution for idempotency key {}", key);
                    return match IdempotencyStore::wait(rx).await {
                        Some(result) => result.with_metadata("idempotent_replay", "true"),
                        None => CallResult::failure(
                            "concurrent execution aborted before settling",
                            "INTERNAL",
                        ),
                    };
                }
            }
        }

        let result = self.execute_with_policies(capability, args, ctx, idempotency_key).await;

        // Stage 6: persist the outcome so later duplicates replay it.
        // Transient terminal failures are broadcast but not retained, so
        // a genuine client retry can re-execute.
        if let Some(key) = idempotency_key {
            let retain = match &result {
                CallResult::Success { .. } => true,
                CallResult::Failure { code, .. } => code == "PERMANENT_EXECUTION",
            };
            self.idempotency.settle(key, &result, retain);
        }

        result
    }

    /// Stages 2-5: breaker gate, bounded execute, recording, retry loop.
    async fn execute_with_policies(
        &self,
        capability: &Arc<dyn Capability>,
        args: &JsonObject,
        ctx: &CallContext,
        idempotency_key: Option<&str>,
    ) -> CallResult {
        let descriptor = capability.descriptor();
        let breaker = self.breakers.for_service(&descriptor.service);

        let max_attempts = if !self.retry.enabled {
            1
        } else if descriptor.idempotent || idempotency_key.is_some() {
            self.retry.max_attempts
        } else {
            // Never retry a non-idempotent capability without a key.
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            if let Err(open) = breaker.try_acquire() {
                warn!(
                    "Fail-fast for '{}': {}",
                    descriptor.name, open
                );
                return failure_from(&open, attempt - 1);
            }

            let outcome = match timeout(self.execution_timeout, capability.execute(args, ctx)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(CapabilityError::Timeout(
                    self.execution_timeout.as_millis() as u64,
                )),
            };

            match outcome {
                Ok(data) => {
                    breaker.record_success();
                    return CallResult::success(data)
                        .with_metadata("attempts", attempt.to_string());
                }
                Err(error) => {
                    // Transient/timeout failures are downstream health
                    // signals; business failures are not.
                    if error.is_retryable() {
                        breaker.record_failure();
                    }

                    if error.is_retryable() && attempt < max_attempts {
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(
                            "Attempt {}/{} for '{}' failed ({}); retrying in {:?}",
                            attempt, max_attempts, descriptor.name, error, delay
                        );
                        sleep(delay).await;
                        continue;
                    }

                    return failure_from(&error, attempt);
                }
            }
        }
    }

    /// Expire settled idempotency records (called from the sweeper).
    pub fn purge_idempotency_records(&self) -> usize {
        self.idempotency.purge_expired()
    }
}

fn failure_from(error: &CapabilityError, attempts: u32) -> CallResult {
    let mut result = CallResult::failure(error.to_string(), error.code());
    if attempts > 0 {
        result = result.with_metadata("attempts", attempts.to_string());
    }
    if let CapabilityError::CircuitOpen { retry_after_ms, .. } = error {
        result = result.with_metadata("retry_after_ms", retry_after_ms.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::capabilities::{CapabilityDescriptor, Principal};
    use crate::domains::resilience::retry::BackoffStrategy;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the scripted error until `failures` executions have
    /// happened, then succeeds.
    struct ScriptedCapability {
        descriptor: CapabilityDescriptor,
        failures: usize,
        error: fn() -> CapabilityError,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedCapability {
        fn new(descriptor: CapabilityDescriptor, failures: usize, error: fn() -> CapabilityError) -> Self {
            Self {
                descriptor,
                failures,
                error,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Capability for ScriptedCapability {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            _args: &JsonObject,
            _ctx: &CallContext,
        ) -> Result<Value, CapabilityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            if call < self.failures {
                Err((self.error)())
            } else {
                Ok(json!({"call": call}))
            }
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_attempts,
            strategy: BackoffStrategy::Fixed,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        }
    }

    fn breaker_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            open_timeout_secs: 60,
            half_open_success_threshold: 1,
        }
    }

    fn pipeline(retry: RetryPolicy, breaker: CircuitBreakerConfig) -> ResiliencePipeline {
        ResiliencePipeline::new(
            breaker,
            retry,
            Duration::from_secs(60),
            Duration::from_millis(250),
        )
    }

    fn ctx() -> CallContext {
        CallContext::new(Principal::new("u1", vec![]), "s1")
    }

    fn idempotent_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new("t.x.GET", "test")
            .with_service("svc-a")
            .idempotent()
    }

    #[tokio::test]
    async fn test_transient_failures_retried_to_success() {
        let pipeline = pipeline(fast_retry(3), breaker_config(10));
        let capability: Arc<ScriptedCapability> = Arc::new(ScriptedCapability::new(
            idempotent_descriptor(),
            2,
            || CapabilityError::transient("connection reset"),
        ));
        let as_dyn: Arc<dyn Capability> = capability.clone();

        let result = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), None)
            .await;

        assert!(result.is_success());
        assert_eq!(capability.calls(), 3);
        assert_eq!(result.metadata().get("attempts").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_permanent_failure_never_retried() {
        let pipeline = pipeline(fast_retry(5), breaker_config(10));
        let capability: Arc<ScriptedCapability> = Arc::new(ScriptedCapability::new(
            idempotent_descriptor(),
            99,
            || CapabilityError::permanent("no such record"),
        ));
        let as_dyn: Arc<dyn Capability> = capability.clone();

        let result = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), None)
            .await;

        assert!(!result.is_success());
        assert_eq!(capability.calls(), 1);
        match result {
            CallResult::Failure { code, .. } => assert_eq!(code, "PERMANENT_EXECUTION"),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_non_idempotent_without_key_not_retried() {
        let pipeline = pipeline(fast_retry(5), breaker_config(10));
        let descriptor = CapabilityDescriptor::new("t.x.SEND", "test").with_service("svc-b");
        let capability: Arc<ScriptedCapability> = Arc::new(ScriptedCapability::new(
            descriptor,
            99,
            || CapabilityError::transient("timeout"),
        ));
        let as_dyn: Arc<dyn Capability> = capability.clone();

        let result = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), None)
            .await;

        assert!(!result.is_success());
        assert_eq!(capability.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_idempotent_with_key_is_retried() {
        let pipeline = pipeline(fast_retry(3), breaker_config(10));
        let descriptor = CapabilityDescriptor::new("t.x.SEND", "test").with_service("svc-b2");
        let capability: Arc<ScriptedCapability> = Arc::new(ScriptedCapability::new(
            descriptor,
            1,
            || CapabilityError::transient("timeout"),
        ));
        let as_dyn: Arc<dyn Capability> = capability.clone();

        let result = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), Some("key-1"))
            .await;

        assert!(result.is_success());
        assert_eq!(capability.calls(), 2);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_executing() {
        let pipeline = pipeline(RetryPolicy::no_retry(), breaker_config(1));
        let capability: Arc<ScriptedCapability> = Arc::new(ScriptedCapability::new(
            idempotent_descriptor(),
            99,
            || CapabilityError::transient("down"),
        ));
        let as_dyn: Arc<dyn Capability> = capability.clone();

        // First call trips the breaker (threshold 1).
        let first = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), None)
            .await;
        assert!(!first.is_success());
        assert_eq!(capability.calls(), 1);

        // Second call is rejected at the gate.
        let second = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), None)
            .await;
        match &second {
            CallResult::Failure { code, metadata, .. } => {
                assert_eq!(code, "CIRCUIT_OPEN");
                assert!(metadata.contains_key("retry_after_ms"));
            }
            _ => panic!("expected circuit-open failure"),
        }
        assert_eq!(capability.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_classified_transient_and_retried() {
        let pipeline = ResiliencePipeline::new(
            breaker_config(10),
            fast_retry(2),
            Duration::from_secs(60),
            Duration::from_millis(10),
        );
        let mut slow = ScriptedCapability::new(idempotent_descriptor(), 0, || {
            CapabilityError::transient("unused")
        });
        slow.delay = Duration::from_millis(100);
        let capability = Arc::new(slow);
        let as_dyn: Arc<dyn Capability> = capability.clone();

        let result = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), None)
            .await;

        assert!(!result.is_success());
        assert_eq!(capability.calls(), 2);
        match result {
            CallResult::Failure { code, .. } => assert_eq!(code, "EXECUTION_TIMEOUT"),
            _ => panic!("expected timeout failure"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_same_key_executes_once() {
        let pipeline = Arc::new(pipeline(RetryPolicy::no_retry(), breaker_config(10)));
        let descriptor = CapabilityDescriptor::new("t.x.SEND", "test").with_service("svc-c");
        let mut scripted = ScriptedCapability::new(descriptor, 0, || {
            CapabilityError::transient("unused")
        });
        scripted.delay = Duration::from_millis(20);
        let capability = Arc::new(scripted);
        let as_dyn: Arc<dyn Capability> = capability.clone();

        let args = JsonObject::new();
        let ctx = ctx();
        let (a, b) = tokio::join!(
            pipeline.invoke(&as_dyn, &args, &ctx, Some("K")),
            pipeline.invoke(&as_dyn, &args, &ctx, Some("K")),
        );

        assert_eq!(capability.calls(), 1);
        assert!(a.is_success() && b.is_success());
        assert_eq!(a.to_envelope()["data"], b.to_envelope()["data"]);
    }

    #[tokio::test]
    async fn test_replay_after_settlement() {
        let pipeline = pipeline(RetryPolicy::no_retry(), breaker_config(10));
        let descriptor = CapabilityDescriptor::new("t.x.SEND", "test").with_service("svc-d");
        let capability: Arc<ScriptedCapability> = Arc::new(ScriptedCapability::new(
            descriptor,
            0,
            || CapabilityError::transient("unused"),
        ));
        let as_dyn: Arc<dyn Capability> = capability.clone();

        let first = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), Some("K2"))
            .await;
        let second = pipeline
            .invoke(&as_dyn, &JsonObject::new(), &ctx(), Some("K2"))
            .await;

        assert_eq!(capability.calls(), 1);
        assert!(first.is_success());
        assert_eq!(
            second.metadata().get("idempotent_replay").map(String::as_str),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_cancelled_owner_does_not_wedge_key() {
        // 50ms execution timeout with no retry bounds the in-flight
        // deadline at 100ms.
        let pipeline = Arc::new(ResiliencePipeline::new(
            breaker_config(10),
            RetryPolicy::no_retry(),
            Duration::from_secs(60),
            Duration::from_millis(50),
        ));
        let descriptor = CapabilityDescriptor::new("t.x.SEND", "test").with_service("svc-e");
        let mut scripted = ScriptedCapability::new(descriptor, 0, || {
            CapabilityError::transient("unused")
        });
        scripted.delay = Duration::from_millis(30);
        let capability = Arc::new(scripted);
        let as_dyn: Arc<dyn Capability> = capability.clone();

        // The first caller claims the key but its future is dropped
        // before the capability finishes, so the key never settles.
        let owner = {
            let pipeline = pipeline.clone();
            let as_dyn = as_dyn.clone();
            tokio::spawn(async move {
                let args = JsonObject::new();
                let ctx = ctx();
                pipeline.invoke(&as_dyn, &args, &ctx, Some("K3")).await
            })
        };
        sleep(Duration::from_millis(5)).await;
        owner.abort();
        let _ = owner.await;

        sleep(Duration::from_millis(150)).await;

        let retry = timeout(
            Duration::from_secs(2),
            pipeline.invoke(&as_dyn, &JsonObject::new(), &ctx(), Some("K3")),
        )
        .await
        .unwrap();

        assert!(retry.is_success());
    }
}

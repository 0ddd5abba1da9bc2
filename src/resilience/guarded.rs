//! Rate limiter and circuit breaker composed in front of an external call.
//!
//! Order is fixed: wait for a token first, then go through the breaker. A call
//! rejected by an open breaker has still consumed its token.

use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, RateLimitConfig,
    RateLimiter,
};

#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The request can never fit the bucket (above burst limit)
    #[error("Request for {requested} tokens exceeds the burst limit of {component}")]
    RateLimited { component: String, requested: u32 },

    /// Breaker is open; the call was not made
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    #[error("{0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    /// Whether retrying later may succeed without any change on our side
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// One limiter and one breaker, owned per external client
#[derive(Debug, Clone)]
pub struct GuardedClient {
    name: String,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedClient {
    pub fn new(
        name: impl Into<String>,
        rate_limit: RateLimitConfig,
        circuit_breaker: CircuitBreakerConfig,
    ) -> Self {
        let name = name.into();
        Self {
            limiter: Arc::new(RateLimiter::new(rate_limit)),
            breaker: Arc::new(CircuitBreaker::new(name.clone(), circuit_breaker)),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Runs `operation` once a token is available, through the breaker
    pub async fn execute<F, T, E, Fut>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.limiter.acquire_blocking(1).await {
            return Err(GuardError::RateLimited {
                component: self.name.clone(),
                requested: 1,
            });
        }

        match self.breaker.call(operation).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::CircuitOpen { component }) => {
                debug!(component = %component, "Guarded call rejected by open circuit");
                Err(GuardError::CircuitOpen { component })
            }
            Err(CircuitBreakerError::OperationFailed(e)) => Err(GuardError::Operation(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client(rpw: u32, failure_threshold: u32) -> GuardedClient {
        GuardedClient::new(
            "tracker",
            RateLimitConfig {
                requests_per_window: rpw,
                window: Duration::from_secs(10),
                burst_limit: 5,
            },
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_tokens_before_calling() {
        let guarded = client(1, 5);
        assert!(guarded.execute(|| async { Ok::<_, String>(1) }).await.is_ok());

        let start = tokio::time::Instant::now();
        assert!(guarded.execute(|| async { Ok::<_, String>(2) }).await.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test]
    async fn open_breaker_is_transient() {
        let guarded = client(100, 1);
        let failed = guarded
            .execute(|| async { Err::<(), _>("boom".to_string()) })
            .await;
        assert!(matches!(failed, Err(GuardError::Operation(_))));
        assert_eq!(guarded.circuit_state(), CircuitState::Open);

        let rejected = guarded.execute(|| async { Ok::<_, String>(()) }).await;
        match rejected {
            Err(e @ GuardError::CircuitOpen { .. }) => assert!(e.is_transient()),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }
}

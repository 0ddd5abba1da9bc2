//! # Resilience Module
//!
//! Fault isolation for calls to external systems (issue tracker, broker, database).
//!
//! ## Architecture
//!
//! - **Rate limiter**: per-client token bucket with fractional continuous refill
//! - **Circuit breaker**: lock-free Closed/Open/Half-Open with a single trial call
//! - **Guarded client**: limiter then breaker, the order every tracker call uses
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bug_triage_core::resilience::{CircuitBreakerConfig, GuardedClient, RateLimitConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let guarded = GuardedClient::new(
//!     "github",
//!     RateLimitConfig::github(),
//!     CircuitBreakerConfig::for_external_api(),
//! );
//!
//! let body = guarded
//!     .execute(|| async { Ok::<_, std::io::Error>("response") })
//!     .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod guarded;
pub mod metrics;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::{CircuitBreakerConfig, RateLimitConfig};
pub use guarded::{GuardError, GuardedClient};
pub use metrics::CircuitBreakerMetrics;
pub use rate_limiter::RateLimiter;

//! # Structured Logging Module
//!
//! Environment-aware structured logging for the triage services. Console output
//! is human-readable by default; `BUG_TRIAGE_LOG_FORMAT=json` switches to one
//! JSON object per line for log shippers.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::resilience::CircuitState;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("RUST_LOG")
            .ok()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_format();

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Use try_init to avoid panic if a global subscriber is already set
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var("BUG_TRIAGE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var("BUG_TRIAGE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log the outcome of one assignment decision
pub fn log_assignment_decision(
    bug_id: &str,
    developer_id: Option<&str>,
    confidence: Option<f64>,
    outcome: &str,
    details: Option<&str>,
) {
    tracing::info!(
        bug_id = %bug_id,
        developer_id = developer_id,
        confidence = confidence,
        outcome = %outcome,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🎯 ASSIGNMENT_DECISION"
    );
}

/// Log structured data for queue operations
pub fn log_queue_operation(
    operation: &str,
    target: &str,
    message_type: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        target_name = %target,
        message_type = message_type,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📨 QUEUE_OPERATION"
    );
}

/// Log a circuit breaker state change
pub fn log_breaker_transition(component: &str, from: CircuitState, to: CircuitState) {
    tracing::warn!(
        component = %component,
        from = %from,
        to = %to,
        timestamp = %Utc::now().to_rfc3339(),
        "⚡ BREAKER_TRANSITION"
    );
}

/// Log what the dead-letter handler decided for one message
pub fn log_dead_letter_decision(
    queue: &str,
    message_type: Option<&str>,
    failure_count: u32,
    decision: &str,
    reason: Option<&str>,
) {
    tracing::info!(
        queue = %queue,
        message_type = message_type,
        failure_count = failure_count,
        decision = %decision,
        reason = reason,
        timestamp = %Utc::now().to_rfc3339(),
        "☠️ DEAD_LETTER_DECISION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detection() {
        std::env::set_var("BUG_TRIAGE_ENV", "test_override");
        let env = get_environment();
        assert_eq!(env, "test_override");
        std::env::remove_var("BUG_TRIAGE_ENV");
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_breaker_transition("github", CircuitState::Closed, CircuitState::Open);
    }
}

//! Convenience macros for common logging patterns in the support router.

/// Log a timed operation (measures and logs duration)
#[macro_export]
macro_rules! log_timed {
    ($name:expr, $block:expr) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(target: "timing", operation = $name, duration_ms = duration_ms, "operation completed");
        result
    }};
}

/// Log an external service call
#[macro_export]
macro_rules! log_external_call {
    ($service:expr, $endpoint:expr) => {
        tracing::debug!(target: "external", service = $service, endpoint = $endpoint, "calling external service");
    };
    ($service:expr, $endpoint:expr, $duration_ms:expr, $status:expr) => {
        tracing::info!(target: "external", service = $service, endpoint = $endpoint, duration_ms = $duration_ms, status = $status, "external call completed");
    };
}

/// Log a cache operation
#[macro_export]
macro_rules! log_cache {
    (hit, $key:expr) => {
        tracing::debug!(target: "cache", operation = "hit", key = $key, "cache hit");
    };
    (miss, $key:expr) => {
        tracing::debug!(target: "cache", operation = "miss", key = $key, "cache miss");
    };
    (set, $key:expr) => {
        tracing::debug!(target: "cache", operation = "set", key = $key, "cache set");
    };
}

/// Log a feature toggle check
#[macro_export]
macro_rules! log_feature {
    ($feature:expr, $enabled:expr) => {
        tracing::debug!(target: "features", feature = $feature, enabled = $enabled, "feature check");
    };
}

/// Log a fallback or retry attempt
#[macro_export]
macro_rules! log_retry {
    ($operation:expr, $attempt:expr, $max_attempts:expr) => {
        tracing::warn!(target: "retry", operation = $operation, attempt = $attempt, max_attempts = $max_attempts, "retrying operation");
    };
    ($operation:expr, $attempt:expr, $max_attempts:expr, $error:expr) => {
        tracing::warn!(target: "retry", operation = $operation, attempt = $attempt, max_attempts = $max_attempts, error = %$error, "retrying after error");
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_compile() {
        let value = log_timed!("classify", 40 + 2);
        assert_eq!(value, 42);

        log_external_call!("openai", "/v1/embeddings");
        log_external_call!("openai", "/v1/embeddings", 12u64, 200u16);

        log_cache!(hit, "primary");
        log_cache!(miss, "primary");
        log_cache!(set, "primary");

        log_feature!("LocalVectorFallback", true);

        log_retry!("vector_query", 2, 2);
        log_retry!("vector_query", 2, 2, "primary unavailable");
    }
}

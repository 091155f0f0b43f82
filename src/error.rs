//! Stable error-kind taxonomy shared across every component.
//!
//! Individual components define their own `thiserror` enums with
//! component-specific variants; each implements [`Classify`] so callers can
//! branch on the six stable kinds without matching every concrete variant.

use std::fmt;

/// The six stable error kinds named by the design.
///
/// These are a *classification*, not a type hierarchy: multiple concrete
/// error variants across different components map onto the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed arguments, unknown strategy, invalid slug, missing required argument.
    Validation,
    /// Shell-guard block, loop-detector block, permission denied, depth/concurrency/task limit reached.
    PolicyBlock,
    /// Provider/sandbox/transport unreachable; command not found.
    ResourceUnavailable,
    /// Context deadline exceeded at any layer.
    Timeout,
    /// HTTP 5xx, connection reset, "deadline exceeded" on a provider call (retryable).
    Transient,
    /// Panics, non-retryable protocol errors, schema contradictions.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::PolicyBlock => "policy_block",
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Implemented by every component error enum to expose the stable taxonomy.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    /// Transient errors (and only transient errors) are retried by the tool loop.
    fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Classify a raw provider-error message surface into a [`ErrorKind`].
///
/// A small pure predicate (no network access) so retry classification is
/// unit-testable in isolation, per the design's guidance on transient
/// classification.
pub fn classify_provider_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("context deadline") {
        return ErrorKind::Timeout;
    }

    let transient_markers = [
        "connection reset",
        "connection refused",
        "broken pipe",
        "timed out",
        "temporarily unavailable",
        "rate limit",
        "429",
        "500 ",
        "502",
        "503",
        "504",
        "internal server error",
        "bad gateway",
        "service unavailable",
        "gateway timeout",
        "deadline exceeded",
    ];
    if transient_markers.iter().any(|m| lower.contains(m)) {
        return ErrorKind::Transient;
    }

    if lower.contains("not found") || lower.contains("no such file") || lower.contains("unreachable")
    {
        return ErrorKind::ResourceUnavailable;
    }

    ErrorKind::Fatal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_deadline_exceeded_as_timeout() {
        assert_eq!(
            classify_provider_error("context deadline exceeded"),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn classifies_5xx_as_transient() {
        assert_eq!(
            classify_provider_error("received 503 Service Unavailable"),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_provider_error("connection reset by peer"),
            ErrorKind::Transient
        );
    }

    #[test]
    fn classifies_bare_deadline_exceeded_as_transient_not_timeout() {
        assert_eq!(
            classify_provider_error("rpc error: deadline exceeded"),
            ErrorKind::Transient
        );
    }

    #[test]
    fn classifies_unknown_as_fatal() {
        assert_eq!(
            classify_provider_error("schema contradiction: expected object"),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn classifies_missing_binary_as_resource_unavailable() {
        assert_eq!(
            classify_provider_error("command not found: foo"),
            ErrorKind::ResourceUnavailable
        );
    }

    #[test]
    fn error_kind_display_is_snake_case() {
        assert_eq!(ErrorKind::PolicyBlock.to_string(), "policy_block");
    }
}

use std::time::Duration;

use thiserror::Error;

/// Failures raised by the evaluation core.
///
/// `Data` is fatal and stops a run before any querying starts. `Retrieval`
/// and `Encoding` are recovered per (label, threshold) cell by the sweep.
/// `Aggregation` signals a structurally inconsistent metric collection.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("data error: {0}")]
    Data(String),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("encoding error for '{text}': {reason}")]
    Encoding { text: String, reason: String },

    #[error("aggregation error: {0}")]
    Aggregation(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("{operation} timed out after {} ms", timeout.as_millis())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("transport error during {operation}: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
        transient: bool,
    },

    #[error("backend returned status {status} during {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    #[error("scroll pagination incomplete after {pages} pages ({points} points collected)")]
    Pagination { pages: usize, points: usize },

    #[error("failed to decode {operation} response: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    #[error("local index error during {operation}: {reason}")]
    Local {
        operation: &'static str,
        reason: String,
    },
}

impl RetrievalError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport { transient, .. } => *transient,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedFilter(_)
            | Self::Pagination { .. }
            | Self::Decode { .. }
            | Self::Local { .. } => false,
        }
    }
}

impl EvalError {
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn aggregation(message: impl Into<String>) -> Self {
        Self::Aggregation(message.into())
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Retrieval(error) => error.is_transient(),
            Self::Data(_) | Self::Encoding { .. } | Self::Aggregation(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_timeouts_are_transient() {
        let timeout = RetrievalError::Timeout {
            operation: "search",
            timeout: Duration::from_millis(10),
        };
        assert!(timeout.is_transient());

        let unavailable = RetrievalError::Status {
            operation: "search",
            status: 503,
            body: String::new(),
        };
        assert!(unavailable.is_transient());

        let throttled = RetrievalError::Status {
            operation: "scroll",
            status: 429,
            body: String::new(),
        };
        assert!(throttled.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let bad_request = RetrievalError::Status {
            operation: "search",
            status: 400,
            body: "bad filter".to_string(),
        };
        assert!(!bad_request.is_transient());
        assert!(!RetrievalError::MalformedFilter("empty".to_string()).is_transient());
        assert!(!EvalError::data("missing labels").is_transient());
    }
}

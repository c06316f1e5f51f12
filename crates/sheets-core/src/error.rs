//! Error taxonomy shared by the relay, the stores, and the HTTP layer.
//!
//! Per-item failures (one URL, one context path) never surface as a
//! [`SheetsError`] to the client: they are rendered inline into the
//! composed prompt. Everything here is request-level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SheetsError {
    /// Malformed or incomplete request, rejected before any upstream call.
    #[error("{0}")]
    Validation(String),

    /// Strict mode only: the prompt carries no URL.
    #[error("Please include at least one URL in your prompt")]
    NoUrl,

    /// The completion API was unreachable or answered with a non-success status.
    #[error("upstream request failed: {0}")]
    UpstreamConnect(String),

    /// The completion stream broke after headers were committed.
    #[error("upstream stream failed: {0}")]
    UpstreamStream(String),

    /// A single URL or context lookup failed.
    #[error("failed to fetch {target}: {message}")]
    Fetch { target: String, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// Transient storage failure, distinct from "not found".
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl SheetsError {
    pub fn validation(message: impl Into<String>) -> Self {
        SheetsError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        SheetsError::NotFound(message.into())
    }

    /// True for errors the client caused and can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SheetsError::Validation(_)
                | SheetsError::NoUrl
                | SheetsError::NotFound(_)
                | SheetsError::Unauthorized
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_url_message_is_user_facing() {
        assert_eq!(
            SheetsError::NoUrl.to_string(),
            "Please include at least one URL in your prompt"
        );
    }

    #[test]
    fn test_storage_wraps_anyhow() {
        let err: SheetsError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, SheetsError::Storage(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(SheetsError::validation("prompt is required").is_client_error());
        assert!(SheetsError::not_found("Sheet not found").is_client_error());
        assert!(SheetsError::Unauthorized.is_client_error());
        assert!(!SheetsError::UpstreamConnect("502".into()).is_client_error());
    }
}

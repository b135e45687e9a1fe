//! Client error types.

/// Errors produced by remote calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid credential")]
    InvalidCredential,

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// Returns `true` if the credential was rejected and must not be reused.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    /// Returns `true` for the deliberate cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Unauthorized(_) => Some(401),
            ClientError::NotFound(_) => Some(404),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl crate::session::InvalidatesSession for ClientError {
    fn invalidates_session(&self) -> bool {
        self.is_unauthorized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let api = ClientError::Api {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(api.status(), Some(500));
        assert_eq!(ClientError::Unauthorized("x".into()).status(), Some(401));
        assert_eq!(ClientError::Cancelled.status(), None);
    }

    #[test]
    fn classification() {
        assert!(ClientError::Unauthorized("Invalid token".into()).is_unauthorized());
        assert!(!ClientError::Cancelled.is_unauthorized());
        assert!(ClientError::Cancelled.is_cancelled());
    }
}

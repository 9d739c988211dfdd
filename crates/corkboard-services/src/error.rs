//! Remote board store error taxonomy.

use corkboard_core::error::ReqwestErrorExt;
use corkboard_core::{AppError, AuthError, NetworkError};
use thiserror::Error;

/// Detail string the backend uses when the bearer token cannot be decoded.
const CREDENTIAL_DETAIL: &str = "Could not validate credentials";

/// Coarse failure classes the synchronization engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Backend could not be reached or answered garbage
    Transport,
    /// Credential invalid or expired; escalate, never retry
    Authorization,
    /// Backend rejected the change; show the detail verbatim
    Validation,
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Transport failure: {0}")]
    Transport(#[from] NetworkError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected ({status}): {detail}")]
    Validation { status: u16, detail: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.into_network_error())
        }
    }
}

impl RemoteError {
    /// Map an HTTP error status and body to a typed failure.
    ///
    /// FastAPI bodies look like `{"detail": "..."}`; anything else is kept raw.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.to_string());

        match status {
            401 => RemoteError::Unauthorized,
            403 if detail == CREDENTIAL_DETAIL => RemoteError::Unauthorized,
            403 => RemoteError::Forbidden(detail),
            404 => RemoteError::NotFound(detail),
            400..=499 => RemoteError::Validation { status, detail },
            _ => RemoteError::Server {
                status,
                message: detail,
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Transport(_) | RemoteError::Server { .. } | RemoteError::Decode(_) => {
                FailureKind::Transport
            }
            RemoteError::Unauthorized => FailureKind::Authorization,
            RemoteError::Forbidden(_)
            | RemoteError::NotFound(_)
            | RemoteError::Validation { .. } => FailureKind::Validation,
        }
    }

    /// Message for the user-facing layer. Validation details pass through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::Forbidden(detail)
            | RemoteError::NotFound(detail)
            | RemoteError::Validation { detail, .. } => detail.clone(),
            RemoteError::Unauthorized => AuthError::InvalidToken.user_message().to_string(),
            RemoteError::Transport(e) => e.user_message().to_string(),
            RemoteError::Server { status, .. } => NetworkError::ServerError {
                status: *status,
                message: String::new(),
            }
            .user_message()
            .to_string(),
            RemoteError::Decode(_) => NetworkError::InvalidResponse(String::new())
                .user_message()
                .to_string(),
        }
    }
}

impl From<RemoteError> for AppError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Transport(n) => AppError::Network(n),
            RemoteError::Unauthorized => AppError::Auth(AuthError::InvalidToken),
            RemoteError::Forbidden(detail)
            | RemoteError::NotFound(detail)
            | RemoteError::Validation { detail, .. } => AppError::Rejected(detail),
            RemoteError::Server { status, message } => {
                AppError::Network(NetworkError::ServerError { status, message })
            }
            RemoteError::Decode(msg) => AppError::Network(NetworkError::InvalidResponse(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_validation_detail_is_surfaced_verbatim() {
        let err = RemoteError::from_status(
            400,
            r#"{"detail":"Column with this name already exists in this board"}"#,
        );
        assert_eq!(err.kind(), FailureKind::Validation);
        assert_eq!(
            err.user_message(),
            "Column with this name already exists in this board"
        );
    }

    #[test]
    fn test_credential_403_is_authorization() {
        let err = RemoteError::from_status(403, r#"{"detail":"Could not validate credentials"}"#);
        assert!(matches!(err, RemoteError::Unauthorized));
        assert_eq!(err.kind(), FailureKind::Authorization);
    }

    #[test]
    fn test_permission_403_is_validation() {
        let err = RemoteError::from_status(403, r#"{"detail":"Not enough permissions"}"#);
        assert_eq!(err.kind(), FailureKind::Validation);
        assert_eq!(err.user_message(), "Not enough permissions");
    }

    #[test]
    fn test_server_errors_are_transport_class() {
        let err = RemoteError::from_status(502, "bad gateway");
        assert_eq!(err.kind(), FailureKind::Transport);
    }

    #[test]
    fn test_non_json_body_kept_raw() {
        let err = RemoteError::from_status(422, "plain text");
        assert!(matches!(err, RemoteError::Validation { status: 422, ref detail } if detail == "plain text"));
    }

    #[test]
    fn test_app_error_conversion() {
        let app: AppError = RemoteError::Unauthorized.into();
        assert!(matches!(app, AppError::Auth(AuthError::InvalidToken)));

        let app: AppError = RemoteError::NotFound("Ticket not found".into()).into();
        assert!(matches!(app, AppError::Rejected(ref d) if d == "Ticket not found"));
    }
}

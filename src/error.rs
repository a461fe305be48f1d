//! Error kinds returned by the credential managers.
//!
//! The managers distinguish every failure internally so callers can log and
//! count them, while [`CredentialError::public_message`] collapses the
//! authentication failures into one externally visible message.

use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No record exists for the identity.
    #[error("credential not found: {0}")]
    NotFound(String),
    /// The presented secret matches no record.
    #[error("invalid credential")]
    Invalid,
    /// The record exists but was rotated away or revoked.
    #[error("credential inactive: {0}")]
    Inactive(String),
    /// The record is past its TTL.
    #[error("credential expired: {0}")]
    Expired(String),
    /// Valid credential, insufficient scope.
    #[error("missing required scopes: {}", .0.join(", "))]
    Forbidden(Vec<String>),
    /// The OS entropy source failed. Not retried.
    #[error("secret generator unavailable: {0}")]
    GeneratorUnavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CredentialError>;

impl CredentialError {
    /// True for the kinds that render as an authentication failure.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            CredentialError::NotFound(_)
                | CredentialError::Invalid
                | CredentialError::Inactive(_)
                | CredentialError::Expired(_)
        )
    }

    /// Transport status for this kind.
    pub fn http_status(&self) -> StatusCode {
        match self {
            CredentialError::NotFound(_)
            | CredentialError::Invalid
            | CredentialError::Inactive(_)
            | CredentialError::Expired(_) => StatusCode::UNAUTHORIZED,
            CredentialError::Forbidden(_) => StatusCode::FORBIDDEN,
            CredentialError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CredentialError::GeneratorUnavailable(_) | CredentialError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show a client. Authentication failures never reveal
    /// which condition occurred.
    pub fn public_message(&self) -> String {
        match self {
            e if e.is_auth_failure() => "invalid or expired credentials".to_string(),
            CredentialError::Forbidden(_) => "insufficient scope".to_string(),
            CredentialError::InvalidInput(msg) => msg.clone(),
            _ => "internal error".to_string(),
        }
    }

    /// Short stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialError::NotFound(_) => "not_found",
            CredentialError::Invalid => "invalid",
            CredentialError::Inactive(_) => "inactive",
            CredentialError::Expired(_) => "expired",
            CredentialError::Forbidden(_) => "forbidden",
            CredentialError::GeneratorUnavailable(_) => "generator_unavailable",
            CredentialError::InvalidInput(_) => "invalid_input",
            CredentialError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_share_status_and_message() {
        let errs = [
            CredentialError::NotFound("k".into()),
            CredentialError::Invalid,
            CredentialError::Inactive("k".into()),
            CredentialError::Expired("k".into()),
        ];
        for err in errs {
            assert_eq!(err.http_status(), StatusCode::UNAUTHORIZED);
            assert_eq!(err.public_message(), "invalid or expired credentials");
        }
    }

    #[test]
    fn non_auth_statuses() {
        assert_eq!(
            CredentialError::Forbidden(vec!["write".into()]).http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            CredentialError::InvalidInput("bad".into()).http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CredentialError::GeneratorUnavailable("os".into()).http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CredentialError::Forbidden(vec!["a".into(), "b".into()]).to_string(),
            "missing required scopes: a, b"
        );
    }
}

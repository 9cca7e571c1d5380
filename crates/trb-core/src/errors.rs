use std::time::Duration;

/// Failure modes surfaced by a messaging client (primary, secondary or elevated).
///
/// This is a closed set: adapters map their transport errors into one of these
/// so the pipeline can branch on them without knowing the transport.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Duration },

    #[error("transient network error: {0}")]
    Transient(String),
}

/// Why a content reference could not be turned into media.
///
/// These are expected user-input outcomes and are never recorded to the
/// operational log.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("channel is protected")]
    Protected,

    #[error("login required")]
    LoginRequired,

    #[error("message not found")]
    NotFound,

    #[error("invalid link")]
    InvalidLink,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("size {size} exceeds limit {limit} and no elevated backend is available")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("backend failure: {0}")]
    BackendFailure(String),

    #[error("disk failure: {0}")]
    DiskFailure(String),
}

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the pipeline can
/// handle failures consistently (user-facing message vs operational log).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short text shown to the requester in the invoking chat.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::Resolution(ResolutionError::Protected) => "❌ This channel is protected.",
            Error::Resolution(ResolutionError::LoginRequired) => {
                "❌ Login required to fetch this content."
            }
            Error::Resolution(ResolutionError::NotFound) => {
                "❌ Message not found or inaccessible."
            }
            Error::Resolution(ResolutionError::InvalidLink) => "❌ Invalid link.",
            Error::Transfer(TransferError::AccessDenied(_))
            | Error::Client(ClientError::AccessDenied(_)) => {
                "❌ Access denied. Have you joined the channel?"
            }
            _ => "❌ Transfer failed. Please try again later.",
        }
    }

    /// Whether this failure belongs in the operational log.
    pub fn is_operational(&self) -> bool {
        !matches!(self, Error::Resolution(_))
    }
}

impl From<ClientError> for TransferError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::AccessDenied(m) => TransferError::AccessDenied(m),
            other => TransferError::BackendFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_errors_are_not_operational() {
        assert!(!Error::from(ResolutionError::Protected).is_operational());
        assert!(!Error::from(ResolutionError::InvalidLink).is_operational());
        assert!(Error::from(TransferError::DiskFailure("x".into())).is_operational());
        assert!(Error::from(ClientError::Transient("x".into())).is_operational());
    }

    #[test]
    fn access_denied_gets_specific_user_message() {
        let e = Error::from(ClientError::AccessDenied("private".into()));
        assert!(e.user_message().contains("Access denied"));
        let e = Error::from(TransferError::BackendFailure("boom".into()));
        assert!(e.user_message().contains("Transfer failed"));
    }
}

// ── Core error types ──
//
// User-facing errors from ember-core. Consumers never see socket or
// JSON failures directly; the `From<ember_remote::Error>` impl
// translates link-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cannot reach the sync service: {reason}")]
    ConnectionFailed { reason: String },

    #[error("session token rejected by the sync service")]
    Unauthorized,

    #[error("not connected to the sync service")]
    Disconnected,

    #[error("subscription rejected: {message}")]
    SubscriptionRejected { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl From<ember_remote::Error> for CoreError {
    fn from(err: ember_remote::Error) -> Self {
        match err {
            ember_remote::Error::Connect { reason, .. } => Self::ConnectionFailed { reason },
            ember_remote::Error::Unauthorized => Self::Unauthorized,
            ember_remote::Error::InvalidUrl(e) => Self::Config {
                message: format!("invalid service URL: {e}"),
            },
            ember_remote::Error::LinkClosed => Self::Disconnected,
            ember_remote::Error::Link { reason } => Self::ConnectionFailed { reason },
            ember_remote::Error::Protocol { message } => Self::ConnectionFailed {
                reason: format!("protocol fault: {message}"),
            },
        }
    }
}

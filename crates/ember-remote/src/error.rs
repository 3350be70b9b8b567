// ── Client errors ──
//
// Failures crossing the SDK boundary. Subscription rejections are NOT
// represented here -- they arrive through the subscription's `on_error`
// callback, carrying the server's message verbatim.

use thiserror::Error;

/// Unified error type for the remote client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("service rejected the session token")]
    Unauthorized,

    #[error("invalid service URL: {0}")]
    InvalidUrl(String),

    #[error("link to the service is closed")]
    LinkClosed,

    #[error("link error: {reason}")]
    Link { reason: String },

    #[error("malformed frame from the service: {message}")]
    Protocol { message: String },
}

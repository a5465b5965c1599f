//! Error taxonomy for the storefront client core.
//!
//! Every fallible operation in the crate resolves to a `ClientError`.
//! Local field checks fail with `Validation` and never reach the network;
//! remote failures are mapped from HTTP status codes so call sites can
//! show a transient, retryable message instead of a fatal one.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A local field check failed. Never produced by a network call.
    #[error("{0}")]
    Validation(String),

    /// An operation requiring a user-scoped key was invoked with no
    /// signed-in user.
    #[error("No user is signed in")]
    NotLoggedIn,

    /// The store rejected our credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A referenced order or document is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The asset host rejected an image (non-2xx, size, or type).
    #[error("Upload failed: {0}")]
    Upload(String),

    /// An admin-only callable was invoked without the admin flag.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// A store write (or read) failed transiently. Surfaced to the user
    /// as retryable; never fatal to the app.
    #[error("Store operation failed: {0}")]
    TransientWrite(String),
}

impl ClientError {
    /// Map an HTTP status from the document store / callable endpoints
    /// into the taxonomy. The callables use 401 for `unauthenticated`,
    /// 403 for `permission-denied`, and 412 for `failed-precondition`.
    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            401 => ClientError::Auth(detail),
            403 => ClientError::Permission(detail),
            404 => ClientError::NotFound(detail),
            412 => ClientError::TransientWrite(format!("precondition failed: {detail}")),
            _ => ClientError::TransientWrite(detail),
        }
    }

    /// Whether the user-facing treatment is a transient retryable toast.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::TransientWrite(_) | ClientError::Upload(_))
    }
}

impl From<rusqlite::Error> for ClientError {
    fn from(e: rusqlite::Error) -> Self {
        ClientError::TransientWrite(format!("local store: {e}"))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

// error.rs: Error types for remote requests.

use thiserror::Error;

/// Errors a [`RemoteClient`](crate::RemoteClient) can report.
///
/// `Clone` so that a single failed request can be handed to every task
/// waiting on its outcome.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The server rejected our credentials. The session has been signed out.
    #[error("unauthorized")]
    Unauthorized,

    /// There is no signed-in user to make the request for.
    #[error("not signed in")]
    NotSignedIn,

    /// The server answered with a non-success status.
    /// `message` is the server's own `error_message` when it sent one.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The request never got a response (DNS, TLS, timeout, connection reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body was not valid JSON.
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Unauthorized)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

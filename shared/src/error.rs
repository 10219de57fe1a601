//! Error types for Crank.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("Invalid target path {path:?}: {reason}")]
    InvalidTarget { path: String, reason: String },

    /// Carries the origin's failure message verbatim.
    #[error("{0}")]
    Origin(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Unexpected origin event: {0}")]
    UnexpectedEvent(String),
}

impl Error {
    /// True for errors caused by the router breaking the request framing.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::MalformedRequestLine(_) | Error::InvalidTarget { .. })
    }
}

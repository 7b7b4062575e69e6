//! Error kinds shared by the local engine and the dispatcher. The kind of an
//! error survives a round-trip over the wire, so a server-side failure is
//! re-raised client-side as the same variant.

use thiserror::Error;

/// The errors surfaced by knowledgebases, learners and the dispatcher.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum Error {
    /// A caller-supplied value was rejected, for example a word outside the
    /// alphabet or an automaton with more than one initial state.
    #[error("invalid argument: {0}")]
    Argument(String),
    /// A serialized knowledgebase buffer could not be decoded.
    #[error("malformed buffer: {0}")]
    Format(String),
    /// A wire message violated the dispatcher protocol, or a handle did not
    /// refer to a live object.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The connection to the dispatcher failed, timed out or was closed.
    #[error("connection failure: {0}")]
    Connection(String),
    /// An internal invariant of a learning strategy was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable tags for the variants of [`Error`], with fixed codes for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    Format,
    Protocol,
    Connection,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> u8 {
        match self {
            ErrorKind::Argument => 1,
            ErrorKind::Format => 2,
            ErrorKind::Protocol => 3,
            ErrorKind::Connection => 4,
            ErrorKind::Internal => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ErrorKind::Argument),
            2 => Some(ErrorKind::Format),
            3 => Some(ErrorKind::Protocol),
            4 => Some(ErrorKind::Connection),
            5 => Some(ErrorKind::Internal),
            _ => None,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Argument(_) => ErrorKind::Argument,
            Error::Format(_) => ErrorKind::Format,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Rebuilds an error from its wire representation.
    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Argument => Error::Argument(message),
            ErrorKind::Format => Error::Format(message),
            ErrorKind::Protocol => Error::Protocol(message),
            ErrorKind::Connection => Error::Connection(message),
            ErrorKind::Internal => Error::Internal(message),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Argument(msg)
            | Error::Format(msg)
            | Error::Protocol(msg)
            | Error::Connection(msg)
            | Error::Internal(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};

    #[test]
    fn kinds_round_trip_through_codes() {
        for kind in [
            ErrorKind::Argument,
            ErrorKind::Format,
            ErrorKind::Protocol,
            ErrorKind::Connection,
            ErrorKind::Internal,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(42), None);
    }

    #[test]
    fn errors_rebuild_with_their_kind() {
        let original = Error::Argument("two initial states".to_string());
        let rebuilt = Error::from_kind(original.kind(), original.message().to_string());
        assert_eq!(original, rebuilt);
    }
}

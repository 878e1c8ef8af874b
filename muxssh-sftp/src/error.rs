use thiserror::Error;

use crate::protocol::StatusCode;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Error from the underlying session or channel.
    #[error(transparent)]
    Connect(#[from] muxssh::Error),

    /// Binary (de)-serialization error.
    #[error(transparent)]
    Binary(#[from] binrw::Error),

    /// End of file, or no more directory entries.
    #[error("End of file")]
    Eof,

    /// The path doesn't exist on the server.
    #[error("No such file: {0}")]
    NoSuchFile(String),

    /// The server refused the operation for lack of permissions.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The server failed the operation with another status.
    #[error("The server failed the request ({code:?}): {message}")]
    Status {
        /// The status code sent by the server.
        code: StatusCode,

        /// Textual description sent by the server.
        message: String,
    },

    /// The server answered a request with a response of the wrong type.
    #[error("Received an unexpected response from the server")]
    UnexpectedResponse,

    /// The server sent a malformed or oversized packet, the session has been closed.
    #[error("The server violated the protocol: {0}")]
    ProtocolViolation(&'static str),

    /// The server doesn't speak a supported protocol version.
    #[error("The server selected the unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    /// An argument is invalid in combination with the others.
    #[error("{message} (parameter `{param}`)")]
    InvalidArgument {
        /// Description of the problem.
        message: String,

        /// Name of the offending parameter.
        param: &'static str,
    },

    /// An argument lies outside of its valid range.
    #[error("The value of `{param}` is out of range")]
    OutOfRange {
        /// Name of the offending parameter.
        param: &'static str,
    },

    /// The operation is not valid for the current state of the object.
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// The SFTP session or the file has been closed.
    #[error("The SFTP session has been closed")]
    Closed,
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        use std::io::ErrorKind;

        let kind = match &value {
            Error::Eof => ErrorKind::UnexpectedEof,
            Error::NoSuchFile(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::InvalidArgument { .. } | Error::OutOfRange { .. } => ErrorKind::InvalidInput,
            Error::Closed => ErrorKind::NotConnected,
            Error::Connect(muxssh::Error::OperationTimeout) => ErrorKind::TimedOut,
            _ => ErrorKind::Other,
        };

        Self::new(kind, value)
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

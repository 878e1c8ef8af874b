use std::sync::Arc;

use thiserror::Error;

use crate::msg::connect::OpenFailureReason;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Binary (de)-serialization error.
    #[error(transparent)]
    Binary(#[from] binrw::Error),

    /// The session has not been connected, or is not anymore.
    #[error("The session is not connected")]
    NotConnected,

    /// The session has been disconnected.
    #[error("The session has been disconnected")]
    Disconnected,

    /// The connection couldn't be established in the configured delay.
    #[error("Timed out while establishing the connection")]
    ConnectionTimeout,

    /// A blocking operation didn't complete in the configured delay.
    #[error("The operation has timed out")]
    OperationTimeout,

    /// The peer refused the authentication.
    #[error("The authentication has been refused by the peer")]
    AuthenticationFailed,

    /// The peer refused to open the channel.
    #[error("The peer refused to open the channel ({reason:?}): {description}")]
    ChannelOpenFailure {
        /// Reason of the refusal.
        reason: OpenFailureReason,

        /// Textual description sent by the peer.
        description: String,
    },

    /// The peer refused a channel request.
    #[error("The peer refused the `{0}` channel request")]
    ChannelRequestFailure(String),

    /// The peer refused a global request.
    #[error("The peer refused the `{0}` global request")]
    GlobalRequestFailure(String),

    /// The channel has been closed.
    #[error("The channel has been closed")]
    ChannelClosed,

    /// The peer sent a message that makes no sense in the current state.
    #[error("Received an unexpected message from the peer")]
    UnexpectedMessage,

    /// The packet framing was invalid.
    #[error("Malformed packet: {0}")]
    Malformed(&'static str),

    /// The message authentication code didn't match the packet.
    #[error("The packet integrity check failed")]
    Integrity,

    /// The object has been disposed and cannot be used anymore.
    #[error("The object has been disposed")]
    Disposed,

    /// The operation is not valid for the current state of the object.
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// The session failed, this is the error that caused it.
    #[error(transparent)]
    Session(Arc<Error>),
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

//! The _channel requests_ and their well-known payloads.

use binrw::binrw;

use crate::{
    arch::{Bool, Bytes},
    msg::connect,
    Result, Session,
};

/// The payload of the `exec` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big)]
pub struct Exec {
    /// The command to execute.
    pub command: Bytes,
}

/// The payload of the `subsystem` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big)]
pub struct Subsystem {
    /// Name of the subsystem.
    pub name: Bytes,
}

/// The payload of the `env` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big)]
pub struct Env {
    /// Name of the variable.
    pub name: Bytes,

    /// Value of the variable.
    pub value: Bytes,
}

/// The payload of the `exit-status` request.
#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(big)]
pub struct ExitStatus {
    /// Exit code of the remote command.
    pub code: u32,
}

/// The payload of the `exit-signal` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big)]
pub struct ExitSignal {
    /// Name of the signal, without the `SIG` prefix.
    pub signal_name: Bytes,

    /// Whether a core has been dumped.
    pub core_dumped: Bool,

    /// Textual description of the error.
    pub error_message: Bytes,

    /// Language tag of the description.
    pub language: Bytes,
}

/// A _channel request_ received from the peer.
///
/// Dropping the request without answering it replies with a failure if the peer wanted a reply.
pub struct Request {
    session: Session,
    recipient_channel: u32,
    inner: connect::ChannelRequest,
    answered: bool,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("recipient_channel", &self.recipient_channel)
            .field("inner", &self.inner)
            .finish()
    }
}

impl Request {
    pub(crate) fn new(
        session: Session,
        recipient_channel: u32,
        inner: connect::ChannelRequest,
    ) -> Self {
        Self {
            session,
            recipient_channel,
            inner,
            answered: false,
        }
    }

    /// The type of the request, such as `exit-status`.
    pub fn request_type(&self) -> &str {
        std::str::from_utf8(&self.inner.request_type).unwrap_or_default()
    }

    /// Whether the peer expects a reply.
    pub fn want_reply(&self) -> bool {
        *self.inner.want_reply
    }

    /// The type-specific data of the request.
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    pub(crate) fn respond(&mut self, accepted: bool) -> Result<()> {
        if std::mem::replace(&mut self.answered, true) || !self.want_reply() {
            return Ok(());
        }

        let recipient_channel = self.recipient_channel;
        if accepted {
            self.session
                .send(connect::ChannelSuccess { recipient_channel })
        } else {
            self.session
                .send(connect::ChannelFailure { recipient_channel })
        }
    }

    /// Accept the channel request.
    pub fn accept(mut self) -> Result<()> {
        self.respond(true)
    }

    /// Reject the channel request.
    pub fn reject(mut self) -> Result<()> {
        self.respond(false)
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Err(err) = self.respond(false) {
            tracing::debug!(
                "Unable to reject the `{}` channel request: {err}",
                self.request_type()
            );
        }
    }
}

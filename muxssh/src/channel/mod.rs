//! Definition of the [`Channel`] struct, a flow-controlled logical stream
//! multiplexed over the [`Session`].

use std::sync::{Arc, Weak};

use futures_time::future::FutureExt;

use crate::{msg, session, Error, Result, Session};

mod shared;
pub(crate) use shared::{Core, Delivery};

mod kind;
pub use kind::Kind;

pub mod request;
pub use request::Request;

mod window;

/// The state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The channel has been torn down, this is terminal.
    Closed,

    /// The open request has been sent, awaiting the peer's answer.
    Opening,

    /// The channel is open in both directions.
    Open,

    /// One of the sides initiated the close handshake.
    Closing,
}

/// An item received on a [`Channel`].
#[derive(Debug)]
pub enum Inbound {
    /// Data from the peer.
    Data(Vec<u8>),

    /// Extended data from the peer, such as `stderr`.
    ExtendedData(u32, Vec<u8>),

    /// A request from the peer, rejected when dropped.
    Request(Request),

    /// The peer won't send any more data.
    Eof,
}

/// A push-based consumer of a [`Channel`], invoked from the session thread.
///
/// The callbacks must return quickly, as every channel of the session shares the thread.
pub trait Handler: Send + 'static {
    /// Data has been received.
    fn on_data(&mut self, data: &[u8]);

    /// Extended data has been received.
    fn on_extended_data(&mut self, data_type: u32, data: &[u8]) {
        tracing::trace!(
            "Discarding {} bytes of extended data of type {data_type}",
            data.len()
        );
    }

    /// The peer won't send any more data.
    fn on_eof(&mut self) {}

    /// A request has been received, returns whether it is accepted.
    fn on_request(&mut self, request: &Request) -> bool {
        let _ = request;

        false
    }

    /// The channel has been closed.
    fn on_close(&mut self) {}

    /// The session failed, [`Handler::on_close`] follows.
    fn on_error(&mut self, error: &Arc<Error>) {
        let _ = error;
    }
}

/// A reference to an opened channel in the session.
///
/// Dropping the channel initiates the close handshake without awaiting it,
/// the channel is torn down anyway past [`Config::channel_close_timeout`](crate::Config::channel_close_timeout).
pub struct Channel {
    session: Session,
    core: Arc<Core>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.core.id)
            .field("kind", &self.core.kind)
            .field("state", &self.core.state())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(session: Session, core: Arc<Core>) -> Self {
        Self { session, core }
    }

    /// The local number of the channel.
    pub fn id(&self) -> u32 {
        self.core.id
    }

    /// The number of the channel on the peer's side.
    pub fn remote_id(&self) -> Option<u32> {
        self.core.remote_id()
    }

    /// The type of the channel.
    pub fn kind(&self) -> &Kind {
        &self.core.kind
    }

    /// The current state of the channel.
    pub fn state(&self) -> State {
        self.core.state()
    }

    /// Whether data can still be exchanged over the channel.
    pub fn is_open(&self) -> bool {
        matches!(self.state(), State::Open | State::Closing)
    }

    /// The session the channel is multiplexed on.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Bytes this side may still send before waiting for a window adjustment.
    pub fn remote_window(&self) -> u32 {
        self.core.remote.size()
    }

    /// Bytes the peer may still send before we replenish its window.
    pub fn local_window(&self) -> u32 {
        self.core.local.size()
    }

    /// The maximum size of the data in a single packet, as accepted by the peer.
    pub fn remote_packet_size(&self) -> u32 {
        self.core.remote_packet_size()
    }

    /// A [`Closer`] for this channel, which holds neither the channel nor the session.
    pub fn closer(&self) -> Closer {
        Closer {
            session: self.session.downgrade(),
            core: Arc::downgrade(&self.core),
        }
    }

    /// The exit status reported by the peer, if any.
    pub fn exit_status(&self) -> Option<u32> {
        self.core.exit_status()
    }

    /// Send `data` to the peer, waiting for window capacity as needed.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.core.write(&self.session, None, data).await
    }

    /// Send extended `data` of `data_type` to the peer, waiting for window capacity as needed.
    pub async fn write_extended(&self, data_type: u32, data: &[u8]) -> Result<()> {
        self.core.write(&self.session, Some(data_type), data).await
    }

    /// Signal the peer that no more data will be sent, this is a no-op if already done.
    pub fn eof(&self) -> Result<()> {
        self.core.send_eof(&self.session)
    }

    /// Receive the next item sent by the peer, or `None` once the channel has been closed.
    pub async fn recv(&self) -> Result<Option<Inbound>> {
        let Delivery::Queue { rx, .. } = &self.core.delivery else {
            return Err(Error::InvalidOperation(
                "the channel is consumed by a handler",
            ));
        };

        match rx.recv_async().await {
            Ok(inbound) => {
                if let Inbound::Data(data) | Inbound::ExtendedData(_, data) = &inbound {
                    self.core.consume(&self.session, data.len() as u32);
                }

                Ok(Some(inbound))
            }
            Err(_) => match self.core.closed_error() {
                Error::ChannelClosed => Ok(None),
                err => Err(err),
            },
        }
    }

    /// Receive the next chunk of data, or `None` once the peer sent EOF or closed the channel.
    ///
    /// Extended data is discarded and requests are rejected.
    pub async fn read(&self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.recv().await? {
                Some(Inbound::Data(data)) => break Ok(Some(data)),
                Some(Inbound::ExtendedData(data_type, data)) => tracing::trace!(
                    "Discarding {} bytes of extended data of type {data_type} on channel {}",
                    data.len(),
                    self.id()
                ),
                Some(Inbound::Request(request)) => tracing::debug!(
                    "Rejecting the `{}` request on channel {}",
                    request.request_type(),
                    self.id()
                ),
                Some(Inbound::Eof) | None => break Ok(None),
            }
        }
    }

    /// Send a request to the peer and wait for its reply.
    pub async fn request(&self, request_type: &str, data: Vec<u8>) -> Result<()> {
        self.core.request(&self.session, request_type, data).await
    }

    /// Send a request to the peer, without expecting a reply.
    pub fn notify(&self, request_type: &str, data: Vec<u8>) -> Result<()> {
        self.core.notify(&self.session, request_type, data)
    }

    /// Execute `command` on the peer.
    pub async fn exec(&self, command: &str) -> Result<()> {
        let data = msg::encode(&request::Exec {
            command: command.into(),
        })?;

        self.request("exec", data).await
    }

    /// Start the user's default shell on the peer.
    pub async fn shell(&self) -> Result<()> {
        self.request("shell", Vec::new()).await
    }

    /// Start the `name` subsystem on the peer, such as `sftp`.
    pub async fn subsystem(&self, name: &str) -> Result<()> {
        let data = msg::encode(&request::Subsystem { name: name.into() })?;

        self.request("subsystem", data).await
    }

    /// Set the `name` environment variable to `value` for the upcoming command.
    pub async fn env(&self, name: &str, value: &str) -> Result<()> {
        let data = msg::encode(&request::Env {
            name: name.into(),
            value: value.into(),
        })?;

        self.request("env", data).await
    }

    /// Report the exit `code` of a command to the peer.
    pub fn exit_status_report(&self, code: u32) -> Result<()> {
        let data = msg::encode(&request::ExitStatus { code })?;

        self.notify("exit-status", data)
    }

    /// Report the termination of a command by `signal_name` to the peer.
    pub fn exit_signal_report(
        &self,
        signal_name: &str,
        core_dumped: bool,
        message: &str,
    ) -> Result<()> {
        let data = msg::encode(&request::ExitSignal {
            signal_name: signal_name.into(),
            core_dumped: core_dumped.into(),
            error_message: message.into(),
            language: Default::default(),
        })?;

        self.notify("exit-signal", data)
    }

    /// Close the channel, waiting for the peer's acknowledgment up to the configured
    /// [`Config::channel_close_timeout`](crate::Config::channel_close_timeout),
    /// after which the channel is torn down anyway.
    ///
    /// Closing an already closed channel has no effect.
    pub async fn close(&self) -> Result<()> {
        if self.core.begin_close(&self.session) {
            let timeout = self.session.config().channel_close_timeout;

            if self.core.finished().timeout(timeout).await.is_err() {
                tracing::warn!(
                    "The peer didn't acknowledge the closure of channel {} in time, tearing down",
                    self.id()
                );
            }

            self.core.finish();
            self.session.release(self.core.id);
        }

        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.core.begin_close(&self.session) {
            self.session.expire(self.core.clone());
        }
    }
}

/// Closes a [`Channel`] without owning it, such as from its own [`Handler`].
#[derive(Clone)]
pub struct Closer {
    session: Weak<session::Inner>,
    core: Weak<Core>,
}

impl std::fmt::Debug for Closer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closer")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

impl Closer {
    /// Initiate the close handshake without awaiting it, as when dropping the [`Channel`].
    ///
    /// This has no effect once the channel or its session are gone.
    pub fn close(&self) {
        let (Some(session), Some(core)) = (Session::upgrade(&self.session), self.core.upgrade())
        else {
            return;
        };

        if core.begin_close(&session) {
            session.expire(core);
        }
    }
}

//! The _channel open request_ hook, for channels opened by the peer.

use crate::{
    channel::{Channel, Delivery, Handler, Kind},
    msg::connect::{self, OpenFailureReason},
    Result, Session,
};

/// A channel open request received from the peer.
///
/// Dropping the request without answering it rejects the channel
/// as [`OpenFailureReason::AdministrativelyProhibited`].
pub struct Incoming {
    session: Session,
    kind: Kind,
    sender_channel: u32,
    initial_window_size: u32,
    maximum_packet_size: u32,
    answered: bool,
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming")
            .field("kind", &self.kind)
            .field("sender_channel", &self.sender_channel)
            .finish()
    }
}

impl Incoming {
    pub(super) fn new(session: Session, kind: Kind, open: &connect::ChannelOpen) -> Self {
        Self {
            session,
            kind,
            sender_channel: open.sender_channel,
            initial_window_size: open.initial_window_size,
            maximum_packet_size: open.maximum_packet_size,
            answered: false,
        }
    }

    /// The type of the requested channel.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Accept the channel, received data is pulled with [`Channel::recv`].
    pub fn accept(self) -> Result<Channel> {
        self.accept_with(Delivery::queue())
    }

    /// Accept the channel, received data is pushed to the `handler`.
    pub fn accept_handled(self, handler: impl Handler) -> Result<Channel> {
        self.accept_with(Delivery::handler(handler))
    }

    fn accept_with(mut self, delivery: Delivery) -> Result<Channel> {
        self.answered = true;

        let session = self.session.clone();
        let core = session.register(self.kind.clone(), delivery);

        // Always succeeds on a freshly registered channel.
        let _ = core.establish(
            self.sender_channel,
            self.initial_window_size,
            self.maximum_packet_size,
        );

        let config = session.config();
        if let Err(err) = session.send(connect::ChannelOpenConfirmation {
            recipient_channel: self.sender_channel,
            sender_channel: core.id,
            initial_window_size: config.window_size,
            maximum_packet_size: config.packet_size,
            data: Vec::new(),
        }) {
            core.finish();
            session.release(core.id);

            return Err(err);
        }

        session.opened(&core);

        Ok(Channel::new(session, core))
    }

    /// Reject the channel with the provided `reason`.
    pub fn reject(mut self, reason: OpenFailureReason, description: &str) -> Result<()> {
        self.answered = true;

        self.session.send(connect::ChannelOpenFailure {
            recipient_channel: self.sender_channel,
            reason,
            description: description.into(),
            language: Default::default(),
        })
    }
}

impl Drop for Incoming {
    fn drop(&mut self) {
        if !self.answered {
            tracing::debug!(
                "Rejecting the unhandled `{}` channel open request",
                self.kind.channel_type()
            );

            self.session.try_send(connect::ChannelOpenFailure {
                recipient_channel: self.sender_channel,
                reason: OpenFailureReason::AdministrativelyProhibited,
                description: "The channel opening is currently disabled".into(),
                language: Default::default(),
            });
        }
    }
}

/// A hook on channel open requests, invoked on the session thread.
///
/// The hook either takes ownership of the request, answering it,
/// or hands it back to be offered to the next hook.
pub trait Hook: Send + 'static {
    /// Process the channel open request.
    fn on_open(&mut self, incoming: Incoming) -> Option<Incoming>;
}

impl<T: FnMut(Incoming) -> Option<Incoming> + Send + 'static> Hook for T {
    fn on_open(&mut self, incoming: Incoming) -> Option<Incoming> {
        (self)(incoming)
    }
}

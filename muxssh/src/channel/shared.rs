use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use super::{
    request::{ExitStatus, Request},
    window::{LocalWindow, RemoteWindow},
    Handler, Inbound, Kind, State,
};
use crate::{
    msg::{self, connect, Message},
    sync::lock,
    Config, Error, Result, Session,
};

/// How received data reaches the consumer of the channel.
pub(crate) enum Delivery {
    /// Buffered until the consumer pulls it, the window is replenished as it drains.
    Queue {
        tx: Mutex<Option<flume::Sender<Inbound>>>,
        rx: flume::Receiver<Inbound>,
    },

    /// Pushed to the handler from the session thread.
    Handler(Mutex<Box<dyn Handler>>),
}

impl Delivery {
    pub fn queue() -> Self {
        let (tx, rx) = flume::unbounded();

        Self::Queue {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    pub fn handler(handler: impl Handler) -> Self {
        Self::Handler(Mutex::new(Box::new(handler)))
    }
}

struct Machine {
    state: State,
    remote_id: Option<u32>,
    remote_packet_size: u32,
    eof_sent: bool,
    eof_received: bool,
    close_sent: bool,
    close_received: bool,
    abandoned: bool,
}

/// The state shared between the [`Session`] dispatching messages and the [`super::Channel`] handle.
pub(crate) struct Core {
    pub id: u32,
    pub kind: Kind,

    machine: Mutex<Machine>,
    pub local: LocalWindow,
    pub remote: RemoteWindow,
    pub delivery: Delivery,

    /// Held across the chunks of a single write, so writes never interleave.
    writing: futures::lock::Mutex<()>,

    opened: (flume::Sender<Result<()>>, flume::Receiver<Result<()>>),
    closed: Mutex<Option<flume::Sender<Infallible>>>,
    finished: flume::Receiver<Infallible>,
    done: AtomicBool,

    replies: Mutex<VecDeque<flume::Sender<bool>>>,
    exit_status: OnceLock<u32>,
    error: OnceLock<Arc<Error>>,
}

impl Core {
    pub fn new(id: u32, kind: Kind, config: &Config, delivery: Delivery) -> Self {
        let (closed, finished) = flume::bounded(0);

        Self {
            id,
            kind,
            machine: Mutex::new(Machine {
                state: State::Opening,
                remote_id: None,
                remote_packet_size: 0,
                eof_sent: false,
                eof_received: false,
                close_sent: false,
                close_received: false,
                abandoned: false,
            }),
            local: LocalWindow::new(config.window_size, config.packet_size),
            remote: RemoteWindow::new(0),
            delivery,
            writing: Default::default(),
            opened: flume::bounded(1),
            closed: Mutex::new(Some(closed)),
            finished,
            done: Default::default(),
            replies: Default::default(),
            exit_status: Default::default(),
            error: Default::default(),
        }
    }

    pub fn state(&self) -> State {
        lock(&self.machine).state
    }

    pub fn remote_id(&self) -> Option<u32> {
        lock(&self.machine).remote_id
    }

    pub fn remote_packet_size(&self) -> u32 {
        lock(&self.machine).remote_packet_size
    }

    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status.get().copied()
    }

    /// The error to report to operations on a channel that went away.
    pub fn closed_error(&self) -> Error {
        match self.error.get() {
            Some(err) => Error::Session(err.clone()),
            None => Error::ChannelClosed,
        }
    }

    /// Record the parameters of the peer, moving the channel to [`State::Open`].
    ///
    /// Returns whether the opener gave up on the channel in the meantime.
    pub fn establish(&self, remote_id: u32, window_size: u32, packet_size: u32) -> Result<bool> {
        let abandoned = {
            let mut machine = lock(&self.machine);
            if machine.state != State::Opening {
                return Err(Error::UnexpectedMessage);
            }

            machine.state = State::Open;
            machine.remote_id = Some(remote_id);
            machine.remote_packet_size = packet_size;

            machine.abandoned
        };

        self.remote.adjust(window_size);

        tracing::debug!(
            "Channel {}:{remote_id} is open, with a window of {window_size} bytes and packets of {packet_size} bytes",
            self.id
        );

        Ok(abandoned)
    }

    /// Wait for the outcome of the open request.
    pub async fn opened(&self) -> Result<()> {
        self.opened
            .1
            .recv_async()
            .await
            .unwrap_or_else(|_| Err(self.closed_error()))
    }

    /// Give up on a pending open request, closing the channel if the confirmation arrives later.
    pub fn abandon(&self, session: &Session) {
        let open = {
            let mut machine = lock(&self.machine);

            match machine.state {
                State::Opening => {
                    machine.abandoned = true;
                    false
                }
                State::Open | State::Closing => true,
                State::Closed => false,
            }
        };

        if open {
            self.begin_close(session);
        }
    }

    pub fn dispatch(&self, session: &Session, message: Message) -> Result<()> {
        if self.state() == State::Opening
            && !matches!(
                message,
                Message::ChannelOpenConfirmation(_) | Message::ChannelOpenFailure(_)
            )
        {
            return Err(Error::UnexpectedMessage);
        }

        match message {
            Message::ChannelOpenConfirmation(message) => {
                if self.establish(
                    message.sender_channel,
                    message.initial_window_size,
                    message.maximum_packet_size,
                )? {
                    tracing::debug!("Closing channel {}, abandoned while opening", self.id);

                    self.begin_close(session);
                } else {
                    let _ = self.opened.0.try_send(Ok(()));
                }

                Ok(())
            }
            Message::ChannelOpenFailure(message) => {
                {
                    let mut machine = lock(&self.machine);
                    if machine.state != State::Opening {
                        return Err(Error::UnexpectedMessage);
                    }

                    machine.state = State::Closed;
                }

                tracing::debug!(
                    "Channel {} was refused by the peer ({:?}): {:?}",
                    self.id,
                    message.reason,
                    message.description
                );

                let _ = self.opened.0.try_send(Err(Error::ChannelOpenFailure {
                    reason: message.reason,
                    description: message.description.to_string_lossy(),
                }));

                self.finish();
                session.release(self.id);

                Ok(())
            }
            Message::ChannelWindowAdjust(message) => {
                self.remote.adjust(message.bytes_to_add);

                Ok(())
            }
            Message::ChannelData(message) => {
                self.on_data(session, None, message.data.into_vec());

                Ok(())
            }
            Message::ChannelExtendedData(message) => {
                self.on_data(session, Some(message.data_type), message.data.into_vec());

                Ok(())
            }
            Message::ChannelEof(_) => {
                {
                    let mut machine = lock(&self.machine);

                    machine.eof_received = true;
                    if machine.state == State::Open {
                        machine.state = State::Closing;
                    }
                }

                match &self.delivery {
                    Delivery::Queue { tx, .. } => {
                        if let Some(tx) = lock(tx).as_ref() {
                            let _ = tx.send(Inbound::Eof);
                        }
                    }
                    Delivery::Handler(handler) => lock(handler).on_eof(),
                }

                Ok(())
            }
            Message::ChannelClose(_) => {
                {
                    let mut machine = lock(&self.machine);
                    if machine.close_received {
                        tracing::warn!("Duplicate close received for channel {}", self.id);

                        return Ok(());
                    }

                    machine.close_received = true;
                }

                self.begin_close(session);

                Ok(())
            }
            Message::ChannelRequest(message) => {
                self.on_request(session, message);

                Ok(())
            }
            Message::ChannelSuccess(_) => self.on_reply(true),
            Message::ChannelFailure(_) => self.on_reply(false),
            _ => Err(Error::UnexpectedMessage),
        }
    }

    fn on_data(&self, session: &Session, data_type: Option<u32>, data: Vec<u8>) {
        {
            let machine = lock(&self.machine);
            if machine.eof_received || machine.close_received {
                tracing::warn!(
                    "Dropped {} bytes received after EOF on channel {}",
                    data.len(),
                    self.id
                );

                return;
            }
        }

        let size = data.len() as u32;
        if !self.local.receive(size) {
            tracing::warn!(
                "The peer sent {size} bytes, exceeding the window of channel {}",
                self.id
            );
        }

        match &self.delivery {
            Delivery::Queue { tx, .. } => {
                if let Some(tx) = lock(tx).as_ref() {
                    let _ = tx.send(match data_type {
                        None => Inbound::Data(data),
                        Some(data_type) => Inbound::ExtendedData(data_type, data),
                    });
                }
            }
            Delivery::Handler(handler) => {
                {
                    let mut handler = lock(handler);

                    match data_type {
                        None => handler.on_data(&data),
                        Some(data_type) => handler.on_extended_data(data_type, &data),
                    }
                }

                self.consume(session, size);
            }
        }
    }

    fn on_request(&self, session: &Session, message: connect::ChannelRequest) {
        let Some(remote_id) = self.remote_id() else {
            return;
        };

        if &*message.request_type == b"exit-status" {
            match msg::decode::<ExitStatus>(&message.data) {
                Ok(status) => {
                    tracing::debug!(
                        "Channel {} reported an exit status of {}",
                        self.id,
                        status.code
                    );

                    let _ = self.exit_status.set(status.code);
                }
                Err(err) => tracing::warn!("Malformed `exit-status` request: {err}"),
            }
        }

        let mut request = Request::new(session.clone(), remote_id, message);

        match &self.delivery {
            Delivery::Queue { tx, .. } => {
                if let Some(tx) = lock(tx).as_ref() {
                    // On failure the request is dropped, and rejected.
                    let _ = tx.send(Inbound::Request(request));
                }
            }
            Delivery::Handler(handler) => {
                let accepted = lock(handler).on_request(&request);

                if let Err(err) = request.respond(accepted) {
                    tracing::debug!("Unable to answer a channel request: {err}");
                }
            }
        }
    }

    fn on_reply(&self, accepted: bool) -> Result<()> {
        match lock(&self.replies).pop_front() {
            Some(reply) => {
                // The requester may have timed out already.
                let _ = reply.send(accepted);

                Ok(())
            }
            None => Err(Error::UnexpectedMessage),
        }
    }

    /// Account for data drained by the consumer, replenishing the peer's window when needed.
    pub fn consume(&self, session: &Session, size: u32) {
        self.local.consume(size);

        let machine = lock(&self.machine);
        if let (Some(recipient_channel), false) = (machine.remote_id, machine.close_sent) {
            if let Some(bytes_to_add) = self.local.adjust() {
                tracing::trace!(
                    "Replenishing the window of channel {} by {bytes_to_add} bytes",
                    self.id
                );

                session.try_send(connect::ChannelWindowAdjust {
                    recipient_channel,
                    bytes_to_add,
                });
            }
        }
    }

    /// Ensure data can still be sent on the channel, returning the recipient channel.
    fn writable(&self, machine: &Machine) -> Result<u32> {
        match machine.remote_id {
            Some(remote_id)
                if matches!(machine.state, State::Open | State::Closing)
                    && !machine.eof_sent
                    && !machine.close_sent =>
            {
                Ok(remote_id)
            }
            _ => Err(self.closed_error()),
        }
    }

    pub async fn write(
        &self,
        session: &Session,
        data_type: Option<u32>,
        mut data: &[u8],
    ) -> Result<()> {
        let _writing = self.writing.lock().await;

        while !data.is_empty() {
            let packet_size = {
                let machine = lock(&self.machine);
                self.writable(&machine)?;

                machine.remote_packet_size.max(1)
            };

            let amount = data.len().min(packet_size as usize) as u32;
            let granted = session
                .wait(
                    async {
                        self.remote
                            .reserve(amount)
                            .await
                            .ok_or_else(|| self.closed_error())
                    },
                    session.config().operation_timeout,
                )
                .await?;

            let (chunk, rest) = data.split_at(granted as usize);

            {
                let machine = lock(&self.machine);
                let recipient_channel = self.writable(&machine)?;

                match data_type {
                    None => session.send(connect::ChannelData {
                        recipient_channel,
                        data: chunk.into(),
                    })?,
                    Some(data_type) => session.send(connect::ChannelExtendedData {
                        recipient_channel,
                        data_type,
                        data: chunk.into(),
                    })?,
                }
            }

            data = rest;
        }

        Ok(())
    }

    pub fn send_eof(&self, session: &Session) -> Result<()> {
        let mut machine = lock(&self.machine);

        if let Ok(recipient_channel) = self.writable(&machine) {
            machine.eof_sent = true;
            session.send(connect::ChannelEof { recipient_channel })?;
        }

        Ok(())
    }

    pub async fn request(
        &self,
        session: &Session,
        request_type: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let reply = {
            let machine = lock(&self.machine);
            let recipient_channel = match machine.remote_id {
                Some(remote_id) if machine.state != State::Closed && !machine.close_sent => {
                    remote_id
                }
                _ => return Err(self.closed_error()),
            };

            let mut replies = lock(&self.replies);
            let (tx, rx) = flume::bounded(1);

            session.send(connect::ChannelRequest {
                recipient_channel,
                request_type: request_type.into(),
                want_reply: true.into(),
                data,
            })?;
            replies.push_back(tx);

            rx
        };

        let accepted = session
            .wait(
                async {
                    reply
                        .recv_async()
                        .await
                        .map_err(|_| self.closed_error())
                },
                session.config().operation_timeout,
            )
            .await?;

        if accepted {
            Ok(())
        } else {
            Err(Error::ChannelRequestFailure(request_type.into()))
        }
    }

    pub fn notify(&self, session: &Session, request_type: &str, data: Vec<u8>) -> Result<()> {
        let machine = lock(&self.machine);

        match machine.remote_id {
            Some(recipient_channel) if machine.state != State::Closed && !machine.close_sent => {
                session.send(connect::ChannelRequest {
                    recipient_channel,
                    request_type: request_type.into(),
                    want_reply: false.into(),
                    data,
                })
            }
            _ => Err(self.closed_error()),
        }
    }

    /// Initiate the close handshake, sending our EOF and close if not done yet.
    ///
    /// Returns whether the peer's close is still to be awaited.
    pub fn begin_close(&self, session: &Session) -> bool {
        let complete = {
            let mut machine = lock(&self.machine);

            let recipient_channel = match (machine.state, machine.remote_id) {
                (State::Open | State::Closing, Some(remote_id)) => remote_id,
                _ => return false,
            };
            machine.state = State::Closing;

            if !machine.eof_sent {
                machine.eof_sent = true;
                session.try_send(connect::ChannelEof { recipient_channel });
            }
            if !machine.close_sent {
                machine.close_sent = true;
                session.try_send(connect::ChannelClose { recipient_channel });
            }

            machine.close_received
        };

        if complete {
            self.finish();
            session.release(self.id);
        }

        !complete
    }

    /// Wait for the close handshake to complete.
    pub async fn finished(&self) {
        let _ = self.finished.recv_async().await;
    }

    /// Tear down the channel, waking every waiter, at most once.
    pub fn finish(&self) {
        lock(&self.machine).state = State::Closed;

        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!("Channel {} is now closed", self.id);

        self.remote.close();
        match &self.delivery {
            Delivery::Queue { tx, .. } => drop(lock(tx).take()),
            Delivery::Handler(handler) => lock(handler).on_close(),
        }

        lock(&self.closed).take();
        lock(&self.replies).clear();
        let _ = self.opened.0.try_send(Err(self.closed_error()));
    }

    /// The session failed, propagate the error to the consumer and tear down.
    pub fn fail(&self, err: &Arc<Error>) {
        let _ = self.error.set(err.clone());

        if !self.done.load(Ordering::Acquire) {
            if let Delivery::Handler(handler) = &self.delivery {
                lock(handler).on_error(err);
            }
        }

        self.finish();
    }
}

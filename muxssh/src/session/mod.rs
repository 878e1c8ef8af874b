//! Definition of the [`Session`] struct, owning the transport and
//! multiplexing [`Channel`]s over it.

use std::{
    collections::VecDeque,
    convert::Infallible,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, OnceLock, Weak,
    },
    thread,
};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{self, Either};
use futures_time::{future::FutureExt, time::Duration};

use crate::{
    channel::{Channel, Core, Delivery, Handler, Kind},
    msg::{connect, trans, Message},
    sync::lock,
    transport::{Authenticate, PacketRead, PacketWrite},
    Config, Error, Result,
};

mod dispatch;

pub(crate) mod event;
pub use event::{Event, Subscription};
use event::{Listener, Registry};

pub mod open;

pub(crate) enum Outgoing {
    Packet(Vec<u8>),
    Close,
}

type GlobalReply = flume::Sender<Result<Vec<u8>>>;

type SharedHook = Arc<Mutex<dyn open::Hook>>;

pub(crate) struct Inner {
    config: Config,
    identity: String,
    connected: AtomicBool,

    outgoing: flume::Sender<Outgoing>,
    closing: flume::Sender<Arc<Core>>,
    channels: DashMap<u32, Arc<Core>>,
    next_channel: AtomicU32,
    globals: Mutex<VecDeque<(String, GlobalReply)>>,

    hooks: Arc<Registry<SharedHook>>,
    listeners: Arc<Registry<Listener>>,

    failure: OnceLock<Arc<Error>>,
    alive: Mutex<Option<flume::Sender<Infallible>>>,
    dead: flume::Receiver<Infallible>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.connected.load(Ordering::Acquire) {
            tracing::debug!("Last session handle dropped, disconnecting");

            if let Ok(packet) = Message::from(trans::Disconnect {
                reason: trans::Disconnect::BY_APPLICATION,
                description: "Session dropped".into(),
                language: Default::default(),
            })
            .encode()
            {
                let _ = self.outgoing.send(Outgoing::Packet(packet));
            }
        }

        let _ = self.outgoing.send(Outgoing::Close);
    }
}

/// A connected session, multiplexing channels over a single transport.
///
/// The session is a cheap handle, cloning it shares the underlying connection;
/// dropping the last handle, including the ones held by channels, disconnects.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.inner.identity)
            .field("connected", &self.is_connected())
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}

impl Session {
    /// Authenticate over the transport halves and start the session thread.
    ///
    /// Fails with [`Error::ConnectionTimeout`] if the authentication
    /// doesn't complete in [`Config::timeout`].
    pub async fn connect<R, W, A>(
        mut rx: R,
        mut tx: W,
        mut auth: A,
        config: Config,
    ) -> Result<Self>
    where
        R: PacketRead + 'static,
        W: PacketWrite + 'static,
        A: Authenticate,
    {
        let authentication = auth
            .authenticate(&mut rx, &mut tx)
            .timeout(config.timeout)
            .await
            .map_err(|_| Error::ConnectionTimeout)??;

        if !authentication.success {
            return Err(Error::AuthenticationFailed);
        }

        tracing::debug!("Session authenticated as `{}`", authentication.identity);

        let (outgoing, queue) = flume::unbounded();
        let (closing, dropped) = flume::unbounded();
        let (alive, dead) = flume::bounded(0);
        let close_timeout = config.channel_close_timeout;

        let inner = Arc::new(Inner {
            config,
            identity: authentication.identity,
            connected: AtomicBool::new(true),
            outgoing,
            closing,
            channels: Default::default(),
            next_channel: Default::default(),
            globals: Default::default(),
            hooks: Default::default(),
            listeners: Default::default(),
            failure: Default::default(),
            alive: Mutex::new(Some(alive)),
            dead,
            thread: Default::default(),
        });

        let weak = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name("muxssh-session".into())
            .spawn(move || Self::run(weak, rx, tx, queue, (dropped, close_timeout)))?;
        *lock(&inner.thread) = Some(handle);

        Ok(Self { inner })
    }

    fn run(
        weak: Weak<Inner>,
        rx: impl PacketRead,
        tx: impl PacketWrite,
        queue: flume::Receiver<Outgoing>,
        (dropped, close_timeout): (flume::Receiver<Arc<Core>>, Duration),
    ) {
        let result = futures::executor::block_on(async {
            let receive = dispatch::receive(weak.clone(), rx);
            let transmit = dispatch::transmit(queue, tx);
            let expire = dispatch::expire(weak.clone(), dropped, close_timeout);
            futures::pin_mut!(receive, transmit, expire);

            match future::select(future::select(receive, transmit), expire).await {
                Either::Left((Either::Left((result, _)) | Either::Right((result, _)), _)) => {
                    result
                }
                Either::Right((never, _)) => match never {},
            }
        });

        if let Some(inner) = weak.upgrade() {
            let session = Self { inner };

            match result {
                Ok(()) => session.fail(Error::Disconnected),
                Err(err) => session.fail(err),
            }
        }

        tracing::debug!("Session thread exiting");
    }

    /// The identity the session has been authenticated as.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// The configuration of the session.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Whether the session is still connected.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// The error that brought the session down, if any.
    pub fn failure(&self) -> Option<Arc<Error>> {
        self.inner.failure.get().cloned()
    }

    fn failed(&self) -> Error {
        match self.failure() {
            Some(err) => Error::Session(err),
            None => Error::NotConnected,
        }
    }

    /// Serialize and queue a message for the peer.
    ///
    /// Fails with [`Error::NotConnected`] if the session is down.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let message = message.into();
        tracing::trace!("-> {message:?}");

        self.inner
            .outgoing
            .send(Outgoing::Packet(message.encode()?))
            .map_err(|_| Error::NotConnected)
    }

    /// Serialize and queue a message for the peer, reporting failure without an error.
    ///
    /// This is meant for teardown paths, where failure must not cascade.
    pub fn try_send(&self, message: impl Into<Message>) -> bool {
        match self.send(message) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("Unable to send a message during teardown: {err}");

                false
            }
        }
    }

    /// Wait for `fut` to complete up to `timeout`.
    ///
    /// Fails with [`Error::OperationTimeout`] on expiry, or with the captured
    /// session error if the session goes down in the meantime.
    pub async fn wait<T, F>(&self, fut: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let dead = self.inner.dead.recv_async();
        futures::pin_mut!(fut, dead);

        match future::select(fut, dead).timeout(timeout).await {
            Err(_) => Err(Error::OperationTimeout),
            Ok(Either::Left((result, _))) => result,
            Ok(Either::Right(_)) => Err(self.failed()),
        }
    }

    pub(crate) fn register(&self, kind: Kind, delivery: Delivery) -> Arc<Core> {
        loop {
            let id = self.inner.next_channel.fetch_add(1, Ordering::Relaxed);

            if let Entry::Vacant(entry) = self.inner.channels.entry(id) {
                let core = Arc::new(Core::new(id, kind, &self.inner.config, delivery));
                entry.insert(core.clone());

                break core;
            }
        }
    }

    pub(crate) fn opened(&self, core: &Core) {
        self.inner.listeners.emit(&Event::ChannelOpened {
            id: core.id,
            channel_type: core.kind.channel_type().into(),
        });
    }

    pub(crate) fn release(&self, id: u32) {
        if let Some((_, core)) = self.inner.channels.remove(&id) {
            if core.remote_id().is_some() {
                self.inner.listeners.emit(&Event::ChannelClosed { id });
            }
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Tear down the dropped channel `core` if the peer doesn't complete the close handshake in time.
    pub(crate) fn expire(&self, core: Arc<Core>) {
        // The session thread is gone, and the channel with it.
        let _ = self.inner.closing.send(core);
    }

    pub(crate) fn channel(&self, id: u32) -> Option<Arc<Core>> {
        self.inner
            .channels
            .get(&id)
            .map(|entry| entry.value().clone())
    }

    /// Tear down the session with `err`, waking every blocked waiter, at most once.
    pub(crate) fn fail(&self, err: Error) {
        let err = Arc::new(err);
        if self.inner.failure.set(err.clone()).is_err() {
            return;
        }

        self.inner.connected.store(false, Ordering::Release);

        if matches!(*err, Error::Disconnected) {
            tracing::debug!("Session disconnected");
        } else {
            tracing::error!("Session failed: {err}");
        }

        let cores = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        for core in cores {
            core.fail(&err);
            self.release(core.id);
        }

        if !matches!(*err, Error::Disconnected) {
            self.inner.listeners.emit(&Event::Error(err.clone()));
        }
        self.inner.listeners.emit(&Event::Disconnected);

        // Session waiters are released only once the final events are delivered.
        for (name, reply) in lock(&self.inner.globals).drain(..) {
            tracing::debug!("Abandoning the pending `{name}` global request");

            let _ = reply.send(Err(Error::Session(err.clone())));
        }
        lock(&self.inner.alive).take();
    }

    /// Disconnect from the peer, failing every channel and waiter
    /// with [`Error::Disconnected`]; this has no effect if already disconnected.
    pub fn disconnect(&self) {
        if self.is_connected() {
            self.try_send(trans::Disconnect {
                reason: trans::Disconnect::BY_APPLICATION,
                description: "Disconnected by the application".into(),
                language: Default::default(),
            });
        }
        let _ = self.inner.outgoing.send(Outgoing::Close);

        self.fail(Error::Disconnected);

        let handle = lock(&self.inner.thread).take();
        match handle {
            Some(handle) if handle.thread().id() != thread::current().id() => {
                if handle.join().is_err() {
                    tracing::error!("The session thread panicked");
                }
            }
            // Disconnecting from the session thread itself, which exits on its own.
            Some(handle) => *lock(&self.inner.thread) = Some(handle),
            None => (),
        }
    }

    /// Subscribe to the session lifecycle [`Event`]s, until the [`Subscription`] is dropped.
    ///
    /// The `listener` is invoked on the session thread and must return quickly.
    pub fn subscribe(&self, listener: impl Fn(&Event) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.register(Arc::new(listener))
    }

    /// Register a `hook` on channels opened by the peer, until the [`Subscription`] is dropped.
    ///
    /// Requests left unanswered by every hook are rejected.
    pub fn on_channel_open(&self, hook: impl open::Hook) -> Subscription {
        self.inner.hooks.register(Arc::new(Mutex::new(hook)) as SharedHook)
    }

    async fn open_with(&self, kind: Kind, delivery: Delivery) -> Result<Channel> {
        if !self.is_connected() {
            return Err(self.failed());
        }

        let data = kind.data()?;
        let core = self.register(kind, delivery);

        if let Err(err) = self.send(connect::ChannelOpen {
            channel_type: core.kind.channel_type().into(),
            sender_channel: core.id,
            initial_window_size: self.inner.config.window_size,
            maximum_packet_size: self.inner.config.packet_size,
            data,
        }) {
            self.release(core.id);

            return Err(err);
        }

        match self
            .wait(core.opened(), self.inner.config.operation_timeout)
            .await
        {
            Ok(()) => {
                self.opened(&core);

                Ok(Channel::new(self.clone(), core))
            }
            Err(Error::OperationTimeout) => {
                tracing::warn!("Timed out while opening channel {}", core.id);

                core.abandon(self);

                Err(Error::OperationTimeout)
            }
            Err(err) => Err(err),
        }
    }

    /// Open a channel of `kind`, received data is pulled with [`Channel::recv`].
    pub async fn open(&self, kind: Kind) -> Result<Channel> {
        self.open_with(kind, Delivery::queue()).await
    }

    /// Open a channel of `kind`, received data is pushed to the `handler`.
    pub async fn open_handled(&self, kind: Kind, handler: impl Handler) -> Result<Channel> {
        self.open_with(kind, Delivery::handler(handler)).await
    }

    /// Open a `session` channel.
    pub async fn open_session(&self) -> Result<Channel> {
        self.open(Kind::Session).await
    }

    /// Send a global request wanting a reply, returning the response-specific data.
    pub async fn global_request(&self, name: &str, data: Vec<u8>) -> Result<Vec<u8>> {
        let reply = {
            let mut globals = lock(&self.inner.globals);
            let (tx, rx) = flume::bounded(1);

            self.send(connect::GlobalRequest {
                request_name: name.into(),
                want_reply: true.into(),
                data,
            })?;
            globals.push_back((name.into(), tx));

            rx
        };

        self.wait(
            async {
                reply
                    .recv_async()
                    .await
                    .unwrap_or_else(|_| Err(self.failed()))
            },
            self.inner.config.operation_timeout,
        )
        .await
    }

    /// Send a global request without expecting a reply.
    pub fn global_notify(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.send(connect::GlobalRequest {
            request_name: name.into(),
            want_reply: false.into(),
            data,
        })
    }
}

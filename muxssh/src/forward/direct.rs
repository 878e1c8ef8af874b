use std::{
    convert::Infallible,
    io::ErrorKind,
    net::TcpStream,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use futures::{
    executor::block_on,
    future::{self, Either},
};

use super::{Port, Socket};
use crate::{
    channel::{Channel, Kind},
    session::{Event, Subscription},
    sync::lock,
    Result, Session,
};

const BUFFER_SIZE: usize = 16 * 1024;

/// Shuts the socket down and stops the pump, at most once,
/// from whichever side observes the end first.
struct Teardown<S> {
    done: AtomicBool,
    socket: S,
    stop: Mutex<Option<flume::Sender<Infallible>>>,
}

impl<S: Socket> Teardown<S> {
    fn trigger(&self, reason: &str) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!("Tearing down the forwarded connection, {reason}");

        if let Err(err) = self.socket.shutdown() {
            tracing::debug!("Unable to shut the local socket down: {err}");
        }
        lock(&self.stop).take();
    }
}

/// A tcpip channel bound to a local socket.
///
/// The tunnel is torn down, exactly once, when the forwarded [`Port`] is closing,
/// when the session goes down, when the local socket is shut down or when the
/// peer closes the channel.
pub struct DirectTcpip<S: Socket = TcpStream> {
    channel: Arc<Channel>,
    socket: S,
    teardown: Arc<Teardown<S>>,
    stopped: flume::Receiver<Infallible>,
    subscriptions: [Subscription; 2],
}

impl<S: Socket> DirectTcpip<S> {
    /// Open a `direct-tcpip` channel to `host:port` for the accepted `socket`.
    ///
    /// The `forwarded` port is expected to be started.
    pub async fn open(
        session: &Session,
        host: &str,
        port: u16,
        forwarded: &Port,
        socket: S,
    ) -> Result<Self> {
        let originator = socket.peer_addr()?;
        let channel = session
            .open(Kind::direct_tcpip(
                host,
                port,
                originator.ip().to_string(),
                originator.port(),
            ))
            .await?;

        Self::attach(channel, forwarded, socket)
    }

    /// Bind an already opened tcpip `channel` to the `socket`.
    pub fn attach(channel: Channel, forwarded: &Port, socket: S) -> Result<Self> {
        let (stop, stopped) = flume::bounded(0);
        let teardown = Arc::new(Teardown {
            done: Default::default(),
            socket: socket.try_clone()?,
            stop: Mutex::new(Some(stop)),
        });

        let closing = forwarded.on_closing({
            let teardown = teardown.clone();
            move || teardown.trigger("the forwarded port is closing")
        });
        let errors = channel.session().subscribe({
            let teardown = teardown.clone();
            move |event| {
                if matches!(event, Event::Error(_) | Event::Disconnected) {
                    teardown.trigger("the session went down");
                }
            }
        });

        if !forwarded.is_started() {
            teardown.trigger("the forwarded port is stopped");
        }

        Ok(Self {
            channel: Arc::new(channel),
            socket,
            teardown,
            stopped,
            subscriptions: [closing, errors],
        })
    }

    /// The channel carrying the forwarded connection.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Pump the data both ways until the tunnel is torn down, blocking the calling thread.
    pub fn bind(self) -> Result<()> {
        let Self {
            channel,
            mut socket,
            teardown,
            stopped,
            subscriptions,
        } = self;

        let reader = {
            let channel = channel.clone();
            let teardown = teardown.clone();
            let mut socket = socket.try_clone()?;

            thread::Builder::new()
                .name("muxssh-forward".into())
                .spawn(move || {
                    let mut buffer = vec![0u8; BUFFER_SIZE];

                    loop {
                        let size = match socket.read(&mut buffer) {
                            Ok(0) => break,
                            Ok(size) => size,
                            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                            Err(err) => {
                                tracing::debug!("Unable to read from the local socket: {err}");
                                break;
                            }
                        };

                        if let Err(err) = block_on(channel.write(&buffer[..size])) {
                            tracing::debug!("Unable to forward to the channel: {err}");
                            break;
                        }
                    }

                    if let Err(err) = channel.eof() {
                        tracing::debug!("Unable to send EOF on the channel: {err}");
                    }
                    teardown.trigger("the local socket has been shut down");
                })?
        };

        let result = block_on(async {
            loop {
                let read = channel.read();
                let stop = stopped.recv_async();
                futures::pin_mut!(read, stop);

                match future::select(read, stop).await {
                    Either::Left((Ok(Some(data)), _)) => {
                        if let Err(err) = socket.write_all(&data) {
                            tracing::debug!("Unable to write to the local socket: {err}");
                            break Ok(());
                        }
                    }
                    Either::Left((Ok(None), _)) | Either::Right(_) => break Ok(()),
                    Either::Left((Err(err), _)) => break Err(err),
                }
            }
        });

        teardown.trigger("the channel has been closed");
        drop(subscriptions);

        block_on(channel.close())?;
        if reader.join().is_err() {
            tracing::error!("The forwarding thread panicked");
        }

        result
    }
}

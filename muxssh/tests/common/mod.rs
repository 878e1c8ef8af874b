#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use futures_time::future::FutureExt;

use muxssh::{
    msg::{connect, Message},
    transport::{Authentication, PacketRead, PacketWrite},
    Config, Error, Result, Session,
};

pub const PATIENCE: Duration = Duration::from_secs(5);

pub fn tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub struct Incoming(flume::Receiver<Vec<u8>>);

#[async_trait]
impl PacketRead for Incoming {
    async fn recv(&mut self) -> Result<Vec<u8>> {
        self.0.recv_async().await.map_err(|_| Error::Disconnected)
    }
}

pub struct Outgoing(flume::Sender<Vec<u8>>);

#[async_trait]
impl PacketWrite for Outgoing {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.0
            .send_async(payload.to_vec())
            .await
            .map_err(|_| Error::Disconnected)
    }
}

/// The remote side of an in-memory transport, scripted by the tests.
pub struct Peer {
    rx: flume::Receiver<Vec<u8>>,
    tx: Option<flume::Sender<Vec<u8>>>,
}

pub fn pipe() -> (Incoming, Outgoing, Peer) {
    let (to_session, from_peer) = flume::unbounded();
    let (to_peer, from_session) = flume::unbounded();

    (
        Incoming(from_peer),
        Outgoing(to_peer),
        Peer {
            rx: from_session,
            tx: Some(to_session),
        },
    )
}

pub async fn connect(config: Config) -> (Session, Peer) {
    tracing();

    let (rx, tx, peer) = pipe();
    let session = Session::connect(rx, tx, Authentication::success("tester"), config)
        .await
        .expect("Unable to connect the session");

    (session, peer)
}

impl Peer {
    /// Wait for the next message sent by the session.
    pub async fn expect(&self) -> Message {
        let payload = self
            .rx
            .recv_async()
            .timeout(futures_time::time::Duration::from(PATIENCE))
            .await
            .expect("Timed out waiting for a message")
            .expect("The session hung up");

        Message::decode(&payload).expect("The session sent a malformed message")
    }

    /// Ensure the session sends nothing for a short while.
    pub async fn expect_silence(&self) {
        let next = self
            .rx
            .recv_async()
            .timeout(futures_time::time::Duration::from_millis(150))
            .await;

        if let Ok(Ok(payload)) = next {
            panic!("Unexpected message: {:?}", Message::decode(&payload));
        }
    }

    pub fn send(&self, message: impl Into<Message>) {
        let payload = message.into().encode().unwrap();

        if let Some(tx) = &self.tx {
            tx.send(payload).unwrap();
        }
    }

    pub fn send_raw(&self, payload: Vec<u8>) {
        if let Some(tx) = &self.tx {
            tx.send(payload).unwrap();
        }
    }

    /// Hang up the transport, as if the connection dropped.
    pub fn hang_up(&mut self) {
        self.tx.take();
    }

    /// Expect a channel open, returning it.
    pub async fn expect_open(&self) -> connect::ChannelOpen {
        match self.expect().await {
            Message::ChannelOpen(open) => open,
            other => panic!("Expected a channel open, got {other:?}"),
        }
    }

    /// Confirm the channel open, the peer numbers the channel `local + 100`.
    pub fn confirm(&self, open: &connect::ChannelOpen, window: u32, packet: u32) {
        self.send(connect::ChannelOpenConfirmation {
            recipient_channel: open.sender_channel,
            sender_channel: open.sender_channel + 100,
            initial_window_size: window,
            maximum_packet_size: packet,
            data: Vec::new(),
        });
    }
}

/// Open a session channel, confirmed by the peer with `window` and `packet` sizes.
pub async fn channel(
    session: &Session,
    peer: &Peer,
    window: u32,
    packet: u32,
) -> muxssh::channel::Channel {
    let (channel, _) = futures::join!(session.open_session(), async {
        let open = peer.expect_open().await;
        peer.confirm(&open, window, packet);
    });

    channel.expect("The channel failed to open")
}

pub fn quick() -> Config {
    Config {
        operation_timeout: futures_time::time::Duration::from_millis(500),
        channel_close_timeout: futures_time::time::Duration::from_millis(100),
        ..Default::default()
    }
}

/// Serialize a message-specific payload, such as a channel open's data.
pub fn encode<T>(value: &T) -> Vec<u8>
where
    for<'w> T: binrw::BinWrite<Args<'w> = ()> + binrw::meta::WriteEndian,
{
    let mut cursor = std::io::Cursor::new(Vec::new());
    value
        .write(&mut cursor)
        .expect("Unable to serialize the payload");

    cursor.into_inner()
}

/// Deserialize a message-specific payload.
pub fn decode<T>(data: &[u8]) -> T
where
    for<'r> T: binrw::BinRead<Args<'r> = ()> + binrw::meta::ReadEndian,
{
    T::read(&mut std::io::Cursor::new(data)).expect("Unable to deserialize the payload")
}

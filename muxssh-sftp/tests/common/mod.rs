#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures_time::future::FutureExt;

use muxssh::{
    msg::{connect, Message},
    transport::{Authentication, PacketRead, PacketWrite},
    Session,
};
use muxssh_sftp::{
    protocol::{self, Attrs, OpenFlags, Response, Version},
    Config, Error, Requests, Result, SftpSession,
};

pub const PATIENCE: Duration = Duration::from_secs(5);

pub fn tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

struct Incoming(flume::Receiver<Vec<u8>>);

#[async_trait]
impl PacketRead for Incoming {
    async fn recv(&mut self) -> muxssh::Result<Vec<u8>> {
        self.0
            .recv_async()
            .await
            .map_err(|_| muxssh::Error::Disconnected)
    }
}

struct Outgoing(flume::Sender<Vec<u8>>);

#[async_trait]
impl PacketWrite for Outgoing {
    async fn send(&mut self, payload: &[u8]) -> muxssh::Result<()> {
        self.0
            .send_async(payload.to_vec())
            .await
            .map_err(|_| muxssh::Error::Disconnected)
    }
}

/// A request received by the [`Server`].
#[derive(Debug)]
pub struct Request {
    pub kind: u8,
    pub id: u32,
    pub packet: Vec<u8>,
}

/// The server side of an SFTP session, scripted by the tests over an in-memory transport.
pub struct Server {
    rx: flume::Receiver<Vec<u8>>,
    tx: flume::Sender<Vec<u8>>,
    channel: u32,
    reassembler: protocol::Reassembler,
}

impl Server {
    async fn message(&self) -> Message {
        let payload = self
            .rx
            .recv_async()
            .timeout(futures_time::time::Duration::from(PATIENCE))
            .await
            .expect("Timed out waiting for a message")
            .expect("The session hung up");

        Message::decode(&payload).expect("The session sent a malformed message")
    }

    fn send(&self, message: impl Into<Message>) {
        self.tx
            .send(message.into().encode().unwrap())
            .expect("The session hung up");
    }

    /// Wait for the next SFTP packet sent by the client.
    pub async fn packet(&mut self) -> Vec<u8> {
        loop {
            if let Some(packet) = self
                .reassembler
                .next_packet()
                .expect("The client sent an oversized packet")
            {
                break packet;
            }

            match self.message().await {
                Message::ChannelData(data) => {
                    assert_eq!(data.recipient_channel, self.channel + 100);
                    self.reassembler.extend(&data.data);
                }
                Message::ChannelWindowAdjust(_) => continue,
                other => panic!("Unexpected message: {other:?}"),
            }
        }
    }

    /// Wait for the next request sent by the client.
    pub async fn request(&mut self) -> Request {
        let packet = self.packet().await;
        let id = u32::from_be_bytes(packet[1..5].try_into().unwrap());

        Request {
            kind: packet[0],
            id,
            packet,
        }
    }

    /// Wait for the next request, deserialized as `T`.
    pub async fn expect<T>(&mut self) -> T
    where
        for<'r> T: binrw::BinRead<Args<'r> = ()> + binrw::meta::ReadEndian,
    {
        let request = self.request().await;

        protocol::decode(&request.packet).expect("Unexpected request")
    }

    /// Send a raw SFTP packet to the client.
    pub fn send_packet(&self, packet: Vec<u8>) {
        self.send(connect::ChannelData {
            recipient_channel: self.channel,
            data: packet.into(),
        });
    }

    /// Answer a request with `response`.
    pub fn respond(&self, response: impl Into<Response>) {
        self.send_packet(protocol::encode(&response.into()).unwrap());
    }

    /// Expect the client to close the channel.
    pub async fn expect_close(&self) {
        loop {
            match self.message().await {
                Message::ChannelWindowAdjust(_) | Message::ChannelEof(_) => continue,
                Message::ChannelClose(close) => {
                    assert_eq!(close.recipient_channel, self.channel + 100);
                    break;
                }
                other => panic!("Unexpected message: {other:?}"),
            }
        }
    }

    /// Close the channel from the server side.
    pub fn close(&self) {
        self.send(connect::ChannelClose {
            recipient_channel: self.channel,
        });
    }
}

/// A session with the channel of an SFTP server opened and the `sftp` subsystem started.
pub async fn server(config: muxssh::Config) -> (Session, impl futures::Future<Output = Server>) {
    tracing();

    let (to_session, from_peer) = flume::unbounded();
    let (to_peer, from_session) = flume::unbounded();

    let session = Session::connect(
        Incoming(from_peer),
        Outgoing(to_peer),
        Authentication::success("tester"),
        config,
    )
    .await
    .expect("Unable to connect the session");

    let accept = async move {
        let mut server = Server {
            rx: from_session,
            tx: to_session,
            channel: 0,
            reassembler: Default::default(),
        };

        let Message::ChannelOpen(open) = server.message().await else {
            panic!("Expected a channel open");
        };
        server.channel = open.sender_channel;
        server.send(connect::ChannelOpenConfirmation {
            recipient_channel: open.sender_channel,
            sender_channel: open.sender_channel + 100,
            initial_window_size: muxssh::Config::WINDOW_SIZE,
            maximum_packet_size: muxssh::Config::PACKET_SIZE,
            data: Vec::new(),
        });

        match server.message().await {
            Message::ChannelRequest(request) if &*request.request_type == b"subsystem" => {
                server.send(connect::ChannelSuccess {
                    recipient_channel: server.channel,
                });
            }
            other => panic!("Expected the subsystem request, got {other:?}"),
        }

        server
    };

    (session, accept)
}

/// Negotiate the version on the server side, advertising `extensions`.
pub async fn negotiate(server: &mut Server, version: u32, extensions: &[(&str, &str)]) {
    let init: protocol::Init = protocol::decode(&server.packet().await).unwrap();
    assert_eq!(init.version, protocol::VERSION);

    server.send_packet(
        protocol::encode(&Version {
            version,
            extensions: extensions
                .iter()
                .map(|(name, data)| ((*name).into(), (*data).into()))
                .collect(),
        })
        .unwrap(),
    );
}

pub fn quick() -> Config {
    Config {
        operation_timeout: futures_time::time::Duration::from_millis(500),
        ..Default::default()
    }
}

/// An established SFTP session and its scripted server.
pub async fn sftp() -> (Session, SftpSession, Server) {
    let (session, accept) = server(Default::default()).await;

    let (sftp, server) = futures::join!(SftpSession::connect(&session, quick()), async {
        let mut server = accept.await;
        negotiate(&mut server, protocol::VERSION, &[]).await;

        server
    });

    (session, sftp.expect("Unable to start the SFTP session"), server)
}

/// A call recorded by the [`Stub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(String, OpenFlags),
    Close(Vec<u8>),
    Read(u64, u32),
    Write(u64, Vec<u8>),
    Fstat,
    Fsetstat(Attrs),
}

/// A [`Requests`] surface serving a single file from memory, with fixed optimal lengths.
pub struct Stub {
    pub read_length: u32,
    pub write_length: u32,
    pub reads: Mutex<Vec<Vec<u8>>>,
    pub size: Mutex<u64>,
    pub calls: Mutex<Vec<Call>>,
}

pub const HANDLE: &[u8] = b"handle";

impl Stub {
    pub fn new(read_length: u32, write_length: u32) -> Arc<Self> {
        Arc::new(Self {
            read_length,
            write_length,
            reads: Default::default(),
            size: Default::default(),
            calls: Default::default(),
        })
    }

    /// Queue the data returned by the next read requests, in order.
    pub fn serve(&self, reads: impl IntoIterator<Item = Vec<u8>>) {
        self.reads.lock().unwrap().extend(reads);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Requests for Stub {
    fn is_open(&self) -> bool {
        true
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> Result<Vec<u8>> {
        self.record(Call::Open(path.into(), flags));

        Ok(HANDLE.to_vec())
    }

    async fn close(&self, handle: &[u8]) -> Result<()> {
        self.record(Call::Close(handle.to_vec()));

        Ok(())
    }

    async fn read(&self, _: &[u8], offset: u64, len: u32) -> Result<Vec<u8>> {
        self.record(Call::Read(offset, len));

        let mut reads = self.reads.lock().unwrap();
        if reads.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(reads.remove(0))
        }
    }

    async fn write(&self, _: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        self.record(Call::Write(offset, data.to_vec()));

        let mut size = self.size.lock().unwrap();
        *size = (*size).max(offset + data.len() as u64);

        Ok(())
    }

    async fn fstat(&self, _: &[u8]) -> Result<Attrs> {
        self.record(Call::Fstat);

        Ok(Attrs::with_size(*self.size.lock().unwrap()))
    }

    async fn fsetstat(&self, _: &[u8], attrs: Attrs) -> Result<()> {
        self.record(Call::Fsetstat(attrs.clone()));

        match attrs.size {
            Some(size) => {
                *self.size.lock().unwrap() = size;
                Ok(())
            }
            None => Err(Error::UnexpectedResponse),
        }
    }

    fn calculate_optimal_read_length(&self, _: u32) -> u32 {
        self.read_length
    }

    fn calculate_optimal_write_length(&self, _: u32, _: &[u8]) -> u32 {
        self.write_length
    }
}

use async_trait::async_trait;
use futures::{
    io::{ReadHalf, WriteHalf},
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
};
use rand::RngCore;

use super::{Cipher, PacketRead, PacketWrite, Plain};
use crate::{Error, Result};

const MIN_PACKET_SIZE: usize = 16;
const MIN_PAD_SIZE: usize = 4;
const MIN_ALIGN: usize = 8;

/// The maximum size of a whole packet accepted from the peer.
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Split a pipe into the two halves of an SSH binary packet framer.
pub fn framed<IO>(io: IO) -> (FrameReader<ReadHalf<IO>>, FrameWriter<WriteHalf<IO>>)
where
    IO: AsyncRead + AsyncWrite + Send,
{
    let (reader, writer) = io.split();

    (FrameReader::new(reader), FrameWriter::new(writer))
}

fn eof(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Disconnected
    } else {
        err.into()
    }
}

/// The reading half of the binary packet protocol (RFC 4253 §6).
pub struct FrameReader<R, C = Plain> {
    inner: R,
    cipher: C,
    seq: u32,
}

impl<R> FrameReader<R> {
    /// Read packets from `inner` with the `none` cipher.
    pub fn new(inner: R) -> Self {
        Self::with_cipher(inner, Plain)
    }
}

impl<R, C> FrameReader<R, C> {
    /// Read packets from `inner`, deciphered with `cipher`.
    pub fn with_cipher(inner: R, cipher: C) -> Self {
        Self {
            inner,
            cipher,
            seq: 0,
        }
    }

    /// The sequence number of the next packet to be received.
    pub fn seq(&self) -> u32 {
        self.seq
    }
}

#[async_trait]
impl<R, C> PacketRead for FrameReader<R, C>
where
    R: AsyncRead + Unpin + Send,
    C: Cipher,
{
    async fn recv(&mut self) -> Result<Vec<u8>> {
        let align = self.cipher.block_size().max(MIN_ALIGN);

        let mut packet = vec![0u8; align];
        self.inner.read_exact(&mut packet).await.map_err(eof)?;
        self.cipher.decrypt(&mut packet);

        let length = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]) as usize;
        let size = length + std::mem::size_of::<u32>();
        if size > MAX_PACKET_SIZE || size < align.max(MIN_PACKET_SIZE) || size % align != 0 {
            return Err(Error::Malformed("invalid packet length"));
        }

        packet.resize(size, 0);
        self.inner
            .read_exact(&mut packet[align..])
            .await
            .map_err(eof)?;
        self.cipher.decrypt(&mut packet[align..]);

        let mut mac = vec![0u8; self.cipher.mac_size()];
        self.inner.read_exact(&mut mac).await.map_err(eof)?;
        if !self.cipher.verify(self.seq, &packet, &mac) {
            return Err(Error::Integrity);
        }

        let padding = packet[4] as usize;
        if padding < MIN_PAD_SIZE || padding >= length {
            return Err(Error::Malformed("invalid padding length"));
        }

        tracing::trace!("<-({}) {} bytes", self.seq, length - padding - 1);
        self.seq = self.seq.wrapping_add(1);

        Ok(packet[5..size - padding].to_vec())
    }
}

/// The writing half of the binary packet protocol (RFC 4253 §6).
pub struct FrameWriter<W, C = Plain> {
    inner: W,
    cipher: C,
    seq: u32,
}

impl<W> FrameWriter<W> {
    /// Write packets to `inner` with the `none` cipher.
    pub fn new(inner: W) -> Self {
        Self::with_cipher(inner, Plain)
    }
}

impl<W, C: Cipher> FrameWriter<W, C> {
    /// Write packets to `inner`, enciphered with `cipher`.
    pub fn with_cipher(inner: W, cipher: C) -> Self {
        Self {
            inner,
            cipher,
            seq: 0,
        }
    }

    /// The sequence number of the next packet to be sent.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    fn padding(&self, payload: usize) -> usize {
        let align = self.cipher.block_size().max(MIN_ALIGN);

        let size = std::mem::size_of::<u32>() + std::mem::size_of::<u8>() + payload;
        let mut padding = align - size % align;

        if padding < MIN_PAD_SIZE {
            padding += align;
        }
        if size + padding < MIN_PACKET_SIZE.max(align) {
            padding += align;
        }

        padding
    }
}

#[async_trait]
impl<W, C> PacketWrite for FrameWriter<W, C>
where
    W: AsyncWrite + Unpin + Send,
    C: Cipher,
{
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let padding = self.padding(payload.len());
        let length = std::mem::size_of::<u8>() + payload.len() + padding;

        let mut packet = Vec::with_capacity(
            std::mem::size_of::<u32>() + length + self.cipher.mac_size(),
        );
        packet.extend_from_slice(&(length as u32).to_be_bytes());
        packet.push(padding as u8);
        packet.extend_from_slice(payload);

        let offset = packet.len();
        packet.resize(offset + padding, 0);
        rand::thread_rng().fill_bytes(&mut packet[offset..]);

        let mac = self.cipher.sign(self.seq, &packet);
        self.cipher.encrypt(&mut packet);
        packet.extend_from_slice(&mac);

        self.inner.write_all(&packet).await?;
        self.inner.flush().await?;

        tracing::trace!("({})-> {} bytes", self.seq, payload.len());
        self.seq = self.seq.wrapping_add(1);

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(self.inner.close().await?)
    }
}

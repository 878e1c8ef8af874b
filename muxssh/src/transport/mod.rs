//! Collaborator seams between the [`Session`](crate::Session) and the
//! lower layers: packet framing, encryption and authentication.

use async_trait::async_trait;

use crate::Result;

mod cipher;
pub use cipher::{Cipher, Plain};

mod framed;
pub use framed::{framed, FrameReader, FrameWriter};

/// The receiving half of a transport, yielding decrypted packet payloads.
#[async_trait]
pub trait PacketRead: Send {
    /// Receive the payload of the next packet,
    /// failing with [`Error::Disconnected`](crate::Error::Disconnected) when the peer hung up.
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: PacketRead + ?Sized> PacketRead for Box<T> {
    async fn recv(&mut self) -> Result<Vec<u8>> {
        (**self).recv().await
    }
}

/// The sending half of a transport, accepting packet payloads.
#[async_trait]
pub trait PacketWrite: Send {
    /// Frame and send a payload to the peer.
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Flush and shut down the sending half.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: PacketWrite + ?Sized> PacketWrite for Box<T> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        (**self).send(payload).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// The outcome of the user authentication, which has to succeed
/// before any channel may be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    /// Whether the peer accepted the credentials.
    pub success: bool,

    /// The identity the session has been authenticated as.
    pub identity: String,
}

impl Authentication {
    /// An already established successful authentication for `identity`.
    pub fn success(identity: impl Into<String>) -> Self {
        Self {
            success: true,
            identity: identity.into(),
        }
    }
}

/// An authentication strategy, run over the freshly established transport.
#[async_trait]
pub trait Authenticate: Send {
    /// Authenticate against the peer.
    async fn authenticate(
        &mut self,
        rx: &mut dyn PacketRead,
        tx: &mut dyn PacketWrite,
    ) -> Result<Authentication>;
}

/// An outcome obtained out of band, returned as-is.
#[async_trait]
impl Authenticate for Authentication {
    async fn authenticate(
        &mut self,
        _: &mut dyn PacketRead,
        _: &mut dyn PacketWrite,
    ) -> Result<Authentication> {
        Ok(self.clone())
    }
}

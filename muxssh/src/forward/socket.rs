use std::{
    io,
    net::{Shutdown, SocketAddr, TcpStream},
};

/// A local connected socket, bridged to a channel.
pub trait Socket: io::Read + io::Write + Send + Sync + Sized + 'static {
    /// Create another handle to the same socket.
    fn try_clone(&self) -> io::Result<Self>;

    /// Shut down both directions of the socket, unblocking any pending read.
    fn shutdown(&self) -> io::Result<()>;

    /// The address of the remote end of the socket.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl Socket for TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    thread,
};

use futures::executor::block_on;

use super::{DirectTcpip, Port};
use crate::{session::Subscription, Result, Session};

/// A local port forwarding, tunneling every accepted connection
/// to a remote `host:port` over a `direct-tcpip` channel.
pub struct Local {
    port: Port,
    address: SocketAddr,
    listener: Option<thread::JoinHandle<()>>,
    _wake: Subscription,
}

impl Local {
    /// Listen on `bind` and forward the connections to `host:port` from the peer.
    pub fn start(
        session: &Session,
        bind: impl ToSocketAddrs,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self> {
        let forwarded = Port::new();
        forwarded.start()?;

        let listener = TcpListener::bind(bind)?;
        let address = listener.local_addr()?;

        // Unblock the pending accept once the port is closing, with a connection to ourselves.
        let wake = forwarded.on_closing({
            let mut target = address;
            if target.ip().is_unspecified() {
                target.set_ip(match target {
                    SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
                    SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
                });
            }

            move || {
                if let Err(err) = TcpStream::connect(target) {
                    tracing::warn!("Unable to wake the listener on {target}: {err}");
                }
            }
        });

        tracing::debug!("Forwarding connections from {address} through the session");

        let handle = {
            let session = session.clone();
            let forwarded = forwarded.clone();
            let host = host.into();

            thread::Builder::new()
                .name("muxssh-forward".into())
                .spawn(move || Self::listen(listener, session, forwarded, host, port))?
        };

        Ok(Self {
            port: forwarded,
            address,
            listener: Some(handle),
            _wake: wake,
        })
    }

    fn listen(
        listener: TcpListener,
        session: Session,
        forwarded: Port,
        host: String,
        port: u16,
    ) {
        loop {
            match listener.accept() {
                Ok(_) if !forwarded.is_started() => break,
                Ok((socket, peer)) => {
                    tracing::debug!("Accepted a connection from {peer}");

                    if let Err(err) = Self::serve(&session, &forwarded, &host, port, socket) {
                        tracing::warn!("Unable to forward the connection from {peer}: {err}");
                    }
                }
                Err(err) => {
                    tracing::warn!("Stopped accepting connections: {err}");
                    break;
                }
            }
        }
    }

    fn serve(
        session: &Session,
        forwarded: &Port,
        host: &str,
        port: u16,
        socket: TcpStream,
    ) -> Result<()> {
        let session = session.clone();
        let forwarded = forwarded.clone();
        let host = host.to_string();

        thread::Builder::new()
            .name("muxssh-forward".into())
            .spawn(move || {
                let tunnel = DirectTcpip::open(&session, &host, port, &forwarded, socket);
                let result = block_on(tunnel).and_then(DirectTcpip::bind);

                if let Err(err) = result {
                    tracing::warn!("Forwarded connection to {host}:{port} failed: {err}");
                }
            })?;

        Ok(())
    }

    /// The local address the forwarding listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// The forwarded port, raising its closing notification on stop.
    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Stop listening and tear down every forwarded connection.
    pub fn stop(&mut self) {
        self.port.stop();

        if let Some(handle) = self.listener.take() {
            if handle.join().is_err() {
                tracing::error!("The listening thread panicked");
            }
        }
    }
}

impl Drop for Local {
    fn drop(&mut self) {
        self.stop();
        self.port.dispose();
    }
}

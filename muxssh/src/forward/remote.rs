use std::{
    net::TcpStream,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use super::{DirectTcpip, Port};
use crate::{
    channel::Kind,
    msg::{self, connect},
    session::{open::Incoming, Subscription},
    Error, Result, Session,
};

/// A remote port forwarding, connecting every `forwarded-tcpip` channel
/// opened by the peer on the bound port to a local `host:port`.
pub struct Remote {
    port: Port,
    session: Session,
    forward: connect::TcpipForward,
    cancelled: AtomicBool,
    _hook: Subscription,
}

impl Remote {
    /// Ask the peer to listen on `bind_address:bind_port`, and forward the
    /// connections to `host:port` from this side.
    ///
    /// A `bind_port` of `0` lets the peer allocate the port, see [`Remote::bound_port`].
    pub async fn start(
        session: &Session,
        bind_address: &str,
        bind_port: u16,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self> {
        let forwarded = Port::new();
        forwarded.start()?;

        let mut forward = connect::TcpipForward {
            bind_address: bind_address.into(),
            bind_port: bind_port.into(),
        };

        let reply = session
            .global_request("tcpip-forward", msg::encode(&forward)?)
            .await?;
        if bind_port == 0 {
            let allocated: [u8; 4] = reply
                .get(..4)
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or(Error::Malformed("missing allocated port"))?;

            forward.bind_port = u32::from_be_bytes(allocated);
        }

        tracing::debug!(
            "Peer is forwarding {:?}:{} to this side",
            forward.bind_address,
            forward.bind_port
        );

        let hook = session.on_channel_open({
            let forwarded = forwarded.clone();
            let forward = forward.clone();
            let host = host.into();

            move |incoming: Incoming| {
                let matching = matches!(
                    incoming.kind(),
                    Kind::ForwardedTcpip(context)
                        if context.host == forward.bind_address && context.port == forward.bind_port
                );

                if !matching || !forwarded.is_started() {
                    return Some(incoming);
                }

                Self::serve(incoming, forwarded.clone(), host.clone(), port);

                None
            }
        });

        Ok(Self {
            port: forwarded,
            session: session.clone(),
            forward,
            cancelled: Default::default(),
            _hook: hook,
        })
    }

    fn serve(incoming: Incoming, forwarded: Port, host: String, port: u16) {
        let spawned = thread::Builder::new()
            .name("muxssh-forward".into())
            .spawn(move || {
                let socket = match TcpStream::connect((host.as_str(), port)) {
                    Ok(socket) => socket,
                    Err(err) => {
                        tracing::warn!("Unable to connect to {host}:{port}: {err}");

                        if let Err(err) = incoming.reject(
                            connect::OpenFailureReason::ConnectFailed,
                            &err.to_string(),
                        ) {
                            tracing::debug!("Unable to reject the channel: {err}");
                        }

                        return;
                    }
                };

                let result = incoming
                    .accept()
                    .and_then(|channel| DirectTcpip::attach(channel, &forwarded, socket))
                    .and_then(DirectTcpip::bind);

                if let Err(err) = result {
                    tracing::warn!("Forwarded connection to {host}:{port} failed: {err}");
                }
            });

        // On failure the request is dropped with the closure, and rejected.
        if let Err(err) = spawned {
            tracing::warn!("Unable to spawn the forwarding thread: {err}");
        }
    }

    /// The port bound on the peer's side.
    pub fn bound_port(&self) -> u32 {
        self.forward.bind_port
    }

    /// The forwarded port, raising its closing notification on stop.
    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Tear down every forwarded connection and ask the peer to stop listening.
    pub async fn stop(&self) -> Result<()> {
        self.port.stop();

        if self.cancelled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.session
            .global_request("cancel-tcpip-forward", msg::encode(&self.forward)?)
            .await
            .map(drop)
    }
}

impl Drop for Remote {
    fn drop(&mut self) {
        self.port.dispose();

        if !self.cancelled.swap(true, Ordering::AcqRel) && self.session.is_connected() {
            if let Ok(data) = msg::encode(&self.forward) {
                let _ = self.session.global_notify("cancel-tcpip-forward", data);
            }
        }
    }
}

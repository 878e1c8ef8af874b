use std::{
    convert::Infallible,
    sync::{Arc, Weak},
};

use futures::StreamExt;
use futures_time::{future::FutureExt, time::Duration};

use super::{open::Incoming, Inner, Outgoing, Session};
use crate::{
    channel::{Core, Kind},
    msg::{connect, Message},
    sync::lock,
    transport::{PacketRead, PacketWrite},
    Error, Result,
};

/// Receive and dispatch messages until the peer hangs up or the last handle is dropped.
pub(super) async fn receive(weak: Weak<Inner>, mut rx: impl PacketRead) -> Result<()> {
    loop {
        let payload = rx.recv().await?;

        let Some(inner) = weak.upgrade() else {
            break Ok(());
        };

        Session { inner }.dispatch(&payload)?;
    }
}

/// Send queued packets until the session is closed.
pub(super) async fn transmit(
    queue: flume::Receiver<Outgoing>,
    mut tx: impl PacketWrite,
) -> Result<()> {
    while let Ok(outgoing) = queue.recv_async().await {
        match outgoing {
            Outgoing::Packet(packet) => tx.send(&packet).await?,
            Outgoing::Close => break,
        }
    }

    tx.close().await
}

/// Tear down the dropped channels whose close isn't acknowledged in `timeout`, this never completes.
pub(super) async fn expire(
    weak: Weak<Inner>,
    dropped: flume::Receiver<Arc<Core>>,
    timeout: Duration,
) -> Infallible {
    dropped
        .into_stream()
        .for_each_concurrent(None, |core| {
            let weak = weak.clone();

            async move {
                if core.finished().timeout(timeout).await.is_ok() {
                    return;
                }

                tracing::warn!(
                    "The peer didn't acknowledge the closure of dropped channel {} in time, tearing down",
                    core.id
                );

                core.finish();
                if let Some(inner) = weak.upgrade() {
                    Session { inner }.release(core.id);
                }
            }
        })
        .await;

    futures::future::pending().await
}

impl Session {
    fn dispatch(&self, payload: &[u8]) -> Result<()> {
        if !Message::is_known(payload) {
            tracing::warn!(
                "Ignoring a message of unsupported type {:?}",
                payload.first()
            );

            return Ok(());
        }

        let message = Message::decode(payload)?;
        tracing::trace!("<- {message:?}");

        if let Some(id) = message.recipient_channel() {
            return match self.channel(id) {
                Some(core) => core.dispatch(self, message),
                None => {
                    tracing::warn!("Dropped a message for unknown channel {id}");

                    Ok(())
                }
            };
        }

        match message {
            Message::Disconnect(message) => {
                tracing::info!(
                    "Peer disconnected with reason {}: {:?}",
                    message.reason,
                    message.description
                );

                Err(Error::Disconnected)
            }
            Message::Ignore(_) => Ok(()),
            Message::Debug(message) => {
                tracing::debug!("Peer debug message: {:?}", message.message);

                Ok(())
            }
            Message::Unimplemented(message) => {
                tracing::warn!(
                    "Peer didn't understand our message with sequence number {}",
                    message.seq
                );

                Ok(())
            }
            Message::GlobalRequest(message) => {
                tracing::debug!(
                    "Rejecting the `{}` global request from the peer",
                    message.request_name.to_string_lossy()
                );

                if *message.want_reply {
                    self.send(connect::RequestFailure)?;
                }

                Ok(())
            }
            Message::RequestSuccess(connect::RequestSuccess { data }) => {
                self.on_global_reply(Ok(data))
            }
            Message::RequestFailure(_) => self.on_global_reply(Err(())),
            Message::ChannelOpen(message) => self.on_open_request(message),
            _ => Err(Error::UnexpectedMessage),
        }
    }

    fn on_global_reply(&self, result: Result<Vec<u8>, ()>) -> Result<()> {
        let (name, reply) = lock(&self.inner.globals)
            .pop_front()
            .ok_or(Error::UnexpectedMessage)?;

        // The requester may have timed out already.
        let _ = reply.send(result.map_err(|()| Error::GlobalRequestFailure(name)));

        Ok(())
    }

    fn on_open_request(&self, message: connect::ChannelOpen) -> Result<()> {
        let kind = Kind::parse(&message.channel_type, &message.data)?;
        tracing::debug!("Peer requested to open a channel: {kind:?}");

        let mut incoming = Some(Incoming::new(self.clone(), kind, &message));

        // Hooks run outside of the registry lock, and may register or drop hooks themselves.
        for hook in self.inner.hooks.snapshot() {
            match incoming.take() {
                Some(request) => incoming = lock(&*hook).on_open(request),
                None => break,
            }
        }

        if let Some(incoming) = incoming {
            let unsupported = match incoming.kind() {
                Kind::Other { channel_type, .. } => {
                    Some(format!("Unsupported channel type `{channel_type}`"))
                }
                _ => None,
            };

            if let Some(description) = unsupported {
                incoming.reject(connect::OpenFailureReason::UnknownChannelType, &description)?;
            }
        }

        Ok(())
    }
}

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, OnceLock,
};

use dashmap::{mapref::entry::Entry, DashMap};
use muxssh::channel::{Closer, Handler};

use crate::{
    protocol::{self, Reassembler, Response, Version},
    Error, Result,
};

type Slot = flume::Sender<Result<Response>>;

/// The outstanding requests, keyed by identifier.
///
/// Each identifier is removed exactly once: by its response, by the requester
/// giving up, or by the session going away.
#[derive(Default)]
pub(super) struct Pending {
    next: AtomicU32,
    slots: DashMap<u32, Slot>,
    closed: AtomicBool,
    closer: OnceLock<Closer>,
}

impl Pending {
    /// Allocate an identifier that isn't outstanding, and the receiver of its response.
    pub fn register(&self) -> Result<(u32, flume::Receiver<Result<Response>>)> {
        let (tx, rx) = flume::bounded(1);

        let id = loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);

            match self.slots.entry(id) {
                Entry::Vacant(entry) => {
                    entry.insert(tx);
                    break id;
                }
                Entry::Occupied(_) => continue,
            }
        };

        // The session may have gone away while registering.
        if self.closed.load(Ordering::Acquire) {
            self.slots.remove(&id);

            return Err(Error::Closed);
        }

        tracing::trace!("Registered request {id}");

        Ok((id, rx))
    }

    /// Give up on the request `id`, returns whether it was still outstanding.
    pub fn release(&self, id: u32) -> bool {
        let released = self.slots.remove(&id).is_some();
        if released {
            tracing::trace!("Released request {id} without a response");
        }

        released
    }

    fn resolve(&self, response: Response) {
        let id = response.id();

        match self.slots.remove(&id) {
            Some((_, slot)) => {
                // The requester may have given up in the meantime.
                let _ = slot.send(Ok(response));
            }
            None => tracing::warn!("Dropped a response for unknown request {id}"),
        }
    }

    /// Fail every outstanding request and refuse any further one.
    pub fn fail_all(&self, error: impl Fn() -> Error) {
        self.closed.store(true, Ordering::Release);

        // NOTE: We collect here to release the references to the DashMap,
        // which would deadlock on the calls to `remove`.
        for id in self
            .slots
            .iter()
            .map(|slot| *slot.key())
            .collect::<Vec<_>>()
        {
            if let Some((_, slot)) = self.slots.remove(&id) {
                let _ = slot.send(Err(error()));
            }
        }
    }

    /// Close the channel on protocol violations, once it is established.
    pub fn attach(&self, closer: Closer) {
        let _ = self.closer.set(closer);
    }

    /// The server violated the protocol, fail every request and close the channel.
    pub fn violate(&self, reason: &'static str) {
        tracing::error!("The SFTP server violated the protocol, closing: {reason}");

        self.fail_all(|| Error::ProtocolViolation(reason));
        if let Some(closer) = self.closer.get() {
            closer.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Reassembles the packets from the channel data, on the session thread.
pub(super) struct Receiver {
    reassembler: Reassembler,
    pending: Arc<Pending>,
    version: Option<flume::Sender<Version>>,
}

impl Receiver {
    pub fn new(pending: Arc<Pending>, version: flume::Sender<Version>) -> Self {
        Self {
            reassembler: Default::default(),
            pending,
            version: Some(version),
        }
    }

    fn on_packet(&mut self, packet: &[u8]) {
        match packet.first() {
            Some(2) => match (protocol::decode::<Version>(packet), self.version.take()) {
                (Ok(version), Some(tx)) => {
                    let _ = tx.send(version);
                }
                (Ok(_), None) => tracing::warn!("Ignoring a repeated version packet"),
                (Err(err), _) => {
                    tracing::debug!("Malformed version packet: {err}");

                    self.pending.violate("malformed version packet");
                }
            },
            _ if Response::is_known(packet) => match protocol::decode::<Response>(packet) {
                Ok(response) => self.pending.resolve(response),
                Err(err) => {
                    tracing::debug!("Malformed response: {err}");

                    self.pending.violate("malformed response");
                }
            },
            other => tracing::warn!("Ignoring a packet of unsupported type {other:?}"),
        }
    }
}

impl Handler for Receiver {
    fn on_data(&mut self, data: &[u8]) {
        if self.pending.is_closed() {
            return;
        }

        self.reassembler.extend(data);

        loop {
            match self.reassembler.next_packet() {
                Ok(Some(packet)) => self.on_packet(&packet),
                Ok(None) => break,
                Err(Error::ProtocolViolation(reason)) => {
                    self.reassembler = Default::default();
                    self.pending.violate(reason);

                    break;
                }
                Err(err) => {
                    tracing::debug!("Unable to reassemble the packets: {err}");
                    self.pending.violate("unreadable packet");

                    break;
                }
            }
        }
    }

    fn on_close(&mut self) {
        self.version.take();
        self.pending.fail_all(|| Error::Closed);
    }

    fn on_error(&mut self, error: &Arc<muxssh::Error>) {
        self.pending
            .fail_all(|| muxssh::Error::Session(error.clone()).into());
    }
}

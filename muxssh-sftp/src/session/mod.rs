//! Definition of the [`SftpSession`] struct, running the SFTP sub-protocol over a [`Channel`].

use std::sync::Arc;

use binrw::{meta::WriteEndian, BinWrite};
use muxssh::{
    channel::{Channel, Kind},
    Session,
};

use crate::{
    protocol::{self, Attrs, Entry, OpenFlags, Response, Status, StatusCode},
    AsyncResult, Config, Error, Result,
};

mod pending;
use pending::{Pending, Receiver};

/// The overhead of a `SSH_FXP_DATA` response around its data.
const READ_OVERHEAD: u32 = 13;

/// The overhead of a `SSH_FXP_WRITE` request around its data, without the handle.
const WRITE_OVERHEAD: u32 = 25;

struct Inner {
    channel: Channel,
    config: Config,
    version: u32,
    extensions: Vec<(String, Vec<u8>)>,
    pending: Arc<Pending>,
}

/// An SFTP client session, multiplexed over a single channel of a [`Session`].
///
/// Any number of requests may be outstanding at once, responses are routed back
/// to their requester by identifier, regardless of their arrival order.
///
/// Dropping a pending request future gives up on its response and releases its identifier.
#[derive(Clone)]
pub struct SftpSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SftpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSession")
            .field("channel", &self.inner.channel)
            .field("version", &self.inner.version)
            .field("outstanding", &self.inner.pending.len())
            .finish()
    }
}

impl SftpSession {
    /// Open a channel on `session`, start the `sftp` subsystem on it and negotiate the version.
    pub async fn connect(session: &Session, config: Config) -> Result<Self> {
        let pending = Arc::new(Pending::default());
        let (version, versions) = flume::bounded(1);

        let channel = session
            .open_handled(Kind::Session, Receiver::new(pending.clone(), version))
            .await?;
        pending.attach(channel.closer());
        channel.subsystem("sftp").await?;

        channel
            .write(&protocol::encode(&protocol::Init {
                version: config.version,
                extensions: Vec::new(),
            })?)
            .await?;

        let negotiated = session
            .wait(
                async {
                    versions
                        .recv_async()
                        .await
                        .map_err(|_| muxssh::Error::ChannelClosed)
                },
                config.operation_timeout,
            )
            .await?;

        if negotiated.version != protocol::VERSION {
            return Err(Error::UnsupportedVersion(negotiated.version));
        }

        tracing::debug!(
            "Negotiated SFTP version {} on channel {}, with {} extension(s)",
            negotiated.version,
            channel.id(),
            negotiated.extensions.len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                channel,
                config,
                version: negotiated.version,
                extensions: negotiated
                    .extensions
                    .into_iter()
                    .map(|(name, data)| (name.to_string_lossy(), data.into_vec()))
                    .collect(),
                pending,
            }),
        })
    }

    /// The protocol version selected by the server.
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// The extensions advertised by the server, as name and data.
    pub fn extensions(&self) -> &[(String, Vec<u8>)] {
        &self.inner.extensions
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Whether the session still accepts requests.
    pub fn is_open(&self) -> bool {
        !self.inner.pending.is_closed() && self.inner.channel.is_open()
    }

    /// The count of requests awaiting their response.
    pub fn outstanding(&self) -> usize {
        self.inner.pending.len()
    }

    /// Send the request built by `build` with a fresh identifier, and wait for its response.
    pub async fn request<T>(&self, build: impl FnOnce(u32) -> T) -> Result<Response>
    where
        for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
    {
        let (id, rx) = self.inner.pending.register()?;
        let pending = self.inner.pending.clone();
        let _release = defer::defer(move || {
            pending.release(id);
        });

        self.inner
            .channel
            .write(&protocol::encode(&build(id))?)
            .await?;

        let response = self
            .inner
            .channel
            .session()
            .wait(
                async { Ok(rx.recv_async().await) },
                self.inner.config.operation_timeout,
            )
            .await?;

        response.unwrap_or(Err(Error::Closed))
    }

    fn status(status: Status) -> Result<()> {
        let message = status.message.to_string_lossy();

        match status.code {
            StatusCode::Ok => Ok(()),
            StatusCode::Eof => Err(Error::Eof),
            StatusCode::NoSuchFile => Err(Error::NoSuchFile(message)),
            StatusCode::PermissionDenied => Err(Error::PermissionDenied(message)),
            code => Err(Error::Status { code, message }),
        }
    }

    async fn unit<T>(&self, build: impl FnOnce(u32) -> T) -> Result<()>
    where
        for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
    {
        match self.request(build).await? {
            Response::Status(status) => Self::status(status),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    async fn handle<T>(&self, build: impl FnOnce(u32) -> T) -> Result<Vec<u8>>
    where
        for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
    {
        match self.request(build).await? {
            Response::Handle(handle) => Ok(handle.handle.into_vec()),
            Response::Status(status) => Self::status(status).and(Err(Error::UnexpectedResponse)),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    async fn attrs<T>(&self, build: impl FnOnce(u32) -> T) -> Result<Attrs>
    where
        for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
    {
        match self.request(build).await? {
            Response::Attrs(response) => Ok(response.attrs),
            Response::Status(status) => Self::status(status).and(Err(Error::UnexpectedResponse)),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    async fn names<T>(&self, build: impl FnOnce(u32) -> T) -> Result<Vec<Entry>>
    where
        for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
    {
        match self.request(build).await? {
            Response::Name(name) => Ok(name.entries),
            Response::Status(status) => Self::status(status).and(Err(Error::UnexpectedResponse)),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    async fn path<T>(&self, build: impl FnOnce(u32) -> T) -> Result<String>
    where
        for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
    {
        self.names(build)
            .await?
            .into_iter()
            .next()
            .map(|entry| entry.filename.to_string_lossy())
            .ok_or(Error::UnexpectedResponse)
    }

    /// Open the file at `path` with `flags`, returning its handle.
    pub async fn open(&self, path: &str, flags: OpenFlags) -> Result<Vec<u8>> {
        self.handle(|id| protocol::Open {
            id,
            filename: path.into(),
            pflags: flags,
            attrs: Default::default(),
        })
        .await
    }

    /// Close a file or directory `handle`.
    pub async fn close(&self, handle: &[u8]) -> Result<()> {
        self.unit(|id| protocol::Close {
            id,
            handle: handle.into(),
        })
        .await
    }

    /// Read up to `len` bytes at `offset` from the file `handle`,
    /// an empty buffer signals the end of the file.
    pub async fn read(&self, handle: &[u8], offset: u64, len: u32) -> Result<Vec<u8>> {
        let response = self
            .request(|id| protocol::Read {
                id,
                handle: handle.into(),
                offset,
                len,
            })
            .await?;

        match response {
            Response::Data(data) => Ok(data.data.into_vec()),
            Response::Status(status) => match Self::status(status) {
                Err(Error::Eof) => Ok(Vec::new()),
                other => other.and(Err(Error::UnexpectedResponse)),
            },
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Write `data` at `offset` to the file `handle`.
    pub async fn write(&self, handle: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        self.unit(|id| protocol::Write {
            id,
            handle: handle.into(),
            offset,
            data: data.into(),
        })
        .await
    }

    /// The attributes of `path`, without following symbolic links.
    pub async fn lstat(&self, path: &str) -> Result<Attrs> {
        self.attrs(|id| protocol::Lstat {
            id,
            path: path.into(),
        })
        .await
    }

    /// The attributes of `path`, following symbolic links.
    pub async fn stat(&self, path: &str) -> Result<Attrs> {
        self.attrs(|id| protocol::Stat {
            id,
            path: path.into(),
        })
        .await
    }

    /// The attributes of the opened file `handle`.
    pub async fn fstat(&self, handle: &[u8]) -> Result<Attrs> {
        self.attrs(|id| protocol::Fstat {
            id,
            handle: handle.into(),
        })
        .await
    }

    /// Modify the attributes of `path`.
    pub async fn setstat(&self, path: &str, attrs: Attrs) -> Result<()> {
        self.unit(|id| protocol::Setstat {
            id,
            path: path.into(),
            attrs,
        })
        .await
    }

    /// Modify the attributes of the opened file `handle`.
    pub async fn fsetstat(&self, handle: &[u8], attrs: Attrs) -> Result<()> {
        self.unit(|id| protocol::Fsetstat {
            id,
            handle: handle.into(),
            attrs,
        })
        .await
    }

    /// Open the directory at `path` for listing, returning its handle.
    pub async fn opendir(&self, path: &str) -> Result<Vec<u8>> {
        self.handle(|id| protocol::Opendir {
            id,
            path: path.into(),
        })
        .await
    }

    /// Read the next batch of entries of the directory `handle`,
    /// fails with [`Error::Eof`] once every entry has been listed.
    pub async fn readdir(&self, handle: &[u8]) -> Result<Vec<Entry>> {
        self.names(|id| protocol::Readdir {
            id,
            handle: handle.into(),
        })
        .await
    }

    /// Remove the file at `path`.
    pub async fn remove(&self, path: &str) -> Result<()> {
        self.unit(|id| protocol::Remove {
            id,
            filename: path.into(),
        })
        .await
    }

    /// Create a directory at `path`.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.unit(|id| protocol::Mkdir {
            id,
            path: path.into(),
            attrs: Default::default(),
        })
        .await
    }

    /// Remove the directory at `path`.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        self.unit(|id| protocol::Rmdir {
            id,
            path: path.into(),
        })
        .await
    }

    /// Canonicalize `path` on the server.
    pub async fn realpath(&self, path: &str) -> Result<String> {
        self.path(|id| protocol::Realpath {
            id,
            path: path.into(),
        })
        .await
    }

    /// Rename the file at `from` to `to`.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.unit(|id| protocol::Rename {
            id,
            oldpath: from.into(),
            newpath: to.into(),
        })
        .await
    }

    /// The target of the symbolic link at `path`.
    pub async fn readlink(&self, path: &str) -> Result<String> {
        self.path(|id| protocol::Readlink {
            id,
            path: path.into(),
        })
        .await
    }

    /// Create a symbolic link at `link` pointing to `target`.
    pub async fn symlink(&self, link: &str, target: &str) -> Result<()> {
        self.unit(|id| protocol::Symlink {
            id,
            linkpath: link.into(),
            targetpath: target.into(),
        })
        .await
    }

    /// List every entry of the directory at `path`.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<Entry>> {
        let handle = self.opendir(path).await?;

        let mut entries = Vec::new();
        let listed = loop {
            match self.readdir(&handle).await {
                Ok(batch) => entries.extend(batch),
                Err(Error::Eof) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        let closed = self.close(&handle).await;
        listed.and(closed)?;

        Ok(entries)
    }

    /// List the directory at `path` in the background, the listing is retrieved
    /// with [`AsyncResult::end`] on the returned handle.
    pub fn begin_list_directory(&self, path: &str) -> Result<Arc<AsyncResult<Vec<Entry>>>> {
        let result = Arc::new(AsyncResult::new());

        std::thread::Builder::new()
            .name("muxssh-sftp".into())
            .spawn({
                let session = self.clone();
                let path = path.to_owned();
                let result = result.clone();

                move || {
                    let listing = futures::executor::block_on(session.list_directory(&path));

                    if let Err(err) = result.complete(listing) {
                        tracing::error!("Unable to complete the listing of `{path}`: {err}");
                    }
                }
            })
            .map_err(muxssh::Error::from)?;

        Ok(result)
    }

    /// The largest read request length for a buffer of `buffer_size` bytes,
    /// so the response fits in a single channel packet.
    pub fn calculate_optimal_read_length(&self, buffer_size: u32) -> u32 {
        let packet_size = self.inner.channel.session().config().packet_size;

        buffer_size
            .min(packet_size)
            .saturating_sub(READ_OVERHEAD)
            .max(1)
    }

    /// The largest write request length for a buffer of `buffer_size` bytes on `handle`,
    /// so the request fits in a single channel packet.
    pub fn calculate_optimal_write_length(&self, buffer_size: u32, handle: &[u8]) -> u32 {
        buffer_size
            .min(self.inner.channel.remote_packet_size())
            .saturating_sub(WRITE_OVERHEAD + handle.len() as u32)
            .max(1)
    }

    /// Fail every outstanding request and close the channel.
    ///
    /// Closing an already closed session has no effect.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.pending.fail_all(|| Error::Closed);

        Ok(self.inner.channel.close().await?)
    }
}

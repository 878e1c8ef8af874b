//! Definition of the [`SftpFileStream`] struct, buffered I/O on a remote file.

use std::io::SeekFrom;

use crate::{protocol::Attrs, Error, Requests, Result, SftpSession};

mod mode;
pub use mode::{FileAccess, FileMode};

/// A seekable stream over a remote file, buffering reads and writes.
///
/// Every request carries its own offset, so seeking never touches the network
/// unless the end of the file is involved.
///
/// Dropping the stream flushes the pending writes and closes the remote handle,
/// prefer [`SftpFileStream::close`] to observe the errors.
pub struct SftpFileStream<S: Requests = SftpSession> {
    session: S,
    handle: Option<Vec<u8>>,
    access: FileAccess,
    position: u64,

    read: Vec<u8>,
    read_offset: usize,
    read_buffer_size: u32,

    write: Vec<u8>,
    write_buffer_size: u32,
}

impl<S: Requests> std::fmt::Debug for SftpFileStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpFileStream")
            .field("open", &self.handle.is_some())
            .field("access", &self.access)
            .field("position", &self.position)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("write_buffer_size", &self.write_buffer_size)
            .finish()
    }
}

impl<S: Requests> SftpFileStream<S> {
    /// Open the remote file at `path`, with buffers of up to `buffer_size` bytes.
    ///
    /// The `mode` and `access` combination is checked before any request is issued.
    pub async fn open(
        session: S,
        path: &str,
        mode: FileMode,
        access: FileAccess,
        buffer_size: u32,
    ) -> Result<Self> {
        if buffer_size == 0 {
            return Err(Error::OutOfRange {
                param: "buffer_size",
            });
        }
        if path.is_empty() {
            return Err(Error::InvalidArgument {
                message: "The path cannot be empty.".into(),
                param: "path",
            });
        }

        let flags = mode::open_flags(mode, access)?;

        if !session.is_open() {
            return Err(Error::Closed);
        }

        let handle = session.open(path, flags).await?;

        let read_buffer_size = session.calculate_optimal_read_length(buffer_size);
        let write_buffer_size = session.calculate_optimal_write_length(buffer_size, &handle);

        let position = if mode == FileMode::Append {
            session.fstat(&handle).await?.size.unwrap_or_default()
        } else {
            0
        };

        tracing::debug!(
            "Opened `{path}` with {flags:?}, buffering {read_buffer_size} bytes for reads \
             and {write_buffer_size} bytes for writes"
        );

        Ok(Self {
            session,
            handle: Some(handle),
            access,
            position,
            read: Vec::new(),
            read_offset: 0,
            read_buffer_size,
            write: Vec::with_capacity(write_buffer_size as usize),
            write_buffer_size,
        })
    }

    fn handle(&self) -> Result<&[u8]> {
        self.handle.as_deref().ok_or(Error::Closed)
    }

    /// The current position in the file.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The length of the read requests.
    pub fn read_buffer_size(&self) -> u32 {
        self.read_buffer_size
    }

    /// The length of the write requests.
    pub fn write_buffer_size(&self) -> u32 {
        self.write_buffer_size
    }

    /// Whether the stream supports reading.
    pub fn can_read(&self) -> bool {
        self.handle.is_some() && self.access.contains(FileAccess::READ)
    }

    /// Whether the stream supports writing.
    pub fn can_write(&self) -> bool {
        self.handle.is_some() && self.access.contains(FileAccess::WRITE)
    }

    /// Whether the stream supports seeking.
    pub fn can_seek(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether the operations of the stream can time out, this is always the case.
    pub fn can_timeout(&self) -> bool {
        true
    }

    fn discard_read_buffer(&mut self) {
        self.read.clear();
        self.read_offset = 0;
    }

    /// Send the buffered writes, which end at the current position.
    async fn flush_write_buffer(&mut self) -> Result<()> {
        if self.write.is_empty() {
            return Ok(());
        }

        let offset = self.position - self.write.len() as u64;
        self.session
            .write(self.handle()?, offset, &self.write)
            .await?;
        self.write.clear();

        Ok(())
    }

    /// Read into `buf` at the current position, returning the amount of bytes read,
    /// which is less than requested only at the end of the file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.access.contains(FileAccess::READ) {
            return Err(Error::InvalidOperation("The stream doesn't support reading"));
        }
        self.handle()?;

        self.flush_write_buffer().await?;

        let mut filled = 0;
        while filled < buf.len() {
            if self.read_offset >= self.read.len() {
                let data = self
                    .session
                    .read(self.handle()?, self.position, self.read_buffer_size)
                    .await?;

                if data.is_empty() {
                    break;
                }

                self.read = data;
                self.read_offset = 0;
            }

            let available = &self.read[self.read_offset..];
            let count = available.len().min(buf.len() - filled);

            buf[filled..filled + count].copy_from_slice(&available[..count]);
            filled += count;
            self.read_offset += count;
            self.position += count as u64;
        }

        Ok(filled)
    }

    /// Write `buf` at the current position, sending full buffers as they fill up.
    pub async fn write(&mut self, mut buf: &[u8]) -> Result<()> {
        if !self.access.contains(FileAccess::WRITE) {
            return Err(Error::InvalidOperation("The stream doesn't support writing"));
        }
        self.handle()?;

        self.discard_read_buffer();

        let size = self.write_buffer_size as usize;
        while !buf.is_empty() {
            let room = size - self.write.len();
            if room == 0 {
                self.flush_write_buffer().await?;
                continue;
            }

            let count = room.min(buf.len());
            let (chunk, rest) = buf.split_at(count);

            if self.write.is_empty() && count == size {
                self.session
                    .write(self.handle()?, self.position, chunk)
                    .await?;
            } else {
                self.write.extend_from_slice(chunk);
            }

            self.position += count as u64;
            buf = rest;
        }

        if self.write.len() >= size {
            self.flush_write_buffer().await?;
        }

        Ok(())
    }

    /// Send the buffered writes to the server.
    pub async fn flush(&mut self) -> Result<()> {
        self.handle()?;

        self.flush_write_buffer().await
    }

    async fn stat(&mut self) -> Result<Attrs> {
        self.flush_write_buffer().await?;

        self.session.fstat(self.handle()?).await
    }

    /// The length of the remote file, including the buffered writes.
    pub async fn len(&mut self) -> Result<u64> {
        self.stat().await?.size.ok_or(Error::UnexpectedResponse)
    }

    /// Whether the remote file is empty.
    pub async fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Truncate or extend the remote file to `len` bytes,
    /// the position is moved back to the end of the file if it lies past it.
    pub async fn set_len(&mut self, len: u64) -> Result<()> {
        if !self.access.contains(FileAccess::WRITE) {
            return Err(Error::InvalidOperation("The stream doesn't support writing"));
        }

        self.flush_write_buffer().await?;
        self.discard_read_buffer();

        self.session
            .fsetstat(self.handle()?, Attrs::with_size(len))
            .await?;
        self.position = self.position.min(len);

        Ok(())
    }

    /// Move the position in the file, returning the new position.
    ///
    /// Only seeking relative to the end of the file issues a request.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.handle()?;

        let (base, offset) = match pos {
            SeekFrom::Start(position) => {
                self.relocate(position).await?;
                return Ok(position);
            }
            SeekFrom::Current(offset) => (self.position, offset),
            SeekFrom::End(offset) => (self.len().await?, offset),
        };

        let position = base
            .checked_add_signed(offset)
            .ok_or_else(|| Error::InvalidArgument {
                message: "An attempt was made to move the position before the beginning.".into(),
                param: "offset",
            })?;
        self.relocate(position).await?;

        Ok(position)
    }

    async fn relocate(&mut self, position: u64) -> Result<()> {
        if position == self.position {
            return Ok(());
        }

        self.flush_write_buffer().await?;

        let forward = position - self.position.min(position);
        let buffered = (self.read.len() - self.read_offset) as u64;
        if position > self.position && forward <= buffered {
            self.read_offset += forward as usize;
        } else {
            self.discard_read_buffer();
        }

        self.position = position;

        Ok(())
    }

    /// Flush the pending writes and close the remote handle.
    ///
    /// Closing an already closed stream has no effect.
    pub async fn close(&mut self) -> Result<()> {
        let flushed = self.flush_write_buffer().await;

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.discard_read_buffer();
        self.write.clear();

        let closed = if self.session.is_open() {
            self.session.close(&handle).await
        } else {
            Ok(())
        };

        flushed.and(closed)
    }
}

impl<S: Requests> Drop for SftpFileStream<S> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = futures::executor::block_on(self.close()) {
                tracing::warn!("Unable to close the remote file on drop: {err}");
            }
        }
    }
}

impl<S: Requests> std::io::Read for SftpFileStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(futures::executor::block_on(SftpFileStream::read(self, buf))?)
    }
}

impl<S: Requests> std::io::Write for SftpFileStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        futures::executor::block_on(SftpFileStream::write(self, buf))?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(futures::executor::block_on(SftpFileStream::flush(self))?)
    }
}

impl<S: Requests> std::io::Seek for SftpFileStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        Ok(futures::executor::block_on(SftpFileStream::seek(self, pos))?)
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    protocol::{Attrs, OpenFlags},
    Result, SftpSession,
};

#[cfg(doc)]
use crate::SftpFileStream;

/// The file requests a [`SftpFileStream`] issues, implemented by [`SftpSession`].
#[async_trait]
pub trait Requests: Send + Sync {
    /// Whether the requests can still be issued.
    fn is_open(&self) -> bool;

    /// Open the file at `path` with `flags`, returning its handle.
    async fn open(&self, path: &str, flags: OpenFlags) -> Result<Vec<u8>>;

    /// Close the file `handle`.
    async fn close(&self, handle: &[u8]) -> Result<()>;

    /// Read up to `len` bytes at `offset`, an empty buffer signals the end of the file.
    async fn read(&self, handle: &[u8], offset: u64, len: u32) -> Result<Vec<u8>>;

    /// Write `data` at `offset`.
    async fn write(&self, handle: &[u8], offset: u64, data: &[u8]) -> Result<()>;

    /// The attributes of the file `handle`.
    async fn fstat(&self, handle: &[u8]) -> Result<Attrs>;

    /// Modify the attributes of the file `handle`.
    async fn fsetstat(&self, handle: &[u8], attrs: Attrs) -> Result<()>;

    /// The read length fitting a buffer of `buffer_size` bytes in a single packet.
    fn calculate_optimal_read_length(&self, buffer_size: u32) -> u32;

    /// The write length fitting a buffer of `buffer_size` bytes on `handle` in a single packet.
    fn calculate_optimal_write_length(&self, buffer_size: u32, handle: &[u8]) -> u32;
}

#[async_trait]
impl Requests for SftpSession {
    fn is_open(&self) -> bool {
        SftpSession::is_open(self)
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> Result<Vec<u8>> {
        SftpSession::open(self, path, flags).await
    }

    async fn close(&self, handle: &[u8]) -> Result<()> {
        SftpSession::close(self, handle).await
    }

    async fn read(&self, handle: &[u8], offset: u64, len: u32) -> Result<Vec<u8>> {
        SftpSession::read(self, handle, offset, len).await
    }

    async fn write(&self, handle: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        SftpSession::write(self, handle, offset, data).await
    }

    async fn fstat(&self, handle: &[u8]) -> Result<Attrs> {
        SftpSession::fstat(self, handle).await
    }

    async fn fsetstat(&self, handle: &[u8], attrs: Attrs) -> Result<()> {
        SftpSession::fsetstat(self, handle, attrs).await
    }

    fn calculate_optimal_read_length(&self, buffer_size: u32) -> u32 {
        SftpSession::calculate_optimal_read_length(self, buffer_size)
    }

    fn calculate_optimal_write_length(&self, buffer_size: u32, handle: &[u8]) -> u32 {
        SftpSession::calculate_optimal_write_length(self, buffer_size, handle)
    }
}

#[async_trait]
impl<T: Requests + ?Sized> Requests for Arc<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    async fn open(&self, path: &str, flags: OpenFlags) -> Result<Vec<u8>> {
        (**self).open(path, flags).await
    }

    async fn close(&self, handle: &[u8]) -> Result<()> {
        (**self).close(handle).await
    }

    async fn read(&self, handle: &[u8], offset: u64, len: u32) -> Result<Vec<u8>> {
        (**self).read(handle, offset, len).await
    }

    async fn write(&self, handle: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        (**self).write(handle, offset, data).await
    }

    async fn fstat(&self, handle: &[u8]) -> Result<Attrs> {
        (**self).fstat(handle).await
    }

    async fn fsetstat(&self, handle: &[u8], attrs: Attrs) -> Result<()> {
        (**self).fsetstat(handle, attrs).await
    }

    fn calculate_optimal_read_length(&self, buffer_size: u32) -> u32 {
        (**self).calculate_optimal_read_length(buffer_size)
    }

    fn calculate_optimal_write_length(&self, buffer_size: u32, handle: &[u8]) -> u32 {
        (**self).calculate_optimal_write_length(buffer_size, handle)
    }
}

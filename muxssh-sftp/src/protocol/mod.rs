//! The SFTP version 3 packets, as described in `draft-ietf-secsh-filexfer-02`.
//!
//! Every packet is prefixed on the channel by its `uint32` length.

use std::io::Cursor;

use binrw::{
    binrw,
    helpers::until_eof,
    meta::{ReadEndian, WriteEndian},
    BinRead, BinWrite,
};
use bitflags::bitflags;
use muxssh::arch::Bytes;

use crate::{Error, Result};

mod attrs;
pub use attrs::{AttrFlags, Attrs};

/// The protocol version implemented by this crate.
pub const VERSION: u32 = 3;

/// Flags of the `SSH_FXP_OPEN` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(u32);

bitflags! {
    impl OpenFlags: u32 {
        /// Open the file for reading.
        const READ = 0x0000_0001;

        /// Open the file for writing.
        const WRITE = 0x0000_0002;

        /// Force all writes to append data at the end of the file.
        const APPEND = 0x0000_0004;

        /// Create the file if it doesn't exist.
        const CREAT = 0x0000_0008;

        /// Truncate an existing file to zero length, requires [`OpenFlags::CREAT`].
        const TRUNC = 0x0000_0010;

        /// Fail if the file already exists, requires [`OpenFlags::CREAT`].
        const EXCL = 0x0000_0020;
    }
}

/// The status codes of the `SSH_FXP_STATUS` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// The operation completed successfully.
    Ok,

    /// End of file, or no more directory entries.
    Eof,

    /// A reference was made to a file which doesn't exist.
    NoSuchFile,

    /// The user doesn't have sufficient permissions.
    PermissionDenied,

    /// An error occurred, without a more specific code.
    Failure,

    /// A badly formatted packet or protocol incompatibility was detected.
    BadMessage,

    /// There is no connection to the server.
    NoConnection,

    /// The connection to the server was lost.
    ConnectionLost,

    /// The operation isn't supported by the server.
    OpUnsupported,

    /// Any other status code.
    Other(u32),
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Eof,
            2 => Self::NoSuchFile,
            3 => Self::PermissionDenied,
            4 => Self::Failure,
            5 => Self::BadMessage,
            6 => Self::NoConnection,
            7 => Self::ConnectionLost,
            8 => Self::OpUnsupported,
            other => Self::Other(other),
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(value: StatusCode) -> Self {
        match value {
            StatusCode::Ok => 0,
            StatusCode::Eof => 1,
            StatusCode::NoSuchFile => 2,
            StatusCode::PermissionDenied => 3,
            StatusCode::Failure => 4,
            StatusCode::BadMessage => 5,
            StatusCode::NoConnection => 6,
            StatusCode::ConnectionLost => 7,
            StatusCode::OpUnsupported => 8,
            StatusCode::Other(other) => other,
        }
    }
}

/// The `SSH_FXP_INIT` packet.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 1_u8)]
pub struct Init {
    /// The highest version supported by the client.
    pub version: u32,

    /// Extension pairs, as name and data.
    #[br(parse_with = until_eof)]
    pub extensions: Vec<(Bytes, Bytes)>,
}

/// The `SSH_FXP_VERSION` packet.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 2_u8)]
pub struct Version {
    /// The version selected by the server.
    pub version: u32,

    /// Extension pairs, as name and data.
    #[br(parse_with = until_eof)]
    pub extensions: Vec<(Bytes, Bytes)>,
}

/// The `SSH_FXP_OPEN` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 3_u8)]
pub struct Open {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the file.
    pub filename: Bytes,

    /// Access and creation flags.
    #[br(map = |flags: u32| OpenFlags::from_bits_retain(flags))]
    #[bw(map = |flags: &OpenFlags| flags.bits())]
    pub pflags: OpenFlags,

    /// Initial attributes of a created file.
    pub attrs: Attrs,
}

/// The `SSH_FXP_CLOSE` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 4_u8)]
pub struct Close {
    /// Identifier of the request.
    pub id: u32,

    /// Handle to close.
    pub handle: Bytes,
}

/// The `SSH_FXP_READ` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 5_u8)]
pub struct Read {
    /// Identifier of the request.
    pub id: u32,

    /// Handle of the file.
    pub handle: Bytes,

    /// Offset to read from.
    pub offset: u64,

    /// Maximum amount of bytes to read.
    pub len: u32,
}

/// The `SSH_FXP_WRITE` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 6_u8)]
pub struct Write {
    /// Identifier of the request.
    pub id: u32,

    /// Handle of the file.
    pub handle: Bytes,

    /// Offset to write at.
    pub offset: u64,

    /// Data to write.
    pub data: Bytes,
}

/// The `SSH_FXP_LSTAT` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 7_u8)]
pub struct Lstat {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the file, symbolic links aren't followed.
    pub path: Bytes,
}

/// The `SSH_FXP_FSTAT` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 8_u8)]
pub struct Fstat {
    /// Identifier of the request.
    pub id: u32,

    /// Handle of the file.
    pub handle: Bytes,
}

/// The `SSH_FXP_SETSTAT` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 9_u8)]
pub struct Setstat {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the file.
    pub path: Bytes,

    /// Attributes to modify.
    pub attrs: Attrs,
}

/// The `SSH_FXP_FSETSTAT` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 10_u8)]
pub struct Fsetstat {
    /// Identifier of the request.
    pub id: u32,

    /// Handle of the file.
    pub handle: Bytes,

    /// Attributes to modify.
    pub attrs: Attrs,
}

/// The `SSH_FXP_OPENDIR` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 11_u8)]
pub struct Opendir {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the directory.
    pub path: Bytes,
}

/// The `SSH_FXP_READDIR` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 12_u8)]
pub struct Readdir {
    /// Identifier of the request.
    pub id: u32,

    /// Handle of the directory.
    pub handle: Bytes,
}

/// The `SSH_FXP_REMOVE` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 13_u8)]
pub struct Remove {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the file.
    pub filename: Bytes,
}

/// The `SSH_FXP_MKDIR` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 14_u8)]
pub struct Mkdir {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the directory.
    pub path: Bytes,

    /// Attributes of the created directory.
    pub attrs: Attrs,
}

/// The `SSH_FXP_RMDIR` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 15_u8)]
pub struct Rmdir {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the directory.
    pub path: Bytes,
}

/// The `SSH_FXP_REALPATH` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 16_u8)]
pub struct Realpath {
    /// Identifier of the request.
    pub id: u32,

    /// Path to canonicalize.
    pub path: Bytes,
}

/// The `SSH_FXP_STAT` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 17_u8)]
pub struct Stat {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the file, symbolic links are followed.
    pub path: Bytes,
}

/// The `SSH_FXP_RENAME` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 18_u8)]
pub struct Rename {
    /// Identifier of the request.
    pub id: u32,

    /// Current path of the file.
    pub oldpath: Bytes,

    /// New path of the file.
    pub newpath: Bytes,
}

/// The `SSH_FXP_READLINK` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 19_u8)]
pub struct Readlink {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the symbolic link.
    pub path: Bytes,
}

/// The `SSH_FXP_SYMLINK` request.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 20_u8)]
pub struct Symlink {
    /// Identifier of the request.
    pub id: u32,

    /// Path of the link to create.
    pub linkpath: Bytes,

    /// Path the link points to.
    pub targetpath: Bytes,
}

/// The `SSH_FXP_STATUS` response.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 101_u8)]
pub struct Status {
    /// Identifier of the request.
    pub id: u32,

    /// Outcome of the request.
    #[br(map = |code: u32| StatusCode::from(code))]
    #[bw(map = |code: &StatusCode| u32::from(*code))]
    pub code: StatusCode,

    /// Textual description of the outcome.
    pub message: Bytes,

    /// Language tag of the description.
    pub language: Bytes,
}

/// The `SSH_FXP_HANDLE` response.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 102_u8)]
pub struct Handle {
    /// Identifier of the request.
    pub id: u32,

    /// Opaque handle to the opened file or directory.
    pub handle: Bytes,
}

/// The `SSH_FXP_DATA` response.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 103_u8)]
pub struct Data {
    /// Identifier of the request.
    pub id: u32,

    /// Data read from the file.
    pub data: Bytes,
}

/// An entry of the `SSH_FXP_NAME` response.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct Entry {
    /// Name of the file, relative to the listed directory.
    pub filename: Bytes,

    /// Human readable description of the file, such as an `ls -l` line.
    pub longname: Bytes,

    /// Attributes of the file.
    pub attrs: Attrs,
}

/// The `SSH_FXP_NAME` response.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 104_u8)]
pub struct Name {
    /// Identifier of the request.
    pub id: u32,

    #[br(temp)]
    #[bw(calc = entries.len() as u32)]
    count: u32,

    /// The listed names.
    #[br(count = count)]
    pub entries: Vec<Entry>,
}

impl Name {
    /// A `Name` response carrying `entries`.
    pub fn new(id: u32, entries: Vec<Entry>) -> Self {
        Self { id, entries }
    }
}

/// The `SSH_FXP_ATTRS` response.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 105_u8)]
pub struct AttrsResponse {
    /// Identifier of the request.
    pub id: u32,

    /// Attributes of the file.
    pub attrs: Attrs,
}

/// A response from the server, correlated to its request by identifier.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big)]
pub enum Response {
    /// See [`Status`].
    Status(Status),

    /// See [`Handle`].
    Handle(Handle),

    /// See [`Data`].
    Data(Data),

    /// See [`Name`].
    Name(Name),

    /// See [`AttrsResponse`].
    Attrs(AttrsResponse),
}

impl Response {
    /// The identifier of the request this response answers.
    pub fn id(&self) -> u32 {
        match self {
            Self::Status(response) => response.id,
            Self::Handle(response) => response.id,
            Self::Data(response) => response.id,
            Self::Name(response) => response.id,
            Self::Attrs(response) => response.id,
        }
    }

    /// Whether the packet type is one of the known responses.
    pub fn is_known(packet: &[u8]) -> bool {
        matches!(packet.first(), Some(101..=105))
    }
}

macro_rules! response {
    ($( $name:ident ),+ $(,)?) => {
        $(
            impl From<$name> for Response {
                fn from(value: $name) -> Self {
                    Self::$name(value)
                }
            }
        )+
    };
}

response!(Status, Handle, Data, Name);

impl From<AttrsResponse> for Response {
    fn from(value: AttrsResponse) -> Self {
        Self::Attrs(value)
    }
}

/// Serialize a packet, prefixed by its length.
pub fn encode<T>(packet: &T) -> Result<Vec<u8>>
where
    for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
{
    let mut cursor = Cursor::new(vec![0; 4]);
    cursor.set_position(4);
    packet.write(&mut cursor)?;

    let mut buffer = cursor.into_inner();
    let length = (buffer.len() - 4) as u32;
    buffer[..4].copy_from_slice(&length.to_be_bytes());

    Ok(buffer)
}

/// Deserialize a packet, stripped of its length prefix.
pub fn decode<T>(packet: &[u8]) -> Result<T>
where
    for<'r> T: BinRead<Args<'r> = ()> + ReadEndian,
{
    Ok(T::read(&mut Cursor::new(packet))?)
}

/// The maximum length of a packet accepted from the server, without its length prefix.
pub const MAX_PACKET_LENGTH: usize = 256 * 1024;

/// Accumulates the channel data and splits it into packets.
///
/// Fails on packets longer than [`MAX_PACKET_LENGTH`].
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
}

impl Reassembler {
    /// Append received data.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete packet, without its length prefix.
    pub fn next_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(length) = self.buffer.get(..4) else {
            return Ok(None);
        };
        let length = u32::from_be_bytes([length[0], length[1], length[2], length[3]]) as usize;

        if length > MAX_PACKET_LENGTH {
            return Err(Error::ProtocolViolation("packet exceeds the maximum length"));
        }
        if self.buffer.len() < 4 + length {
            return Ok(None);
        }

        let packet = self.buffer[4..4 + length].to_vec();
        self.buffer.drain(..4 + length);

        Ok(Some(packet))
    }
}

//! Transport layer messages handled by the [`Session`](crate::Session), as described in RFC 4253 §11.

use binrw::binrw;

use crate::arch::{Bool, Bytes};

/// The `SSH_MSG_DISCONNECT` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 1_u8)]
pub struct Disconnect {
    /// Reason code of the disconnection.
    pub reason: u32,

    /// Textual description of the disconnection.
    pub description: Bytes,

    /// Language tag of the description.
    pub language: Bytes,
}

impl Disconnect {
    /// The `SSH_DISCONNECT_BY_APPLICATION` reason code.
    pub const BY_APPLICATION: u32 = 11;
}

/// The `SSH_MSG_IGNORE` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 2_u8)]
pub struct Ignore {
    /// Arbitrary data to be discarded.
    pub data: Bytes,
}

/// The `SSH_MSG_UNIMPLEMENTED` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 3_u8)]
pub struct Unimplemented {
    /// Sequence number of the rejected packet.
    pub seq: u32,
}

/// The `SSH_MSG_DEBUG` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 4_u8)]
pub struct DebugMessage {
    /// Whether the message should be displayed to the user.
    pub always_display: Bool,

    /// The debug message.
    pub message: Bytes,

    /// Language tag of the message.
    pub language: Bytes,
}

//! Connection layer messages, as described in RFC 4254 §4 and §5.

use binrw::{binrw, helpers::until_eof};

use crate::arch::{Bool, Bytes};

/// The `SSH_MSG_GLOBAL_REQUEST` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 80_u8)]
pub struct GlobalRequest {
    /// Name of the request.
    pub request_name: Bytes,

    /// Whether the sender expects a reply.
    pub want_reply: Bool,

    /// Request-specific data.
    #[br(parse_with = until_eof)]
    pub data: Vec<u8>,
}

/// The `SSH_MSG_REQUEST_SUCCESS` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 81_u8)]
pub struct RequestSuccess {
    /// Response-specific data.
    #[br(parse_with = until_eof)]
    pub data: Vec<u8>,
}

/// The `SSH_MSG_REQUEST_FAILURE` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 82_u8)]
pub struct RequestFailure;

/// The `SSH_MSG_CHANNEL_OPEN` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 90_u8)]
pub struct ChannelOpen {
    /// Type of the channel.
    pub channel_type: Bytes,

    /// Channel number allocated by the sender.
    pub sender_channel: u32,

    /// Initial window size of the sender.
    pub initial_window_size: u32,

    /// Maximum packet size accepted by the sender.
    pub maximum_packet_size: u32,

    /// Type-specific data.
    #[br(parse_with = until_eof)]
    pub data: Vec<u8>,
}

/// The `SSH_MSG_CHANNEL_OPEN_CONFIRMATION` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 91_u8)]
pub struct ChannelOpenConfirmation {
    /// Channel number of the receiver.
    pub recipient_channel: u32,

    /// Channel number allocated by the sender.
    pub sender_channel: u32,

    /// Initial window size of the sender.
    pub initial_window_size: u32,

    /// Maximum packet size accepted by the sender.
    pub maximum_packet_size: u32,

    /// Type-specific data.
    #[br(parse_with = until_eof)]
    pub data: Vec<u8>,
}

/// The reason of a channel open failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureReason {
    /// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`.
    AdministrativelyProhibited,

    /// `SSH_OPEN_CONNECT_FAILED`.
    ConnectFailed,

    /// `SSH_OPEN_UNKNOWN_CHANNEL_TYPE`.
    UnknownChannelType,

    /// `SSH_OPEN_RESOURCE_SHORTAGE`.
    ResourceShortage,

    /// Any other reason code.
    Other(u32),
}

impl From<u32> for OpenFailureReason {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::AdministrativelyProhibited,
            2 => Self::ConnectFailed,
            3 => Self::UnknownChannelType,
            4 => Self::ResourceShortage,
            other => Self::Other(other),
        }
    }
}

impl From<OpenFailureReason> for u32 {
    fn from(value: OpenFailureReason) -> Self {
        match value {
            OpenFailureReason::AdministrativelyProhibited => 1,
            OpenFailureReason::ConnectFailed => 2,
            OpenFailureReason::UnknownChannelType => 3,
            OpenFailureReason::ResourceShortage => 4,
            OpenFailureReason::Other(other) => other,
        }
    }
}

/// The `SSH_MSG_CHANNEL_OPEN_FAILURE` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 92_u8)]
pub struct ChannelOpenFailure {
    /// Channel number of the receiver.
    pub recipient_channel: u32,

    /// Reason of the failure.
    #[br(map = |reason: u32| OpenFailureReason::from(reason))]
    #[bw(map = |reason: &OpenFailureReason| u32::from(*reason))]
    pub reason: OpenFailureReason,

    /// Textual description of the failure.
    pub description: Bytes,

    /// Language tag of the description.
    pub language: Bytes,
}

/// The `SSH_MSG_CHANNEL_WINDOW_ADJUST` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 93_u8)]
pub struct ChannelWindowAdjust {
    /// Channel number of the receiver.
    pub recipient_channel: u32,

    /// Amount of bytes to add to the window.
    pub bytes_to_add: u32,
}

/// The `SSH_MSG_CHANNEL_DATA` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 94_u8)]
pub struct ChannelData {
    /// Channel number of the receiver.
    pub recipient_channel: u32,

    /// Carried data.
    pub data: Bytes,
}

/// The `SSH_MSG_CHANNEL_EXTENDED_DATA` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 95_u8)]
pub struct ChannelExtendedData {
    /// Channel number of the receiver.
    pub recipient_channel: u32,

    /// Type of the data, `1` being `stderr`.
    pub data_type: u32,

    /// Carried data.
    pub data: Bytes,
}

impl ChannelExtendedData {
    /// The `SSH_EXTENDED_DATA_STDERR` data type.
    pub const STDERR: u32 = 1;
}

/// The `SSH_MSG_CHANNEL_EOF` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 96_u8)]
pub struct ChannelEof {
    /// Channel number of the receiver.
    pub recipient_channel: u32,
}

/// The `SSH_MSG_CHANNEL_CLOSE` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 97_u8)]
pub struct ChannelClose {
    /// Channel number of the receiver.
    pub recipient_channel: u32,
}

/// The `SSH_MSG_CHANNEL_REQUEST` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 98_u8)]
pub struct ChannelRequest {
    /// Channel number of the receiver.
    pub recipient_channel: u32,

    /// Type of the request.
    pub request_type: Bytes,

    /// Whether the sender expects a reply.
    pub want_reply: Bool,

    /// Request-specific data.
    #[br(parse_with = until_eof)]
    pub data: Vec<u8>,
}

/// The `SSH_MSG_CHANNEL_SUCCESS` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 99_u8)]
pub struct ChannelSuccess {
    /// Channel number of the receiver.
    pub recipient_channel: u32,
}

/// The `SSH_MSG_CHANNEL_FAILURE` message.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 100_u8)]
pub struct ChannelFailure {
    /// Channel number of the receiver.
    pub recipient_channel: u32,
}

/// The type-specific data of `direct-tcpip` and `forwarded-tcpip` channel opens.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct TcpipContext {
    /// For `direct-tcpip` the host to connect to, for `forwarded-tcpip` the address that was connected.
    pub host: Bytes,

    /// The port matching `host`.
    pub port: u32,

    /// Address of the originator of the connection.
    pub originator: Bytes,

    /// Port of the originator of the connection.
    pub originator_port: u32,
}

/// The data of the `tcpip-forward` and `cancel-tcpip-forward` global requests.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct TcpipForward {
    /// Address to bind on the remote side.
    pub bind_address: Bytes,

    /// Port to bind on the remote side, `0` lets the peer choose.
    pub bind_port: u32,
}

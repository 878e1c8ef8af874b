//! Messages exchanged with the peer once the transport is established.

use std::io::Cursor;

use binrw::{
    binrw,
    meta::{ReadEndian, WriteEndian},
    BinRead, BinWrite,
};

use crate::Result;

pub mod connect;
pub mod trans;

/// The purpose of this macro is to automatically document variants,
/// link to the underlying item documentation and implement conversions.
macro_rules! message {
    ($( $name:ident($path:path) ),+ $(,)?) => {
        /// A message handled by the connection layer.
        ///
        #[binrw]
        #[derive(Debug, Clone)]
        #[brw(big)]
        pub enum Message {
            $(
                #[doc = concat!("See [`", stringify!($path), "`] for more details.")]
                $name($path)
            ),+
        }

        $(
            impl From<$path> for Message {
                fn from(value: $path) -> Self {
                    Self::$name(value)
                }
            }
        )+
    };
}

message! {
    Disconnect(trans::Disconnect),
    Ignore(trans::Ignore),
    Unimplemented(trans::Unimplemented),
    Debug(trans::DebugMessage),
    GlobalRequest(connect::GlobalRequest),
    RequestSuccess(connect::RequestSuccess),
    RequestFailure(connect::RequestFailure),
    ChannelOpen(connect::ChannelOpen),
    ChannelOpenConfirmation(connect::ChannelOpenConfirmation),
    ChannelOpenFailure(connect::ChannelOpenFailure),
    ChannelWindowAdjust(connect::ChannelWindowAdjust),
    ChannelData(connect::ChannelData),
    ChannelExtendedData(connect::ChannelExtendedData),
    ChannelEof(connect::ChannelEof),
    ChannelClose(connect::ChannelClose),
    ChannelRequest(connect::ChannelRequest),
    ChannelSuccess(connect::ChannelSuccess),
    ChannelFailure(connect::ChannelFailure),
}

/// Serialize a big-endian structure to bytes.
pub(crate) fn encode<T>(value: &T) -> Result<Vec<u8>>
where
    for<'w> T: BinWrite<Args<'w> = ()> + WriteEndian,
{
    let mut cursor = Cursor::new(Vec::new());
    value.write(&mut cursor)?;

    Ok(cursor.into_inner())
}

/// Deserialize a big-endian structure from bytes.
pub(crate) fn decode<T>(data: &[u8]) -> Result<T>
where
    for<'r> T: BinRead<Args<'r> = ()> + ReadEndian,
{
    Ok(T::read(&mut Cursor::new(data))?)
}

impl Message {
    /// Serialize the message to a packet payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Deserialize a message from a packet payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode(payload)
    }

    /// Whether the message type is one of the known [`Message`] variants.
    pub fn is_known(payload: &[u8]) -> bool {
        matches!(payload.first(), Some(1..=4 | 80..=82 | 90..=100))
    }

    /// The local channel number targeted by this message, if any.
    pub fn recipient_channel(&self) -> Option<u32> {
        match self {
            Self::ChannelOpenConfirmation(connect::ChannelOpenConfirmation {
                recipient_channel,
                ..
            })
            | Self::ChannelOpenFailure(connect::ChannelOpenFailure {
                recipient_channel,
                ..
            })
            | Self::ChannelWindowAdjust(connect::ChannelWindowAdjust {
                recipient_channel,
                ..
            })
            | Self::ChannelData(connect::ChannelData {
                recipient_channel, ..
            })
            | Self::ChannelExtendedData(connect::ChannelExtendedData {
                recipient_channel,
                ..
            })
            | Self::ChannelEof(connect::ChannelEof { recipient_channel })
            | Self::ChannelClose(connect::ChannelClose { recipient_channel })
            | Self::ChannelRequest(connect::ChannelRequest {
                recipient_channel,
                ..
            })
            | Self::ChannelSuccess(connect::ChannelSuccess { recipient_channel })
            | Self::ChannelFailure(connect::ChannelFailure { recipient_channel }) => {
                Some(*recipient_channel)
            }
            _ => None,
        }
    }
}

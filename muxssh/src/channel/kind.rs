use crate::{
    msg::{self, connect::TcpipContext},
    Result,
};

/// The type of a channel, with its type-specific open data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// A `session` channel, for remote execution of commands, shells and subsystems.
    Session,

    /// A `direct-tcpip` channel, forwarding a local connection to the remote side.
    DirectTcpip(TcpipContext),

    /// A `forwarded-tcpip` channel, forwarding a connection received on a remotely bound port.
    ForwardedTcpip(TcpipContext),

    /// Any other channel type, with its raw data.
    Other {
        /// Name of the channel type.
        channel_type: String,

        /// Type-specific data.
        data: Vec<u8>,
    },
}

impl Kind {
    /// Describe a `direct-tcpip` channel to `host:port` for a connection from `originator:originator_port`.
    pub fn direct_tcpip(
        host: impl Into<String>,
        port: u16,
        originator: impl Into<String>,
        originator_port: u16,
    ) -> Self {
        let (host, originator): (String, String) = (host.into(), originator.into());

        Self::DirectTcpip(TcpipContext {
            host: host.into(),
            port: port.into(),
            originator: originator.into(),
            originator_port: originator_port.into(),
        })
    }

    /// The name of the channel type on the wire.
    pub fn channel_type(&self) -> &str {
        match self {
            Self::Session => "session",
            Self::DirectTcpip(_) => "direct-tcpip",
            Self::ForwardedTcpip(_) => "forwarded-tcpip",
            Self::Other { channel_type, .. } => channel_type,
        }
    }

    pub(crate) fn data(&self) -> Result<Vec<u8>> {
        match self {
            Self::Session => Ok(Vec::new()),
            Self::DirectTcpip(context) | Self::ForwardedTcpip(context) => msg::encode(context),
            Self::Other { data, .. } => Ok(data.clone()),
        }
    }

    pub(crate) fn parse(channel_type: &[u8], data: &[u8]) -> Result<Self> {
        Ok(match channel_type {
            b"session" => Self::Session,
            b"direct-tcpip" => Self::DirectTcpip(msg::decode(data)?),
            b"forwarded-tcpip" => Self::ForwardedTcpip(msg::decode(data)?),
            other => Self::Other {
                channel_type: String::from_utf8_lossy(other).into_owned(),
                data: data.to_vec(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcpip_kinds_carry_their_context() {
        let kind = Kind::direct_tcpip("localhost", 8022, "10.0.0.1", 51000);
        let data = kind.data().unwrap();

        assert_eq!(
            Kind::parse(kind.channel_type().as_bytes(), &data).unwrap(),
            kind
        );
    }

    #[test]
    fn unknown_kinds_are_preserved() {
        let kind = Kind::parse(b"x11", &[1, 2, 3]).unwrap();

        assert_eq!(kind.channel_type(), "x11");
        assert_eq!(kind.data().unwrap(), [1, 2, 3]);
    }
}

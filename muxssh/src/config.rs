use futures_time::time::Duration;

#[cfg(doc)]
use crate::{channel::Channel, Session};

/// Configuration parameters for the [`Session`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout for establishing the connection.
    pub timeout: Duration,

    /// Default timeout for blocking operations, such as opening a [`Channel`].
    pub operation_timeout: Duration,

    /// Maximum delay to wait for the peer to acknowledge a [`Channel`] closure.
    pub channel_close_timeout: Duration,

    /// Initial size of the window advertised to the peer for each [`Channel`].
    pub window_size: u32,

    /// Maximum size of a data packet advertised to the peer for each [`Channel`].
    pub packet_size: u32,
}

impl Config {
    /// The default maximum packet size, 32KiB.
    pub const PACKET_SIZE: u32 = 32768;

    /// The default initial window size, 64 packets.
    pub const WINDOW_SIZE: u32 = 64 * Self::PACKET_SIZE;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(30),
            channel_close_timeout: Duration::from_secs(1),
            window_size: Self::WINDOW_SIZE,
            packet_size: Self::PACKET_SIZE,
        }
    }
}

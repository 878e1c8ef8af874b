use futures_time::time::Duration;

use crate::protocol;

#[cfg(doc)]
use crate::SftpSession;

/// Configuration parameters for the [`SftpSession`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout for the server to answer a request.
    pub operation_timeout: Duration,

    /// The protocol version requested from the server.
    pub version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
            version: protocol::VERSION,
        }
    }
}

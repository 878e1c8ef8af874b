//! Port forwarding over `direct-tcpip` and `forwarded-tcpip` channels.

mod port;
pub use port::Port;

mod socket;
pub use socket::Socket;

mod direct;
pub use direct::DirectTcpip;

mod local;
pub use local::Local;

mod remote;
pub use remote::Remote;

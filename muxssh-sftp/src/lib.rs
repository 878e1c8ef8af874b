#![doc = concat!(
    "[![crates.io](https://img.shields.io/crates/v/", env!("CARGO_PKG_NAME"), ")](https://crates.io/crates/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "[![docs.rs](https://img.shields.io/docsrs/", env!("CARGO_PKG_NAME"), ")](https://docs.rs/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "![license](https://img.shields.io/crates/l/", env!("CARGO_PKG_NAME"), ")"
)]
#![doc = ""]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! ### Architecture
//!
//! The [`SftpSession`] runs on a single `session` channel of a [`muxssh::Session`],
//! its packets are reassembled on the session thread and each response is routed
//! to the request that carries the same identifier, in any order.
//!
//! The [`SftpFileStream`] buffers reads and writes on top of any [`Requests`] surface.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,
    clippy::undocumented_unsafe_blocks
)]
#![forbid(unsafe_code)]

mod error;
pub use error::{Error, Result};

mod config;
pub use config::Config;

pub mod protocol;

mod session;
pub use session::SftpSession;

mod requests;
pub use requests::Requests;

mod async_result;
pub use async_result::AsyncResult;

pub mod stream;
pub use stream::SftpFileStream;

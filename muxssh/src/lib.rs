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
//! A [`Session`] owns the transport, which is driven from a single dedicated
//! thread decoding every incoming message and dispatching it to the
//! [`channel::Channel`] it targets. Every blocking operation of the crate
//! suspends on a signal raised by that thread, bounded by a timeout.
//!
//! The key-exchange, encryption and authentication are collaborators plugged
//! through the [`transport`] traits.

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

mod sync;

mod error;
pub use error::{Error, Result};

mod config;
pub use config::Config;

pub mod arch;
pub mod msg;
pub mod transport;

pub mod session;
pub use session::Session;

pub mod channel;
pub mod forward;

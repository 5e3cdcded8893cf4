#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod protocol;
#[cfg(feature = "ws")]
pub mod transport;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Client name reported to the server in the connection URL
pub const CLIENT_NAME: &str = "rust";

/// Crate version reported to the server in the connection URL
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

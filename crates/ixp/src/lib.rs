#![forbid(unsafe_code)]
//! Asynchronous 9P2000 client library for Rust.
//!
//! This crate provides a tokio-based client for the 9P2000 protocol as spoken by
//! wmii and other servers that expose their state as a synthetic file tree.
//!
//! # Overview
//!
//! The 9P protocol was originally developed for the Plan 9 distributed operating system.
//! A window manager such as wmii publishes views, tags, bars and rules as files; a
//! configuration script drives it by reading and writing those files over a single
//! connection.
//!
//! The library is layered:
//!
//! - [`fcall`] / [`serialize`]: the message catalog and its binary encoding
//! - [`conn::Connection`]: one stream shared by any number of concurrent requests,
//!   matched to their replies by tag
//! - [`client::Client`]: version negotiation, attach, walk, open, create, remove
//! - [`file::File`] / [`file::Dir`]: cursors over open fids
//!
//! # Example
//!
//! ```no_run
//! use ixp::{Client, Config, Contents, Result, dm, om};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::connect(&Config::from_env()).await?;
//!
//!     client.create("/lbar/status", dm::WRITE, om::WRITE).await?;
//!     client.write("/lbar/status", "load 0.42").await?;
//!
//!     if let Contents::Entries(tags) = client.read("/tag").await? {
//!         for tag in tags {
//!             println!("{}", tag.name);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Requests on one [`Connection`] are independent: replies may arrive in any order and
//! each caller receives the reply carrying its own tag. A single background task reads
//! the stream. When the stream ends, every waiting and every later request fails with
//! [`Error::ConnectionClosed`]; there is no automatic reconnect.
//!
//! Fids belong to the handle that owns them. Handles take `&mut self`, so one fid is
//! never driven by two callers at once.
//!
//! # Error Handling
//!
//! An `Rerror` from the server becomes [`Error::Protocol`] with the server's message
//! verbatim. Malformed input from the server is reported as [`Error::Framing`] or
//! [`Error::UnknownMessageKind`]; the decoder never panics on it.
//!
//! # Transport
//!
//! - **Unix Domain Sockets**: `"unix!/path"` or a bare `"/path"`, as found in `WMII_ADDRESS`
//! - **TCP**: `"tcp!host!port"` (e.g., `"tcp!127.0.0.1!564"`)
//!
//! Any other `AsyncRead`/`AsyncWrite` pair can be used through [`Connection::new`].
pub mod client;
pub mod config;
pub mod conn;
pub mod error;
pub mod fcall;
pub mod file;
pub mod serialize;
#[macro_use]
pub mod utils;

pub use crate::client::{Client, Contents};
pub use crate::config::Config;
pub use crate::conn::Connection;
pub use crate::error::{Error, FramingError};
pub use crate::fcall::*;
pub use crate::file::{Dir, File, Node};
pub use crate::utils::Result;

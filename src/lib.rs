// (c) 2025 Ross Younger

//! Client library for the File Service Protocol version 2 (`FSP`).
//!
//! FSP is a stateless, UDP-based file transfer protocol historically used for
//! anonymous public file distribution. Every request/reply pair travels in a
//! single datagram; the protocol is strictly stop-and-wait, with loss handled
//! by checksummed framing and retransmission.
//!
//! ## Overview
//!
//! A [`Session`] owns one unconnected IPv4 UDP socket and a logical
//! association with a server. It offers directory listing, streaming file
//! download and upload, stat, mkdir, delete, rename, directory-protection
//! inspection and password changes.
//!
//! ```no_run
//! use fsp::Session;
//!
//! # async fn demo() -> fsp::Result<()> {
//! let mut session = Session::connect("fsp.example.com:21", None).await?;
//! println!("server: {}", session.version().await?);
//! for entry in session.list_dir("/pub").await? {
//!     println!("{entry}");
//! }
//! session.download_file("/pub/README", "README", 3).await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Reliability model
//!
//! Each operation runs one or more *transactions*: a request datagram is sent
//! and retransmitted with growing delays until a matching reply arrives or
//! the per-session timeout elapses. Replies are matched on sequence base,
//! command and (for positioned commands) file offset; anything else is
//! dropped as a stray or duplicate. The 16-bit session key the server
//! rotates on every reply is persisted across process invocations; see
//! [`protocol`] for the wire details.
//!
//! File handles ([`FileReader`], [`FileWriter`]) borrow the session
//! exclusively, so "at most one transaction in flight per session" is a
//! compile-time property. Run independent sessions for parallelism.
//!
//! Diagnostics are emitted through [`tracing`]; pick whatever subscriber
//! suits the application.
//!
//! ## What this crate is not
//!
//! * An FSP server.
//! * IPv6-capable (the protocol is IPv4-only).
//! * Windowed or pipelined: FSP transfers one block per round trip.

mod client;
mod config;
mod error;
pub mod protocol;
mod session;
pub(crate) mod util;

pub use config::SessionOptions;
pub use error::{Error, Result};
pub use protocol::dirlist::{DirEntry, EntryKind};
pub use protocol::packet::PacketError;
pub use protocol::{Command, Protection};
pub use session::file::{FileReader, FileWriter};
pub use session::{FileInfo, Session};

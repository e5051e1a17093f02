// (c) 2025 Ross Younger

//! Session facade: the user-visible FSP operations
//!
//! A [`Session`] owns the UDP socket, the persisted lock key, the sequence
//! counter and the transfer meter. Every operation below runs one or more
//! transactions through [`transaction`](Session::transaction); the engine
//! guarantees that at most one is in flight because every entry point takes
//! `&mut self`.

pub(crate) mod file;
mod transaction;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::config::SessionOptions;
use crate::error::{Error, Result};
use crate::protocol::dirlist::{DirEntry, Listing};
use crate::protocol::packet::{Packet, PacketError};
use crate::protocol::{Command, Protection, PAYLOAD_SPACE};
use crate::util::keystore::KeyStore;
use crate::util::stats::TransferMeter;
use file::{FileReader, FileWriter};

/// The directory bit within [`FileInfo::mode`].
const MODE_DIR: u32 = 0o040_000;

/// What `stat` reports about a remote file or directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileInfo {
    path: String,
    size: i64,
    mode: u32,
    modified: SystemTime,
}

impl FileInfo {
    /// Base name of the file.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
    /// Length in bytes.
    #[must_use]
    pub fn size(&self) -> i64 {
        self.size
    }
    /// Mode bits: the directory bit plus POSIX-style default permissions
    /// (0o755 for directories, 0o644 for files; FSP does not transfer
    /// actual permissions).
    #[must_use]
    pub fn mode(&self) -> u32 {
        self.mode
    }
    /// Last modification time.
    #[must_use]
    pub fn modified(&self) -> SystemTime {
        self.modified
    }
    /// Whether this is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR != 0
    }
}

/// A logical session with one FSP server.
///
/// The protocol is connectionless; the session is purely client-side state
/// (socket, key, sequence counter). Obtain one with [`Session::connect`],
/// use the operations, and [`Session::close`] it to say goodbye to the
/// server and persist the lock key.
#[derive(Debug)]
pub struct Session {
    pub(crate) socket: UdpSocket,
    pub(crate) server: SocketAddr,
    pub(crate) password: Option<String>,
    pub(crate) keys: KeyStore,
    /// Current sequence base; the low 3 bits are reserved for the retry
    /// counter and always clear here.
    pub(crate) seq: u16,
    pub(crate) options: SessionOptions,
    pub(crate) meter: TransferMeter,
    pub(crate) dupes: u64,
    pub(crate) retransmits: u64,
}

impl Session {
    /// Connects to `server` (a `host:port` string) with default options.
    ///
    /// "Connects" loosely: no packets are exchanged until the first
    /// operation. The name is resolved to an IPv4 address (FSP is
    /// IPv4-only) and a fresh local socket is bound.
    pub async fn connect(server: &str, password: Option<&str>) -> Result<Self> {
        Self::connect_with(server, password, SessionOptions::default()).await
    }

    /// As [`Session::connect`], with explicit options.
    pub async fn connect_with(
        server: &str,
        password: Option<&str>,
        options: SessionOptions,
    ) -> Result<Self> {
        if server.is_empty() {
            return Err(Error::Argument("server address required".into()));
        }
        let mut candidates = tokio::net::lookup_host(server)
            .await
            .map_err(|e| Error::Argument(format!("cannot resolve {server}: {e}")))?;
        let addr = candidates
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| Error::Argument(format!("no IPv4 address for {server}")))?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(Error::Socket)?;
        Self::with_socket(socket, addr, password, options)
    }

    /// Builds a session over an already-bound socket.
    pub fn with_socket(
        socket: UdpSocket,
        server: SocketAddr,
        password: Option<&str>,
        options: SessionOptions,
    ) -> Result<Self> {
        let keys = KeyStore::for_server(server);
        Self::assemble(socket, server, password, options, keys)
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        keystore_dir: &std::path::Path,
        socket: UdpSocket,
        server: SocketAddr,
        password: Option<&str>,
        options: SessionOptions,
    ) -> Result<Self> {
        let keys = KeyStore::in_dir(keystore_dir, server);
        Self::assemble(socket, server, password, options, keys)
    }

    fn assemble(
        socket: UdpSocket,
        server: SocketAddr,
        password: Option<&str>,
        options: SessionOptions,
        keys: KeyStore,
    ) -> Result<Self> {
        if !server.is_ipv4() {
            return Err(Error::Argument(format!("{server} is not IPv4; FSP is IPv4-only")));
        }
        if server.port() == 0 {
            return Err(Error::Argument("invalid server port".into()));
        }
        debug!("fsp session to {server}, initial key {}", keys.get());
        Ok(Self {
            socket,
            server,
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
            keys,
            seq: rand::random::<u16>() & 0xFFF8,
            options,
            meter: TransferMeter::new(),
            dupes: 0,
            retransmits: 0,
        })
    }

    /// The options this session runs with.
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Duplicate or stray datagrams dropped so far.
    #[must_use]
    pub fn duplicates(&self) -> u64 {
        self.dupes
    }

    /// Request datagrams retransmitted so far.
    #[must_use]
    pub fn retransmits(&self) -> u64 {
        self.retransmits
    }

    /// Asks the server for its version string.
    pub async fn version(&mut self) -> Result<String> {
        let mut pkt = Packet::new(Command::Version);
        let reply = self.transaction(&mut pkt).await?;
        Ok(String::from_utf8_lossy(reply.data()).into_owned())
    }

    /// Gets information about a remote file or directory.
    ///
    /// Fails with [`Error::NoSuchFile`] if the path does not exist.
    pub async fn stat(&mut self, path: &str) -> Result<FileInfo> {
        let mut pkt = Packet::new(Command::Stat);
        pkt.build_file_name(path, self.password.as_deref())?;
        let reply = self.transaction(&mut pkt).await?;
        let data = reply.data();
        if data.len() <= 8 || data[8] == 0 {
            return Err(Error::NoSuchFile(path.to_string()));
        }
        let mtime = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let size = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let dir = data[8] == 0x02;
        Ok(FileInfo {
            path: path.to_string(),
            size: i64::from(size),
            mode: if dir { MODE_DIR | 0o755 } else { 0o644 },
            modified: UNIX_EPOCH + Duration::from_secs(u64::from(mtime)),
        })
    }

    /// Reads a directory's protection byte.
    pub async fn get_protection(&mut self, directory: &str) -> Result<Protection> {
        let mut pkt = Packet::new(Command::GetPro);
        pkt.build_file_name(directory, self.password.as_deref())?;
        let reply = self.transaction(&mut pkt).await?;
        if reply.pos != 1 {
            return Err(Error::Protocol {
                cmd: Command::GetPro,
                detail: format!("expected 1 protection byte, pos={}", reply.pos),
            });
        }
        let byte = reply.extra().first().copied().ok_or_else(|| Error::Protocol {
            cmd: Command::GetPro,
            detail: "protection byte missing".into(),
        })?;
        Ok(Protection::new(byte))
    }

    /// Creates a directory.
    pub async fn mkdir(&mut self, directory: &str) -> Result<()> {
        self.simple_command(directory, Command::MakeDir).await
    }

    /// Deletes a directory.
    pub async fn rmdir(&mut self, directory: &str) -> Result<()> {
        self.simple_command(directory, Command::DelDir).await
    }

    /// Deletes a file.
    pub async fn unlink(&mut self, path: &str) -> Result<()> {
        self.simple_command(path, Command::DelFile).await
    }

    /// Renames a file or directory.
    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let mut pkt = Packet::new(Command::Rename);
        pkt.build_file_name(from, self.password.as_deref())?;
        let pw_len = self.password.as_ref().map_or(0, |p| p.len() + 1);
        if usize::from(pkt.len()) + to.len() + pw_len + 1 > PAYLOAD_SPACE {
            return Err(PacketError::FileNameTooLong.into());
        }
        // The new name goes in region B, with the password again if there
        // is one, built strictly by appending.
        pkt.append_extra(to.as_bytes());
        if let Some(pw) = self.password.as_deref() {
            pkt.append_extra(b"\n");
            pkt.append_extra(pw.as_bytes());
        }
        pkt.append_extra(&[0]);
        pkt.pos = u32::from(pkt.xlen());
        let _ = self.transaction(&mut pkt).await?;
        Ok(())
    }

    /// Changes the server password. Region A is `\n old \n new \0`.
    pub async fn change_password(&mut self, new_password: &str) -> Result<()> {
        let mut region = vec![b'\n'];
        if let Some(pw) = self.password.as_deref() {
            region.extend_from_slice(pw.as_bytes());
        }
        region.push(b'\n');
        region.extend_from_slice(new_password.as_bytes());
        region.push(0);
        if region.len() > PAYLOAD_SPACE {
            return Err(PacketError::FileNameTooLong.into());
        }
        let mut pkt = Packet::new(Command::ChangePass);
        pkt.set_data(&region);
        let _ = self.transaction(&mut pkt).await?;
        self.password = Some(new_password.to_string()).filter(|p| !p.is_empty());
        Ok(())
    }

    /// Lists a directory, in server order. `.` and `..` are included.
    pub async fn list_dir(&mut self, directory: &str) -> Result<Vec<DirEntry>> {
        let listing = self.fetch_dir(directory).await?;
        Ok(listing.entries().collect())
    }

    /// Runs the directory fetch loop: `GET_DIR` blocks are requested at
    /// increasing positions until the server sends a short or empty one.
    async fn fetch_dir(&mut self, directory: &str) -> Result<Listing> {
        let dir = if directory.is_empty() { "/" } else { directory };
        let mut pkt = Packet::new(Command::GetDir);
        pkt.build_file_name(dir, self.password.as_deref())?;
        pkt.reserve_extra(2); // block-size hint, filled by the engine
        let mut data = Vec::new();
        let mut block_size: u16 = 0;
        let mut pos: u32 = 0;
        loop {
            pkt.pos = pos;
            let reply = self.transaction(&mut pkt).await?;
            if reply.len() == 0 {
                break;
            }
            if block_size == 0 {
                block_size = reply.len();
            }
            data.extend_from_slice(reply.data());
            pos += u32::from(reply.len());
            if reply.len() < block_size {
                break;
            }
        }
        if data.is_empty() {
            return Err(Error::Protocol {
                cmd: Command::GetDir,
                detail: format!("no listing data for {dir}"),
            });
        }
        Ok(Listing {
            path: dir.to_string(),
            data,
            block_size,
        })
    }

    /// Opens a remote file for streaming reads.
    pub fn open_read(&mut self, path: &str) -> Result<FileReader<'_>> {
        FileReader::new(self, path)
    }

    /// Opens a remote file for buffered writes. Call
    /// [`FileWriter::close`] to publish the upload.
    pub fn open_write(&mut self, path: &str) -> Result<FileWriter<'_>> {
        FileWriter::new(self, path)
    }

    /// Checks whether the caller may upload `path`: allowed for the
    /// directory's owner, or where files can be added and either deleted or
    /// not already present.
    pub async fn can_upload(&mut self, path: &str) -> Result<()> {
        let dir = parent_dir(path);
        let pro = self.get_protection(dir).await?;
        if pro.owner() {
            return Ok(());
        }
        if !pro.can_add() {
            return Err(Error::UploadDenied(format!(
                "files cannot be added to {dir}"
            )));
        }
        if pro.can_delete() {
            return Ok(());
        }
        match self.stat(path).await {
            Ok(_) => Err(Error::UploadDenied(format!("{path} already exists"))),
            Err(Error::NoSuchFile(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Says goodbye to the server (best effort) and persists the lock key.
    pub async fn close(mut self) {
        let mut bye = Packet::new(Command::Bye);
        if let Err(e) = self.transaction(&mut bye).await {
            debug!("bye failed (suppressed): {e}");
        }
        self.keys.save();
    }

    async fn simple_command(&mut self, path: &str, cmd: Command) -> Result<()> {
        let mut pkt = Packet::new(cmd);
        pkt.build_file_name(path, self.password.as_deref())?;
        let _ = self.transaction(&mut pkt).await?;
        Ok(())
    }
}

/// Parent directory of an FSP path: `/a/b` → `/a`, `/a` → `/`, `a` → `.`.
fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}

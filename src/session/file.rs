// (c) 2025 Ross Younger

//! Streaming file handles
//!
//! Both handle types borrow the session exclusively, so the borrow checker
//! enforces the protocol's one-transaction-at-a-time rule for as long as a
//! file is open.

use std::time::{SystemTime, UNIX_EPOCH};

use super::Session;
use crate::error::{Error, Result};
use crate::protocol::packet::Packet;
use crate::protocol::{Command, PAYLOAD_SPACE};

/// A remote file open for reading.
///
/// Each [`read`](FileReader::read) issues `GET_FILE` transactions at the
/// current offset until the caller's buffer is full or the server signals
/// end-of-file with an empty block.
#[derive(Debug)]
pub struct FileReader<'s> {
    session: &'s mut Session,
    template: Packet,
    offset: u32,
    eof: bool,
}

impl<'s> FileReader<'s> {
    pub(crate) fn new(session: &'s mut Session, path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::Argument("remote file name required".into()));
        }
        let mut template = Packet::new(Command::GetFile);
        template.build_file_name(path, session.password.as_deref())?;
        template.reserve_extra(2); // block-size hint, filled by the engine
        Ok(Self {
            session,
            template,
            offset: 0,
            eof: false,
        })
    }

    /// Reads up to `buf.len()` bytes, returning how many were produced.
    /// Returns 0 once the end of the file has been reached.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while !self.eof && done < buf.len() {
            self.template.pos = self.offset;
            let reply = self.session.transaction(&mut self.template).await?;
            let block = reply.data();
            if block.is_empty() {
                self.eof = true;
                break;
            }
            // Consume only what fits; an unconsumed tail is re-requested at
            // the adjusted offset next time.
            let n = block.len().min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&block[..n]);
            self.offset += n as u32;
            done += n;
        }
        Ok(done)
    }

    /// Whether the end of the file has been observed.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

/// A remote file open for writing.
///
/// Writes accumulate in a buffer of one full `UPLOAD` payload; each full
/// buffer goes to the server as one transaction. [`close`](FileWriter::close)
/// flushes the tail and issues `INSTALL`, which atomically publishes the
/// upload at its final path.
///
/// Transmission failures are latched: subsequent writes become no-ops and
/// the error is reported by `close`. A writer dropped without `close`
/// uploads nothing visible (the server never receives its `INSTALL`).
#[derive(Debug)]
pub struct FileWriter<'s> {
    session: &'s mut Session,
    path: String,
    template: Packet,
    buffer: Vec<u8>,
    offset: u32,
    latched: Option<Error>,
}

impl<'s> FileWriter<'s> {
    pub(crate) fn new(session: &'s mut Session, path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::Argument("remote file name required".into()));
        }
        Ok(Self {
            session,
            path: path.to_string(),
            template: Packet::new(Command::Upload),
            buffer: Vec::with_capacity(PAYLOAD_SPACE),
            offset: 0,
            latched: None,
        })
    }

    /// Appends `data` to the upload, transmitting every time the buffer
    /// fills. Errors are deferred to [`close`](FileWriter::close).
    pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if self.latched.is_some() {
            return Ok(());
        }
        while !data.is_empty() {
            let free = PAYLOAD_SPACE - self.buffer.len();
            let take = free.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == PAYLOAD_SPACE {
                if let Err(e) = self.send_buffer().await {
                    self.latched = Some(e);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Transmits any buffered tail without closing the file.
    pub async fn flush(&mut self) -> Result<()> {
        if self.latched.is_none() && !self.buffer.is_empty() {
            if let Err(e) = self.send_buffer().await {
                self.latched = Some(e);
            }
        }
        Ok(())
    }

    async fn send_buffer(&mut self) -> Result<()> {
        self.template.set_data(&self.buffer);
        self.template.pos = self.offset;
        let _ = self.session.transaction(&mut self.template).await?;
        self.offset += self.buffer.len() as u32;
        self.buffer.clear();
        Ok(())
    }

    /// Flushes, then asks the server to install the upload at its final
    /// path, stamped with the current time. Reports any error latched
    /// during earlier writes.
    pub async fn close(mut self) -> Result<()> {
        self.flush().await?;
        if let Some(e) = self.latched.take() {
            return Err(e);
        }
        let mut install = Packet::new(Command::Install);
        install.build_file_name(&self.path, self.session.password.as_deref())?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        install.append_extra(&stamp.to_be_bytes());
        install.pos = 4;
        let _ = self.session.transaction(&mut install).await?;
        Ok(())
    }
}

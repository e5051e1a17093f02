// (c) 2025 Ross Younger

//! Directory-listing decoder
//!
//! The server returns a directory as a sequence of fixed-size *blocks*
//! (the block size is whatever the first `GET_DIR` reply carried). Within a
//! block, records look like:
//!
//! ```text
//! RDIRENT = { mtime: u32 BE, size: u32 BE, type: u8, name: ASCIIZ, pad to 4 }
//! ```
//!
//! There are no explicit record boundaries. Two sentinel type values steer
//! the scan instead: `0x00` ends the directory, `0x2A` skips to the next
//! block (a record never straddles a block boundary, so the tail of a block
//! is padding). If fewer than nine bytes remain in the current block there
//! is no room for a record header and the tail is treated as a skip.

use std::fmt::Display;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TYPE_END: u8 = 0x00;
const TYPE_SKIP: u8 = 0x2A;

/// Bytes of an RDIRENT header preceding the name.
const RDIRENT_HEADER: usize = 9;

/// What a directory entry is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link.
    Link,
}

impl EntryKind {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(EntryKind::File),
            0x02 => Some(EntryKind::Dir),
            0x03 => Some(EntryKind::Link),
            _ => None,
        }
    }
}

/// One entry of a directory listing, in on-wire order.
///
/// `.` and `..` are reported like any other entry; filter them out if they
/// are not wanted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntry {
    /// Entry name (NUL-terminated on the wire; the NUL is stripped).
    pub name: String,
    /// File, directory or link.
    pub kind: EntryKind,
    /// Size in bytes.
    pub size: u32,
    /// Last modification, seconds since the Unix epoch.
    pub mtime: u32,
    /// On-wire record length including padding; always a multiple of 4.
    pub record_len: u16,
}

impl DirEntry {
    /// Last modification time.
    #[must_use]
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(u64::from(self.mtime))
    }
}

impl Display for DirEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            EntryKind::Dir => "dir ",
            EntryKind::File => "file",
            EntryKind::Link => "link",
        };
        let when = chrono::DateTime::from_timestamp(i64::from(self.mtime), 0)
            .unwrap_or_default()
            .format("%Y/%m/%d %H:%M:%S");
        write!(f, "{kind} {size:>10} {when} {name}", size = self.size, name = self.name)
    }
}

/// A fetched directory: the accumulated raw blocks plus the server's block
/// size, ready to be scanned.
#[derive(Debug)]
pub(crate) struct Listing {
    /// Directory path, for diagnostics only.
    pub(crate) path: String,
    pub(crate) data: Vec<u8>,
    pub(crate) block_size: u16,
}

impl Listing {
    pub(crate) fn entries(&self) -> Entries<'_> {
        Entries {
            data: &self.data,
            block_size: usize::from(self.block_size),
            cursor: 0,
        }
    }
}

/// Iterator over the records of a [`Listing`].
///
/// The cursor is kept on a 4-byte boundary throughout; scanning stops at the
/// end sentinel, at the end of data, or at the first malformed record.
#[derive(Debug)]
pub(crate) struct Entries<'a> {
    data: &'a [u8],
    block_size: usize,
    cursor: usize,
}

impl Iterator for Entries<'_> {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        if self.block_size == 0 {
            return None;
        }
        loop {
            debug_assert_eq!(self.cursor % 4, 0);
            if self.cursor >= self.data.len() {
                return None;
            }
            let left_in_block = self.block_size - self.cursor % self.block_size;
            let type_byte = if left_in_block < RDIRENT_HEADER
                || self.cursor + RDIRENT_HEADER > self.data.len()
            {
                TYPE_SKIP
            } else {
                self.data[self.cursor + 8]
            };
            match type_byte {
                TYPE_END => return None,
                TYPE_SKIP => {
                    self.cursor = (self.cursor / self.block_size + 1) * self.block_size;
                }
                b => {
                    let kind = EntryKind::from_wire(b)?;
                    let at = self.cursor;
                    let mtime = u32::from_be_bytes(self.data[at..at + 4].try_into().ok()?);
                    let size = u32::from_be_bytes(self.data[at + 4..at + 8].try_into().ok()?);
                    self.cursor += RDIRENT_HEADER;
                    let name_len = self.data[self.cursor..]
                        .iter()
                        .position(|&c| c == 0)?;
                    if name_len == 0 {
                        return None;
                    }
                    let name =
                        String::from_utf8_lossy(&self.data[self.cursor..self.cursor + name_len])
                            .into_owned();
                    self.cursor += name_len + 1;
                    let mut record_len = (name_len + RDIRENT_HEADER + 1) as u16;
                    if record_len % 4 != 0 {
                        let pad = 4 - record_len % 4;
                        record_len += pad;
                        self.cursor += usize::from(pad);
                    }
                    return Some(DirEntry {
                        name,
                        kind,
                        size,
                        mtime,
                        record_len,
                    });
                }
            }
        }
    }
}

// (c) 2025 Ross Younger

//! FSP v2 wire protocol definitions
//!
//! # On-wire framing
//!
//! Every FSP message is a single UDP datagram: a fixed 12-byte big-endian
//! header followed by two adjacent payload regions.
//!
//! ```text
//! cmd:u8 | sum:u8 | key:u16 | seq:u16 | len:u16 | pos:u32 | region A | region B
//! ```
//!
//! * `len` is the length of region A (the primary data: filename, file
//!   contents, directory block).
//! * Region B carries command-specific auxiliary data (a preferred block
//!   size, a rename target, an install timestamp). Its length is never sent;
//!   a receiver derives it from the datagram length.
//! * `sum` is a one-byte checksum over the whole datagram (with the `sum`
//!   byte taken as zero) plus the datagram length, folded once with the
//!   high-byte carry. See [`packet`].
//!
//! The low three bits of `seq` carry a retransmission counter; the remaining
//! thirteen bits are the sequence base that ties a reply to its request.

use int_enum::IntEnum;

pub mod dirlist;
pub mod packet;

/// Size of the fixed packet header.
pub const HEADER_SIZE: usize = 12;
/// Maximum combined payload (region A + region B) of one datagram.
pub const PAYLOAD_SPACE: usize = 14_708;
/// Maximum size of one FSP datagram.
pub const MAX_PACKET: usize = HEADER_SIZE + PAYLOAD_SPACE;

/// Key used before the first contact with a server.
pub(crate) const DEFAULT_KEY: u16 = 13_579;
/// Default preferred-block-size hint carried in `GET_DIR`/`GET_FILE`.
pub(crate) const DEFAULT_PACKET_SIZE: u16 = 768;

/// FSP v2 command codes.
///
/// The client issues a subset of these; the rest are defined so that replies
/// and foreign traffic decode cleanly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntEnum, strum_macros::Display)]
#[repr(u8)]
pub enum Command {
    /// Return the server's version string.
    Version = 0x10,
    /// Return the server's extended information block.
    Info = 0x11,
    /// Error response from the server.
    Err = 0x40,
    /// Fetch one block of a directory listing.
    GetDir = 0x41,
    /// Fetch one block of a file.
    GetFile = 0x42,
    /// Write one block of a file being uploaded.
    Upload = 0x43,
    /// Publish a completed upload at its final path.
    Install = 0x44,
    /// Delete a file.
    DelFile = 0x45,
    /// Delete a directory.
    DelDir = 0x46,
    /// Read a directory's protection byte.
    GetPro = 0x47,
    /// Set a directory's protection byte.
    SetPro = 0x48,
    /// Create a directory.
    MakeDir = 0x49,
    /// Finish a session.
    Bye = 0x4A,
    /// Atomic get-and-delete of a file.
    GrabFile = 0x4B,
    /// Completion notice for `GrabFile`.
    GrabDone = 0x4C,
    /// Get information about a file or directory.
    Stat = 0x4D,
    /// Rename a file or directory.
    Rename = 0x4E,
    /// Change the directory password.
    ChangePass = 0x4F,
}

impl Command {
    /// Whether a reply to this command must echo the request's `pos` field
    /// to be accepted. These are the commands that address into a file or
    /// directory, where a stale reply at the wrong offset would corrupt the
    /// stream.
    pub(crate) fn expects_pos_match(self) -> bool {
        matches!(
            self,
            Command::GetDir
                | Command::GetFile
                | Command::Upload
                | Command::GrabFile
                | Command::Info
        )
    }
}

/// Directory protection bits, as returned by `GET_PRO`.
mod pro {
    pub(super) const OWNER: u8 = 0x01;
    pub(super) const DEL: u8 = 0x02;
    pub(super) const ADD: u8 = 0x04;
    pub(super) const MKDIR: u8 = 0x08;
    pub(super) const PRIVATE: u8 = 0x10;
    pub(super) const README: u8 = 0x20;
    pub(super) const LIST: u8 = 0x40;
    pub(super) const RENAME: u8 = 0x80;
}

/// A directory's protection byte.
///
/// Answers what the caller may do within a directory on the server.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Protection(u8);

impl Protection {
    pub(crate) fn new(bits: u8) -> Self {
        Self(bits)
    }
    /// The raw protection byte.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }
    /// The caller owns this directory.
    #[must_use]
    pub fn owner(self) -> bool {
        self.0 & pro::OWNER != 0
    }
    /// Files may be deleted from this directory.
    #[must_use]
    pub fn can_delete(self) -> bool {
        self.0 & pro::DEL != 0
    }
    /// Files may be added to this directory.
    #[must_use]
    pub fn can_add(self) -> bool {
        self.0 & pro::ADD != 0
    }
    /// Subdirectories may be created here.
    #[must_use]
    pub fn can_mkdir(self) -> bool {
        self.0 & pro::MKDIR != 0
    }
    /// Files are not readable by non-owners.
    #[must_use]
    pub fn private(self) -> bool {
        self.0 & pro::PRIVATE != 0
    }
    /// The directory contains a readme file.
    #[must_use]
    pub fn has_readme(self) -> bool {
        self.0 & pro::README != 0
    }
    /// The directory may be listed.
    #[must_use]
    pub fn can_list(self) -> bool {
        self.0 & pro::LIST != 0
    }
    /// Files may be renamed in this directory.
    #[must_use]
    pub fn can_rename(self) -> bool {
        self.0 & pro::RENAME != 0
    }
}

#[cfg(test)]
mod tests {
    use super::{Command, Protection};
    use pretty_assertions::assert_eq;

    #[test]
    fn command_bytes_round_trip() {
        for cmd in [
            Command::Version,
            Command::Err,
            Command::GetDir,
            Command::GetFile,
            Command::Upload,
            Command::Install,
            Command::ChangePass,
        ] {
            assert_eq!(Command::try_from(u8::from(cmd)), Ok(cmd));
        }
        assert!(Command::try_from(0x7Fu8).is_err());
    }

    #[test]
    fn positioned_commands() {
        assert!(Command::GetFile.expects_pos_match());
        assert!(Command::GetDir.expects_pos_match());
        assert!(Command::Upload.expects_pos_match());
        assert!(!Command::Stat.expects_pos_match());
        assert!(!Command::Install.expects_pos_match());
    }

    #[test]
    fn protection_bits() {
        let p = Protection::new(0x01 | 0x04 | 0x40);
        assert!(p.owner());
        assert!(p.can_add());
        assert!(p.can_list());
        assert!(!p.can_delete());
        assert!(!p.private());
        assert_eq!(p.bits(), 0x45);
    }
}

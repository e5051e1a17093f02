// (c) 2025 Ross Younger

//! Packet encode/decode and the one-byte folded checksum

use thiserror::Error;

use super::{Command, HEADER_SIZE, MAX_PACKET, PAYLOAD_SPACE};

// Header byte offsets.
const OFFSET_CMD: usize = 0;
const OFFSET_SUM: usize = 1;
const OFFSET_KEY: usize = 2;
const OFFSET_SEQ: usize = 4;
const OFFSET_LEN: usize = 6;
const OFFSET_POS: usize = 8;

/// Ways in which a datagram can fail to be an FSP packet.
///
/// On the receive path these are absorbed by the transaction engine (the
/// offending datagram is dropped and the engine keeps listening); on the
/// send path they surface as [`crate::Error::Packet`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum PacketError {
    /// Datagram shorter than the fixed header.
    #[error("datagram too short ({0} bytes)")]
    ShortPacket(usize),
    /// Datagram longer than the protocol maximum.
    #[error("datagram too long ({0} bytes)")]
    OversizedPacket(usize),
    /// The folded checksum did not verify.
    #[error("checksum mismatch (computed {computed:#04x}, received {received:#04x})")]
    ChecksumMismatch {
        /// What we computed over the received bytes.
        computed: u8,
        /// What the datagram claimed.
        received: u8,
    },
    /// The `len` field points past the end of the datagram.
    #[error("length field {len} inconsistent with {datagram}-byte datagram")]
    LengthFieldInvalid {
        /// Claimed region A length.
        len: u16,
        /// Actual datagram size.
        datagram: usize,
    },
    /// The command byte is not a known FSP command.
    #[error("unknown command byte {0:#04x}")]
    UnknownCommand(u8),
    /// Combined payload exceeds what fits in one datagram.
    #[error("payload too big ({0} bytes)")]
    PayloadTooBig(usize),
    /// Serialized filename (+ password) would not fit in a packet.
    #[error("file name too long")]
    FileNameTooLong,
}

/// One FSP message: the header fields plus the two payload regions.
///
/// `buf` holds region A (`len` bytes) immediately followed by region B
/// (`xlen` bytes). The checksum is computed at encode time and verified at
/// decode time; it is not stored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Packet {
    pub(crate) cmd: Command,
    pub(crate) key: u16,
    pub(crate) seq: u16,
    pub(crate) pos: u32,
    len: u16,
    xlen: u16,
    buf: Vec<u8>,
}

/// The folded FSP checksum: the datagram length plus the sum of every byte
/// (taking the `sum` byte as zero), with the high-byte carry folded in once.
fn checksum(datagram: &[u8]) -> u8 {
    let mut s: u32 = u32::try_from(datagram.len()).unwrap_or(u32::MAX);
    for (i, b) in datagram.iter().enumerate() {
        if i != OFFSET_SUM {
            s += u32::from(*b);
        }
    }
    ((s + (s >> 8)) & 0xFF) as u8
}

impl Packet {
    /// A packet with empty payload regions.
    pub(crate) fn new(cmd: Command) -> Self {
        Self {
            cmd,
            key: 0,
            seq: 0,
            pos: 0,
            len: 0,
            xlen: 0,
            buf: Vec::new(),
        }
    }

    /// Region A.
    pub(crate) fn data(&self) -> &[u8] {
        &self.buf[..usize::from(self.len)]
    }

    /// Region B.
    pub(crate) fn extra(&self) -> &[u8] {
        &self.buf[usize::from(self.len)..]
    }

    pub(crate) fn len(&self) -> u16 {
        self.len
    }

    pub(crate) fn xlen(&self) -> u16 {
        self.xlen
    }

    /// Replaces region A, preserving region B.
    pub(crate) fn set_data(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= PAYLOAD_SPACE);
        let extra = self.buf.split_off(usize::from(self.len));
        self.buf.clear();
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(&extra);
        self.len = data.len() as u16;
    }

    /// Appends bytes to region B.
    pub(crate) fn append_extra(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.xlen += data.len() as u16;
    }

    /// Reserves an `n`-byte zeroed region B.
    pub(crate) fn reserve_extra(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
        self.xlen += n as u16;
    }

    /// Writes the preferred-block-size hint into a 2-byte region B.
    /// (`GET_DIR` and `GET_FILE` requests; the hint is advisory and the
    /// server may return shorter blocks.)
    pub(crate) fn set_block_size_hint(&mut self, hint: u16) {
        debug_assert_eq!(self.xlen, 2);
        let at = usize::from(self.len);
        self.buf[at..at + 2].copy_from_slice(&hint.to_be_bytes());
    }

    /// Builds the common `filename \n password \0` region A payload
    /// (`filename \0` when no password is set).
    pub(crate) fn build_file_name(
        &mut self,
        name: &str,
        password: Option<&str>,
    ) -> Result<(), PacketError> {
        let pw_len = password.map_or(0, str::len);
        if name.len() + pw_len + 2 >= PAYLOAD_SPACE {
            return Err(PacketError::FileNameTooLong);
        }
        debug_assert_eq!(self.len, 0, "region A must be built before region B");
        self.buf.extend_from_slice(name.as_bytes());
        self.len = name.len() as u16;
        if let Some(pw) = password {
            if !pw.is_empty() {
                self.buf.push(b'\n');
                self.buf.extend_from_slice(pw.as_bytes());
                self.len += 1 + pw.len() as u16;
            }
        }
        self.buf.push(0);
        self.len += 1;
        Ok(())
    }

    /// Serializes into one datagram, computing the checksum in place.
    pub(crate) fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload = usize::from(self.len) + usize::from(self.xlen);
        if payload > PAYLOAD_SPACE {
            return Err(PacketError::PayloadTooBig(payload));
        }
        debug_assert_eq!(payload, self.buf.len());
        let mut wire = Vec::with_capacity(HEADER_SIZE + payload);
        wire.push(u8::from(self.cmd));
        wire.push(0); // sum, filled below
        wire.extend_from_slice(&self.key.to_be_bytes());
        wire.extend_from_slice(&self.seq.to_be_bytes());
        wire.extend_from_slice(&self.len.to_be_bytes());
        wire.extend_from_slice(&self.pos.to_be_bytes());
        wire.extend_from_slice(&self.buf);
        wire[OFFSET_SUM] = checksum(&wire);
        Ok(wire)
    }

    /// Parses and verifies one received datagram.
    pub(crate) fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < HEADER_SIZE {
            return Err(PacketError::ShortPacket(datagram.len()));
        }
        if datagram.len() > MAX_PACKET {
            return Err(PacketError::OversizedPacket(datagram.len()));
        }
        let computed = checksum(datagram);
        let received = datagram[OFFSET_SUM];
        if computed != received {
            return Err(PacketError::ChecksumMismatch { computed, received });
        }
        let cmd = Command::try_from(datagram[OFFSET_CMD])
            .map_err(|_| PacketError::UnknownCommand(datagram[OFFSET_CMD]))?;
        let be16 = |at: usize| u16::from_be_bytes([datagram[at], datagram[at + 1]]);
        let len = be16(OFFSET_LEN);
        if HEADER_SIZE + usize::from(len) > datagram.len() {
            return Err(PacketError::LengthFieldInvalid {
                len,
                datagram: datagram.len(),
            });
        }
        let pos = u32::from_be_bytes([
            datagram[OFFSET_POS],
            datagram[OFFSET_POS + 1],
            datagram[OFFSET_POS + 2],
            datagram[OFFSET_POS + 3],
        ]);
        Ok(Self {
            cmd,
            key: be16(OFFSET_KEY),
            seq: be16(OFFSET_SEQ),
            pos,
            len,
            xlen: (datagram.len() - HEADER_SIZE - usize::from(len)) as u16,
            buf: datagram[HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{checksum, Packet, PacketError, OFFSET_SUM};
    use crate::protocol::{Command, MAX_PACKET, PAYLOAD_SPACE};
    use pretty_assertions::assert_eq;

    fn sample() -> Packet {
        let mut p = Packet::new(Command::GetFile);
        p.key = 0xBEEF;
        p.seq = 0x1234;
        p.pos = 0xDEAD_0010;
        p.set_data(b"/pub/somewhere/a.txt\0");
        p.append_extra(&768u16.to_be_bytes());
        p
    }

    #[test]
    fn encode_decode_round_trip() {
        let p = sample();
        let wire = p.encode().unwrap();
        let q = Packet::decode(&wire).unwrap();
        assert_eq!(p.cmd, q.cmd);
        assert_eq!(p.key, q.key);
        assert_eq!(p.seq, q.seq);
        assert_eq!(p.pos, q.pos);
        assert_eq!(p.len(), q.len());
        assert_eq!(p.data(), q.data());
        assert_eq!(p.extra(), q.extra());
    }

    #[test]
    fn empty_payload_round_trip() {
        let p = Packet::new(Command::Version);
        let wire = p.encode().unwrap();
        assert_eq!(wire.len(), 12);
        let q = Packet::decode(&wire).unwrap();
        assert_eq!(q.cmd, Command::Version);
        assert_eq!(q.len(), 0);
        assert_eq!(q.xlen(), 0);
    }

    #[test]
    fn size_limits() {
        assert_eq!(
            Packet::decode(&[0u8; 11]),
            Err(PacketError::ShortPacket(11))
        );
        assert_eq!(
            Packet::decode(&vec![0u8; MAX_PACKET + 1]),
            Err(PacketError::OversizedPacket(MAX_PACKET + 1))
        );
    }

    #[test]
    fn length_field_must_fit() {
        let mut wire = Packet::new(Command::Stat).encode().unwrap();
        // Claim 4 bytes of region A in a 12-byte datagram, then re-checksum
        // so only the length check can reject it.
        wire[6..8].copy_from_slice(&4u16.to_be_bytes());
        wire[OFFSET_SUM] = 0;
        let sum = checksum(&wire);
        wire[OFFSET_SUM] = sum;
        assert_eq!(
            Packet::decode(&wire),
            Err(PacketError::LengthFieldInvalid {
                len: 4,
                datagram: 12
            })
        );
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let wire = sample().encode().unwrap();
        // A cheap deterministic walk over bit positions; xorshift so the
        // sampling isn't purely periodic.
        let nbits = wire.len() * 8;
        let mut state: u32 = 0x2545_F491;
        for _ in 0..256 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let bit = state as usize % nbits;
            let mut mutated = wire.clone();
            mutated[bit / 8] ^= 1 << (bit % 8);
            assert!(
                matches!(
                    Packet::decode(&mutated),
                    Err(PacketError::ChecksumMismatch { .. })
                ),
                "flip of bit {bit} went undetected"
            );
        }
    }

    #[test]
    fn checksum_ignores_payload_order() {
        // Swapping two payload bytes keeps the sum valid; the decoded packet
        // differs only in payload content.
        let mut wire = sample().encode().unwrap();
        wire.swap(14, 17);
        let q = Packet::decode(&wire).unwrap();
        assert_eq!(q.cmd, Command::GetFile);
    }

    #[test]
    fn file_name_with_password() {
        let mut p = Packet::new(Command::Stat);
        p.build_file_name("/etc/motd", Some("hunter2")).unwrap();
        assert_eq!(p.data(), b"/etc/motd\nhunter2\0");
    }

    #[test]
    fn file_name_without_password() {
        let mut p = Packet::new(Command::Stat);
        p.build_file_name("/etc/motd", None).unwrap();
        assert_eq!(p.data(), b"/etc/motd\0");
    }

    #[test]
    fn file_name_too_long() {
        let mut p = Packet::new(Command::Stat);
        let long = "x".repeat(PAYLOAD_SPACE);
        assert_eq!(
            p.build_file_name(&long, None),
            Err(PacketError::FileNameTooLong)
        );
    }

    #[test]
    fn oversized_payload_refused() {
        let mut p = Packet::new(Command::Upload);
        p.set_data(&vec![0u8; PAYLOAD_SPACE]);
        p.append_extra(&[0]);
        assert_eq!(
            p.encode(),
            Err(PacketError::PayloadTooBig(PAYLOAD_SPACE + 1))
        );
    }
}

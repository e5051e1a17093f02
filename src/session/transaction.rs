// (c) 2025 Ross Younger

//! The transaction engine
//!
//! One transaction = send a request datagram, collect the matching reply.
//! Loss is handled by retransmitting with a growing delay; everything else
//! that arrives in the meantime (duplicates, replies to earlier
//! transactions, traffic from the wrong host, undecodable datagrams) is
//! dropped without affecting the retransmission schedule. The whole
//! exchange is bounded by the session timeout.
//!
//! Sequence discipline: each transaction draws a fresh random 13-bit
//! sequence base; the low 3 bits of `seq` carry the retry count. A reply is
//! only accepted if its base matches, its command echoes the request (or is
//! the error command), and, for commands that address into a file, its
//! `pos` echoes the request too.

use tokio::time::{sleep, timeout_at, Duration, Instant};
use tracing::{debug, trace};

use super::Session;
use crate::error::{Error, Result};
use crate::protocol::packet::Packet;
use crate::protocol::{Command, MAX_PACKET};

/// Delay before the first retransmission. Grows by half on each further
/// retry.
const INITIAL_DELAY: Duration = Duration::from_millis(1340);

impl Session {
    /// Runs one request/reply transaction.
    ///
    /// On success the reply's key has been adopted into the lock and, for
    /// `GET_FILE` data, the transfer meter advanced. On failure no state
    /// changes beyond the diagnostic counters.
    pub(crate) async fn transaction(&mut self, pkt: &mut Packet) -> Result<Packet> {
        pkt.key = self.keys.get();
        let mut base = rand::random::<u16>() & 0xFFF8;
        if base == self.seq {
            base ^= 0x1080;
        }
        self.seq = base;

        let started = Instant::now();
        let mut delay = INITIAL_DELAY;
        let mut retry: u16 = 0;
        loop {
            if started.elapsed() > self.options.timeout {
                return Err(Error::Timeout {
                    cmd: pkt.cmd,
                    elapsed: started.elapsed(),
                });
            }
            pkt.seq = self.seq | (retry & 0x7);
            if matches!(pkt.cmd, Command::GetDir | Command::GetFile) && pkt.xlen() == 2 {
                pkt.set_block_size_hint(self.options.packet_size_hint);
            }
            let wire = pkt.encode()?;
            if let Err(e) = self.socket.send_to(&wire, self.server).await {
                // A send failure extends the schedule but does not consume
                // a retry slot.
                debug!("send of {} failed: {e}", pkt.cmd);
                sleep(Duration::from_secs(1)).await;
                delay += Duration::from_secs(1);
                continue;
            }
            if retry == 0 {
                delay = INITIAL_DELAY;
            } else {
                self.retransmits += 1;
                delay = delay * 3 / 2;
            }
            trace!(
                "sent {} seq {:#06x} pos {} attempt {}",
                pkt.cmd,
                pkt.seq,
                pkt.pos,
                retry + 1
            );

            // Drain datagrams until the read deadline; the first acceptable
            // reply wins, a deadline expiry retransmits.
            let deadline = Instant::now() + delay;
            let mut buf = [0u8; MAX_PACKET];
            loop {
                let (n, from) =
                    match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                        Err(_) => {
                            self.keys.set(pkt.key);
                            break;
                        }
                        Ok(Err(e)) => {
                            return Err(Error::Network {
                                cmd: pkt.cmd,
                                source: e,
                            })
                        }
                        Ok(Ok(v)) => v,
                    };
                if from != self.server {
                    if self.chatty() {
                        debug!("ignoring datagram from {from}");
                    }
                    continue;
                }
                let reply = match Packet::decode(&buf[..n]) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("dropping undecodable datagram: {e}");
                        continue;
                    }
                };
                if reply.seq & 0xFFF8 != self.seq {
                    self.dupes += 1;
                    if self.chatty() {
                        debug!("dropping stale reply, seq {:#06x}", reply.seq);
                    }
                    continue;
                }
                if reply.cmd != pkt.cmd && reply.cmd != Command::Err {
                    self.dupes += 1;
                    if self.chatty() {
                        debug!("dropping mismatched reply, cmd {}", reply.cmd);
                    }
                    continue;
                }
                if pkt.cmd.expects_pos_match() && reply.pos != pkt.pos {
                    self.dupes += 1;
                    if self.chatty() {
                        debug!("dropping reply at wrong pos {}", reply.pos);
                    }
                    continue;
                }
                self.keys.set(reply.key);
                if reply.cmd == Command::Err {
                    let reason = String::from_utf8_lossy(reply.data())
                        .trim_end_matches('\0')
                        .to_string();
                    return Err(Error::Server {
                        cmd: pkt.cmd,
                        reason,
                    });
                }
                if reply.cmd == Command::GetFile {
                    self.meter.update(u64::from(reply.len()));
                }
                return Ok(reply);
            }
            retry = retry.wrapping_add(1);
        }
    }

    fn chatty(&self) -> bool {
        self.options.verbose_level >= 1
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SessionOptions;
    use crate::protocol::packet::Packet;
    use crate::protocol::{Command, DEFAULT_KEY};
    use crate::util::test_server::{echo_reply, session_to, spawn};
    use crate::{Error, Session};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn round_trip_adopts_the_reply_key() {
        let server = spawn(|req| vec![echo_reply(req, b"pong")]).await;
        let (mut s, _kd) = session_to(server.addr, None).await;
        let mut pkt = Packet::new(Command::Version);
        let reply = s.transaction(&mut pkt).await.unwrap();
        assert_eq!(reply.data(), b"pong");
        assert_eq!(s.keys.get(), DEFAULT_KEY + 1);
        assert_eq!(s.duplicates(), 0);
    }

    #[tokio::test]
    async fn stale_sequence_replies_count_as_duplicates() {
        let server = spawn(|req| {
            let mut stale = echo_reply(req, b"old news");
            stale.seq = req.seq ^ 0x0100; // different base, same low bits
            let mut stale2 = stale.clone();
            stale2.seq = req.seq ^ 0x0200;
            vec![stale, stale2, echo_reply(req, b"fresh")]
        })
        .await;
        let (mut s, _kd) = session_to(server.addr, None).await;
        let mut pkt = Packet::new(Command::Version);
        let reply = s.transaction(&mut pkt).await.unwrap();
        assert_eq!(reply.data(), b"fresh");
        assert_eq!(s.duplicates(), 2);
    }

    #[tokio::test]
    async fn mismatched_command_is_dropped() {
        let server = spawn(|req| {
            let mut wrong = echo_reply(req, b"?");
            wrong.cmd = Command::Stat;
            vec![wrong, echo_reply(req, b"right")]
        })
        .await;
        let (mut s, _kd) = session_to(server.addr, None).await;
        let mut pkt = Packet::new(Command::Version);
        let reply = s.transaction(&mut pkt).await.unwrap();
        assert_eq!(reply.data(), b"right");
        assert_eq!(s.duplicates(), 1);
    }

    #[tokio::test]
    async fn wrong_position_is_dropped_for_positioned_commands() {
        let server = spawn(|req| {
            let mut wrong = echo_reply(req, b"block");
            wrong.pos = req.pos + 768;
            vec![wrong, echo_reply(req, b"block")]
        })
        .await;
        let (mut s, _kd) = session_to(server.addr, None).await;
        let mut pkt = Packet::new(Command::GetFile);
        pkt.build_file_name("/f", None).unwrap();
        pkt.reserve_extra(2);
        pkt.pos = 1536;
        let reply = s.transaction(&mut pkt).await.unwrap();
        assert_eq!(reply.pos, 1536);
        assert_eq!(s.duplicates(), 1);
    }

    #[tokio::test]
    async fn sequence_base_is_stable_across_retries() {
        // Stay silent for the first datagram so the engine retransmits.
        let seqs = Arc::new(Mutex::new(Vec::new()));
        let log = seqs.clone();
        let server = spawn(move |req| {
            let mut seqs = log.lock().unwrap();
            seqs.push(req.seq);
            if seqs.len() == 1 {
                vec![]
            } else {
                vec![echo_reply(req, b"eventually")]
            }
        })
        .await;
        let (mut s, _kd) = session_to(server.addr, None).await;
        let mut pkt = Packet::new(Command::Version);
        let reply = s.transaction(&mut pkt).await.unwrap();
        assert_eq!(reply.data(), b"eventually");
        assert_eq!(s.retransmits(), 1);
        let seqs = seqs.lock().unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0] & 0xFFF8, seqs[1] & 0xFFF8, "base must not move");
        assert_eq!(seqs[0] & 0x7, 0);
        assert_eq!(seqs[1] & 0x7, 1, "low bits carry the retry count");
    }

    #[tokio::test]
    async fn sequence_base_changes_between_transactions() {
        let seqs = Arc::new(Mutex::new(Vec::new()));
        let log = seqs.clone();
        let server = spawn(move |req| {
            log.lock().unwrap().push(req.seq);
            vec![echo_reply(req, b"")]
        })
        .await;
        let (mut s, _kd) = session_to(server.addr, None).await;
        let mut pkt = Packet::new(Command::Version);
        let _ = s.transaction(&mut pkt).await.unwrap();
        let mut pkt = Packet::new(Command::Version);
        let _ = s.transaction(&mut pkt).await.unwrap();
        let seqs = seqs.lock().unwrap();
        assert_ne!(seqs[0] & 0xFFF8, seqs[1] & 0xFFF8);
    }

    #[tokio::test]
    async fn silent_server_times_out_after_retransmitting() {
        let server = spawn(|_req| vec![]).await;
        let dir = tempfile::tempdir().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut s = Session::for_test(
            dir.path(),
            socket,
            server.addr,
            None,
            SessionOptions::default().with_timeout(Duration::from_secs(3)),
        )
        .unwrap();
        let started = std::time::Instant::now();
        let mut pkt = Packet::new(Command::Version);
        let err = s.transaction(&mut pkt).await.unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
        assert!(matches!(err, Error::Timeout { cmd: Command::Version, .. }));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(server.datagrams_seen() >= 2, "engine must have retransmitted");
    }

    #[tokio::test]
    async fn get_file_replies_feed_the_meter() {
        let server = spawn(|req| vec![echo_reply(req, &[0xAB; 700])]).await;
        let (mut s, _kd) = session_to(server.addr, None).await;
        s.meter.start(700);
        let mut pkt = Packet::new(Command::GetFile);
        pkt.build_file_name("/f", None).unwrap();
        pkt.reserve_extra(2);
        let _ = s.transaction(&mut pkt).await.unwrap();
        assert_eq!(s.meter.percent(), 100);
    }

    #[tokio::test]
    async fn hint_is_written_into_get_file_requests() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let server = spawn(move |req| {
            log.lock().unwrap().push(req.extra().to_vec());
            vec![echo_reply(req, b"")]
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut s = Session::for_test(
            dir.path(),
            socket,
            server.addr,
            None,
            SessionOptions::default().with_packet_size_hint(1492),
        )
        .unwrap();
        let mut pkt = Packet::new(Command::GetFile);
        pkt.build_file_name("/f", None).unwrap();
        pkt.reserve_extra(2);
        let _ = s.transaction(&mut pkt).await.unwrap();
        assert_eq!(seen.lock().unwrap()[0], 1492u16.to_be_bytes());
    }
}

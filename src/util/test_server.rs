// (c) 2025 Ross Younger

//! A scripted in-process FSP server for tests
//!
//! Binds a loopback UDP socket and answers each decoded request with
//! whatever packets the supplied handler returns (none = stay silent, which
//! is how timeout behavior is exercised).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::protocol::packet::Packet;
use crate::protocol::MAX_PACKET;

pub(crate) struct MockServer {
    pub(crate) addr: SocketAddr,
    datagrams: Arc<AtomicUsize>,
}

impl MockServer {
    /// How many datagrams the server has received so far.
    pub(crate) fn datagrams_seen(&self) -> usize {
        self.datagrams.load(Ordering::SeqCst)
    }
}

/// Spawns a mock server; the task runs until the test's runtime is dropped.
pub(crate) async fn spawn<F>(mut handler: F) -> MockServer
where
    F: FnMut(&Packet) -> Vec<Packet> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let datagrams = Arc::new(AtomicUsize::new(0));
    let seen = datagrams.clone();
    drop(tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_PACKET];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let _ = seen.fetch_add(1, Ordering::SeqCst);
            let Ok(req) = Packet::decode(&buf[..n]) else {
                continue;
            };
            for reply in handler(&req) {
                let wire = reply.encode().unwrap();
                let _ = socket.send_to(&wire, from).await;
            }
        }
    }));
    MockServer { addr, datagrams }
}

/// A session pointed at `server`, with its key file in a scratch directory
/// (returned so it outlives the session).
pub(crate) async fn session_to(
    server: SocketAddr,
    password: Option<&str>,
) -> (crate::Session, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let session = crate::Session::for_test(
        dir.path(),
        socket,
        server,
        password,
        crate::SessionOptions::default(),
    )
    .unwrap();
    (session, dir)
}

/// A reply that will pass the engine's acceptance checks for `req`:
/// same command, same sequence, same position, with a rotated key.
pub(crate) fn echo_reply(req: &Packet, data: &[u8]) -> Packet {
    let mut p = Packet::new(req.cmd);
    p.seq = req.seq;
    p.pos = req.pos;
    p.key = req.key.wrapping_add(1);
    p.set_data(data);
    p
}

/// An error reply carrying `reason` in region A.
pub(crate) fn error_reply(req: &Packet, reason: &str) -> Packet {
    let mut p = Packet::new(crate::protocol::Command::Err);
    p.seq = req.seq;
    p.pos = req.pos;
    p.key = req.key.wrapping_add(1);
    p.set_data(reason.as_bytes());
    p
}

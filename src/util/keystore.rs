// (c) 2025 Ross Younger

//! Lock-key persistence
//!
//! The server hands out a fresh 16-bit key with every reply and expects the
//! next request to quote it; a request with a stale key is how it spots
//! replays. Remembering the last key across process invocations saves one
//! round trip, so it is stored as decimal ASCII in a small file in the
//! system temp directory, one file per server endpoint. The file is shared
//! across processes by convention; writes are last-write-wins and a racing
//! session costs at most one extra round trip.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::protocol::DEFAULT_KEY;

#[derive(Debug)]
pub(crate) struct KeyStore {
    path: PathBuf,
    key: u16,
}

impl KeyStore {
    /// Opens the store for a server endpoint, loading the previous key if
    /// one was saved. Anything unreadable or unparseable falls back to the
    /// protocol's well-known initial key.
    pub(crate) fn for_server(server: SocketAddr) -> Self {
        Self::in_dir(std::env::temp_dir(), server)
    }

    pub(crate) fn in_dir(dir: impl AsRef<Path>, server: SocketAddr) -> Self {
        let path = dir
            .as_ref()
            .join(format!("FSP1-{}-{}", server.ip(), server.port()));
        let key = match fs::read_to_string(&path) {
            Ok(text) => text.trim().parse().unwrap_or(DEFAULT_KEY),
            Err(e) => {
                debug!("no saved key at {}: {e}", path.display());
                DEFAULT_KEY
            }
        };
        Self { path, key }
    }

    pub(crate) fn get(&self) -> u16 {
        self.key
    }

    pub(crate) fn set(&mut self, key: u16) {
        self.key = key;
    }

    /// Best-effort write-back; a failure costs one round trip next session.
    pub(crate) fn save(&self) {
        if let Err(e) = fs::write(&self.path, self.key.to_string()) {
            debug!("could not save key to {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::KeyStore;
    use crate::protocol::DEFAULT_KEY;
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn default_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::in_dir(dir.path(), addr(21));
        assert_eq!(store.get(), DEFAULT_KEY);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = KeyStore::in_dir(dir.path(), addr(21));
        store.set(0xABCD);
        store.save();
        let again = KeyStore::in_dir(dir.path(), addr(21));
        assert_eq!(again.get(), 0xABCD);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::in_dir(dir.path(), addr(21));
        std::fs::write(dir.path().join("FSP1-127.0.0.1-21"), "not a number").unwrap();
        drop(store);
        let again = KeyStore::in_dir(dir.path(), addr(21));
        assert_eq!(again.get(), DEFAULT_KEY);
    }

    #[test]
    fn keyed_per_server() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = KeyStore::in_dir(dir.path(), addr(21));
        a.set(111);
        a.save();
        let b = KeyStore::in_dir(dir.path(), addr(2000));
        assert_eq!(b.get(), DEFAULT_KEY);
        let a2 = KeyStore::in_dir(dir.path(), addr(21));
        assert_eq!(a2.get(), 111);
    }
}

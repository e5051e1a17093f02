// (c) 2025 Ross Younger

//! Error taxonomy
//!
//! Packet-level problems on the receive path never show up here: the
//! transaction engine drops malformed datagrams and keeps listening. What
//! callers see is one of the kinds below.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::packet::PacketError;
use crate::protocol::Command;

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Anything an FSP operation can fail with.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A caller-supplied argument was unusable (bad address, empty name…).
    /// Never retried.
    #[error("{0}")]
    Argument(String),

    /// An outbound packet could not be built (typically a name too long to
    /// fit in a datagram).
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// Could not create or configure the UDP socket.
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// The socket failed mid-transaction (e.g. closed underneath us).
    #[error("network error during {cmd}: {source}")]
    Network {
        /// The command that was in flight.
        cmd: Command,
        /// The underlying socket error.
        source: std::io::Error,
    },

    /// The session timeout elapsed without a matching reply.
    #[error("{cmd} transaction timed out after {elapsed:?}")]
    Timeout {
        /// The command that went unanswered.
        cmd: Command,
        /// How long we tried for.
        elapsed: Duration,
    },

    /// The server answered with its error command.
    #[error("server rejected {cmd}: {reason}")]
    Server {
        /// The command that was rejected.
        cmd: Command,
        /// The server's reason string.
        reason: String,
    },

    /// A reply arrived but did not have the promised shape.
    #[error("malformed {cmd} reply: {detail}")]
    Protocol {
        /// The command whose reply was malformed.
        cmd: Command,
        /// What was wrong with it.
        detail: String,
    },

    /// The stat target does not exist on the server.
    #[error("no such file: {0}")]
    NoSuchFile(String),

    /// The server-side checks for an upload did not pass.
    #[error("upload not permitted: {0}")]
    UploadDenied(String),

    /// A local filesystem operation failed (download/upload conveniences).
    #[error("local i/o error on {path}: {source}")]
    LocalIo {
        /// The local path involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
}

impl Error {
    /// Whether this error means the transfer stalled rather than failed
    /// outright. The retrying download wrapper restarts on these.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Network { source, .. } => {
                source.kind() == std::io::ErrorKind::TimedOut
                    || source.to_string().contains("timeout")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::protocol::Command;
    use std::time::Duration;

    #[test]
    fn timeout_predicate() {
        let e = Error::Timeout {
            cmd: Command::GetFile,
            elapsed: Duration::from_secs(10),
        };
        assert!(e.is_timeout());

        let e = Error::Network {
            cmd: Command::GetFile,
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "read deadline"),
        };
        assert!(e.is_timeout());

        let e = Error::Network {
            cmd: Command::GetFile,
            source: std::io::Error::other("connection refused by timeout watchdog"),
        };
        assert!(e.is_timeout(), "substring fallback");

        let e = Error::Server {
            cmd: Command::Stat,
            reason: "permission denied".into(),
        };
        assert!(!e.is_timeout());
    }
}

// (c) 2025 Ross Younger

//! Session tunables

use std::time::Duration;

use crate::protocol::DEFAULT_PACKET_SIZE;

/// The set of configurable options recognized by a [`crate::Session`].
///
/// All fields have sensible defaults; construct with [`Default`] and adjust
/// with the `with_*` builders:
///
/// ```
/// use fsp::SessionOptions;
/// use std::time::Duration;
///
/// let opts = SessionOptions::default()
///     .with_timeout(Duration::from_secs(30))
///     .with_packet_size_hint(1024);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    /// Upper bound on one transaction, retransmissions included.
    pub timeout: Duration,
    /// Legacy cap on the inter-retry delay. Retained for configuration
    /// compatibility; not currently consulted.
    pub max_delay: Duration,
    /// Verbosity of per-datagram diagnostics: at 0 only transaction-level
    /// events are logged; at 1 and above, every dropped datagram is too.
    pub verbose_level: u8,
    /// Preferred block size requested from the server for directory and
    /// file reads. Advisory; the server may send less.
    pub packet_size_hint: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_delay: Duration::from_secs(2),
            verbose_level: 0,
            packet_size_hint: DEFAULT_PACKET_SIZE,
        }
    }
}

impl SessionOptions {
    /// Sets the per-transaction timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the diagnostic verbosity.
    #[must_use]
    pub fn with_verbose_level(mut self, level: u8) -> Self {
        self.verbose_level = level;
        self
    }

    /// Sets the preferred block size for directory and file reads.
    #[must_use]
    pub fn with_packet_size_hint(mut self, hint: u16) -> Self {
        self.packet_size_hint = hint;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::SessionOptions;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let opts = SessionOptions::default();
        assert_eq!(opts.timeout, Duration::from_secs(10));
        assert_eq!(opts.packet_size_hint, 768);
        assert_eq!(opts.verbose_level, 0);
    }

    #[test]
    fn builders() {
        let opts = SessionOptions::default()
            .with_timeout(Duration::from_millis(1500))
            .with_verbose_level(2)
            .with_packet_size_hint(4096);
        assert_eq!(opts.timeout, Duration::from_millis(1500));
        assert_eq!(opts.verbose_level, 2);
        assert_eq!(opts.packet_size_hint, 4096);
    }
}

// (c) 2025 Ross Younger

//! Transfer accounting and throughput reporting

use std::time::Instant;

use human_repr::{HumanCount, HumanThroughput};
use tracing::info;

/// Accumulates bytes moved during a transfer and periodically reports
/// throughput.
///
/// The engine feeds it one update per received data block. Reporting is
/// windowed: bytes accumulate until at least a second of wall clock has
/// passed, then one `info`-level line is emitted and the window restarts.
#[derive(Clone, Debug)]
pub(crate) struct TransferMeter {
    started: Instant,
    window_closed: Instant,
    done: u64,
    total: u64,
}

impl TransferMeter {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            window_closed: now,
            done: 0,
            total: 0,
        }
    }

    /// Begins a new transfer of `total` bytes (0 if unknown).
    pub(crate) fn start(&mut self, total: u64) {
        let now = Instant::now();
        self.started = now;
        self.window_closed = now;
        self.done = 0;
        self.total = total;
    }

    /// Records `bytes` more transferred; closes the reporting window if it
    /// has been open for a second or more.
    pub(crate) fn update(&mut self, bytes: u64) {
        self.done += bytes;
        if self.window_closed.elapsed().as_secs() >= 1 {
            self.report();
            self.window_closed = Instant::now();
        }
    }

    /// Percentage complete, 0 when the total is unknown.
    pub(crate) fn percent(&self) -> u64 {
        if self.total > 0 {
            self.done * 100 / self.total
        } else {
            0
        }
    }

    /// Mean throughput since the transfer began, in KB/s.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn speed_kb_per_s(&self) -> f64 {
        let millis = self.started.elapsed().as_millis() as f64;
        if millis > 0.0 && self.done > 0 {
            self.done as f64 / millis * 1000.0 / 1024.0
        } else {
            0.0
        }
    }

    fn rate(&self) -> f64 {
        self.speed_kb_per_s() * 1024.0
    }

    fn report(&self) {
        info!(
            "transferred {done} of {total} ({pct}%) at {rate}",
            done = self.done.human_count_bytes(),
            total = self.total.human_count_bytes(),
            pct = self.percent(),
            rate = self.rate().human_throughput_bytes(),
        );
    }

    /// Emits the closing throughput line for a finished transfer.
    pub(crate) fn finish(&self) {
        self.report();
    }
}

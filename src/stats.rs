use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

use serde::Serialize;

/// Counters of a reader session.
///
/// Only the session thread writes to these. Everything else reads them via
/// [`Statistics::snapshot`].
#[derive(Debug, Default)]
pub struct Statistics {
    bytes_received: AtomicU64,
    bad_bytes_received: AtomicU64,
    messages_decoded: AtomicU64,
    bad_packets_received: AtomicU64,
    file_io_errors: AtomicU64,
}

impl Statistics {
    pub fn add_bytes_received(&self, num_bytes: usize) {
        self.bytes_received
            .fetch_add(num_bytes as u64, Ordering::Relaxed);
    }

    /// Counts a frame (or run of bytes) that didn't produce a message.
    pub fn add_bad_packet(&self, num_bytes: usize) {
        self.bad_packets_received.fetch_add(1, Ordering::Relaxed);
        self.bad_bytes_received
            .fetch_add(num_bytes as u64, Ordering::Relaxed);
    }

    pub fn add_messages_decoded(&self, num_messages: usize) {
        self.messages_decoded
            .fetch_add(num_messages as u64, Ordering::Relaxed);
    }

    pub fn add_file_io_error(&self) {
        self.file_io_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bad_bytes_received: self.bad_bytes_received.load(Ordering::Relaxed),
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
            bad_packets_received: self.bad_packets_received.load(Ordering::Relaxed),
            file_io_errors: self.file_io_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub bytes_received: u64,
    pub bad_bytes_received: u64,
    pub messages_decoded: u64,
    pub bad_packets_received: u64,
    pub file_io_errors: u64,
}

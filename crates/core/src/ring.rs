// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Fixed-capacity circular byte buffer for process scrollback.
///
/// Oldest bytes are silently discarded on overflow. The buffer tracks the
/// total number of bytes ever written so a reconnecting client can request
/// replay from a global byte offset.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    head: usize,
    filled: usize,
    total: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { buf: vec![0u8; capacity], head: 0, filled: 0, total: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes ever written through this buffer.
    pub fn total_written(&self) -> u64 {
        self.total
    }

    /// Bytes currently retained.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Append bytes, discarding the oldest data when full.
    pub fn write(&mut self, data: &[u8]) {
        let cap = self.buf.len();
        if cap == 0 {
            return;
        }

        // Only the final `cap` bytes of an oversized chunk can survive.
        let keep = if data.len() > cap { &data[data.len() - cap..] } else { data };

        for &byte in keep {
            self.buf[self.head] = byte;
            self.head = (self.head + 1) % cap;
        }
        self.filled = (self.filled + keep.len()).min(cap);
        self.total += data.len() as u64;
    }

    /// Oldest global offset still retained.
    pub fn oldest_offset(&self) -> u64 {
        self.total - self.filled as u64
    }

    /// Copy out bytes starting at the given global offset.
    ///
    /// Returns `None` when the offset has been overwritten (too old) or lies
    /// beyond the write position (too new).
    pub fn read_from(&self, offset: u64) -> Option<Vec<u8>> {
        if offset > self.total || offset < self.oldest_offset() {
            return None;
        }

        let available = (self.total - offset) as usize;
        if available == 0 {
            return Some(Vec::new());
        }
        let cap = self.buf.len();
        let mut out = Vec::with_capacity(available);
        // `head` is one past the newest byte; walk back `available` slots.
        let start = (self.head + cap - available % cap) % cap;
        for i in 0..available {
            out.push(self.buf[(start + i) % cap]);
        }
        Some(out)
    }

    /// The last `max` bytes of scrollback (fewer when less is retained).
    pub fn tail(&self, max: usize) -> Vec<u8> {
        let take = self.filled.min(max);
        let offset = self.total - take as u64;
        self.read_from(offset).unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;

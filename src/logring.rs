//! Append-only log ring buffer.
//!
//! Log lines go into a fixed ring; when full, the oldest bytes fall off the
//! front. The `log-display` command pages the ring out over the command
//! socket and `log-clear` resets it. When the `log-to-uart` flag is set the
//! caller additionally mirrors each line to UART 0.

use crate::buffer::ByteBuf;

/// Ring capacity in bytes. Deliberately larger than the command send
/// buffer; `log-display` pages out what fits and reports the overflow.
pub const LOG_RING_SIZE: usize = 8192;

pub struct LogRing {
    data: [u8; LOG_RING_SIZE],
    head: usize,
    len: usize,
}

impl LogRing {
    pub const fn new() -> Self {
        Self {
            data: [0u8; LOG_RING_SIZE],
            head: 0,
            len: 0,
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Append raw bytes, evicting the oldest content when the ring is full.
    pub fn append(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let tail = (self.head + self.len) % LOG_RING_SIZE;
            self.data[tail] = byte;
            if self.len < LOG_RING_SIZE {
                self.len += 1;
            } else {
                self.head = (self.head + 1) % LOG_RING_SIZE;
            }
        }
    }

    /// Append a line, ensuring a trailing newline.
    pub fn write_line(&mut self, line: &str) {
        self.append(line.as_bytes());
        if !line.ends_with('\n') {
            self.append(b"\n");
        }
    }

    /// Copy the ring content, oldest first, into `dst` (truncating).
    pub fn render<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>) {
        for index in 0..self.len {
            dst.push(self.data[(self.head + index) % LOG_RING_SIZE]);
        }
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_render() {
        let mut ring = LogRing::new();
        ring.write_line("first");
        ring.write_line("second");

        let mut out: ByteBuf<64> = ByteBuf::new();
        ring.render(&mut out);
        assert_eq!(out.as_str(), "first\nsecond\n");
    }

    #[test]
    fn eviction_keeps_newest() {
        let mut ring = LogRing::new();
        for index in 0..LOG_RING_SIZE {
            ring.append(&[(index % 256) as u8]);
        }
        assert_eq!(ring.len(), LOG_RING_SIZE);

        ring.append(b"XYZ");
        assert_eq!(ring.len(), LOG_RING_SIZE);

        let mut out: ByteBuf<LOG_RING_SIZE> = ByteBuf::new();
        ring.render(&mut out);
        let slice = out.as_slice();
        assert_eq!(&slice[LOG_RING_SIZE - 3..], b"XYZ");
        // Oldest three bytes were evicted.
        assert_eq!(slice[0], 3);
    }

    #[test]
    fn clear_empties() {
        let mut ring = LogRing::new();
        ring.write_line("entry");
        ring.clear();
        assert!(ring.is_empty());
    }
}

/// Fixed-capacity circular byte buffer shared between the decoder
/// (producer) and the output thread (consumer).
///
/// Wrap in `Arc<parking_lot::Mutex<AudioRingBuffer>>` for cross-thread
/// access; only the producer path advances `waud` and only the consumer
/// path advances `raud`.
///
/// One byte of capacity is reserved so a full buffer is distinguishable
/// from an empty one: occupied = `(waud - raud + C) % C`, free =
/// `C - occupied - 1`.
///
/// Overflow behavior: writes are all-or-nothing. A write that does not
/// fit returns `false` and leaves both cursors untouched, so the caller
/// can apply backpressure instead of losing audio.
#[derive(Debug)]
pub struct AudioRingBuffer {
    buffer: Box<[u8]>,
    /// Read cursor; always `< capacity`.
    raud: usize,
    /// Write cursor; always `< capacity`.
    waud: usize,
    capacity: usize,
}

/// Default ring capacity in bytes: a few seconds of 5.1/48 kHz float PCM.
pub const DEFAULT_RING_CAPACITY: usize = 3_072_000;

impl AudioRingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "ring capacity must exceed the reserved byte");
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            raud: 0,
            waud: 0,
            capacity,
        }
    }

    /// Occupied bytes, i.e. written but not yet consumed.
    pub fn audiolen(&self) -> usize {
        (self.waud + self.capacity - self.raud) % self.capacity
    }

    /// Free bytes available for writing.
    pub fn audiofree(&self) -> usize {
        self.capacity - self.audiolen() - 1
    }

    /// Alias used by fill/latency reporting.
    pub fn audioready(&self) -> usize {
        self.audiolen()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.raud == self.waud
    }

    /// Append `data` at the write cursor.
    ///
    /// Returns `false` without side effects if `data` does not fit.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.len() > self.audiofree() {
            return false;
        }
        let first = data.len().min(self.capacity - self.waud);
        self.buffer[self.waud..self.waud + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            let rest = data.len() - first;
            self.buffer[..rest].copy_from_slice(&data[first..]);
        }
        self.waud = (self.waud + data.len()) % self.capacity;
        true
    }

    /// Copy up to `dest.len()` bytes from the read cursor into `dest`,
    /// consuming them. Returns the number of bytes copied.
    pub fn read_into(&mut self, dest: &mut [u8]) -> usize {
        let to_read = dest.len().min(self.audiolen());
        if to_read == 0 {
            return 0;
        }
        let first = to_read.min(self.capacity - self.raud);
        dest[..first].copy_from_slice(&self.buffer[self.raud..self.raud + first]);
        if first < to_read {
            let rest = to_read - first;
            dest[first..to_read].copy_from_slice(&self.buffer[..rest]);
        }
        self.raud = (self.raud + to_read) % self.capacity;
        to_read
    }

    /// Discard up to `count` unread bytes. Returns the number discarded.
    pub fn skip(&mut self, count: usize) -> usize {
        let to_skip = count.min(self.audiolen());
        self.raud = (self.raud + to_skip) % self.capacity;
        to_skip
    }

    /// Drop all buffered audio and rewind both cursors.
    pub fn reset(&mut self) {
        self.raud = 0;
        self.waud = 0;
    }
}

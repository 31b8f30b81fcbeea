//! Fixed-capacity receive buffer with read/write cursors.
//!
//! Each connection owns one `ByteBuffer` that socket reads append to and the
//! frame decoder consumes from. The cursors satisfy
//! `0 <= read_index <= write_index <= capacity` at all times; [`compact`]
//! shifts the unread region back to offset zero so the space behind the read
//! cursor becomes writable again.
//!
//! [`compact`]: ByteBuffer::compact

/// A fixed-capacity byte region with independent read and write cursors.
pub struct ByteBuffer {
    data: Box<[u8]>,
    read_index: usize,
    write_index: usize,
}

impl ByteBuffer {
    /// Creates a buffer with the given fixed capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_index: 0,
            write_index: 0,
        }
    }

    /// Returns the fixed capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Returns the number of unread bytes (`write_index - read_index`).
    pub fn len(&self) -> usize {
        self.write_index - self.read_index
    }

    /// Returns whether there are no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of bytes writable past the write cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.write_index
    }

    /// Returns the unread region.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_index..self.write_index]
    }

    /// Returns the writable region past the write cursor.
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.write_index..]
    }

    /// Advances the write cursor after bytes have been written into
    /// [`writable`](Self::writable).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`remaining`](Self::remaining).
    pub fn advance_write(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance_write past capacity");
        self.write_index += n;
    }

    /// Advances the read cursor, consuming `n` unread bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`len`](Self::len).
    pub fn advance_read(&mut self, n: usize) {
        assert!(n <= self.len(), "advance_read past write cursor");
        self.read_index += n;
    }

    /// Copies as much of `src` as fits into the writable region and advances
    /// the write cursor. Returns the number of bytes copied.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        self.data[self.write_index..self.write_index + n].copy_from_slice(&src[..n]);
        self.write_index += n;
        n
    }

    /// Reads a little-endian u16 at `offset` bytes past the read cursor
    /// without consuming it. Returns `None` if fewer than two bytes are
    /// buffered there.
    pub fn peek_u16_le(&self, offset: usize) -> Option<u16> {
        let readable = self.readable();
        if readable.len() < offset + 2 {
            return None;
        }
        Some(u16::from_le_bytes([readable[offset], readable[offset + 1]]))
    }

    /// Shifts the unread region to the start of the buffer, resetting the
    /// read cursor to zero and reclaiming consumed space for writing.
    pub fn compact(&mut self) {
        if self.read_index == 0 {
            return;
        }
        let len = self.len();
        self.data.copy_within(self.read_index..self.write_index, 0);
        self.read_index = 0;
        self.write_index = len;
    }
}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("capacity", &self.capacity())
            .field("read_index", &self.read_index)
            .field("write_index", &self.write_index)
            .finish()
    }
}

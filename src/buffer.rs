//! A growable, contiguous byte buffer with separate read and write cursors.
//!
//! Three regions are tracked inside the backing `Vec<u8>`:
//!
//! ```text
//! [ prependable | readable | writable ]
//! 0           read_pos  write_pos   capacity
//! ```
//!
//! Reading advances `read_pos`; writing advances `write_pos`. When a write would overflow the
//! writable region, the buffer first compacts (shifting the readable region down to offset 0,
//! reclaiming the prependable region) and only grows the backing storage if that still isn't
//! enough room. Capacity never shrinks below `INITIAL_CAPACITY`.

use std::io::{self, IoSlice, IoSliceMut, Read, Write};

/// Size of the stack scratch space used to drain a socket's kernel buffer in one syscall under
/// edge-triggered readiness, even when the buffer's own writable region is smaller.
const SCRATCH_LEN: usize = 64 * 1024;

const INITIAL_CAPACITY: usize = 1024;

/// A growable FIFO of bytes with read/write cursors and a reclaimable prependable region.
#[derive(Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Creates a buffer with the default initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Creates a buffer with at least `capacity` bytes of initial storage.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Bytes available to read.
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes available to write without compacting or growing.
    pub fn writable_bytes(&self) -> usize {
        self.storage.len() - self.write_pos
    }

    /// Bytes reclaimable ahead of `read_pos`.
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// A view of the readable region. Stable until the next write-side mutation.
    pub fn peek(&self) -> &[u8] {
        &self.storage[self.read_pos..self.write_pos]
    }

    /// Advances `read_pos` by `n`. Panics if `n > readable_bytes()`, mirroring the source's
    /// `assert`-guarded precondition.
    pub fn retrieve(&mut self, n: usize) {
        assert!(n <= self.readable_bytes(), "retrieve past write_pos");
        self.read_pos += n;
        self.compact_if_empty();
    }

    /// Advances `read_pos` up to (and including) `marker`, which must point inside the readable
    /// region returned by a prior `peek()`.
    pub fn retrieve_until(&mut self, marker: *const u8) {
        let base = self.peek().as_ptr();
        let offset = (marker as usize)
            .checked_sub(base as usize)
            .expect("marker precedes readable region");
        self.retrieve(offset);
    }

    /// Resets both cursors to zero and zeroes the storage, matching the source's `RetrieveAll`.
    pub fn retrieve_all(&mut self) {
        self.storage.iter_mut().for_each(|b| *b = 0);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Returns the readable region as an owned `String` and resets the buffer.
    ///
    /// Invalid UTF-8 is replaced rather than propagated as an error: this call is only ever used
    /// to hand diagnostic or already-validated ASCII text to a caller, never parsed request
    /// bytes.
    pub fn take_all_as_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    /// Copies `bytes` into the writable region, growing/compacting first if necessary.
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.write_pos;
        self.storage[start..start + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    /// Ensures at least `n` bytes of writable space, compacting before growing.
    pub fn ensure_writable(&mut self, n: usize) {
        if self.writable_bytes() >= n {
            return;
        }
        if self.writable_bytes() + self.prependable_bytes() >= n {
            self.compact();
        } else {
            self.storage.resize(self.write_pos + n + 1, 0);
        }
        debug_assert!(self.writable_bytes() >= n);
    }

    /// Shifts the readable region down to offset 0, reclaiming the prependable region.
    fn compact(&mut self) {
        let readable = self.readable_bytes();
        self.storage.copy_within(self.read_pos..self.write_pos, 0);
        self.read_pos = 0;
        self.write_pos = readable;
    }

    /// Once the buffer has been fully drained, reclaim the whole region for free instead of
    /// waiting for the next `ensure_writable` to trigger a copy.
    fn compact_if_empty(&mut self) {
        if self.readable_bytes() == 0 {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Scatter-reads from `source` into the writable region plus a stack scratch buffer, so a
    /// single syscall can drain a socket's kernel buffer under edge-triggered readiness even when
    /// this buffer's own writable region is smaller than what's pending.
    ///
    /// Returns `Ok(0)` on EOF, matching `Read::read`'s convention.
    pub fn read_from_fd<R: Read>(&mut self, source: &mut R) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_LEN];
        self.ensure_writable(1);
        let writable = self.writable_bytes();

        let n = {
            let mut slices = [
                IoSliceMut::new(&mut self.storage[self.write_pos..]),
                IoSliceMut::new(&mut scratch),
            ];
            source.read_vectored(&mut slices)?
        };

        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.storage.len();
            self.append(&scratch[..n - writable]);
        }

        Ok(n)
    }

    /// Gathers the readable region plus any caller-supplied trailing slices (e.g. a memory-mapped
    /// file body) into a single `writev`, advancing `read_pos` by however much of *this buffer's*
    /// contribution was written.
    pub fn write_to_fd<W: Write>(&mut self, sink: &mut W, extra: &[IoSlice<'_>]) -> io::Result<usize> {
        let readable = self.readable_bytes();
        let mut slices = Vec::with_capacity(1 + extra.len());
        slices.push(IoSlice::new(self.peek()));
        slices.extend_from_slice(extra);

        let n = sink.write_vectored(&slices)?;
        let consumed_from_buffer = n.min(readable);
        self.retrieve(consumed_from_buffer);
        Ok(n)
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_retrieve_round_trips() {
        let mut buf = Buffer::new();
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.readable_bytes(), 11);
        assert_eq!(buf.peek(), b"hello world");
        buf.retrieve(6);
        assert_eq!(buf.peek(), b"world");
        assert_eq!(buf.prependable_bytes(), 6);
    }

    #[test]
    fn ensure_writable_leaves_enough_room() {
        let mut buf = Buffer::with_capacity(4);
        buf.ensure_writable(100);
        assert!(buf.writable_bytes() >= 100);
    }

    #[test]
    fn retrieve_all_clears_both_cursors() {
        let mut buf = Buffer::new();
        buf.append(b"abc");
        buf.retrieve(1);
        buf.retrieve_all();
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), 0);
    }

    #[test]
    fn compaction_reclaims_prependable_region_instead_of_growing() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"0123456789abcde"); // 15 bytes, 1 byte writable left
        buf.retrieve(10); // prependable = 10, readable = 5
        let cap_before = buf.storage.len();
        buf.append(b"fghijklmno"); // needs 10 more; compaction alone covers it
        assert_eq!(buf.storage.len(), cap_before);
        assert_eq!(buf.peek(), b"abcdefghijklmno");
    }

    #[test]
    fn take_all_as_string_resets_cursors() {
        let mut buf = Buffer::new();
        buf.append(b"GET / HTTP/1.1");
        let s = buf.take_all_as_string();
        assert_eq!(s, "GET / HTTP/1.1");
        assert_eq!(buf.readable_bytes(), 0);
    }

    /// A `Read` whose `read_vectored` fills every supplied slice in turn, the way a real socket's
    /// `readv` does. `std::io::Cursor`'s default `read_vectored` only touches the first slice, so
    /// it can't stand in for a socket in this test.
    struct FakeSocket {
        remaining: Vec<u8>,
    }

    impl Read for FakeSocket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.remaining.len());
            buf[..n].copy_from_slice(&self.remaining[..n]);
            self.remaining.drain(..n);
            Ok(n)
        }

        fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
            let mut total = 0;
            for buf in bufs {
                if self.remaining.is_empty() {
                    break;
                }
                let n = buf.len().min(self.remaining.len());
                buf[..n].copy_from_slice(&self.remaining[..n]);
                self.remaining.drain(..n);
                total += n;
            }
            Ok(total)
        }
    }

    #[test]
    fn read_from_fd_absorbs_overflow_past_writable_region() {
        let mut buf = Buffer::with_capacity(4);
        // Writable region starts at 4 bytes; source has far more than that pending.
        let payload = vec![7u8; SCRATCH_LEN / 2];
        let mut source = FakeSocket {
            remaining: payload.clone(),
        };
        let n = buf.read_from_fd(&mut source).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(buf.readable_bytes(), payload.len());
        assert_eq!(buf.peek(), payload.as_slice());
    }
}

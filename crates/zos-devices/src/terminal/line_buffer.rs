//! Fixed-capacity ring of completed input lines
//!
//! Slots are allocated once at construction (each with room for a full
//! line) and reused; `head` is the next slot to consume, `tail` the next to
//! fill, and `tail == (head + count) % capacity` always holds.

#[derive(Debug)]
pub struct LineBuffer {
    slots: Vec<Vec<u8>>,
    head: usize,
    tail: usize,
    count: usize,
    max_line: usize,
}

impl LineBuffer {
    /// Create a ring of `capacity` slots, each holding up to `max_line` bytes
    pub fn new(capacity: usize, max_line: usize) -> Self {
        assert!(capacity > 0, "line buffer needs at least one slot");
        Self {
            slots: (0..capacity).map(|_| Vec::with_capacity(max_line)).collect(),
            head: 0,
            tail: 0,
            count: 0,
            max_line,
        }
    }

    /// Append a completed line. Returns `false` (and stores nothing) when full.
    ///
    /// Lines longer than `max_line` are truncated.
    pub fn try_push(&mut self, line: &[u8]) -> bool {
        if self.is_full() {
            return false;
        }
        let len = line.len().min(self.max_line);
        let slot = &mut self.slots[self.tail];
        slot.clear();
        slot.extend_from_slice(&line[..len]);
        self.tail = (self.tail + 1) % self.slots.len();
        self.count += 1;
        true
    }

    /// Copy the oldest line into `out` and release its slot.
    ///
    /// At most `out.len()` bytes are copied; the rest of the line is
    /// discarded. Returns `None` when no line is buffered.
    pub fn pop_into(&mut self, out: &mut [u8]) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let slot = &mut self.slots[self.head];
        let n = slot.len().min(out.len());
        out[..n].copy_from_slice(&slot[..n]);
        slot.clear();
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        Some(n)
    }

    /// Discard the oldest line. Returns `false` if there was none.
    pub fn drop_oldest(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.slots[self.head].clear();
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        true
    }

    /// The oldest line, without consuming it
    pub fn peek(&self) -> Option<&[u8]> {
        (!self.is_empty()).then(|| self.slots[self.head].as_slice())
    }

    /// Buffered lines, oldest first
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.count).map(move |i| self.slots[(self.head + i) % self.slots.len()].as_slice())
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_in_order() {
        let mut lb = LineBuffer::new(3, 16);
        assert!(lb.try_push(b"one\n"));
        assert!(lb.try_push(b"two\n"));

        let mut out = [0u8; 16];
        assert_eq!(lb.pop_into(&mut out), Some(4));
        assert_eq!(&out[..4], b"one\n");
        assert_eq!(lb.peek(), Some(&b"two\n"[..]));
        assert_eq!(lb.len(), 1);
    }

    #[test]
    fn test_full_rejects_push() {
        let mut lb = LineBuffer::new(2, 8);
        assert!(lb.try_push(b"a"));
        assert!(lb.try_push(b"b"));
        assert!(lb.is_full());
        assert!(!lb.try_push(b"c"));
        assert_eq!(lb.lines().collect::<Vec<_>>(), vec![&b"a"[..], &b"b"[..]]);
    }

    #[test]
    fn test_wraparound() {
        let mut lb = LineBuffer::new(2, 8);
        let mut out = [0u8; 8];
        for round in 0..5u8 {
            assert!(lb.try_push(&[b'0' + round]));
            assert_eq!(lb.pop_into(&mut out), Some(1));
            assert_eq!(out[0], b'0' + round);
        }
        assert!(lb.is_empty());
        assert_eq!(lb.head(), lb.tail());
        assert_eq!(lb.head(), 1);
    }

    #[test]
    fn test_short_read_discards_rest() {
        let mut lb = LineBuffer::new(2, 16);
        lb.try_push(b"hello world\n");
        lb.try_push(b"next\n");

        let mut out = [0u8; 5];
        assert_eq!(lb.pop_into(&mut out), Some(5));
        assert_eq!(&out, b"hello");
        assert_eq!(lb.peek(), Some(&b"next\n"[..]));
    }

    #[test]
    fn test_truncates_long_lines() {
        let mut lb = LineBuffer::new(1, 4);
        lb.try_push(b"abcdefgh");
        assert_eq!(lb.peek(), Some(&b"abcd"[..]));
    }

    #[test]
    fn test_drop_oldest() {
        let mut lb = LineBuffer::new(2, 8);
        assert!(!lb.drop_oldest());
        lb.try_push(b"x");
        lb.try_push(b"y");
        assert!(lb.drop_oldest());
        assert!(lb.try_push(b"z"));
        assert_eq!(lb.lines().collect::<Vec<_>>(), vec![&b"y"[..], &b"z"[..]]);
    }

    #[test]
    fn test_pop_empty() {
        let mut lb = LineBuffer::new(1, 4);
        let mut out = [0u8; 4];
        assert_eq!(lb.pop_into(&mut out), None);
        assert_eq!(lb.peek(), None);
    }
}

/// Bounds-checked cursor over a byte slice.
///
/// Every read either returns the requested bytes or `None` without moving
/// the cursor, so frame parsers never index past the end of a buffer.
/// Multi-byte integers are little-endian, as on the air.

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reader positioned at `pos`. `None` if `pos` lies beyond the buffer.
    pub fn at(buf: &'a [u8], pos: usize) -> Option<Self> {
        if pos > buf.len() {
            return None;
        }
        Some(Self { buf, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn u8(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    pub fn i8(&mut self) -> Option<i8> {
        self.u8().map(|b| b as i8)
    }

    pub fn u16_le(&mut self) -> Option<u16> {
        self.array::<2>().map(|b| u16::from_le_bytes(*b))
    }

    pub fn u32_le(&mut self) -> Option<u32> {
        self.array::<4>().map(|b| u32::from_le_bytes(*b))
    }

    pub fn i32_le(&mut self) -> Option<i32> {
        self.array::<4>().map(|b| i32::from_le_bytes(*b))
    }

    /// Take the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    /// Take the next `N` bytes as a fixed-size array reference.
    pub fn array<const N: usize>(&mut self) -> Option<&'a [u8; N]> {
        let end = self.pos.checked_add(N)?;
        let out: &'a [u8; N] = self.buf.get(self.pos..end)?.try_into().ok()?;
        self.pos = end;
        Some(out)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.bytes(n).map(|_| ())
    }

    /// Split off the next `n` bytes as a nested reader. The nested reader can
    /// never see past those `n` bytes.
    pub fn sub(&mut self, n: usize) -> Option<Reader<'a>> {
        self.bytes(n).map(Reader::new)
    }

    /// Consume everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Check the next bytes against `expected` and consume them on a match.
    pub fn expect(&mut self, expected: &[u8]) -> Option<()> {
        let end = self.pos.checked_add(expected.len())?;
        if self.buf.get(self.pos..end)? != expected {
            return None;
        }
        self.pos = end;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_integers() {
        let buf = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF];
        let mut r = Reader::new(&buf);
        assert_eq!(r.u16_le(), Some(0x1234));
        assert_eq!(r.u32_le(), Some(0x1234_5678));
        assert_eq!(r.i8(), Some(-1));
        assert!(r.is_empty());
    }

    #[test]
    fn short_read_leaves_cursor_in_place() {
        let buf = [1, 2, 3];
        let mut r = Reader::new(&buf);
        assert_eq!(r.u8(), Some(1));
        assert_eq!(r.u32_le(), None);
        assert_eq!(r.position(), 1);
        assert_eq!(r.bytes(2), Some(&[2u8, 3][..]));
        assert_eq!(r.u8(), None);
    }

    #[test]
    fn huge_length_does_not_overflow() {
        let buf = [0u8; 4];
        let mut r = Reader::at(&buf, 2).unwrap();
        assert_eq!(r.bytes(usize::MAX), None);
        assert_eq!(r.skip(usize::MAX - 1), None);
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn at_rejects_position_past_end() {
        let buf = [0u8; 4];
        assert!(Reader::at(&buf, 4).is_some());
        assert!(Reader::at(&buf, 5).is_none());
    }

    #[test]
    fn sub_reader_is_bounded() {
        let buf = [1, 2, 3, 4, 5];
        let mut r = Reader::new(&buf);
        let mut inner = r.sub(2).unwrap();
        assert_eq!(inner.u8(), Some(1));
        assert_eq!(inner.u8(), Some(2));
        assert_eq!(inner.u8(), None);
        assert_eq!(r.u8(), Some(3));
    }

    #[test]
    fn expect_matches_prefix() {
        let buf = [0x50, 0x6F, 0x9A, 0x13];
        let mut r = Reader::new(&buf);
        assert_eq!(r.expect(&[0x50, 0x6F, 0x00]), None);
        assert_eq!(r.position(), 0);
        assert_eq!(r.expect(&[0x50, 0x6F, 0x9A]), Some(()));
        assert_eq!(r.u8(), Some(0x13));
    }
}

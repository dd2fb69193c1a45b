use crate::Error;

/// A read-only view over a contiguous byte slice plus a cursor position.
///
/// `Cursor` never allocates on its own behalf; callers that need to retain
/// bytes past the cursor's lifetime copy them out via `take_bytes`/
/// `take_string`. All multi-byte integers are decoded little-endian.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The unread tail of the underlying slice.
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn require(&self, n: usize) -> Result<(), Error> {
        if n > self.remaining() {
            return Err(Error::Truncated);
        }
        Ok(())
    }

    pub fn take_u8(&mut self) -> Result<u8, Error> {
        self.require(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn take_u16(&mut self) -> Result<u16, Error> {
        let bytes = self.take_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn take_u32(&mut self) -> Result<u32, Error> {
        let bytes = self.take_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        self.require(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    pub fn take_bytes(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        self.require(n)?;
        let out = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// Copies `n` bytes out and interprets them as a string. No encoding
    /// validation is performed beyond a lossy UTF-8 pass-through.
    pub fn take_string(&mut self, n: usize) -> Result<String, Error> {
        let bytes = self.take_bytes(n)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.require(n)?;
        self.pos += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut c = Cursor::new(&data);
        assert_eq!(c.take_u8().unwrap(), 0x01);
        assert_eq!(c.take_u16().unwrap(), 0x0403);
        assert_eq!(c.remaining(), 1);
    }

    #[test]
    fn take_u32_is_little_endian() {
        let data = [0x78, 0x56, 0x34, 0x12];
        let mut c = Cursor::new(&data);
        assert_eq!(c.take_u32().unwrap(), 0x1234_5678);
    }

    #[test]
    fn truncated_reads_fail_without_consuming() {
        let data = [0xAA];
        let mut c = Cursor::new(&data);
        assert!(matches!(c.take_u16(), Err(Error::Truncated)));
        // a failed read should not have changed position: the byte is
        // still there for callers that recover, though none do here.
        assert_eq!(c.remaining(), 1);
    }

    #[test]
    fn skip_and_array_and_string() {
        let data = b"\x00\x00hi there";
        let mut c = Cursor::new(data);
        c.skip(2).unwrap();
        let word: [u8; 2] = c.take_array().unwrap();
        assert_eq!(&word, b"hi");
        c.skip(1).unwrap();
        let s = c.take_string(5).unwrap();
        assert_eq!(s, "there");
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn skip_past_end_is_truncated() {
        let data = [0u8; 3];
        let mut c = Cursor::new(&data);
        assert!(matches!(c.skip(4), Err(Error::Truncated)));
    }
}

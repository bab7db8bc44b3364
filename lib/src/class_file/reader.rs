use crate::errors::MalformedClassError;
use byteorder::{BigEndian, ByteOrder};

/// Cursor over raw class-file bytes
///
/// All multi-byte quantities in the class-file format are big-endian. Every read is
/// bounds-checked and failures carry the byte offset at which the input ran out, so parse errors
/// can point at the exact spot in the file.
pub(crate) struct ClassReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    pub fn new(bytes: &'a [u8]) -> ClassReader<'a> {
        ClassReader { bytes, pos: 0 }
    }

    /// Current byte offset into the file
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    /// Make a parse error at the current offset
    pub fn error(&self, message: impl Into<String>) -> MalformedClassError {
        MalformedClassError::new(self.pos, message)
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], MalformedClassError> {
        match self.bytes.get(self.pos..self.pos + n) {
            Some(taken) => {
                self.pos += n;
                Ok(taken)
            }
            None => Err(MalformedClassError::new(
                self.pos,
                format!("input truncated while reading {}", what),
            )),
        }
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8, MalformedClassError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn read_u16(&mut self, what: &str) -> Result<u16, MalformedClassError> {
        Ok(BigEndian::read_u16(self.take(2, what)?))
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32, MalformedClassError> {
        Ok(BigEndian::read_u32(self.take(4, what)?))
    }

    pub fn read_i32(&mut self, what: &str) -> Result<i32, MalformedClassError> {
        Ok(BigEndian::read_i32(self.take(4, what)?))
    }

    pub fn read_i64(&mut self, what: &str) -> Result<i64, MalformedClassError> {
        Ok(BigEndian::read_i64(self.take(8, what)?))
    }

    pub fn read_f32(&mut self, what: &str) -> Result<f32, MalformedClassError> {
        Ok(BigEndian::read_f32(self.take(4, what)?))
    }

    pub fn read_f64(&mut self, what: &str) -> Result<f64, MalformedClassError> {
        Ok(BigEndian::read_f64(self.take(8, what)?))
    }

    pub fn read_bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8], MalformedClassError> {
        self.take(n, what)
    }

    pub fn skip(&mut self, n: usize, what: &str) -> Result<(), MalformedClassError> {
        self.take(n, what).map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_are_big_endian() {
        let mut reader = ClassReader::new(&[0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34]);
        assert_eq!(reader.read_u32("magic").unwrap(), 0xCAFE_BABE);
        assert_eq!(reader.read_u16("version").unwrap(), 0x0034);
        assert!(reader.at_end());
    }

    #[test]
    fn truncation_reports_offset() {
        let mut reader = ClassReader::new(&[0x00, 0x01]);
        assert_eq!(reader.read_u16("count").unwrap(), 1);
        let err = reader.read_u32("value").unwrap_err();
        assert_eq!(err.offset, 2);
    }
}

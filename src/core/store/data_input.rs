// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

use byteorder::{ByteOrder, LittleEndian};

use error::ErrorKind::*;
use error::Result;

use std::cmp::min;
use std::io::Read;

/// Trait for performing read operations of the codec's low-level data types.
///
/// Multi-byte integers are little endian; variable-length integers use the
/// usual 7-bits-per-byte encoding with the high bit as the continuation flag.
pub trait DataInput: Read {
    fn read_byte(&mut self) -> Result<u8> {
        let mut buffer = [0u8; 1];
        if self.read(&mut buffer)? != 1 {
            bail!(UnexpectedEOF(
                "Reached EOF when a single byte is expected".to_owned()
            ))
        } else {
            Ok(buffer[0])
        }
    }

    fn read_bytes(&mut self, b: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let end = offset + length;
        if b.len() < end {
            let msg = format!(
                "Buffer too small: reading [{}, {}) into [0, {})",
                offset,
                end,
                b.len(),
            );
            bail!(IllegalArgument(msg));
        }

        let mut blob = &mut b[offset..end];

        if self.read(&mut blob)? != length {
            bail!(UnexpectedEOF(format!(
                "Reached EOF when {} bytes are expected",
                length
            )))
        } else {
            Ok(())
        }
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buffer = [0u8; 2];
        self.read_exact(&mut buffer)?;
        Ok(LittleEndian::read_u16(&buffer))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buffer = [0u8; 4];
        self.read_exact(&mut buffer)?;
        Ok(LittleEndian::read_u32(&buffer))
    }

    fn read_vint(&mut self) -> Result<u32> {
        let mut b = self.read_byte()?;
        if b & 0x80 == 0 {
            return Ok(u32::from(b));
        }

        let mut i = u32::from(b & 0x7f);
        b = self.read_byte()?;
        i |= u32::from(b & 0x7f) << 7;
        if b & 0x80 == 0 {
            return Ok(i);
        }

        b = self.read_byte()?;
        i |= u32::from(b & 0x7f) << 14;
        if b & 0x80 == 0 {
            return Ok(i);
        }

        b = self.read_byte()?;
        i |= u32::from(b & 0x7f) << 21;
        if b & 0x80 == 0 {
            return Ok(i);
        }

        b = self.read_byte()?;
        i |= u32::from(b & 0x0f) << 28;

        if b & 0xf0 != 0 {
            bail!(CorruptIndex("Invalid vInt detected".to_owned()));
        }

        Ok(i)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        let mut skipped = 0usize;
        let mut buffer = [0u8; 128];
        while skipped < count {
            let step = min(buffer.len(), count - skipped);
            self.read_bytes(&mut buffer, 0, step)?;
            skipped += step;
        }
        Ok(())
    }
}

/// `DataInput` backed by a byte slice; every access is bounds checked so a
/// truncated or corrupt region surfaces as an error instead of a panic.
pub struct ByteSliceDataInput<T: AsRef<[u8]>> {
    bytes: T,
    pos: usize,
    limit: usize,
}

impl<T: AsRef<[u8]>> ByteSliceDataInput<T> {
    pub fn new(bytes: T) -> ByteSliceDataInput<T> {
        let limit = bytes.as_ref().len();
        ByteSliceDataInput {
            bytes,
            pos: 0,
            limit,
        }
    }

    /// Restricts reads to the `[offset, offset + len)` window and positions
    /// the cursor at its start.
    pub fn with_window(bytes: T, offset: usize, len: usize) -> Result<ByteSliceDataInput<T>> {
        if offset + len > bytes.as_ref().len() {
            bail!(CorruptIndex(format!(
                "window [{}, {}) is beyond the {} bytes available",
                offset,
                offset + len,
                bytes.as_ref().len()
            )));
        }
        Ok(ByteSliceDataInput {
            bytes,
            pos: offset,
            limit: offset + len,
        })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.limit {
            bail!(CorruptIndex(format!(
                "position {} is beyond the input limit {}",
                pos, self.limit
            )));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    pub fn eof(&self) -> bool {
        self.pos == self.limit
    }

    /// Borrows `len` raw bytes at the cursor and advances past them.
    pub fn read_slice(&mut self, len: usize) -> Result<&[u8]> {
        if len > self.remaining() {
            bail!(UnexpectedEOF(format!(
                "Reached EOF when {} bytes are expected",
                len
            )));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes.as_ref()[start..start + len])
    }
}

impl<T: AsRef<[u8]>> DataInput for ByteSliceDataInput<T> {
    fn read_byte(&mut self) -> Result<u8> {
        if self.pos == self.limit {
            bail!(UnexpectedEOF(
                "Reached EOF when a single byte is expected".to_owned()
            ));
        }
        let b = self.bytes.as_ref()[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if count > self.remaining() {
            bail!(UnexpectedEOF(format!(
                "Cannot skip {} bytes, only {} remain",
                count,
                self.remaining()
            )));
        }
        self.pos += count;
        Ok(())
    }
}

impl<T: AsRef<[u8]>> Read for ByteSliceDataInput<T> {
    fn read(&mut self, buf: &mut [u8]) -> ::std::io::Result<usize> {
        let size = min(buf.len(), self.remaining());
        buf[0..size].copy_from_slice(&self.bytes.as_ref()[self.pos..self.pos + size]);
        self.pos += size;
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_vint() {
        let bytes = vec![0x00, 0x7f, 0x80, 0x01, 0xff, 0xff, 0xff, 0xff, 0x0f];
        let mut input = ByteSliceDataInput::new(bytes);

        assert_eq!(input.read_vint().unwrap(), 0);
        assert_eq!(input.read_vint().unwrap(), 127);
        assert_eq!(input.read_vint().unwrap(), 128);
        assert_eq!(input.read_vint().unwrap(), ::std::u32::MAX);
        assert!(input.eof());
    }

    #[test]
    fn test_read_vint_rejects_overlong() {
        let mut input = ByteSliceDataInput::new(vec![0xff, 0xff, 0xff, 0xff, 0x1f]);
        assert!(input.read_vint().is_err());
    }

    #[test]
    fn test_eof_is_an_error() {
        let mut input = ByteSliceDataInput::new(vec![0x01]);
        assert_eq!(input.read_byte().unwrap(), 1);
        assert!(input.read_byte().is_err());
        assert!(input.skip_bytes(1).is_err());
    }

    #[test]
    fn test_window() {
        let bytes = vec![1u8, 2, 3, 4, 5];
        let mut input = ByteSliceDataInput::with_window(bytes, 1, 3).unwrap();
        assert_eq!(input.read_byte().unwrap(), 2);
        assert_eq!(input.read_slice(2).unwrap(), &[3, 4]);
        assert!(input.eof());
        assert!(input.read_byte().is_err());
    }
}

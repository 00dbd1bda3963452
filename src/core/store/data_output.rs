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

use error::ErrorKind::IllegalArgument;
use error::Result;

use std::io::{self, Write};

/// Trait for performing write operations of the codec's low-level data types.
pub trait DataOutput: Write {
    fn write_byte(&mut self, b: u8) -> Result<()> {
        let buf = [b; 1];
        self.write_all(&buf)?;
        Ok(())
    }

    #[inline]
    fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.write_all(b)?;
        Ok(())
    }

    fn write_u16(&mut self, i: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, i);
        self.write_all(&buf)?;
        Ok(())
    }

    fn write_u32(&mut self, i: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, i);
        self.write_all(&buf)?;
        Ok(())
    }

    fn write_vint(&mut self, i: u32) -> Result<()> {
        let mut i = i;
        while (i & !0x7f_u32) != 0 {
            self.write_byte(((i & 0x7f) | 0x80) as u8)?;
            i >>= 7;
        }
        self.write_byte(i as u8)
    }
}

impl DataOutput for Vec<u8> {}

/// Growable in-memory output the encoder streams a segment's per-term chunks
/// into. Supports back-patching of previously written header words.
pub struct RamOutput {
    buffer: Vec<u8>,
}

impl Default for RamOutput {
    fn default() -> Self {
        RamOutput {
            buffer: Vec::with_capacity(1024),
        }
    }
}

impl RamOutput {
    pub fn new() -> RamOutput {
        Default::default()
    }

    pub fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        if offset + 4 > self.buffer.len() {
            bail!(IllegalArgument(format!(
                "patch at {} is beyond the {} bytes written",
                offset,
                self.buffer.len()
            )));
        }
        LittleEndian::write_u32(&mut self.buffer[offset..offset + 4], value);
        Ok(())
    }

    pub fn patch_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        if offset + 2 > self.buffer.len() {
            bail!(IllegalArgument(format!(
                "patch at {} is beyond the {} bytes written",
                offset,
                self.buffer.len()
            )));
        }
        LittleEndian::write_u16(&mut self.buffer[offset..offset + 2], value);
        Ok(())
    }
}

impl Write for RamOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DataOutput for RamOutput {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::{ByteSliceDataInput, DataInput};

    #[test]
    fn test_vint_round_trip() {
        let mut out = RamOutput::new();
        let values = [0u32, 1, 127, 128, 300, 16383, 16384, ::std::u32::MAX];
        for &v in &values {
            out.write_vint(v).unwrap();
        }

        let mut input = ByteSliceDataInput::new(out.into_bytes());
        for &v in &values {
            assert_eq!(input.read_vint().unwrap(), v);
        }
        assert!(input.eof());
    }

    #[test]
    fn test_patch() {
        let mut out = RamOutput::new();
        out.write_u32(0).unwrap();
        out.write_u16(0).unwrap();
        out.write_byte(0xab).unwrap();

        out.patch_u32(0, 0xdead_beef).unwrap();
        out.patch_u16(4, 0x1234).unwrap();
        assert!(out.patch_u32(4, 1).is_err());

        let mut input = ByteSliceDataInput::new(out.into_bytes());
        assert_eq!(input.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(input.read_u16().unwrap(), 0x1234);
        assert_eq!(input.read_byte().unwrap(), 0xab);
    }
}

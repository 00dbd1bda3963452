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

//! Block codec for fixed-size groups of 32-bit integers.
//!
//! Every block starts with a tag byte:
//!
//! - `0` — all values are equal; a single varbyte follows.
//! - `1` — a varbyte stream, one varbyte per value.
//! - `n >= 2` — bit packed; `n` is the payload length in 32-bit words, so a
//!   reader can step over the block without unpacking it. Only emitted for
//!   full blocks, where the bit width is recovered as `n / 4`.
//!
//! The writer picks whichever variant is smallest, so the exact choice never
//! leaks into readers.

use core::codec::BLOCK_SIZE;
use core::store::{ByteSliceDataInput, DataInput, DataOutput};
use error::ErrorKind::CorruptIndex;
use error::Result;

/// Tag of a block whose values are all equal.
const ALL_VALUES_EQUAL: u8 = 0;

/// Tag of a varbyte-stream block.
const VARBYTE_STREAM: u8 = 1;

fn is_all_equal(values: &[u32]) -> bool {
    let v = values[0];
    values[1..].iter().all(|x| *x == v)
}

fn bits_required(values: &[u32]) -> u32 {
    let mut or = 0u32;
    for v in values {
        or |= *v;
    }
    // an all-zero block is caught by the all-equal case first
    32 - or.leading_zeros()
}

fn varbyte_len(mut v: u32) -> usize {
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

fn pack(values: &[u32], bits: u32, out: &mut Vec<u8>) {
    let mask = (1u64 << bits) - 1;
    let mut acc = 0u64;
    let mut acc_bits = 0u32;

    for &v in values {
        acc |= (u64::from(v) & mask) << acc_bits;
        acc_bits += bits;
        while acc_bits >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            acc_bits -= 8;
        }
    }
    debug_assert_eq!(acc_bits, 0);
}

fn unpack(payload: &[u8], bits: u32, values: &mut [u32]) {
    let mask = (1u64 << bits) - 1;
    let mut acc = 0u64;
    let mut acc_bits = 0u32;
    let mut next = 0usize;

    for value in values.iter_mut() {
        while acc_bits < bits {
            acc |= u64::from(payload[next]) << acc_bits;
            next += 1;
            acc_bits += 8;
        }
        *value = (acc & mask) as u32;
        acc >>= bits;
        acc_bits -= bits;
    }
}

/// Encodes `values` (at most `BLOCK_SIZE` of them) into `out`. Encoding an
/// empty slice emits nothing.
pub fn write_block<O: DataOutput + ?Sized>(values: &[u32], out: &mut O) -> Result<()> {
    debug_assert!(values.len() <= BLOCK_SIZE);

    if values.is_empty() {
        return Ok(());
    }

    if is_all_equal(values) {
        out.write_byte(ALL_VALUES_EQUAL)?;
        return out.write_vint(values[0]);
    }

    if values.len() == BLOCK_SIZE {
        let bits = bits_required(values);
        let packed_words = bits as usize * BLOCK_SIZE / 32;
        let varbyte_size: usize = values.iter().map(|&v| varbyte_len(v)).sum();

        if packed_words * 4 < varbyte_size {
            let mut payload = Vec::with_capacity(packed_words * 4);
            pack(values, bits, &mut payload);
            out.write_byte(packed_words as u8)?;
            return out.write_bytes(&payload);
        }
    }

    out.write_byte(VARBYTE_STREAM)?;
    for &v in values {
        out.write_vint(v)?;
    }
    Ok(())
}

/// Decodes exactly `values.len()` integers from `input`, advancing the cursor
/// past the block. Decoding into an empty slice consumes nothing.
pub fn read_block<T: AsRef<[u8]>>(
    input: &mut ByteSliceDataInput<T>,
    values: &mut [u32],
) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }

    let tag = input.read_byte()?;
    match tag {
        ALL_VALUES_EQUAL => {
            let v = input.read_vint()?;
            for value in values.iter_mut() {
                *value = v;
            }
        }
        VARBYTE_STREAM => {
            for value in values.iter_mut() {
                *value = input.read_vint()?;
            }
        }
        words => {
            if values.len() != BLOCK_SIZE || words % 4 != 0 || words > 128 {
                bail!(CorruptIndex(format!(
                    "bit-packed block with tag {} cannot hold {} values",
                    words,
                    values.len()
                )));
            }
            let bits = u32::from(words) / 4;
            let payload = input.read_slice(words as usize * 4)?;
            unpack(payload, bits, values);
        }
    }
    Ok(())
}

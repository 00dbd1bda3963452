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

use core::store::DataOutput;
use core::util::DocId;
use error::ErrorKind::CorruptIndex;
use error::Result;

/// Serialized size of one skip-list entry.
pub const SKIP_ENTRY_BYTES: usize = 4 * 5 + 2;

/// Jump target recorded after every full document block: enough state to
/// re-enter both the document stream and the hits stream at the block's
/// first document.
///
/// All fields describe the state *before* the block: `last_doc_id` is the id
/// of the last document of the previous block, `cur_hits_block_hits` counts
/// how many hits at the head of the recorded hits block belong to earlier
/// documents and must be stepped over after a jump.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SkipEntry {
    pub index_offset: u32,
    pub last_doc_id: DocId,
    pub last_hits_block_offset: u32,
    pub total_documents: u32,
    pub total_hits: u32,
    pub cur_hits_block_hits: u16,
}

impl SkipEntry {
    pub fn write_to<O: DataOutput + ?Sized>(&self, out: &mut O) -> Result<()> {
        out.write_u32(self.index_offset)?;
        out.write_u32(self.last_doc_id)?;
        out.write_u32(self.last_hits_block_offset)?;
        out.write_u32(self.total_documents)?;
        out.write_u32(self.total_hits)?;
        out.write_u16(self.cur_hits_block_hits)
    }

    fn read_from(bytes: &[u8]) -> SkipEntry {
        SkipEntry {
            index_offset: LittleEndian::read_u32(&bytes[0..]),
            last_doc_id: LittleEndian::read_u32(&bytes[4..]),
            last_hits_block_offset: LittleEndian::read_u32(&bytes[8..]),
            total_documents: LittleEndian::read_u32(&bytes[12..]),
            total_hits: LittleEndian::read_u32(&bytes[16..]),
            cur_hits_block_hits: LittleEndian::read_u16(&bytes[20..]),
        }
    }
}

/// Deserializes `count` entries from the tail of a term chunk.
pub fn read_skip_list(bytes: &[u8], count: usize) -> Result<Vec<SkipEntry>> {
    if bytes.len() < count * SKIP_ENTRY_BYTES {
        bail!(CorruptIndex(format!(
            "skip list of {} entries needs {} bytes, {} available",
            count,
            count * SKIP_ENTRY_BYTES,
            bytes.len()
        )));
    }
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        entries.push(SkipEntry::read_from(&bytes[i * SKIP_ENTRY_BYTES..]));
    }
    Ok(entries)
}

/// Branchless binary search over `entries[from..]` for the largest entry with
/// `last_doc_id < target`, i.e. the latest block that may still contain
/// `target`. Returns `None` when no entry qualifies and the caller should
/// keep scanning sequentially.
pub fn search(entries: &[SkipEntry], from: usize, target: DocId) -> Option<usize> {
    if from >= entries.len() {
        return None;
    }

    let mut base = from;
    let mut n = entries.len() - from;
    loop {
        let half = n / 2;
        if half == 0 {
            break;
        }
        if entries[base + half].last_doc_id < target {
            base += half;
        }
        n -= half;
    }

    if entries[base].last_doc_id < target {
        Some(base)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::store::RamOutput;

    fn entry(last_doc_id: DocId) -> SkipEntry {
        SkipEntry {
            last_doc_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip() {
        let entries = vec![
            SkipEntry {
                index_offset: 14,
                last_doc_id: 0,
                last_hits_block_offset: 0,
                total_documents: 0,
                total_hits: 0,
                cur_hits_block_hits: 0,
            },
            SkipEntry {
                index_offset: 310,
                last_doc_id: 128,
                last_hits_block_offset: 771,
                total_documents: 128,
                total_hits: 256,
                cur_hits_block_hits: 3,
            },
        ];

        let mut out = RamOutput::new();
        for e in &entries {
            e.write_to(&mut out).unwrap();
        }
        let bytes = out.into_bytes();
        assert_eq!(bytes.len(), entries.len() * SKIP_ENTRY_BYTES);

        let decoded = read_skip_list(&bytes, entries.len()).unwrap();
        assert_eq!(decoded, entries);

        assert!(read_skip_list(&bytes[1..], entries.len()).is_err());
    }

    #[test]
    fn test_search() {
        let entries: Vec<SkipEntry> = [0u32, 128, 263, 391, 512]
            .iter()
            .map(|&d| entry(d))
            .collect();

        // no entry precedes the very first block
        assert_eq!(search(&entries, 0, 0), None);
        assert_eq!(search(&entries, 0, 1), Some(0));
        assert_eq!(search(&entries, 0, 128), Some(0));
        assert_eq!(search(&entries, 0, 129), Some(1));
        assert_eq!(search(&entries, 0, 400), Some(3));
        assert_eq!(search(&entries, 0, 10_000), Some(4));

        // a consumed prefix is never revisited
        assert_eq!(search(&entries, 2, 129), None);
        assert_eq!(search(&entries, 2, 400), Some(3));
        assert_eq!(search(&entries, 5, 10_000), None);
    }
}

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

pub mod block;

mod skip;

pub use self::skip::*;

mod posting_writer;

pub use self::posting_writer::*;

mod posting_reader;

pub use self::posting_reader::*;

use core::search::TermHits;
use core::util::{DocId, DocWordsSpace, ExecTermId};
use error::Result;

/// Fixed number of integers encoded in a single compressed block, for both
/// the document stream and the hits stream.
pub const BLOCK_SIZE: usize = 128;

/// A skip-list entry is recorded every `SKIPLIST_STEP` full document blocks.
pub const SKIPLIST_STEP: u32 = 1;

/// When set, a trailing document with `freq == 1` is folded into the low bit
/// of its delta varbyte instead of being followed by a frequency varbyte.
pub const PACK_UNIT_FREQ: bool = true;

/// Per-term chunk header: `u32 hitsDataOffset`, `u32 sumHits`,
/// `u32 positionsChunkSize`, `u16 skipListSize`.
pub const TERM_HEADER_BYTES: usize = 14;

/// Byte range of one term's chunk within the postings region.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IndexChunk {
    pub offset: u64,
    pub size: u32,
}

/// Everything the query layer needs to know about one term of an index
/// source: how many documents it appears in and where its chunk lives.
#[derive(Clone, Copy, Debug, Default)]
pub struct TermIndexCtx {
    pub documents: u32,
    pub index_chunk: IndexChunk,
}

/// Document the decoder is currently positioned on.
#[derive(Clone, Copy, Debug)]
pub struct CurrentDocument {
    pub id: DocId,
    pub freq: u32,
}

impl Default for CurrentDocument {
    fn default() -> Self {
        CurrentDocument { id: 0, freq: 0 }
    }
}

/// Streaming cursor over one term's posting list.
///
/// `begin` must be called before any other method. After `begin`, and after
/// every `next`/`seek` that returns without exhausting the stream,
/// `cur_document` names the document the cursor is parked on. Exhaustion
/// parks the cursor on `DOC_IDS_END`.
pub trait PostingsDecoder {
    /// Positions at the first document of the list.
    fn begin(&mut self) -> Result<()>;

    /// Advances one document; false means the list is exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Advances to the first document with id `>= target`; true iff the
    /// cursor landed exactly on `target`. Never moves backwards.
    fn seek(&mut self, target: DocId) -> Result<bool>;

    /// Decodes the current document's hits into `out` and marks each nonzero
    /// position in `dws` under `term_id`. Must be called at most once per
    /// document position.
    fn materialize_hits(
        &mut self,
        term_id: ExecTermId,
        dws: &mut DocWordsSpace,
        out: &mut TermHits,
    ) -> Result<()>;

    fn cur_document(&self) -> &CurrentDocument;
}

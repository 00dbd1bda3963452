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

use core::codec::block;
use core::codec::{
    skip, CurrentDocument, PostingsDecoder, SkipEntry, TermIndexCtx, BLOCK_SIZE, PACK_UNIT_FREQ,
    SKIP_ENTRY_BYTES, TERM_HEADER_BYTES,
};
use core::search::{Hit, TermHits};
use core::store::{ByteSliceDataInput, DataInput, ReadOnlySource};
use core::util::{DocId, DocWordsSpace, ExecTermId, DOC_IDS_END};
use error::ErrorKind::CorruptIndex;
use error::Result;

use byteorder::{ByteOrder, LittleEndian};

use std::cmp::min;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

/// Owns the mapped postings and hits regions a segment's decoders read from.
/// Decoders hold cheap clones of the underlying sources, so the proxy may be
/// dropped before they are; the mappings themselves are released with the
/// last clone.
pub struct AccessProxy {
    index: ReadOnlySource,
    hits: ReadOnlySource,
}

impl AccessProxy {
    pub fn new(index: ReadOnlySource, hits: ReadOnlySource) -> AccessProxy {
        AccessProxy { index, hits }
    }

    /// Maps `<base_path>/hits.data` next to the given postings region. A
    /// missing hits file is fine (the segment has no positions).
    pub fn open(base_path: &Path, index: ReadOnlySource) -> Result<AccessProxy> {
        let hits = match ReadOnlySource::map_file(&base_path.join("hits.data")) {
            Ok(source) => source,
            Err(ref e) if io_not_found(e) => ReadOnlySource::empty(),
            Err(e) => return Err(e),
        };
        Ok(AccessProxy { index, hits })
    }

    pub fn index_bytes(&self) -> &[u8] {
        &self.index
    }

    pub fn hits_bytes(&self) -> &[u8] {
        &self.hits
    }

    pub fn new_decoder(&self, tctx: &TermIndexCtx) -> Result<BlockPostingsDecoder> {
        BlockPostingsDecoder::new(self, tctx)
    }
}

fn io_not_found(e: &::error::Error) -> bool {
    match *e.kind() {
        ::error::ErrorKind::IoError(ref io) => io.kind() == IoErrorKind::NotFound,
        _ => false,
    }
}

/// Cursor over one term's block-compressed posting list.
///
/// Decoded state lives in fixed arrays refilled a block at a time. Hits are
/// decoded lazily: `next`/`seek` only count how many hits were stepped over
/// (`skipped_hits`), and `materialize_hits` drains that debt before decoding
/// the current document's hits.
pub struct BlockPostingsDecoder {
    index: ReadOnlySource,
    hits: ReadOnlySource,

    chunk_start: usize,
    chunk_end: usize,
    hits_base: usize,
    hits_end: usize,
    total_documents: u32,
    total_hits: u32,
    skiplist: Vec<SkipEntry>,

    doc_deltas: [u32; BLOCK_SIZE],
    doc_freqs: [u32; BLOCK_SIZE],
    hit_pos_deltas: [u32; BLOCK_SIZE],
    hit_payload_lens: [u32; BLOCK_SIZE],

    p: usize,
    hdp: usize,
    payloads_it: usize,
    payloads_end: usize,

    docs_index: usize,
    hits_index: usize,
    buffered_docs: usize,
    buffered_hits: usize,
    docs_left: u32,
    hits_left: u32,
    skipped_hits: u32,
    last_doc_id: DocId,
    skip_list_idx: usize,

    cur_doc: CurrentDocument,
}

impl BlockPostingsDecoder {
    fn new(proxy: &AccessProxy, tctx: &TermIndexCtx) -> Result<BlockPostingsDecoder> {
        let offset = tctx.index_chunk.offset as usize;
        let size = tctx.index_chunk.size as usize;
        let index_bytes = proxy.index_bytes();

        if size < TERM_HEADER_BYTES || offset + size > index_bytes.len() {
            bail!(CorruptIndex(format!(
                "term chunk [{}, {}) is beyond the {} index bytes",
                offset,
                offset + size,
                index_bytes.len()
            )));
        }

        let chunk = &index_bytes[offset..offset + size];
        let hits_base = LittleEndian::read_u32(&chunk[0..]) as usize;
        let total_hits = LittleEndian::read_u32(&chunk[4..]);
        let positions_chunk_size = LittleEndian::read_u32(&chunk[8..]) as usize;
        let skiplist_size = LittleEndian::read_u16(&chunk[12..]) as usize;

        let skiplist_bytes = skiplist_size * SKIP_ENTRY_BYTES;
        if TERM_HEADER_BYTES + skiplist_bytes > size {
            bail!(CorruptIndex(format!(
                "skip list of {} entries does not fit a {} byte chunk",
                skiplist_size, size
            )));
        }
        let chunk_end = offset + size - skiplist_bytes;
        let skiplist = skip::read_skip_list(&chunk[size - skiplist_bytes..], skiplist_size)?;

        if hits_base + positions_chunk_size > proxy.hits_bytes().len() {
            bail!(CorruptIndex(format!(
                "positions chunk [{}, {}) is beyond the {} hits bytes",
                hits_base,
                hits_base + positions_chunk_size,
                proxy.hits_bytes().len()
            )));
        }

        Ok(BlockPostingsDecoder {
            index: proxy.index.clone(),
            hits: proxy.hits.clone(),
            chunk_start: offset,
            chunk_end,
            hits_base,
            hits_end: hits_base + positions_chunk_size,
            total_documents: tctx.documents,
            total_hits,
            skiplist,
            doc_deltas: [0; BLOCK_SIZE],
            doc_freqs: [0; BLOCK_SIZE],
            hit_pos_deltas: [0; BLOCK_SIZE],
            hit_payload_lens: [0; BLOCK_SIZE],
            p: offset + TERM_HEADER_BYTES,
            hdp: hits_base,
            payloads_it: hits_base,
            payloads_end: hits_base,
            docs_index: 0,
            hits_index: 0,
            buffered_docs: 0,
            buffered_hits: 0,
            // a fresh decoder is seekable without begin(): the first
            // next()/seek() consumes the zeroed sentinel slot and refills
            docs_left: tctx.documents,
            hits_left: total_hits,
            skipped_hits: 0,
            last_doc_id: 0,
            skip_list_idx: 0,
            cur_doc: CurrentDocument::default(),
        })
    }

    pub fn skiplist_len(&self) -> usize {
        self.skiplist.len()
    }

    fn finalize(&mut self) {
        self.cur_doc.id = DOC_IDS_END;
        self.cur_doc.freq = 0;
    }

    fn update_cur_doc(&mut self) {
        self.cur_doc.id = self.last_doc_id + self.doc_deltas[self.docs_index];
        self.cur_doc.freq = self.doc_freqs[self.docs_index];
    }

    fn refill_documents(&mut self) -> Result<()> {
        if self.p > self.chunk_end {
            bail!(CorruptIndex(
                "document cursor ran past the end of the term chunk".to_owned()
            ));
        }
        let src = self.index.clone();
        let mut input =
            ByteSliceDataInput::with_window(src.as_slice(), self.p, self.chunk_end - self.p)?;

        if self.docs_left >= BLOCK_SIZE as u32 {
            block::read_block(&mut input, &mut self.doc_deltas)?;
            block::read_block(&mut input, &mut self.doc_freqs)?;
            self.buffered_docs = BLOCK_SIZE;
            self.docs_left -= BLOCK_SIZE as u32;
        } else {
            let n = self.docs_left as usize;
            for i in 0..n {
                let v = input.read_vint()?;
                if PACK_UNIT_FREQ {
                    self.doc_deltas[i] = v >> 1;
                    self.doc_freqs[i] = if v & 1 == 1 { 1 } else { input.read_vint()? };
                } else {
                    self.doc_deltas[i] = v;
                    self.doc_freqs[i] = input.read_vint()?;
                }
            }
            self.buffered_docs = n;
            self.docs_left = 0;
        }

        self.p = input.position();
        self.docs_index = 0;
        self.update_cur_doc();
        Ok(())
    }

    fn refill_hits(&mut self) -> Result<()> {
        if self.hdp > self.hits_end {
            bail!(CorruptIndex(
                "hits cursor ran past the end of the positions chunk".to_owned()
            ));
        }
        let src = self.hits.clone();
        let mut input =
            ByteSliceDataInput::with_window(src.as_slice(), self.hdp, self.hits_end - self.hdp)?;

        if self.hits_left >= BLOCK_SIZE as u32 {
            block::read_block(&mut input, &mut self.hit_pos_deltas)?;
            block::read_block(&mut input, &mut self.hit_payload_lens)?;
            let payloads_len = input.read_vint()? as usize;
            let payloads_start = input.position();
            input.skip_bytes(payloads_len)?;

            self.payloads_it = payloads_start;
            self.payloads_end = payloads_start + payloads_len;
            self.buffered_hits = BLOCK_SIZE;
            self.hits_left -= BLOCK_SIZE as u32;
        } else {
            let n = self.hits_left as usize;
            let mut payload_len = 0u32;
            let mut payloads_total = 0usize;

            for i in 0..n {
                let v = input.read_vint()?;
                if v & 1 == 1 {
                    payload_len = u32::from(input.read_byte()?);
                }
                self.hit_pos_deltas[i] = v >> 1;
                self.hit_payload_lens[i] = payload_len;
                payloads_total += payload_len as usize;
            }
            let payloads_start = input.position();
            input.skip_bytes(payloads_total)?;

            self.payloads_it = payloads_start;
            self.payloads_end = payloads_start + payloads_total;
            self.buffered_hits = n;
            self.hits_left = 0;
        }

        self.hdp = input.position();
        self.hits_index = 0;
        Ok(())
    }

    fn skip_hits(&mut self, n: u32) -> Result<()> {
        let mut rem = n;
        while rem > 0 {
            if self.hits_index + rem as usize == self.buffered_hits {
                self.skipped_hits -= rem;
                self.hits_index = 0;
                self.buffered_hits = 0;
                return Ok(());
            }

            if self.hits_index == self.buffered_hits {
                self.refill_hits()?;
                if self.buffered_hits == 0 {
                    bail!(CorruptIndex(
                        "hit debt exceeds the recorded number of hits".to_owned()
                    ));
                }
            }

            let step = min(rem as usize, self.buffered_hits - self.hits_index);
            let mut sum = 0usize;
            for i in 0..step {
                sum += self.hit_payload_lens[self.hits_index + i] as usize;
            }
            self.payloads_it += sum;
            self.hits_index += step;
            self.skipped_hits -= step as u32;
            rem -= step as u32;
        }
        Ok(())
    }

    fn decode_next_block(&mut self) -> Result<()> {
        let debt = self.skipped_hits;
        if debt > 0 {
            self.skip_hits(debt)?;
        }
        self.refill_documents()
    }

    fn skiplist_jump(&mut self, entry_index: usize) -> Result<()> {
        let entry = self.skiplist[entry_index];
        self.skip_list_idx = entry_index + 1;

        self.p = self.chunk_start + entry.index_offset as usize;
        self.hdp = self.hits_base + entry.last_hits_block_offset as usize;
        self.last_doc_id = entry.last_doc_id;
        self.docs_left = self.total_documents.saturating_sub(entry.total_documents);
        self.hits_left = self.total_hits.saturating_sub(entry.total_hits);
        if self.docs_left == 0 {
            bail!(CorruptIndex(
                "skip entry points past the last document".to_owned()
            ));
        }

        self.skipped_hits = 0;
        self.buffered_hits = 0;
        self.hits_index = 0;
        self.payloads_it = self.hdp;
        self.payloads_end = self.hdp;

        self.refill_documents()?;
        self.refill_hits()?;

        let queued = u32::from(entry.cur_hits_block_hits);
        if queued > 0 {
            self.skipped_hits = queued;
            self.skip_hits(queued)?;
        }
        Ok(())
    }

    fn step_in_block(&mut self) {
        self.skipped_hits += self.doc_freqs[self.docs_index];
        self.last_doc_id += self.doc_deltas[self.docs_index];
        self.docs_index += 1;
    }
}

impl PostingsDecoder for BlockPostingsDecoder {
    fn begin(&mut self) -> Result<()> {
        self.last_doc_id = 0;
        self.docs_left = self.total_documents;
        self.hits_left = self.total_hits;
        self.docs_index = 0;
        self.hits_index = 0;
        self.buffered_docs = 0;
        self.buffered_hits = 0;
        self.skipped_hits = 0;
        self.skip_list_idx = 0;
        self.p = self.chunk_start + TERM_HEADER_BYTES;
        self.hdp = self.hits_base;
        self.payloads_it = self.hits_base;
        self.payloads_end = self.hits_base;

        if self.docs_left == 0 {
            self.finalize();
            return Ok(());
        }
        self.refill_documents()
    }

    fn next(&mut self) -> Result<bool> {
        if self.cur_doc.id == DOC_IDS_END {
            return Ok(false);
        }

        self.step_in_block();
        if self.docs_index >= self.buffered_docs {
            if self.docs_left == 0 {
                self.finalize();
                return Ok(false);
            }
            self.decode_next_block()?;
        } else {
            self.update_cur_doc();
        }
        Ok(true)
    }

    fn seek(&mut self, target: DocId) -> Result<bool> {
        loop {
            if self.cur_doc.id >= target {
                return Ok(self.cur_doc.id == target);
            }

            if self.docs_index + 1 < self.buffered_docs {
                self.step_in_block();
                self.update_cur_doc();
            } else {
                if self.docs_left == 0 {
                    self.step_in_block();
                    self.finalize();
                    return Ok(false);
                }

                if let Some(index) = skip::search(&self.skiplist, self.skip_list_idx, target) {
                    self.skiplist_jump(index)?;
                    continue;
                }

                self.step_in_block();
                self.decode_next_block()?;
            }
        }
    }

    fn materialize_hits(
        &mut self,
        term_id: ExecTermId,
        dws: &mut DocWordsSpace,
        out: &mut TermHits,
    ) -> Result<()> {
        let freq = if self.docs_index < self.buffered_docs {
            self.doc_freqs[self.docs_index]
        } else {
            0
        };

        let debt = self.skipped_hits;
        if debt > 0 {
            self.skip_hits(debt)?;
        }

        out.hits.clear();
        let src = self.hits.clone();
        let payload_bytes = src.as_slice();

        let mut pos: u16 = 0;
        let mut remaining = freq;
        while remaining > 0 {
            if self.hits_index == self.buffered_hits {
                self.refill_hits()?;
                if self.buffered_hits == 0 {
                    bail!(CorruptIndex(
                        "document frequency exceeds the recorded number of hits".to_owned()
                    ));
                }
            }

            let step = min(remaining as usize, self.buffered_hits - self.hits_index);
            for _ in 0..step {
                let payload_len = self.hit_payload_lens[self.hits_index] as usize;
                pos = pos.wrapping_add(self.hit_pos_deltas[self.hits_index] as u16);

                let mut payload = 0u64;
                if payload_len > 0 {
                    if payload_len > 8 || self.payloads_it + payload_len > self.payloads_end {
                        bail!(CorruptIndex(format!(
                            "payload of {} bytes overruns the payload area",
                            payload_len
                        )));
                    }
                    let mut buf = [0u8; 8];
                    buf[..payload_len].copy_from_slice(
                        &payload_bytes[self.payloads_it..self.payloads_it + payload_len],
                    );
                    payload = u64::from_le_bytes(buf);
                    self.payloads_it += payload_len;
                }

                if pos != 0 {
                    dws.set(term_id, pos);
                }
                out.hits.push(Hit {
                    pos,
                    payload_len: payload_len as u8,
                    payload,
                });
                self.hits_index += 1;
            }
            remaining -= step as u32;
        }

        // a later next() must not count these hits again
        if self.docs_index < self.buffered_docs {
            self.doc_freqs[self.docs_index] = 0;
        }
        Ok(())
    }

    fn cur_document(&self) -> &CurrentDocument {
        &self.cur_doc
    }
}

#[cfg(test)]
mod tests {
    extern crate tempfile;

    use super::*;
    use core::codec::{IndexSession, PostingsEncoder};

    type Posting = (DocId, Vec<(u16, Vec<u8>)>);

    fn write_term(postings: &[Posting]) -> (AccessProxy, TermIndexCtx) {
        let mut sess = IndexSession::in_memory();
        let tctx = {
            let mut enc = PostingsEncoder::new(&mut sess);
            enc.begin_term().unwrap();
            for &(doc, ref hits) in postings {
                enc.begin_document(doc).unwrap();
                for &(pos, ref payload) in hits {
                    enc.new_hit(pos, payload).unwrap();
                }
                enc.end_document();
            }
            enc.end_term().unwrap()
        };

        let index = ReadOnlySource::from(sess.index_out.into_bytes());
        let hits = ReadOnlySource::from(sess.positions_out.into_bytes());
        (AccessProxy::new(index, hits), tctx)
    }

    // 300 documents spanning three doc blocks, frequencies cycling 1..=3
    fn large_postings() -> Vec<Posting> {
        (0..300u32)
            .map(|i| {
                let doc = i * 3 + 1;
                let freq = (i % 3 + 1) as u16;
                let hits = (1..=freq).map(|p| (p, Vec::new())).collect();
                (doc, hits)
            })
            .collect()
    }

    fn materialized(decoder: &mut BlockPostingsDecoder) -> TermHits {
        let mut dws = DocWordsSpace::new(512);
        dws.ensure_terms(1);
        dws.reset();
        let mut out = TermHits::default();
        decoder.materialize_hits(1, &mut dws, &mut out).unwrap();
        out
    }

    #[test]
    fn test_next_walks_the_tail_block() {
        let postings: Vec<Posting> = vec![
            (1, vec![(1, vec![])]),
            (5, vec![(2, vec![]), (3, vec![])]),
            (9, vec![]),
        ];
        let (proxy, tctx) = write_term(&postings);
        assert_eq!(tctx.documents, 3);

        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        decoder.begin().unwrap();
        assert_eq!(decoder.cur_document().id, 1);
        assert_eq!(decoder.cur_document().freq, 1);

        assert!(decoder.next().unwrap());
        assert_eq!(decoder.cur_document().id, 5);
        assert_eq!(decoder.cur_document().freq, 2);

        assert!(decoder.next().unwrap());
        assert_eq!(decoder.cur_document().id, 9);
        assert_eq!(decoder.cur_document().freq, 0);

        assert!(!decoder.next().unwrap());
        assert_eq!(decoder.cur_document().id, DOC_IDS_END);
        assert!(!decoder.next().unwrap());
    }

    #[test]
    fn test_empty_term() {
        let (proxy, tctx) = write_term(&[]);
        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        decoder.begin().unwrap();
        assert_eq!(decoder.cur_document().id, DOC_IDS_END);
        assert!(!decoder.next().unwrap());
    }

    #[test]
    fn test_monotone_ids_across_blocks() {
        let postings = large_postings();
        let (proxy, tctx) = write_term(&postings);
        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        assert_eq!(decoder.skiplist_len(), 2);

        decoder.begin().unwrap();
        let mut last = 0;
        for &(doc, ref hits) in &postings {
            let cur = *decoder.cur_document();
            assert!(cur.id > last);
            assert_eq!(cur.id, doc);
            assert_eq!(cur.freq as usize, hits.len());
            last = cur.id;
            decoder.next().unwrap();
        }
        assert_eq!(decoder.cur_document().id, DOC_IDS_END);
    }

    #[test]
    fn test_seek() {
        let postings = large_postings();
        let (proxy, tctx) = write_term(&postings);

        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        decoder.begin().unwrap();

        // lands exactly on a document of the third block
        let target = postings[280].0;
        assert!(decoder.seek(target).unwrap());
        assert_eq!(decoder.cur_document().id, target);
        assert_eq!(decoder.cur_document().freq, 280 % 3 + 1);

        // seeking to the current position is a no-op
        assert!(decoder.seek(target).unwrap());
        assert_eq!(decoder.cur_document().id, target);

        // absent ids land on the next present one
        let absent = postings[285].0 + 1;
        assert!(!decoder.seek(absent).unwrap());
        assert_eq!(decoder.cur_document().id, postings[286].0);

        // past the last document the stream is exhausted
        assert!(!decoder.seek(10_000).unwrap());
        assert_eq!(decoder.cur_document().id, DOC_IDS_END);
    }

    #[test]
    fn test_seek_agrees_with_next() {
        let postings = large_postings();
        let (proxy, tctx) = write_term(&postings);

        for &probe in &[5usize, 130, 200, 290] {
            let target = postings[probe].0;

            let mut walker = proxy.new_decoder(&tctx).unwrap();
            walker.begin().unwrap();
            while walker.cur_document().id < target {
                walker.next().unwrap();
            }

            let mut seeker = proxy.new_decoder(&tctx).unwrap();
            seeker.begin().unwrap();
            assert!(seeker.seek(target).unwrap());

            assert_eq!(walker.cur_document().id, seeker.cur_document().id);
            assert_eq!(walker.cur_document().freq, seeker.cur_document().freq);
            assert_eq!(materialized(&mut walker).hits, materialized(&mut seeker).hits);
        }
    }

    #[test]
    fn test_materialize_positions_and_words_space() {
        let postings: Vec<Posting> = vec![
            (3, vec![(1, vec![]), (4, vec![]), (4, vec![])]),
            (7, vec![(2, vec![])]),
        ];
        let (proxy, tctx) = write_term(&postings);
        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        decoder.begin().unwrap();

        let mut dws = DocWordsSpace::new(16);
        dws.ensure_terms(3);
        dws.reset();
        let mut out = TermHits::default();
        decoder.materialize_hits(3, &mut dws, &mut out).unwrap();

        let positions: Vec<u16> = out.hits.iter().map(|h| h.pos).collect();
        assert_eq!(positions, vec![1, 4, 4]);
        assert!(dws.test(3, 1));
        assert!(dws.test(3, 4));
        assert!(!dws.test(3, 2));

        // the current document's freq is consumed by materialization
        assert_eq!(decoder.doc_freqs[decoder.docs_index], 0);
        assert!(decoder.next().unwrap());
        assert_eq!(decoder.cur_document().id, 7);
        decoder.materialize_hits(3, &mut dws, &mut out).unwrap();
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.hits[0].pos, 2);
    }

    #[test]
    fn test_payload_round_trip_in_tail() {
        let postings: Vec<Posting> = vec![(
            1,
            vec![
                (1, vec![0xaa]),
                (2, vec![0xbb, 0xcc]),
                (3, vec![]),
                (4, vec![]),
            ],
        )];
        let (proxy, tctx) = write_term(&postings);
        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        decoder.begin().unwrap();

        let out = materialized(&mut decoder);
        assert_eq!(out.hits.len(), 4);
        assert_eq!(out.hits[0].payload_len, 1);
        assert_eq!(out.hits[0].payload, 0xaa);
        assert_eq!(out.hits[1].payload_len, 2);
        assert_eq!(out.hits[1].payload, 0xccbb);
        assert_eq!(out.hits[2].payload_len, 0);
        assert_eq!(out.hits[2].payload, 0);
        assert_eq!(out.hits[3].payload_len, 0);
    }

    #[test]
    fn test_hits_crossing_block_boundary() {
        // one document with 200 hits: a full hits block plus a tail
        let hits: Vec<(u16, Vec<u8>)> = (1..=200u16).map(|p| (p, vec![p as u8])).collect();
        let postings: Vec<Posting> = vec![(1, hits)];
        let (proxy, tctx) = write_term(&postings);

        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        decoder.begin().unwrap();
        assert_eq!(decoder.cur_document().freq, 200);

        let out = materialized(&mut decoder);
        assert_eq!(out.hits.len(), 200);
        for (i, hit) in out.hits.iter().enumerate() {
            assert_eq!(hit.pos as usize, i + 1);
            assert_eq!(hit.payload, (i + 1) as u64 & 0xff);
        }
    }

    #[test]
    fn test_skipped_hits_are_drained_lazily() {
        // step over documents without materializing, then materialize one
        // whose hits sit behind a block of skipped ones
        let postings: Vec<Posting> = (0..100u32)
            .map(|i| {
                let hits = (1..=3u16).map(|p| (p, vec![i as u8])).collect();
                (i + 1, hits)
            })
            .collect();
        let (proxy, tctx) = write_term(&postings);

        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        decoder.begin().unwrap();
        for _ in 0..90 {
            decoder.next().unwrap();
        }
        assert_eq!(decoder.cur_document().id, 91);

        let out = materialized(&mut decoder);
        assert_eq!(out.hits.len(), 3);
        assert!(out.hits.iter().all(|h| h.payload == 90));
    }

    #[test]
    fn test_corrupt_chunks_are_errors() {
        let postings = large_postings();
        let (proxy, tctx) = write_term(&postings);

        // positions chunk claimed beyond the mapped hits region
        let mut bad_index = proxy.index_bytes().to_vec();
        let offset = tctx.index_chunk.offset as usize;
        LittleEndian::write_u32(&mut bad_index[offset + 8..offset + 12], 1 << 30);
        let bad = AccessProxy::new(
            ReadOnlySource::from(bad_index),
            ReadOnlySource::from(proxy.hits_bytes().to_vec()),
        );
        assert!(bad.new_decoder(&tctx).is_err());

        // truncated doc stream fails mid-iteration instead of panicking
        let cut = tctx.index_chunk.offset as usize + tctx.index_chunk.size as usize / 2;
        let bad = AccessProxy::new(
            ReadOnlySource::from(proxy.index_bytes()[..cut].to_vec()),
            ReadOnlySource::from(proxy.hits_bytes().to_vec()),
        );
        match bad.new_decoder(&tctx) {
            Err(_) => {}
            Ok(mut decoder) => {
                let mut failed = decoder.begin().is_err();
                while !failed {
                    match decoder.next() {
                        Err(_) => failed = true,
                        Ok(false) => break,
                        Ok(true) => {}
                    }
                }
                assert!(failed);
            }
        }
    }

    #[test]
    fn test_on_disk_hits_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sess = IndexSession::on_disk(dir.path(), 1);
        let tctx = {
            let mut enc = PostingsEncoder::new(&mut sess);
            enc.begin_term().unwrap();
            for doc in 1..=5u32 {
                enc.begin_document(doc).unwrap();
                enc.new_hit(doc as u16, &[doc as u8]).unwrap();
                enc.end_document();
            }
            enc.end_term().unwrap()
        };
        sess.end().unwrap();
        assert!(dir.path().join("hits.data").exists());
        assert!(!dir.path().join("hits.data.t").exists());

        let index = ReadOnlySource::from(sess.index_out.into_bytes());
        let proxy = AccessProxy::open(dir.path(), index).unwrap();
        let mut decoder = proxy.new_decoder(&tctx).unwrap();
        decoder.begin().unwrap();

        for doc in 1..=5u32 {
            assert_eq!(decoder.cur_document().id, doc);
            let out = materialized(&mut decoder);
            assert_eq!(out.hits.len(), 1);
            assert_eq!(out.hits[0].pos, doc as u16);
            assert_eq!(out.hits[0].payload, u64::from(doc) & 0xff);
            decoder.next().unwrap();
        }
    }
}

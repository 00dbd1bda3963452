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
    AccessProxy, IndexChunk, SkipEntry, TermIndexCtx, BLOCK_SIZE, PACK_UNIT_FREQ, SKIPLIST_STEP,
    TERM_HEADER_BYTES,
};
use core::codec::PostingsDecoder;
use core::index::MaskedDocumentsRegistry;
use core::search::TermHits;
use core::store::{DataOutput, RamOutput};
use core::util::{DocId, DocWordsSpace};
use error::ErrorKind::{CorruptIndex, IllegalArgument};
use error::Result;

use byteorder::{ByteOrder, LittleEndian};

use std::cmp::min;
use std::fs::{remove_file, rename, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Hit payloads are at most 8 opaque bytes.
pub const MAX_PAYLOAD_BYTES: usize = 8;

/// Output state shared by every term an indexing pass encodes: the postings
/// region (`index_out`, kept in memory so term headers can be back-patched)
/// and the positions stream, which may spill to `hits.data` on disk as it
/// grows.
pub struct IndexSession {
    pub index_out: RamOutput,
    pub positions_out: RamOutput,
    positions_flushed: u64,
    positions_file: Option<File>,
    base_path: Option<PathBuf>,
    flush_threshold: usize,
}

impl IndexSession {
    /// Session that keeps both streams in memory; `positions_bytes` hands the
    /// hits region back once indexing is done.
    pub fn in_memory() -> IndexSession {
        IndexSession {
            index_out: RamOutput::new(),
            positions_out: RamOutput::new(),
            positions_flushed: 0,
            positions_file: None,
            base_path: None,
            flush_threshold: 0,
        }
    }

    /// Session that spills the positions stream to `<base_path>/hits.data.t`
    /// whenever more than `flush_threshold` bytes are buffered, and renames
    /// it to `hits.data` at `end`.
    pub fn on_disk<P: Into<PathBuf>>(base_path: P, flush_threshold: usize) -> IndexSession {
        IndexSession {
            index_out: RamOutput::new(),
            positions_out: RamOutput::new(),
            positions_flushed: 0,
            positions_file: None,
            base_path: Some(base_path.into()),
            flush_threshold,
        }
    }

    /// Logical write position of the positions stream, flushed bytes
    /// included.
    pub fn positions_position(&self) -> u64 {
        self.positions_flushed + self.positions_out.position()
    }

    fn temp_positions_path(&self) -> Result<PathBuf> {
        match self.base_path {
            Some(ref base) => Ok(base.join("hits.data.t")),
            None => bail!(IllegalArgument(
                "in-memory session has no positions file".to_owned()
            )),
        }
    }

    pub fn flush_positions(&mut self) -> Result<()> {
        if self.positions_file.is_none() {
            let path = self.temp_positions_path()?;
            let file = OpenOptions::new().write(true).create(true).truncate(true).open(&path)?;
            self.positions_file = Some(file);
        }

        {
            let file = self.positions_file.as_mut().unwrap();
            file.write_all(self.positions_out.data())?;
        }
        self.positions_flushed += self.positions_out.position();
        self.positions_out.clear();
        Ok(())
    }

    /// Finishes the session. In disk mode the positions stream is flushed,
    /// synced and atomically renamed to `hits.data`; the temporary is
    /// unlinked if the rename fails.
    pub fn end(&mut self) -> Result<()> {
        let base = match self.base_path {
            Some(ref base) => base.clone(),
            None => return Ok(()),
        };

        if !self.positions_out.is_empty() || self.positions_file.is_some() {
            self.flush_positions()?;
        }

        if let Some(file) = self.positions_file.take() {
            file.sync_all()?;
            drop(file);

            let temp = base.join("hits.data.t");
            if let Err(e) = rename(&temp, base.join("hits.data")) {
                warn!("failed to persist hits.data: {}", e);
                let _ = remove_file(&temp);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Copies a whole term chunk from another proxy into this session,
    /// rewriting only the hits-data offset in the header. Fast path for
    /// merges with a single live participant.
    pub fn append_index_chunk(
        &mut self,
        src: &AccessProxy,
        tctx: &TermIndexCtx,
    ) -> Result<IndexChunk> {
        let offset = tctx.index_chunk.offset as usize;
        let size = tctx.index_chunk.size as usize;
        if size < TERM_HEADER_BYTES || offset + size > src.index_bytes().len() {
            bail!(CorruptIndex(format!(
                "term chunk [{}, {}) is beyond the {} index bytes",
                offset,
                offset + size,
                src.index_bytes().len()
            )));
        }
        let chunk = &src.index_bytes()[offset..offset + size];

        let hits_data_offset = LittleEndian::read_u32(&chunk[0..]) as usize;
        let sum_hits = LittleEndian::read_u32(&chunk[4..]);
        let positions_chunk_size = LittleEndian::read_u32(&chunk[8..]);
        let skip_list_size = LittleEndian::read_u16(&chunk[12..]);

        if hits_data_offset + positions_chunk_size as usize > src.hits_bytes().len() {
            bail!(CorruptIndex(format!(
                "positions chunk [{}, {}) is beyond the {} hits bytes",
                hits_data_offset,
                hits_data_offset + positions_chunk_size as usize,
                src.hits_bytes().len()
            )));
        }

        let new_hits_offset = self.positions_position();
        self.positions_out.write_bytes(
            &src.hits_bytes()[hits_data_offset..hits_data_offset + positions_chunk_size as usize],
        )?;

        let out_offset = self.index_out.position();
        self.index_out.write_u32(new_hits_offset as u32)?;
        self.index_out.write_u32(sum_hits)?;
        self.index_out.write_u32(positions_chunk_size)?;
        self.index_out.write_u16(skip_list_size)?;
        self.index_out.write_bytes(&chunk[TERM_HEADER_BYTES..])?;

        Ok(IndexChunk {
            offset: out_offset,
            size: tctx.index_chunk.size,
        })
    }
}

/// Streams one term's posting list into an `IndexSession`.
///
/// The caller drives it with `begin_term`, then for each document (ids
/// strictly increasing, starting at 1) `begin_document`, any number of
/// `new_hit` calls with non-decreasing positions, `end_document`, and
/// finally `end_term`, which back-patches the chunk header and appends the
/// skip list.
pub struct PostingsEncoder<'a> {
    sess: &'a mut IndexSession,

    doc_deltas: [u32; BLOCK_SIZE],
    doc_freqs: [u32; BLOCK_SIZE],
    hit_pos_deltas: [u32; BLOCK_SIZE],
    hit_payload_sizes: [u32; BLOCK_SIZE],
    payloads_buf: Vec<u8>,

    buffered: usize,
    total_hits: usize,
    sum_hits: u32,
    last_doc_id: DocId,
    last_position: u16,
    term_documents: u32,

    term_index_offset: u64,
    term_positions_offset: u64,
    last_hits_block_offset: u32,
    last_hits_block_total_hits: u32,

    skiplist_countdown: u32,
    skiplist: Vec<SkipEntry>,
    cur_block: SkipEntry,
}

impl<'a> PostingsEncoder<'a> {
    pub fn new(sess: &'a mut IndexSession) -> PostingsEncoder<'a> {
        PostingsEncoder {
            sess,
            doc_deltas: [0; BLOCK_SIZE],
            doc_freqs: [0; BLOCK_SIZE],
            hit_pos_deltas: [0; BLOCK_SIZE],
            hit_payload_sizes: [0; BLOCK_SIZE],
            payloads_buf: Vec::new(),
            buffered: 0,
            total_hits: 0,
            sum_hits: 0,
            last_doc_id: 0,
            last_position: 0,
            term_documents: 0,
            term_index_offset: 0,
            term_positions_offset: 0,
            last_hits_block_offset: 0,
            last_hits_block_total_hits: 0,
            skiplist_countdown: SKIPLIST_STEP,
            skiplist: Vec::new(),
            cur_block: SkipEntry::default(),
        }
    }

    pub fn begin_term(&mut self) -> Result<()> {
        self.buffered = 0;
        self.total_hits = 0;
        self.sum_hits = 0;
        self.last_doc_id = 0;
        self.last_position = 0;
        self.term_documents = 0;
        self.term_index_offset = self.sess.index_out.position();
        self.term_positions_offset = self.sess.positions_position();
        self.last_hits_block_offset = 0;
        self.last_hits_block_total_hits = 0;
        self.skiplist_countdown = SKIPLIST_STEP;
        self.skiplist.clear();

        // header slot, back-patched by end_term
        self.sess
            .index_out
            .write_u32(self.term_positions_offset as u32)?;
        self.sess.index_out.write_u32(0)?;
        self.sess.index_out.write_u32(0)?;
        self.sess.index_out.write_u16(0)
    }

    fn output_block(&mut self) -> Result<()> {
        debug_assert_eq!(self.buffered, BLOCK_SIZE);

        self.skiplist_countdown -= 1;
        if self.skiplist_countdown == 0 {
            if self.skiplist.len() < usize::from(::std::u16::MAX) {
                self.skiplist.push(self.cur_block);
            }
            self.skiplist_countdown = SKIPLIST_STEP;
        }

        block::write_block(&self.doc_deltas, &mut self.sess.index_out)?;
        block::write_block(&self.doc_freqs, &mut self.sess.index_out)?;
        self.buffered = 0;
        Ok(())
    }

    pub fn begin_document(&mut self, document_id: DocId) -> Result<()> {
        if document_id <= self.last_doc_id {
            bail!(IllegalArgument(format!(
                "document {} out of order, last was {}",
                document_id, self.last_doc_id
            )));
        }

        if self.buffered == BLOCK_SIZE {
            self.output_block()?;
        }

        if self.buffered == 0 {
            self.cur_block = SkipEntry {
                index_offset: (self.sess.index_out.position() - self.term_index_offset) as u32,
                last_doc_id: self.last_doc_id,
                last_hits_block_offset: self.last_hits_block_offset,
                total_documents: self.term_documents,
                total_hits: self.last_hits_block_total_hits,
                cur_hits_block_hits: self.total_hits as u16,
            };
        }

        self.doc_deltas[self.buffered] = document_id - self.last_doc_id;
        self.doc_freqs[self.buffered] = 0;
        self.term_documents += 1;
        self.last_doc_id = document_id;
        self.last_position = 0;
        Ok(())
    }

    pub fn new_hit(&mut self, position: u16, payload: &[u8]) -> Result<()> {
        if position == 0 && payload.is_empty() {
            // placeholder hit, nothing to record
            return Ok(());
        }
        if position < self.last_position {
            bail!(IllegalArgument(format!(
                "hit position {} out of order, last was {}",
                position, self.last_position
            )));
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            bail!(IllegalArgument(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_PAYLOAD_BYTES
            )));
        }

        self.doc_freqs[self.buffered] += 1;
        self.hit_pos_deltas[self.total_hits] = u32::from(position - self.last_position);
        self.hit_payload_sizes[self.total_hits] = payload.len() as u32;
        self.last_position = position;
        self.payloads_buf.extend_from_slice(payload);

        self.total_hits += 1;
        if self.total_hits == BLOCK_SIZE {
            self.flush_hits_block()?;
        }
        Ok(())
    }

    fn flush_hits_block(&mut self) -> Result<()> {
        self.sum_hits += self.total_hits as u32;

        block::write_block(&self.hit_pos_deltas, &mut self.sess.positions_out)?;
        block::write_block(&self.hit_payload_sizes, &mut self.sess.positions_out)?;
        self.sess
            .positions_out
            .write_vint(self.payloads_buf.len() as u32)?;
        self.sess.positions_out.write_bytes(&self.payloads_buf)?;
        self.payloads_buf.clear();

        self.last_hits_block_total_hits = self.sum_hits;
        self.last_hits_block_offset =
            (self.sess.positions_position() - self.term_positions_offset) as u32;
        self.total_hits = 0;
        Ok(())
    }

    pub fn end_document(&mut self) {
        self.buffered += 1;
    }

    pub fn end_term(&mut self) -> Result<TermIndexCtx> {
        self.sum_hits += self.total_hits as u32;

        if self.buffered == BLOCK_SIZE {
            self.output_block()?;
        } else {
            for i in 0..self.buffered {
                let delta = self.doc_deltas[i];
                let freq = self.doc_freqs[i];

                if PACK_UNIT_FREQ {
                    if freq == 1 {
                        self.sess.index_out.write_vint(delta << 1 | 1)?;
                    } else {
                        self.sess.index_out.write_vint(delta << 1)?;
                        self.sess.index_out.write_vint(freq)?;
                    }
                } else {
                    self.sess.index_out.write_vint(delta)?;
                    self.sess.index_out.write_vint(freq)?;
                }
            }
        }
        self.buffered = 0;

        if self.total_hits > 0 {
            let mut last_payload_len = 0u32;

            for i in 0..self.total_hits {
                let pos_delta = self.hit_pos_deltas[i];
                let payload_len = self.hit_payload_sizes[i];

                if payload_len != last_payload_len {
                    last_payload_len = payload_len;
                    self.sess.positions_out.write_vint(pos_delta << 1 | 1)?;
                    self.sess.positions_out.write_byte(payload_len as u8)?;
                } else {
                    self.sess.positions_out.write_vint(pos_delta << 1)?;
                }
            }

            // the reader recovers the tail payload length by summing the
            // per-hit lengths, so no length prefix here
            self.sess.positions_out.write_bytes(&self.payloads_buf)?;
            self.payloads_buf.clear();
            self.total_hits = 0;
        }

        let header = self.term_index_offset as usize;
        self.sess.index_out.patch_u32(header + 4, self.sum_hits)?;
        let positions_chunk_size =
            (self.sess.positions_position() - self.term_positions_offset) as u32;
        self.sess
            .index_out
            .patch_u32(header + 8, positions_chunk_size)?;
        self.sess
            .index_out
            .patch_u16(header + 12, self.skiplist.len() as u16)?;

        for entry in &self.skiplist {
            entry.write_to(&mut self.sess.index_out)?;
        }
        self.skiplist.clear();

        let ctx = TermIndexCtx {
            documents: self.term_documents,
            index_chunk: IndexChunk {
                offset: self.term_index_offset,
                size: (self.sess.index_out.position() - self.term_index_offset) as u32,
            },
        };

        if self.sess.flush_threshold > 0 && self.sess.positions_out.len() > self.sess.flush_threshold
        {
            self.sess.flush_positions()?;
        }

        Ok(ctx)
    }
}

/// One source feeding `merge_term_postings`: where the term's postings live
/// and which of its documents have been deleted since they were written.
pub struct MergeParticipant<'a> {
    pub proxy: &'a AccessProxy,
    pub tctx: TermIndexCtx,
    pub masked: &'a dyn MaskedDocumentsRegistry,
}

/// Re-encodes one term's postings from any number of participants through
/// `enc`, in document-id order, dropping masked documents. Participants must
/// not overlap in document ids except transiently (the first one at a given
/// id wins, as participants are passed oldest first).
pub fn merge_term_postings(
    participants: &[MergeParticipant],
    enc: &mut PostingsEncoder,
) -> Result<TermIndexCtx> {
    struct Candidate<'a> {
        decoder: Box<dyn PostingsDecoder>,
        masked: &'a dyn MaskedDocumentsRegistry,
    }

    let mut candidates = Vec::with_capacity(participants.len());
    for participant in participants {
        if participant.tctx.documents == 0 {
            continue;
        }
        let mut decoder = participant.proxy.new_decoder(&participant.tctx)?;
        decoder.begin()?;
        candidates.push(Candidate {
            decoder: Box::new(decoder),
            masked: participant.masked,
        });
    }

    enc.begin_term()?;

    // positions are replayed straight into the encoder; the words space is a
    // zero-width dummy
    let mut dws = DocWordsSpace::new(0);
    dws.ensure_terms(1);
    let mut hits = TermHits::default();
    let mut to_advance: Vec<usize> = Vec::with_capacity(candidates.len());

    while !candidates.is_empty() {
        to_advance.clear();
        to_advance.push(0);
        let mut doc_id = candidates[0].decoder.cur_document().id;

        for i in 1..candidates.len() {
            let id = candidates[i].decoder.cur_document().id;
            if id < doc_id {
                doc_id = id;
                to_advance.clear();
                to_advance.push(i);
            } else if id == doc_id {
                to_advance.push(i);
            }
        }

        let lead = to_advance[0];
        if !candidates[lead].masked.test(doc_id) {
            enc.begin_document(doc_id)?;
            candidates[lead]
                .decoder
                .materialize_hits(1, &mut dws, &mut hits)?;
            for hit in hits.hits.iter() {
                let payload = hit.payload.to_le_bytes();
                let len = min(hit.payload_len as usize, payload.len());
                enc.new_hit(hit.pos, &payload[..len])?;
            }
            enc.end_document();
        }

        for &idx in to_advance.iter().rev() {
            if !candidates[idx].decoder.next()? {
                candidates.remove(idx);
            }
        }
    }

    enc.end_term()
}

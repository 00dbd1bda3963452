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

use core::codec::{
    AccessProxy, IndexSession, PostingsDecoder, PostingsEncoder, TermIndexCtx,
};
use core::store::ReadOnlySource;
use core::util::{DocId, IndexTermId};
use error::ErrorKind::IllegalArgument;
use error::Result;

use std::cmp::max;
use std::collections::{HashMap, HashSet};

/// Everything the query engine needs from a segment: term resolution, term
/// statistics, postings decoders and the position ceiling for the words
/// space.
///
/// `term_ctx(0)` must report zero documents, so unknown terms naturally fold
/// to always-false during optimization.
pub trait IndexSource {
    fn resolve_term(&self, term: &[u8]) -> IndexTermId;

    fn term_ctx(&self, term_id: IndexTermId) -> TermIndexCtx;

    fn new_postings_decoder(&self, tctx: &TermIndexCtx) -> Result<Box<dyn PostingsDecoder>>;

    fn max_indexed_position(&self) -> u16;
}

/// Documents deleted since a segment was written. The driver consults it
/// before evaluating a candidate; merges consult it to drop postings.
pub trait MaskedDocumentsRegistry {
    /// True iff `doc_id` is masked and must not be reported.
    fn test(&self, doc_id: DocId) -> bool;
}

/// Registry for a segment with no deletions.
pub struct NoMaskedDocuments;

impl MaskedDocumentsRegistry for NoMaskedDocuments {
    fn test(&self, _doc_id: DocId) -> bool {
        false
    }
}

/// Set-backed registry.
pub struct MaskedDocumentsSet {
    masked: HashSet<DocId>,
}

impl MaskedDocumentsSet {
    pub fn new<I: IntoIterator<Item = DocId>>(ids: I) -> MaskedDocumentsSet {
        MaskedDocumentsSet {
            masked: ids.into_iter().collect(),
        }
    }
}

impl MaskedDocumentsRegistry for MaskedDocumentsSet {
    fn test(&self, doc_id: DocId) -> bool {
        self.masked.contains(&doc_id)
    }
}

/// Builds an in-memory segment term by term through the postings encoder.
/// The minimal `IndexSource` embedding, used by the engine tests and by
/// embedders that keep a segment on the heap.
pub struct RamIndexWriter {
    sess: IndexSession,
    terms: HashMap<Vec<u8>, IndexTermId>,
    ctxs: Vec<TermIndexCtx>,
    max_position: u16,
}

impl RamIndexWriter {
    pub fn new() -> RamIndexWriter {
        RamIndexWriter {
            sess: IndexSession::in_memory(),
            terms: HashMap::new(),
            ctxs: Vec::new(),
            max_position: 0,
        }
    }

    /// Encodes one term's full posting list. `postings` are
    /// `(document id, hits)` pairs with strictly increasing document ids;
    /// each hit is a `(position, payload)` pair with non-decreasing
    /// positions.
    pub fn add_term(&mut self, token: &str, postings: &[(DocId, Vec<(u16, Vec<u8>)>)]) -> Result<()> {
        if self.terms.contains_key(token.as_bytes()) {
            bail!(IllegalArgument(format!(
                "term [{}] was already added",
                token
            )));
        }

        let tctx = {
            let mut enc = PostingsEncoder::new(&mut self.sess);
            enc.begin_term()?;
            for &(doc, ref hits) in postings {
                enc.begin_document(doc)?;
                for &(pos, ref payload) in hits {
                    enc.new_hit(pos, payload)?;
                }
                enc.end_document();
            }
            enc.end_term()?
        };

        for &(_, ref hits) in postings {
            for &(pos, _) in hits {
                self.max_position = max(self.max_position, pos);
            }
        }

        self.ctxs.push(tctx);
        self.terms
            .insert(token.as_bytes().to_vec(), self.ctxs.len() as IndexTermId);
        Ok(())
    }

    pub fn finish(self) -> RamIndexSource {
        let index = ReadOnlySource::from(self.sess.index_out.into_bytes());
        let hits = ReadOnlySource::from(self.sess.positions_out.into_bytes());
        RamIndexSource {
            proxy: AccessProxy::new(index, hits),
            terms: self.terms,
            ctxs: self.ctxs,
            max_position: self.max_position,
        }
    }
}

/// In-memory segment produced by `RamIndexWriter`.
pub struct RamIndexSource {
    proxy: AccessProxy,
    terms: HashMap<Vec<u8>, IndexTermId>,
    ctxs: Vec<TermIndexCtx>,
    max_position: u16,
}

impl RamIndexSource {
    pub fn proxy(&self) -> &AccessProxy {
        &self.proxy
    }
}

impl IndexSource for RamIndexSource {
    fn resolve_term(&self, term: &[u8]) -> IndexTermId {
        self.terms.get(term).cloned().unwrap_or(0)
    }

    fn term_ctx(&self, term_id: IndexTermId) -> TermIndexCtx {
        if term_id == 0 || term_id as usize > self.ctxs.len() {
            TermIndexCtx::default()
        } else {
            self.ctxs[term_id as usize - 1]
        }
    }

    fn new_postings_decoder(&self, tctx: &TermIndexCtx) -> Result<Box<dyn PostingsDecoder>> {
        Ok(Box::new(self.proxy.new_decoder(tctx)?))
    }

    fn max_indexed_position(&self) -> u16 {
        self.max_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::codec::{merge_term_postings, MergeParticipant};
    use core::search::TermHits;
    use core::store::DataOutput;
    use core::util::{DocWordsSpace, DOC_IDS_END};

    fn source_with(postings: &[(DocId, Vec<(u16, Vec<u8>)>)]) -> RamIndexSource {
        let mut writer = RamIndexWriter::new();
        writer.add_term("term", postings).unwrap();
        writer.finish()
    }

    #[test]
    fn test_resolve_and_ctx() {
        let mut writer = RamIndexWriter::new();
        writer.add_term("apple", &[(1, vec![(0, vec![])])]).unwrap();
        writer
            .add_term("banana", &[(1, vec![(1, vec![])]), (4, vec![(0, vec![])])])
            .unwrap();
        assert!(writer.add_term("apple", &[]).is_err());
        let source = writer.finish();

        let apple = source.resolve_term(b"apple");
        let banana = source.resolve_term(b"banana");
        assert!(apple != 0 && banana != 0 && apple != banana);
        assert_eq!(source.resolve_term(b"cherry"), 0);

        assert_eq!(source.term_ctx(apple).documents, 1);
        assert_eq!(source.term_ctx(banana).documents, 2);
        assert_eq!(source.term_ctx(0).documents, 0);
        assert_eq!(source.max_indexed_position(), 1);

        let tctx = source.term_ctx(banana);
        let mut decoder = source.new_postings_decoder(&tctx).unwrap();
        decoder.begin().unwrap();
        assert_eq!(decoder.cur_document().id, 1);
        assert!(!decoder.seek(3).unwrap());
        assert_eq!(decoder.cur_document().id, 4);
    }

    fn all_docs(source: &RamIndexSource, tctx: &TermIndexCtx) -> Vec<(DocId, Vec<u16>)> {
        let mut decoder = source.new_postings_decoder(tctx).unwrap();
        decoder.begin().unwrap();

        let mut dws = DocWordsSpace::new(64);
        dws.ensure_terms(1);
        let mut hits = TermHits::default();
        let mut out = Vec::new();
        while decoder.cur_document().id != DOC_IDS_END {
            dws.reset();
            decoder.materialize_hits(1, &mut dws, &mut hits).unwrap();
            out.push((
                decoder.cur_document().id,
                hits.hits.iter().map(|h| h.pos).collect(),
            ));
            decoder.next().unwrap();
        }
        out
    }

    #[test]
    fn test_merge_drops_masked_documents() {
        let old = source_with(&[
            (1, vec![(1, vec![]), (2, vec![])]),
            (2, vec![(5, vec![0xee])]),
            (4, vec![(3, vec![])]),
        ]);
        let new = source_with(&[(6, vec![(7, vec![])]), (9, vec![(1, vec![])])]);

        let old_masked = MaskedDocumentsSet::new(vec![2]);
        let new_masked = NoMaskedDocuments;
        let participants = [
            MergeParticipant {
                proxy: old.proxy(),
                tctx: old.term_ctx(old.resolve_term(b"term")),
                masked: &old_masked,
            },
            MergeParticipant {
                proxy: new.proxy(),
                tctx: new.term_ctx(new.resolve_term(b"term")),
                masked: &new_masked,
            },
        ];

        let mut sess = IndexSession::in_memory();
        let tctx = {
            let mut enc = PostingsEncoder::new(&mut sess);
            merge_term_postings(&participants, &mut enc).unwrap()
        };
        assert_eq!(tctx.documents, 4);

        let merged = RamIndexSource {
            proxy: AccessProxy::new(
                ReadOnlySource::from(sess.index_out.into_bytes()),
                ReadOnlySource::from(sess.positions_out.into_bytes()),
            ),
            terms: HashMap::new(),
            ctxs: vec![tctx],
            max_position: 7,
        };

        let docs = all_docs(&merged, &merged.ctxs[0]);
        assert_eq!(
            docs,
            vec![
                (1, vec![1, 2]),
                (4, vec![3]),
                (6, vec![7]),
                (9, vec![1]),
            ]
        );
    }

    #[test]
    fn test_append_index_chunk() {
        let source = source_with(&[
            (3, vec![(1, vec![0xab]), (2, vec![])]),
            (8, vec![(4, vec![])]),
        ]);
        let orig_tctx = source.term_ctx(source.resolve_term(b"term"));

        let mut sess = IndexSession::in_memory();
        // shift the destination streams so the rewritten offsets matter
        sess.index_out.write_u32(0xffff_ffff).unwrap();
        sess.positions_out.write_u32(0xffff_ffff).unwrap();
        let chunk = sess.append_index_chunk(source.proxy(), &orig_tctx).unwrap();

        let copied = RamIndexSource {
            proxy: AccessProxy::new(
                ReadOnlySource::from(sess.index_out.into_bytes()),
                ReadOnlySource::from(sess.positions_out.into_bytes()),
            ),
            terms: HashMap::new(),
            ctxs: vec![TermIndexCtx {
                documents: orig_tctx.documents,
                index_chunk: chunk,
            }],
            max_position: 4,
        };

        let docs = all_docs(&copied, &copied.ctxs[0]);
        assert_eq!(docs, vec![(3, vec![1, 2]), (8, vec![4])]);
    }
}

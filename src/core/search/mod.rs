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

pub mod query;

mod optimizer;

mod exec;

pub use self::exec::*;

use core::util::{DocId, DocWordsSpace, ExecTermId};

/// One occurrence of a term in a document: its token position plus up to 8
/// bytes of opaque per-hit data the indexer stored for scoring.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Hit {
    pub pos: u16,
    pub payload_len: u8,
    pub payload: u64,
}

/// Reusable buffer holding one term's hits for the current document.
/// `doc_seq` records the evaluation generation the buffer was filled at, so
/// stale contents are detected without clearing between documents.
#[derive(Default)]
pub struct TermHits {
    pub hits: Vec<Hit>,
    pub doc_seq: u16,
}

impl TermHits {
    pub fn freq(&self) -> u32 {
        self.hits.len() as u32
    }
}

/// Position, repetition count and flags of one occurrence of a term in the
/// original query, before any rewriting.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueryTermInstance {
    pub index: u16,
    pub rep: u8,
    pub flags: u8,
}

/// Every occurrence of one distinct term in the original query, captured
/// before optimization so scoring sees the query as the user wrote it.
/// Terms appearing only under a NOT have no entry.
#[derive(Debug)]
pub struct QueryTermInstances {
    pub term_id: ExecTermId,
    pub token: String,
    pub instances: Vec<QueryTermInstance>,
}

/// One term that matched the current document, with the evidence scoring
/// needs: where the term sat in the original query and where it occurred in
/// the document.
pub struct MatchedQueryTerm<'a> {
    pub instances: &'a QueryTermInstances,
    pub hits: &'a TermHits,
}

/// A document the query matched, offered to the `MatchesFilter`. Matched
/// terms appear at most once each, in capture order.
pub struct MatchedDocument<'a> {
    pub id: DocId,
    pub matched_terms: Vec<MatchedQueryTerm<'a>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsiderResponse {
    Continue,
    Abort,
}

/// Receives every matched document. Returning `Abort` stops the driver
/// cleanly; timeouts are implemented here by the embedder (clock check +
/// `Abort`).
pub trait MatchesFilter {
    fn consider(&mut self, doc: &MatchedDocument, dws: &DocWordsSpace) -> ConsiderResponse;
}

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

//! Query execution: lowers the optimized query tree to a tree of typed
//! execution nodes, then drives it across the merged document stream of the
//! leader decoders, evaluating once per candidate document.

use core::codec::PostingsDecoder;
use core::codec::TermIndexCtx;
use core::index::{IndexSource, MaskedDocumentsRegistry};
use core::search::optimizer;
use core::search::query::{AstNode, Operator, Phrase, Query, UnaryOperator};
use core::search::{
    ConsiderResponse, MatchedDocument, MatchedQueryTerm, MatchesFilter, QueryTermInstance,
    QueryTermInstances, TermHits,
};
use core::util::{DocId, DocWordsSpace, ExecTermId, IndexTermId, DOC_IDS_END};
use error::ErrorKind::IllegalState;
use error::Result;

use std::collections::HashMap;

/// Evaluation cost of a subtree that can never match.
pub(crate) const COST_NEVER: u32 = ::std::u32::MAX;

/// One node of the compiled query: an opcode plus its payload. Fused term
/// runs (`MatchAllTerms`/`MatchAnyTerms`) iterate their ids inline instead
/// of paying one dispatch per child.
enum ExecNode {
    Noop,
    MatchTerm(ExecTermId),
    MatchPhrase(Vec<ExecTermId>),
    MatchAllTerms(Vec<ExecTermId>),
    MatchAnyTerms(Vec<ExecTermId>),
    LogicalAnd(Box<BinopCtx>),
    LogicalOr(Box<BinopCtx>),
    LogicalNot(Box<BinopCtx>),
    UnaryAnd(Box<ExecNode>),
    UnaryNot(Box<ExecNode>),
    ConstTrueExpr(Box<ExecNode>),
}

struct BinopCtx {
    lhs: ExecNode,
    rhs: ExecNode,
}

struct RawTermInstance {
    token: String,
    index: u16,
    rep: u8,
    flags: u8,
}

/// Per-query state: the session-local terms dictionary, one decoder and hits
/// buffer slot per distinct term, and the per-document capture bookkeeping.
/// Built by the compiler, consumed by the interpreter and driver, torn down
/// as one unit when the query ends.
pub struct RuntimeCtx<'a> {
    idxsrc: &'a dyn IndexSource,

    cur_doc_id: DocId,
    cur_doc_seq: u16,

    // all indexed by session-local term id; slot 0 stays empty
    decoders: Vec<Option<Box<dyn PostingsDecoder>>>,
    term_hits: Vec<Option<TermHits>>,
    to_index_src: Vec<IndexTermId>,
    original_instances: Vec<Option<QueryTermInstances>>,
    captured: Vec<u16>,

    terms_dict: HashMap<String, ExecTermId>,
    matched_term_ids: Vec<ExecTermId>,
    dws: DocWordsSpace,
}

impl<'a> RuntimeCtx<'a> {
    pub fn new(idxsrc: &'a dyn IndexSource) -> RuntimeCtx<'a> {
        RuntimeCtx {
            idxsrc,
            cur_doc_id: 0,
            cur_doc_seq: 0,
            decoders: vec![None],
            term_hits: vec![None],
            to_index_src: vec![0],
            original_instances: Vec::new(),
            captured: Vec::new(),
            terms_dict: HashMap::new(),
            matched_term_ids: Vec::new(),
            dws: DocWordsSpace::new(idxsrc.max_indexed_position()),
        }
    }

    /// Translates a token to its session-local id, assigning the next dense
    /// id on first sight.
    fn resolve_term(&mut self, token: &str) -> ExecTermId {
        if let Some(&id) = self.terms_dict.get(token) {
            return id;
        }
        let id = (self.terms_dict.len() + 1) as ExecTermId;
        self.terms_dict.insert(token.to_owned(), id);
        self.to_index_src.push(self.idxsrc.resolve_term(token.as_bytes()));
        self.decoders.push(None);
        self.term_hits.push(None);
        id
    }

    fn term_ctx(&self, term_id: ExecTermId) -> TermIndexCtx {
        self.idxsrc.term_ctx(self.to_index_src[term_id as usize])
    }

    fn prepare_decoder(&mut self, term_id: ExecTermId) -> Result<()> {
        let idx = term_id as usize;
        if self.decoders[idx].is_none() {
            let tctx = self.term_ctx(term_id);
            self.decoders[idx] = Some(self.idxsrc.new_postings_decoder(&tctx)?);
            self.term_hits[idx] = Some(TermHits::default());
        }
        Ok(())
    }

    pub(crate) fn token_eval_cost(&mut self, token: &str) -> u32 {
        let term_id = self.resolve_term(token);
        let ctx = self.term_ctx(term_id);
        if ctx.documents == 0 {
            COST_NEVER
        } else {
            ctx.documents
        }
    }

    pub(crate) fn phrase_eval_cost(&mut self, phrase: &Phrase) -> u32 {
        let mut sum = 0u32;
        for term in &phrase.terms {
            let cost = self.token_eval_cost(&term.token);
            if cost == COST_NEVER {
                return COST_NEVER;
            }
            sum = sum.saturating_add(cost);
        }
        sum
    }

    fn register_token(&mut self, phrase: &Phrase) -> Result<ExecTermId> {
        let term_id = self.resolve_term(&phrase.terms[0].token);
        self.prepare_decoder(term_id)?;
        Ok(term_id)
    }

    fn register_phrase(&mut self, phrase: &Phrase) -> Result<Vec<ExecTermId>> {
        let mut term_ids = Vec::with_capacity(phrase.size());
        for term in &phrase.terms {
            let term_id = self.resolve_term(&term.token);
            self.prepare_decoder(term_id)?;
            term_ids.push(term_id);
        }
        Ok(term_ids)
    }

    /// Attaches the pre-optimization term instances to every token that
    /// survived into the compiled query; the rest are dropped, and NOT-only
    /// terms were never collected to begin with.
    fn attach_original_instances(&mut self, raw: Vec<RawTermInstance>) {
        let slots = self.terms_dict.len() + 1;
        self.original_instances = Vec::with_capacity(slots);
        for _ in 0..slots {
            self.original_instances.push(None);
        }

        for instance in raw {
            if let Some(&term_id) = self.terms_dict.get(&instance.token) {
                let slot = &mut self.original_instances[term_id as usize];
                if slot.is_none() {
                    *slot = Some(QueryTermInstances {
                        term_id,
                        token: instance.token.clone(),
                        instances: Vec::new(),
                    });
                }
                if let Some(ref mut entry) = *slot {
                    entry.instances.push(QueryTermInstance {
                        index: instance.index,
                        rep: instance.rep,
                        flags: instance.flags,
                    });
                }
            }
        }

        for slot in self.original_instances.iter_mut() {
            if let Some(ref mut entry) = *slot {
                entry.instances.sort_by_key(|i| i.index);
            }
        }
    }

    /// Sizes the per-document bookkeeping once the set of distinct terms is
    /// final. `cur_doc_seq` starts saturated so the first reset runs the
    /// full-clear path and lands on generation 1.
    fn finish_compile(&mut self) {
        let slots = self.terms_dict.len() + 1;
        self.captured = vec![0u16; slots];
        self.dws.ensure_terms((slots - 1) as ExecTermId);
        self.cur_doc_seq = ::std::u16::MAX;
    }

    fn reset(&mut self, doc_id: DocId) {
        self.cur_doc_id = doc_id;
        self.dws.reset();
        self.matched_term_ids.clear();

        if self.cur_doc_seq == ::std::u16::MAX {
            for stamp in self.captured.iter_mut() {
                *stamp = 0;
            }
            for slot in self.term_hits.iter_mut() {
                if let Some(ref mut th) = *slot {
                    th.doc_seq = 0;
                }
            }
            self.cur_doc_seq = 1;
        } else {
            self.cur_doc_seq += 1;
        }
    }

    /// Records a term observed matching the current document. Idempotent per
    /// document; a no-op for terms with no original-query entry (NOT-only
    /// terms).
    fn capture_matched_term(&mut self, term_id: ExecTermId) {
        let idx = term_id as usize;
        if self.original_instances[idx].is_none() {
            return;
        }
        if self.captured[idx] == self.cur_doc_seq {
            return;
        }
        self.captured[idx] = self.cur_doc_seq;
        self.matched_term_ids.push(term_id);
    }

    /// Decodes the term's hits for the current document unless they are
    /// already fresh.
    fn materialize_term_hits(&mut self, term_id: ExecTermId) -> Result<()> {
        let idx = term_id as usize;
        let seq = self.cur_doc_seq;
        let stale = match self.term_hits[idx] {
            Some(ref th) => th.doc_seq != seq,
            None => false,
        };
        if !stale {
            return Ok(());
        }

        let RuntimeCtx {
            ref mut decoders,
            ref mut term_hits,
            ref mut dws,
            ..
        } = *self;
        if let (&mut Some(ref mut decoder), &mut Some(ref mut th)) =
            (&mut decoders[idx], &mut term_hits[idx])
        {
            th.doc_seq = seq;
            decoder.materialize_hits(term_id, dws, th)?;
        }
        Ok(())
    }

    fn match_term(&mut self, term_id: ExecTermId) -> Result<bool> {
        let doc_id = self.cur_doc_id;
        let landed = match self.decoders[term_id as usize] {
            Some(ref mut decoder) => decoder.seek(doc_id)?,
            None => false,
        };
        if landed {
            self.capture_matched_term(term_id);
        }
        Ok(landed)
    }

    fn match_phrase(&mut self, term_ids: &[ExecTermId]) -> Result<bool> {
        let doc_id = self.cur_doc_id;

        for &term_id in term_ids {
            let landed = match self.decoders[term_id as usize] {
                Some(ref mut decoder) => decoder.seek(doc_id)?,
                None => false,
            };
            if !landed {
                return Ok(false);
            }
        }
        for &term_id in term_ids.iter().skip(1) {
            self.materialize_term_hits(term_id)?;
        }
        self.materialize_term_hits(term_ids[0])?;

        let matched = {
            let RuntimeCtx {
                ref term_hits,
                ref dws,
                ..
            } = *self;
            let first = match term_hits[term_ids[0] as usize] {
                Some(ref th) => th,
                None => return Ok(false),
            };

            let mut found = false;
            'hits: for hit in &first.hits {
                if hit.pos == 0 {
                    continue;
                }
                for (k, &term_id) in term_ids.iter().enumerate().skip(1) {
                    match hit.pos.checked_add(k as u16) {
                        Some(pos) if dws.test(term_id, pos) => {}
                        _ => continue 'hits,
                    }
                }
                found = true;
                break;
            }
            found
        };

        if matched {
            for &term_id in term_ids {
                self.capture_matched_term(term_id);
            }
        }
        Ok(matched)
    }

    fn leader_doc(&self, term_id: ExecTermId) -> DocId {
        match self.decoders[term_id as usize] {
            Some(ref decoder) => decoder.cur_document().id,
            None => DOC_IDS_END,
        }
    }

    fn decoder_begin(&mut self, term_id: ExecTermId) -> Result<()> {
        match self.decoders[term_id as usize] {
            Some(ref mut decoder) => decoder.begin(),
            None => Ok(()),
        }
    }

    fn decoder_next(&mut self, term_id: ExecTermId) -> Result<bool> {
        match self.decoders[term_id as usize] {
            Some(ref mut decoder) => decoder.next(),
            None => Ok(false),
        }
    }

    fn matched_document(&self, doc_id: DocId) -> MatchedDocument {
        let matched_terms = self
            .matched_term_ids
            .iter()
            .filter_map(|&term_id| {
                let idx = term_id as usize;
                match (
                    self.original_instances[idx].as_ref(),
                    self.term_hits[idx].as_ref(),
                ) {
                    (Some(instances), Some(hits)) => {
                        Some(MatchedQueryTerm { instances, hits })
                    }
                    _ => None,
                }
            })
            .collect();
        MatchedDocument {
            id: doc_id,
            matched_terms,
        }
    }
}

fn compile(node: &AstNode, rctx: &mut RuntimeCtx) -> Result<ExecNode> {
    let compiled = match *node {
        AstNode::Token(ref phrase) => ExecNode::MatchTerm(rctx.register_token(phrase)?),

        AstNode::Phrase(ref phrase) => {
            if phrase.size() == 1 {
                ExecNode::MatchTerm(rctx.register_token(phrase)?)
            } else {
                ExecNode::MatchPhrase(rctx.register_phrase(phrase)?)
            }
        }

        AstNode::BinOp {
            op,
            ref lhs,
            ref rhs,
        } => {
            let lhs = compile(lhs, rctx)?;
            let rhs = compile(rhs, rctx)?;

            match op {
                Operator::And | Operator::StrictAnd => fuse_run(
                    lhs,
                    rhs,
                    ExecNode::MatchAllTerms,
                    |node| match node {
                        ExecNode::MatchAllTerms(run) => Ok(run),
                        other => Err(other),
                    },
                    |l, r| ExecNode::LogicalAnd(Box::new(BinopCtx { lhs: l, rhs: r })),
                ),
                Operator::Or => fuse_run(
                    lhs,
                    rhs,
                    ExecNode::MatchAnyTerms,
                    |node| match node {
                        ExecNode::MatchAnyTerms(run) => Ok(run),
                        other => Err(other),
                    },
                    |l, r| ExecNode::LogicalOr(Box::new(BinopCtx { lhs: l, rhs: r })),
                ),
                Operator::Not => ExecNode::LogicalNot(Box::new(BinopCtx { lhs, rhs })),
            }
        }

        AstNode::UnaryOp { op, ref expr } => {
            let expr = Box::new(compile(expr, rctx)?);
            match op {
                UnaryOperator::And | UnaryOperator::StrictAnd => ExecNode::UnaryAnd(expr),
                UnaryOperator::Not => ExecNode::UnaryNot(expr),
            }
        }

        AstNode::ConstTrueExpr(ref expr) => {
            ExecNode::ConstTrueExpr(Box::new(compile(expr, rctx)?))
        }

        AstNode::ConstFalse => ExecNode::Noop,

        AstNode::Dummy => bail!(IllegalState(
            "dummy node survived normalization".to_owned()
        )),
    };
    Ok(compiled)
}

// Fuses runs of MatchTerm joined by the same operator into a single
// length-prefixed array opcode, order preserving (lhs terms first).
fn fuse_run<W, U, F>(lhs: ExecNode, rhs: ExecNode, wrap: W, unwrap: U, fallback: F) -> ExecNode
where
    W: Fn(Vec<ExecTermId>) -> ExecNode,
    U: Fn(ExecNode) -> ::std::result::Result<Vec<ExecTermId>, ExecNode>,
    F: Fn(ExecNode, ExecNode) -> ExecNode,
{
    match (lhs, rhs) {
        (ExecNode::MatchTerm(a), ExecNode::MatchTerm(b)) => wrap(vec![a, b]),
        (ExecNode::MatchTerm(a), rhs) => match unwrap(rhs) {
            Ok(mut run) => {
                run.insert(0, a);
                wrap(run)
            }
            Err(rhs) => fallback(ExecNode::MatchTerm(a), rhs),
        },
        (lhs, ExecNode::MatchTerm(b)) => match unwrap(lhs) {
            Ok(mut run) => {
                run.push(b);
                wrap(run)
            }
            Err(lhs) => fallback(lhs, ExecNode::MatchTerm(b)),
        },
        (lhs, rhs) => match unwrap(lhs) {
            Ok(mut left_run) => match unwrap(rhs) {
                Ok(right_run) => {
                    left_run.extend(right_run);
                    wrap(left_run)
                }
                Err(rhs) => fallback(wrap(left_run), rhs),
            },
            Err(lhs) => fallback(lhs, rhs),
        },
    }
}

fn eval(node: &ExecNode, rctx: &mut RuntimeCtx) -> Result<bool> {
    match *node {
        ExecNode::Noop => Ok(false),

        ExecNode::MatchTerm(term_id) => rctx.match_term(term_id),

        ExecNode::MatchPhrase(ref term_ids) => rctx.match_phrase(term_ids),

        ExecNode::MatchAllTerms(ref term_ids) => {
            for &term_id in term_ids {
                if !rctx.match_term(term_id)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        ExecNode::MatchAnyTerms(ref term_ids) => {
            let mut any = false;
            for &term_id in term_ids {
                if rctx.match_term(term_id)? {
                    any = true;
                }
            }
            Ok(any)
        }

        ExecNode::LogicalAnd(ref ctx) => Ok(eval(&ctx.lhs, rctx)? && eval(&ctx.rhs, rctx)?),

        // both branches always run: capture of matched terms is a side
        // effect scoring depends on, so [apple OR samsung] must collect both
        // tokens when both are present
        ExecNode::LogicalOr(ref ctx) => {
            let lhs = eval(&ctx.lhs, rctx)?;
            let rhs = eval(&ctx.rhs, rctx)?;
            Ok(lhs || rhs)
        }

        ExecNode::LogicalNot(ref ctx) => {
            Ok(eval(&ctx.lhs, rctx)? && !eval(&ctx.rhs, rctx)?)
        }

        ExecNode::UnaryAnd(ref expr) => eval(expr, rctx),

        ExecNode::UnaryNot(ref expr) => Ok(!eval(expr, rctx)?),

        ExecNode::ConstTrueExpr(ref expr) => {
            eval(expr, rctx)?;
            Ok(true)
        }
    }
}

// Collects every term occurrence of the input query, before any rewriting,
// so scoring sees the query as the user wrote it. NOT branches contribute
// nothing.
fn collect_query_instances(query: &Query) -> Vec<RawTermInstance> {
    let mut collected: Vec<&Phrase> = Vec::new();
    let mut stack: Vec<&AstNode> = Vec::new();
    if let Some(ref root) = query.root {
        stack.push(root);
    }

    while let Some(node) = stack.pop() {
        match *node {
            AstNode::Token(ref p) | AstNode::Phrase(ref p) => collected.push(p),
            AstNode::UnaryOp { op, ref expr } => {
                if op != UnaryOperator::Not {
                    stack.push(expr);
                }
            }
            AstNode::ConstTrueExpr(ref expr) => stack.push(expr),
            AstNode::BinOp {
                op,
                ref lhs,
                ref rhs,
            } => match op {
                Operator::And | Operator::StrictAnd | Operator::Or => {
                    stack.push(lhs);
                    stack.push(rhs);
                }
                Operator::Not => stack.push(lhs),
            },
            _ => {}
        }
    }

    let mut instances = Vec::new();
    for phrase in collected {
        let rep = if phrase.size() == 1 { phrase.rep } else { 1 };
        for (i, term) in phrase.terms.iter().enumerate() {
            instances.push(RawTermInstance {
                token: term.token.clone(),
                index: phrase.index + i as u16,
                rep,
                flags: phrase.flags,
            });
        }
    }
    instances
}

// Leaders drive candidate selection: one decoder per distinct leader token,
// phrases contributing their rarest member.
fn leader_terms(query: &Query, rctx: &mut RuntimeCtx) -> Vec<ExecTermId> {
    let mut terms: Vec<ExecTermId> = Vec::new();

    for phrase in query.leader_phrases() {
        if phrase.size() == 1 {
            terms.push(rctx.resolve_term(&phrase.terms[0].token));
            continue;
        }

        let mut rarest = rctx.resolve_term(&phrase.terms[0].token);
        let mut low = rctx.term_ctx(rarest).documents;
        for term in phrase.terms.iter().skip(1) {
            let term_id = rctx.resolve_term(&term.token);
            let documents = rctx.term_ctx(term_id).documents;
            if documents < low {
                rarest = term_id;
                low = documents;
                if low == 0 {
                    break;
                }
            }
        }
        terms.push(rarest);
    }

    terms.sort();
    terms.dedup();
    terms
}

/// Evaluates `query` against `idxsrc`, reporting every matching document to
/// `filter` in increasing document-id order, skipping ids the masked
/// registry claims. Returns the number of matched documents.
///
/// Queries that normalize or optimize to nothing match nothing; that is not
/// an error. Decoder corruption is: it fails the whole query.
pub fn exec_query(
    query: &Query,
    idxsrc: &dyn IndexSource,
    masked: &dyn MaskedDocumentsRegistry,
    filter: &mut dyn MatchesFilter,
) -> Result<u32> {
    let mut query = query.clone();
    if !query.normalize() {
        debug!("no root node after normalization");
        return Ok(0);
    }

    // must happen before the optimizer moves or drops nodes
    let raw_instances = collect_query_instances(&query);

    let mut rctx = RuntimeCtx::new(idxsrc);
    if !optimizer::optimize(&mut query, &mut rctx) {
        debug!("no root node after optimization");
        return Ok(0);
    }

    let root = match query.root {
        Some(ref root) => compile(root, &mut rctx)?,
        None => return Ok(0),
    };

    let mut leaders = leader_terms(&query, &mut rctx);
    if leaders.is_empty() {
        debug!("no leader nodes");
        return Ok(0);
    }

    rctx.attach_original_instances(raw_instances);
    rctx.finish_compile();

    for &term_id in &leaders {
        rctx.decoder_begin(term_id)?;
    }

    let mut to_advance: Vec<usize> = Vec::with_capacity(leaders.len());
    let mut matched_documents = 0u32;

    'driver: while !leaders.is_empty() {
        let mut doc_id = rctx.leader_doc(leaders[0]);
        to_advance.clear();
        to_advance.push(0);

        for i in 1..leaders.len() {
            let id = rctx.leader_doc(leaders[i]);
            if id < doc_id {
                doc_id = id;
                to_advance.clear();
                to_advance.push(i);
            } else if id == doc_id {
                to_advance.push(i);
            }
        }

        if !masked.test(doc_id) {
            rctx.reset(doc_id);

            if eval(&root, &mut rctx)? {
                matched_documents += 1;

                // deferred hits: anything captured but not yet materialized
                // must be decoded before scoring sees the document
                for i in 0..rctx.matched_term_ids.len() {
                    let term_id = rctx.matched_term_ids[i];
                    rctx.materialize_term_hits(term_id)?;
                }

                let response = {
                    let doc = rctx.matched_document(doc_id);
                    filter.consider(&doc, &rctx.dws)
                };
                if response == ConsiderResponse::Abort {
                    // early termination, e.g. the filter collected enough
                    break 'driver;
                }
            }
        }

        for idx in (0..to_advance.len()).rev() {
            let leader_idx = to_advance[idx];
            if !rctx.decoder_next(leaders[leader_idx])? {
                leaders.remove(leader_idx);
            }
        }
    }

    Ok(matched_documents)
}

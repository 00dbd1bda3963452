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

mod doc_words_space;

pub use self::doc_words_space::*;

/// Identifies an indexed document within one segment. Posting lists are
/// strictly increasing sequences of document ids.
pub type DocId = u32;

/// Sentinel published by an exhausted decoder; never a valid document id.
pub const DOC_IDS_END: DocId = ::std::u32::MAX;

/// Session-local term id, assigned densely starting at 1 while a query is
/// compiled. 0 is reserved for "missing".
pub type ExecTermId = u16;

/// Term id in the index source's own space; 0 means the term is unknown to
/// the source.
pub type IndexTermId = u32;

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

use core::util::ExecTermId;

/// Per-document map of `(termID, position)` pairs, used by phrase matching to
/// probe whether a term occurred at a given position of the current document.
///
/// Cells hold the generation at which they were last set, so `reset` is O(1):
/// bumping the generation invalidates every cell at once. When the u16
/// generation saturates the whole table is cleared and the counter restarts
/// at 1, so stale stamps can never alias a live generation.
pub struct DocWordsSpace {
    stamps: Vec<u16>,
    stride: usize,
    generation: u16,
}

impl DocWordsSpace {
    pub fn new(max_position: u16) -> DocWordsSpace {
        DocWordsSpace {
            stamps: Vec::new(),
            stride: max_position as usize + 1,
            generation: 0,
        }
    }

    /// Grows the table to cover term ids up to and including `max_term_id`.
    /// Called once after query compilation, when the number of distinct terms
    /// is known.
    pub fn ensure_terms(&mut self, max_term_id: ExecTermId) {
        let needed = (max_term_id as usize + 1) * self.stride;
        if self.stamps.len() < needed {
            self.stamps.resize(needed, 0);
        }
    }

    pub fn reset(&mut self) {
        if self.generation == ::std::u16::MAX {
            for stamp in self.stamps.iter_mut() {
                *stamp = 0;
            }
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    pub fn set(&mut self, term_id: ExecTermId, position: u16) {
        let index = term_id as usize * self.stride + position as usize;
        if let Some(stamp) = self.stamps.get_mut(index) {
            *stamp = self.generation;
        }
    }

    /// True iff `set(term_id, position)` was called since the last `reset`.
    /// Out-of-range probes (e.g. a phrase continuation past the last indexed
    /// position) are simply absent.
    pub fn test(&self, term_id: ExecTermId, position: u16) -> bool {
        if position as usize >= self.stride {
            return false;
        }
        let index = term_id as usize * self.stride + position as usize;
        self.stamps.get(index).map_or(false, |stamp| *stamp == self.generation)
    }
}

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

use memmap::Mmap;

use error::Result;

use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Read-only, shareable region of bytes, either memory mapped from a file or
/// held on the heap. Clones are cheap and all refer to the same region; the
/// mapping is released when the last clone is dropped.
#[derive(Clone)]
pub enum ReadOnlySource {
    Mmap(Arc<Mmap>),
    Ram(Arc<Vec<u8>>),
}

unsafe impl Send for ReadOnlySource {}

unsafe impl Sync for ReadOnlySource {}

impl ReadOnlySource {
    /// Maps `path` read-only for the lifetime of the source. An empty file is
    /// returned as an empty heap region since zero-length mappings are not
    /// portable.
    pub fn map_file(path: &Path) -> Result<ReadOnlySource> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        if meta.len() == 0 {
            return Ok(ReadOnlySource::empty());
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(ReadOnlySource::Mmap(Arc::new(mmap)))
    }

    pub fn empty() -> ReadOnlySource {
        ReadOnlySource::Ram(Arc::new(Vec::new()))
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match *self {
            ReadOnlySource::Mmap(ref mmap) => mmap,
            ReadOnlySource::Ram(ref bytes) => bytes,
        }
    }
}

impl Deref for ReadOnlySource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ReadOnlySource {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for ReadOnlySource {
    fn from(bytes: Vec<u8>) -> ReadOnlySource {
        ReadOnlySource::Ram(Arc::new(bytes))
    }
}

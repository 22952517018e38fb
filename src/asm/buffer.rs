//! Fixed-capacity output buffer
//!
//! The buffer never holds more words than its capacity. Instructions emitted past
//! the end are counted but dropped, so the size check can report how large the
//! routine would have been.

use crate::error::{SynthError, SynthResult};
use crate::isa::{EncodeError, Insn};

/// Which address space a buffer's indices live in.
///
/// Routines that need folding are emitted into a scratch buffer first and then
/// copied into the final image; labels and relocations follow the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    Scratch,
    Final,
}

/// A position in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Loc {
    pub area: Area,
    pub index: usize,
}

impl Loc {
    pub fn new(area: Area, index: usize) -> Self {
        Self { area, index }
    }
}

#[derive(Debug, Clone)]
pub struct CodeBuffer {
    words: Vec<u32>,
    capacity: usize,
    area: Area,
    /// Words emitted beyond `capacity`
    dropped: usize,
    /// First encoding failure, with its index
    error: Option<(usize, EncodeError)>,
}

impl CodeBuffer {
    pub fn new(area: Area, capacity: usize) -> Self {
        Self {
            words: Vec::with_capacity(capacity),
            capacity,
            area,
            dropped: 0,
            error: None,
        }
    }

    pub fn area(&self) -> Area {
        self.area
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of instructions emitted, including any that did not fit.
    pub fn len(&self) -> usize {
        self.words.len() + self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Location the next instruction will occupy
    pub fn cursor(&self) -> Loc {
        Loc::new(self.area, self.len())
    }

    pub fn word_at(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied()
    }

    pub fn insn_at(&self, index: usize) -> Option<Insn> {
        self.word_at(index).and_then(Insn::decode)
    }

    /// Encode and append one instruction, returning its index.
    pub fn emit(&mut self, insn: Insn) -> usize {
        let index = self.len();
        let word = match insn.encode() {
            Ok(word) => word,
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some((index, err));
                }
                0
            }
        };
        if self.words.len() < self.capacity && self.dropped == 0 {
            self.words.push(word);
        } else {
            self.dropped += 1;
        }
        index
    }

    /// Place a word at an arbitrary index, padding the gap with nops.
    ///
    /// Used when copying fragments into the final image, never during emission.
    pub(crate) fn store(&mut self, routine: &'static str, index: usize, word: u32) -> SynthResult<()> {
        if index >= self.capacity {
            return Err(SynthError::CapacityExceeded {
                routine,
                len: index + 1,
                capacity: self.capacity,
            });
        }
        if index >= self.words.len() {
            self.words.resize(index + 1, 0);
        }
        self.words[index] = word;
        Ok(())
    }

    /// Fill with nops up to `len` words (bounded by capacity).
    pub(crate) fn pad_to(&mut self, len: usize) {
        let len = len.min(self.capacity);
        if self.words.len() < len {
            self.words.resize(len, 0);
        }
    }

    /// Rewrite an already-emitted word; reserved for relocation resolution.
    pub(crate) fn patch(&mut self, index: usize, word: u32) {
        self.words[index] = word;
    }

    /// Fail if the routine outgrew its region or an operand did not encode.
    pub fn verify(&self, routine: &'static str) -> SynthResult<()> {
        if let Some((index, source)) = &self.error {
            return Err(SynthError::Encoding {
                routine,
                index: *index,
                source: source.clone(),
            });
        }
        if self.dropped > 0 {
            return Err(SynthError::CapacityExceeded {
                routine,
                len: self.len(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

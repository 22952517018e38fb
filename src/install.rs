//! Installation sinks
//!
//! The synthesizer hands each finished routine to an [`Installer`], which
//! writes it at its fixed address and makes it visible to instruction fetch.

use crate::error::{SynthError, SynthResult};
use std::collections::BTreeMap;

pub trait Installer {
    /// Copy `words` to `address`.
    fn install(&mut self, address: u64, words: &[u32]) -> SynthResult<()>;

    /// Make `[start, end)` coherent for instruction fetch.
    fn flush_icache(&mut self, start: u64, end: u64);
}

/// In-memory exception-vector image, keyed by word address.
#[derive(Debug, Clone, Default)]
pub struct EbaseImage {
    words: BTreeMap<u64, u32>,
    flushes: Vec<(u64, u64)>,
    installs: usize,
}

impl EbaseImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_word(&self, address: u64) -> Option<u32> {
        self.words.get(&address).copied()
    }

    /// `count` consecutive words from `start`, unwritten words as zero.
    pub fn read_range(&self, start: u64, count: usize) -> Vec<u32> {
        (0..count as u64)
            .map(|i| self.read_word(start + 4 * i).unwrap_or(0))
            .collect()
    }

    pub fn flushes(&self) -> &[(u64, u64)] {
        &self.flushes
    }

    /// Number of `install` calls received
    pub fn installs(&self) -> usize {
        self.installs
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Written words in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.words.iter().map(|(a, w)| (*a, *w))
    }
}

impl Installer for EbaseImage {
    fn install(&mut self, address: u64, words: &[u32]) -> SynthResult<()> {
        if address & 3 != 0 {
            return Err(SynthError::Install {
                address,
                words: words.len(),
                reason: "address is not word aligned",
            });
        }
        for (i, word) in words.iter().enumerate() {
            self.words.insert(address + 4 * i as u64, *word);
        }
        self.installs += 1;
        Ok(())
    }

    fn flush_icache(&mut self, start: u64, end: u64) {
        self.flushes.push((start, end));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_read_back() {
        let mut image = EbaseImage::new();
        image.install(0x8000_0080, &[1, 2, 3]).unwrap();
        image.flush_icache(0x8000_0080, 0x8000_008c);
        assert_eq!(image.read_word(0x8000_0084), Some(2));
        assert_eq!(image.read_range(0x8000_007c, 3), vec![0, 1, 2]);
        assert_eq!(image.flushes(), &[(0x8000_0080, 0x8000_008c)]);
        assert_eq!(image.installs(), 1);
    }

    #[test]
    fn test_misaligned_install_is_rejected() {
        let mut image = EbaseImage::new();
        assert!(matches!(
            image.install(0x8000_0002, &[0]),
            Err(SynthError::Install { .. })
        ));
        assert!(image.is_empty());
    }
}

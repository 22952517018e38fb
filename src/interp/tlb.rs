//! Joint TLB model
//!
//! Just enough of the TLB for handlers to probe, read back and write entries.
//! Random writes fill slots round-robin so runs are reproducible.

/// Index register value after a failed probe (P bit)
pub const PROBE_MISS: u64 = 0x8000_0000;

/// VPN2 bits below the page mask are ignored when matching.
const VPN2_LOW_MASK: u64 = 0x1fff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlbEntry {
    pub entryhi: u64,
    pub entrylo0: u64,
    pub entrylo1: u64,
    pub pagemask: u64,
}

impl TlbEntry {
    fn matches(&self, entryhi: u64) -> bool {
        let ignore = VPN2_LOW_MASK | self.pagemask;
        (self.entryhi & !ignore) == (entryhi & !ignore)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Random,
    Indexed,
}

/// One `tlbwr` or `tlbwi` as the handler issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbWrite {
    pub kind: WriteKind,
    pub index: usize,
    pub entry: TlbEntry,
}

#[derive(Debug, Clone)]
pub struct Tlb {
    entries: Vec<Option<TlbEntry>>,
    next_random: usize,
}

impl Tlb {
    pub fn new(size: usize) -> Self {
        Self {
            entries: vec![None; size.max(1)],
            next_random: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, index: usize) -> Option<TlbEntry> {
        self.entries.get(index).copied().flatten()
    }

    /// Preload an entry, as if an earlier refill had written it.
    pub fn insert(&mut self, index: usize, entry: TlbEntry) {
        if let Some(slot) = self.entries.get_mut(index) {
            *slot = Some(entry);
        }
    }

    /// Index of the entry mapping `entryhi`, or [`PROBE_MISS`].
    pub fn probe(&self, entryhi: u64) -> u64 {
        self.entries
            .iter()
            .position(|e| e.map_or(false, |e| e.matches(entryhi)))
            .map_or(PROBE_MISS, |i| i as u64)
    }

    /// Entry at `index`, or all zero for an empty slot.
    pub fn read(&self, index: u64) -> TlbEntry {
        self.entry(index as usize % self.size()).unwrap_or_default()
    }

    pub fn write(&mut self, kind: WriteKind, index: u64, entry: TlbEntry) -> TlbWrite {
        let index = match kind {
            WriteKind::Indexed => index as usize % self.size(),
            WriteKind::Random => {
                let i = self.next_random;
                self.next_random = (i + 1) % self.size();
                i
            }
        };
        self.entries[index] = Some(entry);
        TlbWrite { kind, index, entry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(vpn2: u64) -> TlbEntry {
        TlbEntry {
            entryhi: vpn2 << 13,
            ..Default::default()
        }
    }

    #[test]
    fn test_probe_matches_vpn2() {
        let mut tlb = Tlb::new(4);
        tlb.insert(2, entry(0x40));
        assert_eq!(tlb.probe((0x40 << 13) | 0x123), 2);
        assert_eq!(tlb.probe(0x41 << 13), PROBE_MISS);
    }

    #[test]
    fn test_random_writes_rotate() {
        let mut tlb = Tlb::new(2);
        let a = tlb.write(WriteKind::Random, 0, entry(1));
        let b = tlb.write(WriteKind::Random, 0, entry(2));
        let c = tlb.write(WriteKind::Random, 0, entry(3));
        assert_eq!((a.index, b.index, c.index), (0, 1, 0));
        assert_eq!(tlb.read(0), entry(3));
    }

    #[test]
    fn test_huge_entries_ignore_masked_bits() {
        let mut tlb = Tlb::new(4);
        tlb.insert(
            0,
            TlbEntry {
                entryhi: 0x4000_0000,
                pagemask: 0x1fe000,
                ..Default::default()
            },
        );
        assert_eq!(tlb.probe(0x4010_0000), 0);
    }
}

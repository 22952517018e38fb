//! Synthetic page tables in [`Machine`] memory
//!
//! Builds the directory and PTE tables a handler walks, with the geometry of
//! the target kernel. User addresses hang off a per-process directory reached
//! through `pgd_current`; on 64-bit kernels negative addresses go through
//! `swapper_pg_dir` the way the vmalloc path expects.

use super::machine::Machine;
use crate::asm::Width;
use crate::layout::{PageGeometry, PhysMode, TargetConfig, PAGE_SHIFT};

/// Default start of the table arena, clear of the default kernel symbols.
pub const DEFAULT_ARENA: u64 = 0x8100_0000;

pub struct PageTables {
    target: TargetConfig,
    geom: PageGeometry,
    pgd: u64,
    next_free: u64,
}

impl PageTables {
    /// Tables allocated upward from `arena`.
    pub fn new(target: &TargetConfig, arena: u64) -> Self {
        let geom = target.geometry();
        let mut tables = Self {
            target: *target,
            geom,
            pgd: 0,
            next_free: target.canonical(arena),
        };
        tables.pgd = tables.alloc(geom.ptrs_per_pgd << geom.pgd_log2);
        tables
    }

    /// The per-process directory
    pub fn pgd(&self) -> u64 {
        self.pgd
    }

    fn alloc(&mut self, bytes: u64) -> u64 {
        let align = bytes.max(1 << PAGE_SHIFT);
        let base = (self.next_free + align - 1) & !(align - 1);
        self.next_free = base + bytes;
        base
    }

    fn root(&self, vaddr: u64) -> u64 {
        if self.target.width.is_64() && (vaddr as i64) < 0 {
            self.target.canonical(self.target.symbols.swapper_pg_dir)
        } else {
            self.pgd
        }
    }

    /// Follow the pointer at `slot`, allocating a table of `bytes` when empty.
    fn table_at(&mut self, m: &mut Machine, slot: u64, bytes: u64) -> u64 {
        let table = m.read_ptr(slot);
        if table != 0 {
            return table;
        }
        let table = self.alloc(bytes);
        m.write_ptr(slot, table);
        table
    }

    /// Address of the lowest directory entry covering `vaddr`: the one that
    /// points at the PTE table, or holds a huge PTE.
    pub fn directory_slot(&mut self, m: &mut Machine, vaddr: u64) -> u64 {
        let geom = self.geom;
        let vaddr = m.canonical(vaddr);
        let index = (vaddr >> geom.pgdir_shift) & (geom.ptrs_per_pgd - 1);
        let slot = self.root(vaddr) + (index << geom.pgd_log2);
        match geom.pmd_shift {
            None => slot,
            Some(pmd_shift) => {
                let pmd = self.table_at(m, slot, geom.ptrs_per_pmd << 3);
                pmd + (((vaddr >> pmd_shift) & (geom.ptrs_per_pmd - 1)) << 3)
            }
        }
    }

    /// Address of the PTE for `vaddr`, allocating tables on the way.
    pub fn pte_address(&mut self, m: &mut Machine, vaddr: u64) -> u64 {
        let geom = self.geom;
        let slot = self.directory_slot(m, vaddr);
        let table = self.table_at(m, slot, geom.ptrs_per_pte << geom.pte_log2);
        let index = (m.canonical(vaddr) >> PAGE_SHIFT) & (geom.ptrs_per_pte - 1);
        table + (index << geom.pte_log2)
    }

    /// Store `pte` for `vaddr`. 64-bit PTEs on a 32-bit kernel are laid out
    /// as two words: bits 0..32 (software bits) first, then the EntryLo word.
    pub fn map(&mut self, m: &mut Machine, vaddr: u64, pte: u64) -> u64 {
        let address = self.pte_address(m, vaddr);
        self.write_pte(m, address, pte);
        address
    }

    /// Store a huge PTE in the directory entry covering `vaddr`.
    pub fn map_huge(&mut self, m: &mut Machine, vaddr: u64, pte: u64) -> u64 {
        let slot = self.directory_slot(m, vaddr);
        m.write_ptr(slot, pte);
        slot
    }

    pub fn read_pte(&self, m: &Machine, address: u64) -> u64 {
        match (self.target.width, self.target.phys) {
            (Width::Bits32, PhysMode::Phys64On32) => {
                m.read_u32(address) as u64 | (m.read_u32(address + 4) as u64) << 32
            }
            (Width::Bits32, _) => m.read_u32(address) as u64,
            (Width::Bits64, _) => m.read_u64(address),
        }
    }

    fn write_pte(&self, m: &mut Machine, address: u64, pte: u64) {
        match (self.target.width, self.target.phys) {
            (Width::Bits32, PhysMode::Phys64On32) => {
                m.write_u32(address, pte as u32);
                m.write_u32(address + 4, (pte >> 32) as u32);
            }
            (Width::Bits32, _) => m.write_u32(address, pte as u32),
            (Width::Bits64, _) => m.write_u64(address, pte),
        }
    }

    /// Make this directory current on `cpu` through `pgd_current`.
    pub fn attach(&self, m: &mut Machine, cpu: u64) {
        let pgd_current = self.target.canonical(self.target.symbols.pgd_current);
        let slot = if self.target.smp {
            pgd_current + (cpu << self.geom.pgd_log2)
        } else {
            pgd_current
        };
        m.write_ptr(slot, self.pgd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TableLevels;

    #[test]
    fn test_two_level_pte_address() {
        let target = TargetConfig::new(Width::Bits32);
        let mut m = Machine::new(Width::Bits32);
        let mut tables = PageTables::new(&target, DEFAULT_ARENA);
        let pte = tables.map(&mut m, 0x0040_3000, 0x1234_5601);

        let slot = tables.pgd() + (0x0040_3000u64 >> 22) * 4;
        let table = m.read_ptr(slot);
        assert_eq!(pte, table + 3 * 4);
        assert_eq!(m.read_u32(pte), 0x1234_5601);
    }

    #[test]
    fn test_three_level_allocates_pmd() {
        let target = TargetConfig::new(Width::Bits64).with_levels(TableLevels::Three);
        let mut m = Machine::new(Width::Bits64);
        let mut tables = PageTables::new(&target, DEFAULT_ARENA);
        let pte = tables.map(&mut m, 0x1_4000_2000, 0xabcd);
        assert_eq!(tables.read_pte(&m, pte), 0xabcd);

        let pgd_slot = tables.pgd() + ((0x1_4000_2000u64 >> 30) & 1023) * 8;
        assert_ne!(m.read_ptr(pgd_slot), 0);
    }

    #[test]
    fn test_kernel_addresses_use_swapper() {
        let target = TargetConfig::new(Width::Bits64);
        let mut m = Machine::new(Width::Bits64);
        let mut tables = PageTables::new(&target, DEFAULT_ARENA);
        let slot = tables.directory_slot(&mut m, 0xc000_0000_0020_0000);
        assert_eq!(slot, 0xffff_ffff_8050_0000 + 8);
    }

    #[test]
    fn test_attach_smp_slot() {
        let target = TargetConfig::new(Width::Bits32).with_smp(true);
        let mut m = Machine::new(Width::Bits32);
        let tables = PageTables::new(&target, DEFAULT_ARENA);
        tables.attach(&mut m, 2);
        assert_eq!(m.read_ptr(0x8040_0008), tables.pgd());
    }
}

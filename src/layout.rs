//! Page-table ABI and boot memory layout
//!
//! The handlers are generated against a fixed software PTE layout, a page-table
//! geometry and a handful of kernel symbol addresses. All of it is fixed for a
//! given kernel build; [`TargetConfig`] bundles the build-time choices.
//!
//! # Software PTE layouts (bit numbers)
//!
//! | Bit | 32/64-bit | 32/64-bit, RI/XI | 36-bit phys (low word) | R3000 |
//! |-----|-----------|------------------|------------------------|-------|
//! | present | 0 | 0 | 6 | 0 |
//! | read | 1 | - | 7 | 1 |
//! | write | 2 | 1 | 8 | 2 |
//! | accessed | 3 | 2 | 9 | 3 |
//! | modified | 4 | 3 | 10 | 4 |
//! | huge (64-bit only) | 5 | 4 | - | - |
//! | no-exec, no-read | - | G-2, G-1 | - | - |
//! | global | 5 / 6 | 6 / 7 | 0 | 8 |
//!
//! Valid, dirty and the three cache bits follow global, then the PFN. Shifting the
//! PTE right by the global bit therefore yields the EntryLo register image.

use crate::asm::Width;
use crate::cpu::{CpuCaps, CpuFeatures};
use crate::error::{SynthError, SynthResult};
use serde::{Deserialize, Serialize};

/// Page size of every supported configuration
pub const PAGE_SHIFT: u32 = 12;

/// Huge pages map 2 MiB as two 1 MiB TLB halves.
pub const HPAGE_SHIFT: u32 = 21;

/// PageMask value for one huge TLB entry
pub const PM_HUGE_MASK: u64 = ((1 << HPAGE_SHIFT) - 1) & !0x1fff;

/// EntryLo1 of a huge entry is EntryLo0 advanced by half a huge page.
pub const HUGE_ENTRYLO_STEP: u64 = 1 << (HPAGE_SHIFT - 7);

/// Per-CPU register save slot size (one cache line), log2
pub const REG_SAVE_STRIDE_LOG2: u32 = 5;

/// Physical address width seen by the page tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysMode {
    /// 32-bit kernel, 32-bit PTEs
    Phys32,
    /// 32-bit kernel with 64-bit PTEs whose high word is stored as EntryLo
    Phys64On32,
    /// 64-bit kernel, 64-bit PTEs
    Native64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLevels {
    /// pgd -> pte, the pmd level folded away
    Two,
    /// pgd -> pmd -> pte
    Three,
}

/// How the PTE becomes an EntryLo value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLoConversion {
    /// Plain right shift dropping the software bits
    Shift(u32),
    /// Shift down to no-exec, then rotate RI/XI into the top two bits
    RotateRixi { shift: u32, rotate: u32 },
    /// The PTE word already is the EntryLo image
    Stored,
}

/// Bit positions of the software PTE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PteLayout {
    pub present: u32,
    pub read: Option<u32>,
    pub write: u32,
    pub accessed: u32,
    pub modified: u32,
    pub huge: Option<u32>,
    pub no_exec: Option<u32>,
    pub no_read: Option<u32>,
    pub global: u32,
    pub valid: u32,
    pub dirty: u32,
    pub cache: u32,
    pub pfn: u32,
    pub conversion: EntryLoConversion,
}

impl PteLayout {
    /// Layout for a kernel of `width` with physical mode `phys`.
    pub fn standard(width: Width, rixi: bool) -> Self {
        let huge_capable = width.is_64();
        let (read, write, accessed, modified) = if rixi {
            (None, 1, 2, 3)
        } else {
            (Some(1), 2, 3, 4)
        };
        let mut next = modified + 1;
        let huge = if huge_capable {
            next += 1;
            Some(next - 1)
        } else {
            None
        };
        let (no_exec, no_read) = if rixi {
            next += 2;
            (Some(next - 2), Some(next - 1))
        } else {
            (None, None)
        };
        let global = next;
        let conversion = match no_exec {
            Some(nx) => EntryLoConversion::RotateRixi {
                shift: nx,
                rotate: global - nx,
            },
            None => EntryLoConversion::Shift(global),
        };
        Self {
            present: 0,
            read,
            write,
            accessed,
            modified,
            huge,
            no_exec,
            no_read,
            global,
            valid: global + 1,
            dirty: global + 2,
            cache: global + 3,
            pfn: global + 6,
            conversion,
        }
    }

    /// Low word of a 64-bit PTE on a 32-bit kernel. The hardware bits sit where
    /// EntryLo keeps them so the same mask updates both words.
    pub fn phys64_on_32() -> Self {
        Self {
            present: 6,
            read: Some(7),
            write: 8,
            accessed: 9,
            modified: 10,
            huge: None,
            no_exec: None,
            no_read: None,
            global: 0,
            valid: 1,
            dirty: 2,
            cache: 3,
            pfn: 6,
            conversion: EntryLoConversion::Stored,
        }
    }

    /// R3000 PTEs are stored in EntryLo format above bit 8.
    pub fn r3000() -> Self {
        Self {
            present: 0,
            read: Some(1),
            write: 2,
            accessed: 3,
            modified: 4,
            huge: None,
            no_exec: None,
            no_read: None,
            global: 8,
            valid: 9,
            dirty: 10,
            cache: 11,
            pfn: 12,
            conversion: EntryLoConversion::Stored,
        }
    }

    pub fn bit(shift: u32) -> u64 {
        1u64 << shift
    }

    /// Bits that must all be set for a read access
    pub fn readable_mask(&self) -> u64 {
        Self::bit(self.present) | self.read.map_or(0, Self::bit)
    }

    pub fn writable_mask(&self) -> u64 {
        Self::bit(self.present) | Self::bit(self.write)
    }

    /// Bits set by the load handler
    pub fn make_valid_mode(&self) -> u64 {
        Self::bit(self.accessed) | Self::bit(self.valid)
    }

    /// Bits set by the store and modify handlers
    pub fn make_write_mode(&self) -> u64 {
        Self::bit(self.accessed)
            | Self::bit(self.modified)
            | Self::bit(self.valid)
            | Self::bit(self.dirty)
    }

    /// Hardware-visible subset of `mode`
    pub fn hw_mode(&self, mode: u64) -> u64 {
        mode & (Self::bit(self.valid) | Self::bit(self.dirty))
    }

    /// Reference EntryLo for `pte` on a kernel of `width`.
    pub fn to_entrylo(&self, pte: u64, width: Width) -> u64 {
        match (self.conversion, width) {
            (EntryLoConversion::Stored, _) => pte,
            (EntryLoConversion::Shift(s), Width::Bits64) => pte >> s,
            (EntryLoConversion::Shift(s), Width::Bits32) => ((pte as u32) >> s) as u64,
            (EntryLoConversion::RotateRixi { shift, rotate }, Width::Bits64) => {
                (pte >> shift).rotate_right(rotate)
            }
            (EntryLoConversion::RotateRixi { shift, rotate }, Width::Bits32) => {
                ((pte as u32) >> shift).rotate_right(rotate) as u64
            }
        }
    }
}

/// Page-table shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    /// log2 of the PTE size in bytes
    pub pte_log2: u32,
    pub ptrs_per_pte: u64,
    pub pgdir_shift: u32,
    pub ptrs_per_pgd: u64,
    /// log2 of a directory entry (a kernel pointer)
    pub pgd_log2: u32,
    pub pmd_shift: Option<u32>,
    pub ptrs_per_pmd: u64,
}

impl PageGeometry {
    pub fn new(width: Width, phys: PhysMode, levels: TableLevels) -> Self {
        match (width, phys, levels) {
            (Width::Bits32, PhysMode::Phys64On32, _) => Self {
                pte_log2: 3,
                ptrs_per_pte: 512,
                pgdir_shift: 21,
                ptrs_per_pgd: 2048,
                pgd_log2: 2,
                pmd_shift: None,
                ptrs_per_pmd: 1,
            },
            (Width::Bits32, _, _) => Self {
                pte_log2: 2,
                ptrs_per_pte: 1024,
                pgdir_shift: 22,
                ptrs_per_pgd: 1024,
                pgd_log2: 2,
                pmd_shift: None,
                ptrs_per_pmd: 1,
            },
            (Width::Bits64, _, TableLevels::Two) => Self {
                pte_log2: 3,
                ptrs_per_pte: 512,
                pgdir_shift: 21,
                ptrs_per_pgd: 1024,
                pgd_log2: 3,
                pmd_shift: None,
                ptrs_per_pmd: 1,
            },
            (Width::Bits64, _, TableLevels::Three) => Self {
                pte_log2: 3,
                ptrs_per_pte: 512,
                pgdir_shift: 30,
                ptrs_per_pgd: 1024,
                pgd_log2: 3,
                pmd_shift: Some(21),
                ptrs_per_pmd: 512,
            },
        }
    }

    pub fn pte_size(&self) -> u64 {
        1 << self.pte_log2
    }

    /// Virtual-address bits the page tables can map
    pub fn va_bits(&self) -> u32 {
        self.pgdir_shift + self.ptrs_per_pgd.trailing_zeros()
    }
}

/// Addresses of the kernel objects the handlers reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSymbols {
    /// Per-CPU array of current page-directory pointers
    pub pgd_current: u64,
    /// Kernel (vmalloc) page directory
    pub swapper_pg_dir: u64,
    /// Slow path for load faults
    pub tlb_do_page_fault_0: u64,
    /// Slow path for store and modify faults
    pub tlb_do_page_fault_1: u64,
    /// Per-CPU work-register save area
    pub handler_reg_save: u64,
}

impl Default for KernelSymbols {
    fn default() -> Self {
        Self {
            pgd_current: 0x8040_0000,
            swapper_pg_dir: 0x8050_0000,
            tlb_do_page_fault_0: 0x8011_0000,
            tlb_do_page_fault_1: 0x8011_0100,
            handler_reg_save: 0x8040_1000,
        }
    }
}

/// Installation addresses of the load, store and modify handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerAddresses {
    pub load: u64,
    pub store: u64,
    pub modify: u64,
}

impl Default for HandlerAddresses {
    fn default() -> Self {
        Self {
            load: 0x8010_0000,
            store: 0x8010_0200,
            modify: 0x8010_0400,
        }
    }
}

/// Build-time kernel configuration the handlers are generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig {
    pub width: Width,
    pub phys: PhysMode,
    pub levels: TableLevels,
    pub smp: bool,
    pub huge_pages: bool,
    /// The current page directory lives in a KScratch register
    pub pgd_in_kscratch: bool,
    /// Each CPU has its own exception base and refill handler
    pub local_ebase: bool,
    pub ebase: u64,
    pub handlers: HandlerAddresses,
    pub symbols: KernelSymbols,
}

impl TargetConfig {
    /// Uniprocessor, two-level, no huge pages, default addresses.
    pub fn new(width: Width) -> Self {
        Self {
            width,
            phys: match width {
                Width::Bits32 => PhysMode::Phys32,
                Width::Bits64 => PhysMode::Native64,
            },
            levels: TableLevels::Two,
            smp: false,
            huge_pages: false,
            pgd_in_kscratch: false,
            local_ebase: false,
            ebase: 0x8000_0000,
            handlers: HandlerAddresses::default(),
            symbols: KernelSymbols::default(),
        }
    }

    pub fn with_phys(mut self, phys: PhysMode) -> Self {
        self.phys = phys;
        self
    }

    pub fn with_levels(mut self, levels: TableLevels) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_smp(mut self, smp: bool) -> Self {
        self.smp = smp;
        self
    }

    pub fn with_huge_pages(mut self, huge: bool) -> Self {
        self.huge_pages = huge;
        self
    }

    pub fn with_pgd_in_kscratch(mut self, on: bool) -> Self {
        self.pgd_in_kscratch = on;
        self
    }

    pub fn with_local_ebase(mut self, on: bool) -> Self {
        self.local_ebase = on;
        self
    }

    /// Reject combinations no kernel build can produce.
    pub fn validate(&self, caps: &CpuCaps) -> SynthResult<()> {
        let fail = |msg: &str| Err(SynthError::Config(msg.to_string()));
        if self.width.is_64() && !caps.has(CpuFeatures::CPU_64BIT) {
            return fail("64-bit kernel on a 32-bit CPU");
        }
        match (self.width, self.phys) {
            (Width::Bits32, PhysMode::Native64) => return fail("native 64-bit PTEs need a 64-bit kernel"),
            (Width::Bits64, PhysMode::Phys32 | PhysMode::Phys64On32) => {
                return fail("64-bit kernels always use native 64-bit PTEs")
            }
            _ => {}
        }
        if self.levels == TableLevels::Three && !self.width.is_64() {
            return fail("three-level page tables need a 64-bit kernel");
        }
        if self.huge_pages && !self.width.is_64() {
            return fail("huge pages need a 64-bit kernel");
        }
        if self.phys == PhysMode::Phys64On32 && caps.has(CpuFeatures::RIXI) {
            return fail("RI/XI is not supported with 64-bit PTEs on a 32-bit kernel");
        }
        if caps.has(CpuFeatures::BCM1250_M3_WAR) && !self.width.is_64() {
            return fail("the BCM1250 M3 workaround needs a 64-bit kernel");
        }
        if caps.cpu.is_r3000_class() {
            if self.width.is_64() || self.phys != PhysMode::Phys32 {
                return fail("R3000-class CPUs run 32-bit kernels with 32-bit PTEs");
            }
            if self.smp {
                return fail("R3000-class CPUs are uniprocessor");
            }
        }
        if self.ebase & 0xfff != 0 {
            return fail("exception base must be 4 KiB aligned");
        }
        Ok(())
    }

    pub fn geometry(&self) -> PageGeometry {
        PageGeometry::new(self.width, self.phys, self.levels)
    }

    pub fn pte_layout(&self, caps: &CpuCaps) -> PteLayout {
        if caps.cpu.is_r3000_class() {
            PteLayout::r3000()
        } else if self.phys == PhysMode::Phys64On32 {
            PteLayout::phys64_on_32()
        } else {
            PteLayout::standard(self.width, caps.has(CpuFeatures::RIXI))
        }
    }

    /// Sign-extend 32-bit kernel addresses the way the CPU sees them. On
    /// 64-bit kernels only values written as 32-bit addresses are extended.
    pub fn canonical(&self, address: u64) -> u64 {
        match self.width {
            Width::Bits64 if address >> 32 != 0 => address,
            _ => address as u32 as i32 as i64 as u64,
        }
    }

    /// Bit of the Context register at which the SMP CPU number is kept
    pub fn smp_cpuid_shift(&self) -> u32 {
        match self.width {
            Width::Bits32 => 23,
            Width::Bits64 => 51,
        }
    }

    /// The CPU decodes more user address bits than the page tables can map.
    pub fn high_segbits(&self, caps: &CpuCaps) -> bool {
        self.width.is_64() && caps.vmbits as u32 > self.geometry().va_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuType;

    #[test]
    fn test_standard_layouts() {
        let l = PteLayout::standard(Width::Bits64, false);
        assert_eq!((l.huge, l.global, l.pfn), (Some(5), 6, 12));
        assert_eq!(l.conversion, EntryLoConversion::Shift(6));

        let r = PteLayout::standard(Width::Bits64, true);
        assert_eq!((r.no_exec, r.no_read, r.global), (Some(5), Some(6), 7));
        assert_eq!(
            r.conversion,
            EntryLoConversion::RotateRixi {
                shift: 5,
                rotate: 2
            }
        );

        let s = PteLayout::standard(Width::Bits32, false);
        assert_eq!((s.huge, s.global, s.pfn), (None, 5, 11));
    }

    #[test]
    fn test_modes_fit_immediates() {
        for layout in [
            PteLayout::standard(Width::Bits64, false),
            PteLayout::standard(Width::Bits64, true),
            PteLayout::standard(Width::Bits32, true),
            PteLayout::phys64_on_32(),
            PteLayout::r3000(),
        ] {
            assert!(layout.make_write_mode() <= 0xffff);
            assert!(layout.readable_mask() >> layout.present <= 0xffff);
        }
    }

    #[test]
    fn test_reference_conversion() {
        let l = PteLayout::standard(Width::Bits32, true);
        let pte = (0x1234u64 << l.pfn)
            | PteLayout::bit(l.valid)
            | PteLayout::bit(l.no_exec.unwrap())
            | PteLayout::bit(l.present);
        let lo = l.to_entrylo(pte, Width::Bits32);
        assert_eq!(lo & 0x3f, 0b10);
        assert_eq!((lo >> 6) & 0xffff, 0x1234);
        assert_eq!(lo >> 30, 0b01);
    }

    #[test]
    fn test_geometry_reach() {
        assert_eq!(PageGeometry::new(Width::Bits64, PhysMode::Native64, TableLevels::Two).va_bits(), 31);
        assert_eq!(PageGeometry::new(Width::Bits64, PhysMode::Native64, TableLevels::Three).va_bits(), 40);
        assert_eq!(PageGeometry::new(Width::Bits32, PhysMode::Phys64On32, TableLevels::Two).va_bits(), 32);
        assert_eq!(PM_HUGE_MASK, 0x1fe000);
        assert_eq!(HUGE_ENTRYLO_STEP, 0x4000);
    }

    #[test]
    fn test_validation() {
        let r3000 = CpuCaps::new(CpuType::R3000);
        assert!(TargetConfig::new(Width::Bits32).validate(&r3000).is_ok());
        assert!(TargetConfig::new(Width::Bits64).validate(&r3000).is_err());
        assert!(TargetConfig::new(Width::Bits32)
            .with_smp(true)
            .validate(&r3000)
            .is_err());

        let sb1 = CpuCaps::new(CpuType::Sb1);
        assert!(TargetConfig::new(Width::Bits32)
            .with_huge_pages(true)
            .validate(&sb1)
            .is_err());
        assert!(TargetConfig::new(Width::Bits64)
            .with_huge_pages(true)
            .with_levels(TableLevels::Three)
            .validate(&sb1)
            .is_ok());
        let m3 = sb1.with_features(CpuFeatures::BCM1250_M3_WAR);
        assert!(TargetConfig::new(Width::Bits32).validate(&m3).is_err());
    }

    #[test]
    fn test_high_segbits() {
        let caps = CpuCaps::new(CpuType::R10000);
        assert!(TargetConfig::new(Width::Bits64).high_segbits(&caps));
        assert!(!TargetConfig::new(Width::Bits64)
            .with_levels(TableLevels::Three)
            .high_segbits(&caps));
        assert!(!TargetConfig::new(Width::Bits32).high_segbits(&caps));
    }
}

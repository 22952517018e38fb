//! CPU capability descriptor
//!
//! The synthesizers never probe hardware. They consume a [`CpuCaps`] value built
//! once from the detected processor and read it from then on.
//!
//! # Families
//!
//! | Family | Refill vector | Returns with | Notes |
//! |--------|---------------|--------------|-------|
//! | R3000 class | `ebase + 0x000`, 32 words | `jr k1; rfe` | no EntryHi pairs, no probe hazards |
//! | R4000 class | `ebase + 0x000` (32-bit) / `ebase + 0x080` (64-bit) | `eret` | hazard table applies |
//! | Release 2+ | as R4000 | `eret` | `ehb` replaces nop padding |

pub mod policy;

use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

/// Processor models the hazard tables know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuType {
    /// Synthetic model with no hazards and no workarounds
    Generic,
    R2000,
    R3000,
    R3000A,
    Tx39xx,
    R4000PC,
    R4000SC,
    R4000MC,
    R4400PC,
    R4400SC,
    R4400MC,
    R4300,
    R4600,
    R4700,
    R5000,
    Nevada,
    R5432,
    R5500,
    R6000,
    Rm7000,
    R10000,
    R12000,
    R14000,
    R16000,
    Vr4111,
    Vr4121,
    Vr4122,
    Vr4131,
    Vr4133,
    Vr4181,
    Vr4181A,
    Tx49xx,
    Pr4450,
    Mips4Kc,
    Mips4KEc,
    Mips4KSc,
    Mips5Kc,
    Mips20Kc,
    Mips25Kf,
    M14Kc,
    M14KEc,
    M24K,
    M34K,
    M74K,
    M1004K,
    M1074K,
    M5150,
    InterAptiv,
    ProAptiv,
    P5600,
    Sb1,
    Sb1A,
    Bmips32,
    Bmips3300,
    Bmips4350,
    Bmips4380,
    Bmips5000,
    Loongson2,
    Loongson3,
    Alchemy,
    JzRisc,
    Xlr,
    Octeon,
    OcteonPlus,
    Octeon2,
    Octeon3,
}

impl CpuType {
    /// Every known model, in table order.
    pub fn all() -> &'static [CpuType] {
        use CpuType::*;
        &[
            Generic, R2000, R3000, R3000A, Tx39xx, R4000PC, R4000SC, R4000MC, R4400PC, R4400SC,
            R4400MC, R4300, R4600, R4700, R5000, Nevada, R5432, R5500, R6000, Rm7000, R10000,
            R12000, R14000, R16000, Vr4111, Vr4121, Vr4122, Vr4131, Vr4133, Vr4181, Vr4181A,
            Tx49xx, Pr4450, Mips4Kc, Mips4KEc, Mips4KSc, Mips5Kc, Mips20Kc, Mips25Kf, M14Kc,
            M14KEc, M24K, M34K, M74K, M1004K, M1074K, M5150, InterAptiv, ProAptiv, P5600, Sb1,
            Sb1A, Bmips32, Bmips3300, Bmips4350, Bmips4380, Bmips5000, Loongson2, Loongson3,
            Alchemy, JzRisc, Xlr, Octeon, OcteonPlus, Octeon2, Octeon3,
        ]
    }

    pub fn name(self) -> &'static str {
        use CpuType::*;
        match self {
            Generic => "generic",
            R2000 => "r2000",
            R3000 => "r3000",
            R3000A => "r3000a",
            Tx39xx => "tx39xx",
            R4000PC => "r4000pc",
            R4000SC => "r4000sc",
            R4000MC => "r4000mc",
            R4400PC => "r4400pc",
            R4400SC => "r4400sc",
            R4400MC => "r4400mc",
            R4300 => "r4300",
            R4600 => "r4600",
            R4700 => "r4700",
            R5000 => "r5000",
            Nevada => "nevada",
            R5432 => "r5432",
            R5500 => "r5500",
            R6000 => "r6000",
            Rm7000 => "rm7000",
            R10000 => "r10000",
            R12000 => "r12000",
            R14000 => "r14000",
            R16000 => "r16000",
            Vr4111 => "vr4111",
            Vr4121 => "vr4121",
            Vr4122 => "vr4122",
            Vr4131 => "vr4131",
            Vr4133 => "vr4133",
            Vr4181 => "vr4181",
            Vr4181A => "vr4181a",
            Tx49xx => "tx49xx",
            Pr4450 => "pr4450",
            Mips4Kc => "4kc",
            Mips4KEc => "4kec",
            Mips4KSc => "4ksc",
            Mips5Kc => "5kc",
            Mips20Kc => "20kc",
            Mips25Kf => "25kf",
            M14Kc => "m14kc",
            M14KEc => "m14kec",
            M24K => "24k",
            M34K => "34k",
            M74K => "74k",
            M1004K => "1004k",
            M1074K => "1074k",
            M5150 => "m5150",
            InterAptiv => "interaptiv",
            ProAptiv => "proaptiv",
            P5600 => "p5600",
            Sb1 => "sb1",
            Sb1A => "sb1a",
            Bmips32 => "bmips32",
            Bmips3300 => "bmips3300",
            Bmips4350 => "bmips4350",
            Bmips4380 => "bmips4380",
            Bmips5000 => "bmips5000",
            Loongson2 => "loongson2",
            Loongson3 => "loongson3",
            Alchemy => "alchemy",
            JzRisc => "jzrisc",
            Xlr => "xlr",
            Octeon => "octeon",
            OcteonPlus => "octeon+",
            Octeon2 => "octeon2",
            Octeon3 => "octeon3",
        }
    }

    /// R2000/R3000-style MMU: single EntryLo, `rfe`, separate handler family.
    pub fn is_r3000_class(self) -> bool {
        matches!(
            self,
            CpuType::R2000 | CpuType::R3000 | CpuType::R3000A | CpuType::Tx39xx
        )
    }

    pub fn is_octeon(self) -> bool {
        matches!(
            self,
            CpuType::Octeon | CpuType::OcteonPlus | CpuType::Octeon2 | CpuType::Octeon3
        )
    }

    /// Features a freshly detected part of this model reports.
    ///
    /// Board-level errata (`R45K_BVAHWBUG`, `R4K_250MHZ_HWBUG`, `BCM1250_M3_WAR`,
    /// `R10000_LLSC_WAR`) are never implied by the model and must be set explicitly.
    pub fn default_features(self) -> CpuFeatures {
        use CpuType::*;
        let mut f = CpuFeatures::empty();
        if matches!(
            self,
            R4000PC
                | R4000SC
                | R4000MC
                | R4400PC
                | R4400SC
                | R4400MC
                | R4300
                | R4600
                | R4700
                | R5000
                | Nevada
                | R5432
                | R5500
                | Rm7000
                | R10000
                | R12000
                | R14000
                | R16000
                | Vr4111
                | Vr4121
                | Vr4122
                | Vr4131
                | Vr4133
                | Vr4181
                | Vr4181A
                | Tx49xx
                | Mips5Kc
                | Mips20Kc
                | Mips25Kf
                | Sb1
                | Sb1A
                | Loongson2
                | Loongson3
                | Xlr
                | Octeon
                | OcteonPlus
                | Octeon2
                | Octeon3
                | Generic
        ) {
            f |= CpuFeatures::CPU_64BIT;
        }
        if matches!(
            self,
            M14Kc
                | M14KEc
                | M24K
                | M34K
                | M74K
                | M1004K
                | M1074K
                | M5150
                | InterAptiv
                | ProAptiv
                | P5600
                | Octeon
                | OcteonPlus
                | Octeon2
                | Octeon3
        ) {
            f |= CpuFeatures::MIPS_R2;
        }
        if self.is_octeon() {
            f |= CpuFeatures::BBIT;
        }
        if matches!(self, Octeon2 | Octeon3) {
            f |= CpuFeatures::INDEXED_LOAD;
        }
        if matches!(self, OcteonPlus | Octeon2 | Octeon3 | InterAptiv | ProAptiv | P5600) {
            f |= CpuFeatures::RIXI;
        }
        if matches!(self, InterAptiv | ProAptiv | P5600) {
            f |= CpuFeatures::RIXI_EXCEPTIONS;
        }
        if self == Mips4Kc {
            f |= CpuFeatures::M4KC_TLBP_WAR;
        }
        f
    }

    /// KScratch registers the model implements, as a select-number mask.
    pub fn default_kscratch_mask(self) -> u8 {
        match self {
            CpuType::Octeon2 | CpuType::Octeon3 => 0x0c,
            CpuType::InterAptiv | CpuType::ProAptiv | CpuType::P5600 => 0x0c,
            _ => 0,
        }
    }

    pub fn default_vmbits(self) -> u8 {
        if self.is_octeon() {
            49
        } else if self.default_features().contains(CpuFeatures::CPU_64BIT) {
            40
        } else {
            32
        }
    }
}

impl fmt::Display for CpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown CPU model name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown CPU type '{0}'")]
pub struct UnknownCpu(pub String);

impl FromStr for CpuType {
    type Err = UnknownCpu;

    /// Also accepts the `m`-prefixed MIPS Technologies spellings (`m24k`, `m5kc`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lookup = |name: &str| {
            CpuType::all()
                .iter()
                .copied()
                .find(|c| c.name().eq_ignore_ascii_case(name))
        };
        let unprefixed = s
            .strip_prefix(['m', 'M'])
            .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
        lookup(s)
            .or_else(|| unprefixed.and_then(lookup))
            .ok_or_else(|| UnknownCpu(s.to_string()))
    }
}

bitflags! {
    /// Capability and erratum flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CpuFeatures: u32 {
        /// 64-bit registers and doubleword instructions
        const CPU_64BIT        = 1 << 0;
        /// Release 2 or later: `ehb`, `rotr`, KScratch
        const MIPS_R2          = 1 << 1;
        /// Read-inhibit / execute-inhibit bits in EntryLo
        const RIXI             = 1 << 2;
        /// RI/XI violations raise their own exceptions instead of TLBL
        const RIXI_EXCEPTIONS  = 1 << 3;
        /// Hardware page-table walker
        const HTW              = 1 << 4;
        /// `bbit0`/`bbit1`
        const BBIT             = 1 << 5;
        /// `lwx`/`ldx`
        const INDEXED_LOAD     = 1 << 6;
        /// 4Kc: probe must precede the PTE update
        const M4KC_TLBP_WAR    = 1 << 7;
        /// R4600/R5000 BadVAddr erratum, probe between the two PTE loads
        const R45K_BVAHWBUG    = 1 << 8;
        /// Clear EntryLo before loading it (250MHz R4000 erratum)
        const R4K_250MHZ_HWBUG = 1 << 9;
        /// BCM1250 M3 erratum: refill may see a stale EntryHi
        const BCM1250_M3_WAR   = 1 << 10;
        /// R10000 ll/sc erratum: retry with branch-likely
        const R10000_LLSC_WAR  = 1 << 11;
    }
}

impl CpuFeatures {
    /// Parse one flag by its lowercase name (`"rixi"`, `"bcm1250_m3_war"`).
    pub fn from_profile_name(name: &str) -> Option<CpuFeatures> {
        let wanted = name.trim().to_ascii_uppercase();
        CpuFeatures::all()
            .iter_names()
            .find(|(n, _)| *n == wanted)
            .map(|(_, f)| f)
    }
}

/// Process-wide, read-only description of the running CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCaps {
    pub cpu: CpuType,
    pub features: CpuFeatures,
    /// Select numbers (bit n = `$31, n`) of usable KScratch registers
    pub kscratch_mask: u8,
    /// Implemented virtual-address bits
    pub vmbits: u8,
}

impl CpuCaps {
    /// Capabilities of a stock part of this model.
    pub fn new(cpu: CpuType) -> Self {
        Self {
            cpu,
            features: cpu.default_features(),
            kscratch_mask: cpu.default_kscratch_mask(),
            vmbits: cpu.default_vmbits(),
        }
    }

    pub fn with_features(mut self, features: CpuFeatures) -> Self {
        self.features |= features;
        self
    }

    pub fn without_features(mut self, features: CpuFeatures) -> Self {
        self.features -= features;
        self
    }

    pub fn with_kscratch_mask(mut self, mask: u8) -> Self {
        self.kscratch_mask = mask;
        self
    }

    pub fn with_vmbits(mut self, vmbits: u8) -> Self {
        self.vmbits = vmbits;
        self
    }

    pub fn has(&self, features: CpuFeatures) -> bool {
        self.features.contains(features)
    }
}

//! Instruction-selection policy
//!
//! Pipeline hazards around `tlbwr`/`tlbwi` and `tlbp` differ per model. They are
//! kept here as data so each bucket can be audited and tested on its own.
//!
//! | Bucket | Models | Sequence |
//! |--------|--------|----------|
//! | branch-likely | R4000, R4400 | `bgezl $0, 1f; tlbw; 1: nop` |
//! | 1 + 1 | R4600, R4700 | `nop; tlbw; nop` |
//! | 2 + 0 | R5000, Nevada, VR4131, VR4133, R5432 | `nop; nop; tlbw` |
//! | 1 + 0 | 5Kc, TX49xx, PR4450, XLR | `nop; tlbw` |
//! | 4Kc guard | R1x000, 4K/14K/20K/25K, SB1, BMIPS, Loongson, R5500 | `[nop]; tlbw` |
//! | 0 + 0 | Alchemy, generic | `tlbw` |
//! | 4 + 0 | RM7000 | `nop x4; tlbw` |
//! | 2 + 2 | VR4111, VR4121, VR4122, VR4181, VR4181A | `nop; nop; tlbw; nop; nop` |
//! | 0 + 1 | JZRISC | `tlbw; nop` |
//!
//! Release 2 cores bypass the table and use `ehb` when they have the execution
//! hazard. Models with no bucket (R6000) cannot get a refill handler.

use super::{CpuCaps, CpuFeatures, CpuType};

/// How a TLB write is padded against hazards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbwSequence {
    /// Release 2: `ehb` before the write when the core needs it
    Barrier { ehb: bool },
    /// `bgezl $0` whose delay slot is the write; consumes one hazard label
    BranchLikely,
    /// Fixed no-op padding around the write
    Padded { before: u8, after: u8 },
    /// One no-op before the write only when the 4Kc probe workaround is active
    M4kcGuard,
}

impl TlbwSequence {
    /// Instructions emitted, including the write itself.
    pub fn len(self, caps: &CpuCaps) -> usize {
        match self {
            TlbwSequence::Barrier { ehb } => 1 + ehb as usize,
            TlbwSequence::BranchLikely => 3,
            TlbwSequence::Padded { before, after } => 1 + before as usize + after as usize,
            TlbwSequence::M4kcGuard => 1 + caps.has(CpuFeatures::M4KC_TLBP_WAR) as usize,
        }
    }

    pub fn describe(self) -> String {
        match self {
            TlbwSequence::Barrier { ehb: true } => "ehb; tlbw".to_string(),
            TlbwSequence::Barrier { ehb: false } => "tlbw".to_string(),
            TlbwSequence::BranchLikely => "bgezl $0, 1f; tlbw; 1: nop".to_string(),
            TlbwSequence::M4kcGuard => "[nop]; tlbw".to_string(),
            TlbwSequence::Padded { before, after } => {
                let mut parts = vec!["nop"; before as usize];
                parts.push("tlbw");
                parts.extend(std::iter::repeat("nop").take(after as usize));
                parts.join("; ")
            }
        }
    }
}

struct HazardBucket {
    cpus: &'static [CpuType],
    sequence: TlbwSequence,
}

static TLBW_HAZARDS: &[HazardBucket] = &[
    HazardBucket {
        cpus: &[
            CpuType::R4000PC,
            CpuType::R4000SC,
            CpuType::R4000MC,
            CpuType::R4400PC,
            CpuType::R4400SC,
            CpuType::R4400MC,
        ],
        sequence: TlbwSequence::BranchLikely,
    },
    HazardBucket {
        cpus: &[CpuType::R4600, CpuType::R4700],
        sequence: TlbwSequence::Padded {
            before: 1,
            after: 1,
        },
    },
    HazardBucket {
        cpus: &[
            CpuType::R5000,
            CpuType::Nevada,
            CpuType::Vr4131,
            CpuType::Vr4133,
            CpuType::R5432,
        ],
        sequence: TlbwSequence::Padded {
            before: 2,
            after: 0,
        },
    },
    HazardBucket {
        cpus: &[
            CpuType::R4300,
            CpuType::Mips5Kc,
            CpuType::Tx49xx,
            CpuType::Pr4450,
            CpuType::Xlr,
        ],
        sequence: TlbwSequence::Padded {
            before: 1,
            after: 0,
        },
    },
    HazardBucket {
        cpus: &[
            CpuType::R10000,
            CpuType::R12000,
            CpuType::R14000,
            CpuType::R16000,
            CpuType::Mips4Kc,
            CpuType::Mips4KEc,
            CpuType::M14Kc,
            CpuType::M14KEc,
            CpuType::Sb1,
            CpuType::Sb1A,
            CpuType::Mips4KSc,
            CpuType::Mips20Kc,
            CpuType::Mips25Kf,
            CpuType::Bmips32,
            CpuType::Bmips3300,
            CpuType::Bmips4350,
            CpuType::Bmips4380,
            CpuType::Bmips5000,
            CpuType::Loongson2,
            CpuType::Loongson3,
            CpuType::R5500,
        ],
        sequence: TlbwSequence::M4kcGuard,
    },
    HazardBucket {
        cpus: &[CpuType::Alchemy, CpuType::Generic],
        sequence: TlbwSequence::Padded {
            before: 0,
            after: 0,
        },
    },
    HazardBucket {
        cpus: &[CpuType::Rm7000],
        sequence: TlbwSequence::Padded {
            before: 4,
            after: 0,
        },
    },
    HazardBucket {
        cpus: &[
            CpuType::Vr4111,
            CpuType::Vr4121,
            CpuType::Vr4122,
            CpuType::Vr4181,
            CpuType::Vr4181A,
        ],
        sequence: TlbwSequence::Padded {
            before: 2,
            after: 2,
        },
    },
    HazardBucket {
        cpus: &[CpuType::JzRisc],
        sequence: TlbwSequence::Padded {
            before: 0,
            after: 1,
        },
    },
];

/// Release 2 models whose pipeline resolves the execution hazard on its own.
static EHB_EXEMPT: &[CpuType] = &[
    CpuType::M14Kc,
    CpuType::M74K,
    CpuType::M1074K,
    CpuType::ProAptiv,
    CpuType::P5600,
    CpuType::M5150,
    CpuType::Octeon,
    CpuType::OcteonPlus,
    CpuType::Octeon2,
    CpuType::Octeon3,
];

/// Models that need a no-op ahead of `tlbp`.
static TLBP_PADDED: &[CpuType] = &[CpuType::R4600, CpuType::R4700, CpuType::R5000, CpuType::Nevada];

/// Hazard sequence for a TLB write, or `None` when the model has no rule.
pub fn tlbw_sequence(caps: &CpuCaps) -> Option<TlbwSequence> {
    if caps.has(CpuFeatures::MIPS_R2) {
        return Some(TlbwSequence::Barrier {
            ehb: needs_exec_hazard_barrier(caps),
        });
    }
    TLBW_HAZARDS
        .iter()
        .find(|bucket| bucket.cpus.contains(&caps.cpu))
        .map(|bucket| bucket.sequence)
}

/// No-ops required immediately before `tlbp`.
pub fn tlbp_nops(caps: &CpuCaps) -> usize {
    TLBP_PADDED.contains(&caps.cpu) as usize
}

/// Whether `ehb` is worth issuing: Release 2 and not on the exemption list.
pub fn needs_exec_hazard_barrier(caps: &CpuCaps) -> bool {
    caps.has(CpuFeatures::MIPS_R2) && !EHB_EXEMPT.contains(&caps.cpu)
}

/// Single-bit tests use `bbit0`/`bbit1` instead of mask and compare.
pub fn use_bbit(caps: &CpuCaps) -> bool {
    caps.has(CpuFeatures::BBIT)
}

/// PTE pairs are fetched with `lwx`/`ldx`.
pub fn use_indexed_load(caps: &CpuCaps) -> bool {
    caps.has(CpuFeatures::INDEXED_LOAD)
}

/// Gate for the BCM1250 M3 address-space check in the refill and load paths.
pub fn m3_workaround(caps: &CpuCaps) -> bool {
    caps.has(CpuFeatures::BCM1250_M3_WAR)
}

/// The load handler double-checks valid entries for RI/XI hits it cannot see.
pub fn rixi_tlbr_check(caps: &CpuCaps) -> bool {
    caps.has(CpuFeatures::RIXI) && !caps.has(CpuFeatures::RIXI_EXCEPTIONS)
}

/// Rows for listing the table, in bucket order.
pub fn hazard_table() -> impl Iterator<Item = (CpuType, TlbwSequence)> {
    TLBW_HAZARDS
        .iter()
        .flat_map(|bucket| bucket.cpus.iter().map(move |cpu| (*cpu, bucket.sequence)))
}

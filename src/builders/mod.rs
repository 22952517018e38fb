//! Handler building blocks
//!
//! Each builder appends a short, self-contained instruction sequence to an
//! [`Emitter`](crate::asm::Emitter). The synthesizers in [`crate::synth`]
//! compose them into whole routines; builders never decide routine layout.
//!
//! | Module | Fragments |
//! |--------|-----------|
//! | `regs` | work-register save and restore |
//! | `walk` | page-table walk, context adjustment, vmalloc branch |
//! | `entry` | PTE to EntryLo conversion and EntryLo loads |
//! | `check` | permission tests, PTE reload and atomic update |
//! | `tlbw` | TLB probe/write with hazard padding, huge-page writes |

pub mod check;
pub mod entry;
pub mod regs;
pub mod tlbw;
pub mod walk;

use crate::cpu::{policy, CpuCaps, CpuFeatures};
use crate::error::{SynthError, SynthResult};
use crate::layout::{PageGeometry, PteLayout, TargetConfig};
use crate::synth::ScratchPlan;

/// Everything a builder needs to know about the machine it emits for.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub caps: &'a CpuCaps,
    pub target: &'a TargetConfig,
    pub layout: PteLayout,
    pub geom: PageGeometry,
    pub plan: ScratchPlan,
}

impl<'a> HandlerContext<'a> {
    pub fn new(caps: &'a CpuCaps, target: &'a TargetConfig, plan: ScratchPlan) -> Self {
        Self {
            caps,
            target,
            layout: target.pte_layout(caps),
            geom: target.geometry(),
            plan,
        }
    }

    pub fn is_64(&self) -> bool {
        self.target.width.is_64()
    }

    pub fn has(&self, features: CpuFeatures) -> bool {
        self.caps.has(features)
    }

    pub fn use_bbit(&self) -> bool {
        policy::use_bbit(self.caps)
    }

    /// Refill variant that parks `$1` in a KScratch register and walks with
    /// three registers instead of two.
    pub fn fast_refill(&self) -> bool {
        self.is_64() && self.plan.scratch_reg.is_some() && !policy::m3_workaround(self.caps)
    }

    /// Bit position of the huge-page flag; only layouts with huge pages have one.
    pub fn huge_bit(&self) -> SynthResult<u32> {
        self.layout
            .huge
            .ok_or_else(|| SynthError::Config("PTE layout has no huge-page bit".to_string()))
    }
}

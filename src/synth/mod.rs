//! Top-level synthesizers
//!
//! One [`Synthesizer`] per boot target. It owns the KScratch plan for the whole
//! synthesis phase and builds, per fault class, the routine appropriate to the
//! CPU family and kernel width:
//!
//! | Class | R3000 class | R4000 class, 32-bit | R4000 class, 64-bit |
//! |-------|-------------|---------------------|---------------------|
//! | refill | 32 words at ebase | 64 words at ebase | folded into ebase+0x000/0x080 |
//! | load, store, modify | 128 words | 128 words | 128 words |
//!
//! Every failure is fatal for bring-up. The library reports it as a
//! [`SynthError`]; [`halt_on_error`] is the one place that turns it into a halt.

mod change;
mod fold;
mod r3000;
mod refill;
mod scratch;

pub use change::FASTPATH_INSNS;
pub use fold::{fold_refill, FoldedRefill, REFILL_REGION_INSNS};
pub use r3000::{R3000_FASTPATH_INSNS, R3000_REFILL_INSNS};
pub use refill::{build_r4000_refill_scratch, REFILL32_INSNS, REFILL_SCRATCH_INSNS};
pub use scratch::{ScratchAllocator, ScratchPlan};

use crate::asm::ResolvedRoutine;
use crate::builders::HandlerContext;
use crate::cpu::CpuCaps;
use crate::error::{SynthError, SynthResult};
use crate::install::Installer;
use crate::layout::TargetConfig;
use crate::listing;
use log::{debug, error, info, log_enabled, warn, Level};
use serde::Serialize;
use std::fmt;

/// Exception classes that get a synthesized handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultClass {
    Refill,
    Load,
    Store,
    Modify,
}

impl FaultClass {
    pub const ALL: [FaultClass; 4] = [
        FaultClass::Refill,
        FaultClass::Load,
        FaultClass::Store,
        FaultClass::Modify,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FaultClass::Refill => "refill",
            FaultClass::Load => "load",
            FaultClass::Store => "store",
            FaultClass::Modify => "modify",
        }
    }
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a routine goes and how much of its region it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutineDescriptor {
    pub class: FaultClass,
    pub address: u64,
    /// Region size in instructions
    pub capacity: usize,
    /// Instructions emitted, excluding padding
    pub len: usize,
}

/// A synthesized routine ready for installation.
#[derive(Debug, Clone)]
pub struct Handler {
    pub descriptor: RoutineDescriptor,
    pub routine: ResolvedRoutine,
}

impl Handler {
    pub fn words(&self) -> &[u32] {
        self.routine.words()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerSet {
    handlers: Vec<Handler>,
}

impl HandlerSet {
    pub fn get(&self, class: FaultClass) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.descriptor.class == class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Handler> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct Synthesizer {
    caps: CpuCaps,
    target: TargetConfig,
    plan: ScratchPlan,
    change_handlers_installed: bool,
    refill_installed: bool,
}

impl Synthesizer {
    /// Validate the target and claim KScratch registers from `alloc`.
    pub fn new(
        caps: CpuCaps,
        target: TargetConfig,
        alloc: &mut ScratchAllocator,
    ) -> SynthResult<Self> {
        target.validate(&caps)?;
        let mut plan = ScratchPlan::default();
        if !caps.cpu.is_r3000_class() {
            plan.scratch_reg = alloc.allocate();
            if target.pgd_in_kscratch {
                plan.pgd_reg = alloc.allocate();
                if plan.pgd_reg.is_none() {
                    warn!("No KScratch register left for the page directory, using pgd_current");
                }
            }
            if plan.scratch_reg.is_none() {
                warn!("No KScratch register available, TLB handlers save work registers to memory");
            }
        }
        debug!(
            "{}: scratch_reg {:?}, pgd_reg {:?}",
            caps.cpu, plan.scratch_reg, plan.pgd_reg
        );
        Ok(Self {
            caps,
            target,
            plan,
            change_handlers_installed: false,
            refill_installed: false,
        })
    }

    /// Synthesizer with its own allocator over the CPU's KScratch mask.
    pub fn for_target(caps: CpuCaps, target: TargetConfig) -> SynthResult<Self> {
        let mut alloc = ScratchAllocator::new(caps.kscratch_mask);
        Self::new(caps, target, &mut alloc)
    }

    pub fn caps(&self) -> &CpuCaps {
        &self.caps
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    pub fn plan(&self) -> ScratchPlan {
        self.plan
    }

    pub fn context(&self) -> HandlerContext<'_> {
        HandlerContext::new(&self.caps, &self.target, self.plan)
    }

    fn is_r3000(&self) -> bool {
        self.caps.cpu.is_r3000_class()
    }

    fn address_of(&self, class: FaultClass, ebase: u64) -> u64 {
        let address = match class {
            FaultClass::Refill => ebase,
            FaultClass::Load => self.target.handlers.load,
            FaultClass::Store => self.target.handlers.store,
            FaultClass::Modify => self.target.handlers.modify,
        };
        self.target.canonical(address)
    }

    /// Address the CPU vectors to on a refill miss for a refill placed at
    /// `ebase`: the XTLB vector on 64-bit kernels, the base otherwise.
    pub fn refill_entry(&self, ebase: u64) -> u64 {
        let ebase = self.target.canonical(ebase);
        if self.target.width.is_64() && !self.is_r3000() {
            ebase + 4 * REFILL_REGION_INSNS as u64
        } else {
            ebase
        }
    }

    /// Fold the 64-bit refill, keeping the fold bookkeeping.
    pub fn synthesize_refill64(&self, ebase: u64) -> SynthResult<FoldedRefill> {
        let ctx = self.context();
        if !ctx.is_64() || self.is_r3000() {
            return Err(SynthError::Config(
                "folded refill only exists for 64-bit kernels".to_string(),
            ));
        }
        refill::build_r4000_refill64(&ctx, self.target.canonical(ebase))
    }

    /// Build one routine; the refill is placed at `ebase`.
    pub fn synthesize_at(&self, class: FaultClass, ebase: u64) -> SynthResult<Handler> {
        let ctx = self.context();
        let address = self.address_of(class, ebase);
        let sized = |routine: ResolvedRoutine, capacity: usize| {
            let len = routine.len();
            (routine, len, capacity)
        };
        let (routine, len, capacity) = match (class, self.is_r3000()) {
            (FaultClass::Refill, true) => {
                let (routine, len) = r3000::build_r3000_refill(&ctx, address)?;
                (routine, len, R3000_REFILL_INSNS)
            }
            (FaultClass::Refill, false) if ctx.is_64() => {
                let folded = refill::build_r4000_refill64(&ctx, address)?;
                (folded.routine, folded.insns, 2 * REFILL_REGION_INSNS)
            }
            (FaultClass::Refill, false) => {
                let (routine, len) = refill::build_r4000_refill32(&ctx, address)?;
                (routine, len, REFILL32_INSNS)
            }
            (FaultClass::Load, true) => {
                sized(r3000::build_r3000_tlb_load_handler(&ctx, address)?, R3000_FASTPATH_INSNS)
            }
            (FaultClass::Store, true) => {
                sized(r3000::build_r3000_tlb_store_handler(&ctx, address)?, R3000_FASTPATH_INSNS)
            }
            (FaultClass::Modify, true) => {
                sized(r3000::build_r3000_tlb_modify_handler(&ctx, address)?, R3000_FASTPATH_INSNS)
            }
            (FaultClass::Load, false) => {
                sized(change::build_r4000_tlb_load_handler(&ctx, address)?, FASTPATH_INSNS)
            }
            (FaultClass::Store, false) => {
                sized(change::build_r4000_tlb_store_handler(&ctx, address)?, FASTPATH_INSNS)
            }
            (FaultClass::Modify, false) => {
                sized(change::build_r4000_tlb_modify_handler(&ctx, address)?, FASTPATH_INSNS)
            }
        };
        match class {
            FaultClass::Refill => info!("Synthesized TLB refill handler ({} instructions).", len),
            _ => info!("Wrote TLB {} handler fastpath ({} instructions).", class, len),
        }
        Ok(Handler {
            descriptor: RoutineDescriptor {
                class,
                address,
                capacity,
                len,
            },
            routine,
        })
    }

    /// Build one routine, with the refill at the configured ebase.
    pub fn synthesize(&self, class: FaultClass) -> SynthResult<Handler> {
        self.synthesize_at(class, self.target.ebase)
    }

    /// Build all four routines.
    pub fn build_all(&self) -> SynthResult<HandlerSet> {
        let handlers = FaultClass::ALL
            .iter()
            .map(|&class| self.synthesize(class))
            .collect::<SynthResult<Vec<_>>>()?;
        Ok(HandlerSet { handlers })
    }

    /// Per-CPU bring-up step. The change handlers are shared and installed
    /// once; the refill is installed once, or at every CPU's own `ebase` when
    /// the target has per-CPU exception bases.
    pub fn build_for_cpu<I: Installer>(
        &mut self,
        ebase: u64,
        installer: &mut I,
    ) -> SynthResult<()> {
        if !self.change_handlers_installed {
            for class in [FaultClass::Load, FaultClass::Store, FaultClass::Modify] {
                let handler = self.synthesize(class)?;
                install(installer, &handler)?;
            }
            self.change_handlers_installed = true;
        }
        if !self.refill_installed || self.target.local_ebase {
            let handler = self.synthesize_at(FaultClass::Refill, ebase)?;
            install(installer, &handler)?;
            self.refill_installed = true;
        }
        Ok(())
    }

    /// [`build_for_cpu`](Self::build_for_cpu), halting on any failure.
    pub fn build_and_install_or_halt<I: Installer>(&mut self, ebase: u64, installer: &mut I) {
        halt_on_error(self.build_for_cpu(ebase, installer))
    }
}

fn install<I: Installer>(installer: &mut I, handler: &Handler) -> SynthResult<()> {
    let address = handler.descriptor.address;
    let words = handler.words();
    installer.install(address, words)?;
    installer.flush_icache(address, address + 4 * words.len() as u64);
    debug!(
        "installed {} at {:#x} ({} of {} words)",
        handler.descriptor.class,
        address,
        handler.descriptor.len,
        handler.descriptor.capacity
    );
    if log_enabled!(Level::Debug) {
        listing::dump_routine(&handler.routine);
    }
    Ok(())
}

/// Unwrap a synthesis result or stop bring-up with its diagnostic.
pub fn halt_on_error<T>(result: SynthResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            error!("TLB handler synthesis failed: {}", err);
            panic!("TLB handler synthesis failed: {}", err);
        }
    }
}

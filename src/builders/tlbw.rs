//! TLB probe and write fragments

use super::{entry, HandlerContext};
use crate::asm::{Emitter, LabelId};
use crate::cpu::policy::{self, TlbwSequence};
use crate::cpu::{CpuCaps, CpuFeatures};
use crate::error::{SynthError, SynthResult};
use crate::isa::{Cp0Reg, Reg, TlbOp};
use crate::layout::PM_HUGE_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `tlbwr`
    Random,
    /// `tlbwi`
    Indexed,
}

/// `tlbp`, preceded by whatever the model needs.
pub fn build_tlb_probe_entry(e: &mut Emitter, caps: &CpuCaps) {
    for _ in 0..policy::tlbp_nops(caps) {
        e.nop();
    }
    e.tlbp();
}

/// A TLB write wrapped in the model's hazard sequence.
pub fn build_tlb_write_entry(e: &mut Emitter, caps: &CpuCaps, mode: WriteMode) -> SynthResult<()> {
    let sequence = policy::tlbw_sequence(caps).ok_or(SynthError::UnsupportedCpu {
        routine: e.routine(),
        cpu: caps.cpu,
    })?;
    let op = match mode {
        WriteMode::Random => TlbOp::Tlbwr,
        WriteMode::Indexed => TlbOp::Tlbwi,
    };

    match sequence {
        TlbwSequence::Barrier { ehb } => {
            if ehb {
                e.ehb();
            }
            e.tlb(op);
        }
        TlbwSequence::BranchLikely => {
            let hazard = e.next_hazard_label()?;
            e.il_bgezl(Reg::ZERO, hazard);
            e.tlb(op);
            e.label(hazard)?;
            e.nop();
        }
        TlbwSequence::Padded { before, after } => {
            for _ in 0..before {
                e.nop();
            }
            e.tlb(op);
            for _ in 0..after {
                e.nop();
            }
        }
        TlbwSequence::M4kcGuard => {
            if caps.has(CpuFeatures::M4KC_TLBP_WAR) {
                e.nop();
            }
            e.tlb(op);
        }
    }
    Ok(())
}

/// Test the huge-page flag of the directory entry at `pmd` and branch to
/// `target` when set. The branch's delay slot is whatever follows.
pub fn build_is_huge_pte(
    e: &mut Emitter,
    ctx: &HandlerContext,
    tmp: Reg,
    pmd: Reg,
    target: LabelId,
) -> SynthResult<()> {
    let huge = ctx.huge_bit()?;
    e.ptr_lw(tmp, 0, pmd);
    if ctx.use_bbit() {
        e.il_bbit1(tmp, huge, target);
    } else {
        e.andi(tmp, tmp, 1 << huge);
        e.il_bnez(tmp, target);
    }
    Ok(())
}

/// Put PageMask back to the default page size and branch to `target`.
///
/// With `restore_scratch` the KScratch-saved `$1` is reloaded in the delay slot.
pub fn build_restore_pagemask(
    e: &mut Emitter,
    ctx: &HandlerContext,
    target: LabelId,
    restore_scratch: bool,
) {
    match ctx.plan.scratch_reg.filter(|_| restore_scratch) {
        Some(sel) => {
            e.ehb();
            e.mtc0(Reg::ZERO, Cp0Reg::PAGEMASK);
            e.il_b(target);
            e.ptr_mfc0(Reg::AT, Cp0Reg::kscratch(sel));
        }
        None => {
            e.il_b(target);
            e.mtc0(Reg::ZERO, Cp0Reg::PAGEMASK);
        }
    }
}

/// Write a huge-page entry pair: switch PageMask, write, restore and leave.
pub fn build_huge_tlb_write_entry(
    e: &mut Emitter,
    ctx: &HandlerContext,
    tmp: Reg,
    mode: WriteMode,
    restore_scratch: bool,
) -> SynthResult<()> {
    e.lui(tmp, PM_HUGE_MASK >> 16);
    e.ori(tmp, tmp, PM_HUGE_MASK & 0xffff);
    e.mtc0(tmp, Cp0Reg::PAGEMASK);
    build_tlb_write_entry(e, ctx.caps, mode)?;
    build_restore_pagemask(e, ctx, LabelId::Leave, restore_scratch);
    Ok(())
}

/// Store the updated huge PTE and load both EntryLo halves from it.
pub fn build_huge_handler_tail(
    e: &mut Emitter,
    ctx: &HandlerContext,
    pte: Reg,
    ptr: Reg,
) -> SynthResult<()> {
    if ctx.target.smp {
        e.ptr_sc(pte, 0, ptr);
        e.il_beqz(pte, LabelId::TlbHugeUpdate);
        e.ptr_lw(pte, 0, ptr);
    } else {
        e.ptr_sw(pte, 0, ptr);
    }
    entry::build_huge_update_entries(e, ctx, pte, ptr);
    build_huge_tlb_write_entry(e, ctx, pte, WriteMode::Indexed, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{Area, Width};
    use crate::cpu::CpuType;

    fn plain(cpu: CpuType) -> CpuCaps {
        CpuCaps::new(cpu).without_features(CpuFeatures::MIPS_R2)
    }

    #[test]
    fn test_branch_likely_write_consumes_a_hazard_label() {
        let caps = plain(CpuType::R4400SC);
        let mut e = Emitter::new("refill", Area::Final, 16, Width::Bits32);
        build_tlb_write_entry(&mut e, &caps, WriteMode::Random).unwrap();
        build_tlb_write_entry(&mut e, &caps, WriteMode::Indexed).unwrap();
        assert_eq!(e.len(), 6);
        let routine = e.finish(0x8000_0000).unwrap();
        assert_eq!(routine.insn_at(0).unwrap().branch_offset(), Some(1));
        assert_eq!(routine.insn_at(3).unwrap().branch_offset(), Some(1));
    }

    #[test]
    fn test_unknown_model_is_an_error() {
        let caps = plain(CpuType::R6000);
        let mut e = Emitter::new("refill", Area::Final, 16, Width::Bits32);
        assert_eq!(
            build_tlb_write_entry(&mut e, &caps, WriteMode::Random),
            Err(SynthError::UnsupportedCpu {
                routine: "refill",
                cpu: CpuType::R6000
            })
        );
    }

    #[test]
    fn test_padding_surrounds_the_write() {
        let caps = plain(CpuType::Vr4181);
        let mut e = Emitter::new("refill", Area::Final, 16, Width::Bits32);
        build_tlb_write_entry(&mut e, &caps, WriteMode::Random).unwrap();
        let names: Vec<_> = (0..e.len())
            .filter_map(|i| e.buffer().insn_at(i))
            .map(|i| i.mnemonic())
            .collect();
        assert_eq!(names, vec!["nop", "nop", "tlbwr", "nop", "nop"]);
    }
}

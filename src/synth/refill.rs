//! R4000-style TLB refill

use super::fold::{fold_refill, FoldedRefill};
use crate::asm::{Area, Emitter, LabelId, ResolvedRoutine};
use crate::builders::tlbw::{
    build_huge_tlb_write_entry, build_is_huge_pte, build_tlb_write_entry, WriteMode,
};
use crate::builders::walk::{
    build_adjust_context, build_get_pgd, build_get_pgd_vmalloc64, build_get_ptep,
    build_load_pgd_base, build_m3_asid_check, VmallocMode,
};
use crate::builders::{entry, HandlerContext};
use crate::cpu::{policy, CpuType};
use crate::error::SynthResult;
use crate::isa::{Cp0Reg, Reg};
use log::debug;

/// Scratch capacity for a refill before folding.
pub const REFILL_SCRATCH_INSNS: usize = 128;

/// 32-bit kernels own both refill regions outright.
pub const REFILL32_INSNS: usize = 64;

/// Walk with `$1` parked in KScratch: `k1` holds the table pointer, `k0` the
/// faulting address, `$1` the index being built.
fn build_fast_refill(e: &mut Emitter, ctx: &HandlerContext, sel: u8) -> SynthResult<()> {
    let (tmp, ptr, scratch) = (Reg::K0, Reg::K1, Reg::AT);
    let geom = ctx.geom;
    let indexed = policy::use_indexed_load(ctx.caps);

    build_load_pgd_base(e, ctx, tmp, ptr)?;
    e.dmfc0(tmp, Cp0Reg::BADVADDR);
    e.dmtc0(scratch, Cp0Reg::kscratch(sel));
    if ctx.target.high_segbits(ctx.caps) {
        e.dsrl_safe(scratch, tmp, geom.va_bits());
        e.il_bnez(scratch, LabelId::Vmalloc);
    } else {
        e.il_bltz(tmp, LabelId::Vmalloc);
    }
    e.dsrl_safe(scratch, tmp, geom.pgdir_shift - 3);

    e.label(LabelId::VmallocDone)?;
    e.andi(scratch, scratch, (geom.ptrs_per_pgd - 1) << 3);
    // With two levels the directory entry is the PTE table pointer itself.
    let entry = if geom.pmd_shift.is_none() { scratch } else { ptr };
    if indexed {
        e.ldx(entry, scratch, ptr);
    } else {
        e.daddu(ptr, ptr, scratch);
        e.ld(entry, 0, ptr);
    }

    if let Some(pmd_shift) = geom.pmd_shift {
        e.dsrl_safe(scratch, tmp, pmd_shift - 3);
        e.andi(scratch, scratch, (geom.ptrs_per_pmd - 1) << 3);
        if indexed {
            e.ldx(scratch, scratch, ptr);
        } else {
            e.daddu(ptr, ptr, scratch);
            e.ld(scratch, 0, ptr);
        }
    }

    e.dmfc0(tmp, Cp0Reg::CONTEXT);
    build_adjust_context(e, ctx, tmp);

    if ctx.target.huge_pages {
        let huge = ctx.huge_bit()?;
        if ctx.use_bbit() {
            e.il_bbit1(scratch, huge, LabelId::TlbHugeUpdate);
        } else {
            e.andi(ptr, scratch, 1 << huge);
            e.il_bnez(ptr, LabelId::TlbHugeUpdate);
        }
        if indexed {
            e.nop();
        }
    }

    let pte_size = ctx.geom.pte_size() as i64;
    let (even, odd) = if indexed {
        e.ldx(ptr, scratch, tmp);
        e.daddiu(tmp, tmp, pte_size);
        e.ldx(tmp, scratch, tmp);
        (ptr, tmp)
    } else {
        e.daddu(ptr, scratch, tmp);
        e.ld(tmp, 0, ptr);
        e.ld(ptr, pte_size, ptr);
        (tmp, ptr)
    };
    entry::build_convert_pte_to_entrylo(e, ctx, even);
    e.dmtc0(even, Cp0Reg::ENTRYLO0);
    entry::build_convert_pte_to_entrylo(e, ctx, odd);
    e.dmtc0(odd, Cp0Reg::ENTRYLO1);

    e.ehb();
    e.dmfc0(scratch, Cp0Reg::kscratch(sel));
    build_tlb_write_entry(e, ctx.caps, WriteMode::Random)?;
    e.label(LabelId::Leave)?;
    e.eret();
    Ok(())
}

/// The refill body, in instruction order, as it sits before folding.
fn emit_refill(e: &mut Emitter, ctx: &HandlerContext) -> SynthResult<()> {
    let (tmp, ptr) = (Reg::K0, Reg::K1);
    let fast_sel = ctx.plan.scratch_reg.filter(|_| ctx.fast_refill());

    let (huge_pte, restore_scratch, mode) = match fast_sel {
        Some(sel) => {
            build_fast_refill(e, ctx, sel)?;
            (Reg::AT, true, VmallocMode::RefillScratch)
        }
        None => {
            build_m3_asid_check(e, ctx);
            build_get_pgd(e, ctx, tmp, ptr)?;
            if ctx.target.huge_pages {
                build_is_huge_pte(e, ctx, tmp, ptr, LabelId::TlbHugeUpdate)?;
                // Nevada's walk reloads ptr first, so the slot cannot be shared.
                if ctx.caps.cpu == CpuType::Nevada {
                    e.nop();
                }
            }
            build_get_ptep(e, ctx, tmp, ptr);
            entry::build_update_entries(e, ctx, tmp, ptr);
            build_tlb_write_entry(e, ctx.caps, WriteMode::Random)?;
            e.label(LabelId::Leave)?;
            e.eret();
            (tmp, false, VmallocMode::RefillNoScratch)
        }
    };

    if ctx.target.huge_pages {
        e.label(LabelId::TlbHugeUpdate)?;
        if fast_sel.is_none() {
            e.ptr_lw(huge_pte, 0, ptr);
        }
        entry::build_huge_update_entries(e, ctx, huge_pte, ptr);
        build_huge_tlb_write_entry(e, ctx, tmp, WriteMode::Random, restore_scratch)?;
    }

    if ctx.is_64() {
        build_get_pgd_vmalloc64(e, ctx, tmp, ptr, mode)?;
    }
    Ok(())
}

/// Label the 64-bit refill is split at when it spills out of its region.
fn split_label(ctx: &HandlerContext) -> LabelId {
    if ctx.target.huge_pages {
        LabelId::TlbHugeUpdate
    } else {
        LabelId::Vmalloc
    }
}

/// Build the 64-bit refill into scratch space without folding it.
pub fn build_r4000_refill_scratch(ctx: &HandlerContext) -> SynthResult<Emitter> {
    let mut e = Emitter::new("refill", Area::Scratch, REFILL_SCRATCH_INSNS, ctx.target.width);
    emit_refill(&mut e, ctx)?;
    Ok(e)
}

/// Build and fold the 64-bit refill into its image at `ebase`.
pub fn build_r4000_refill64(ctx: &HandlerContext, ebase: u64) -> SynthResult<FoldedRefill> {
    let e = build_r4000_refill_scratch(ctx)?;
    debug!("refill: {} instructions before folding", e.len());
    let (buf, relocs) = e.into_parts();
    fold_refill(&buf, relocs, split_label(ctx), ebase)
}

/// Build the 32-bit refill directly into its 64-word region at `ebase`.
/// Returns the routine and its instruction count before padding.
pub fn build_r4000_refill32(
    ctx: &HandlerContext,
    ebase: u64,
) -> SynthResult<(ResolvedRoutine, usize)> {
    let mut e = Emitter::new("refill", Area::Final, REFILL32_INSNS, ctx.target.width);
    emit_refill(&mut e, ctx)?;
    let insns = e.len();
    let (mut buf, relocs) = e.into_parts();
    buf.verify(relocs.routine())?;
    buf.pad_to(REFILL32_INSNS);
    Ok((relocs.resolve_all(buf, ebase)?, insns))
}

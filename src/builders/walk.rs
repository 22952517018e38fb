//! Page-table walk fragments
//!
//! 32-bit kernels walk one directory level, 64-bit kernels one or two, both
//! ending with a pointer to the directory entry that holds the PTE table. On
//! 64-bit kernels a negative (kernel) address takes the vmalloc branch, which
//! swaps the per-process directory for `swapper_pg_dir` and rejoins the walk.

use super::HandlerContext;
use crate::asm::{in_compat_space, rel_hi, rel_lo, Emitter, LabelId};
use crate::cpu::{CpuFeatures, CpuType};
use crate::error::SynthResult;
use crate::isa::{Cp0Reg, Reg};
use crate::layout::PAGE_SHIFT;

/// Which caller the vmalloc tail serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmallocMode {
    /// Change handlers: only `swapper_pg_dir` has to be loaded
    NotRefill,
    /// Refill with `k0`/`k1` only
    RefillNoScratch,
    /// Refill that parked `$1` in KScratch and must restore it on the way out
    RefillScratch,
}

/// Load the current process's directory base into `ptr`.
///
/// Returns `true` when `tmp` was used as a temporary and no longer holds
/// whatever the caller put there.
pub fn build_load_pgd_base(
    e: &mut Emitter,
    ctx: &HandlerContext,
    tmp: Reg,
    ptr: Reg,
) -> SynthResult<bool> {
    if let Some(sel) = ctx.plan.pgd_reg {
        e.ptr_mfc0(ptr, Cp0Reg::kscratch(sel));
        return Ok(false);
    }
    let pgd_current = ctx.target.symbols.pgd_current;
    if ctx.target.smp {
        e.ptr_mfc0(ptr, Cp0Reg::CONTEXT);
        e.ptr_srl(ptr, ptr, ctx.target.smp_cpuid_shift());
        e.ptr_sll(ptr, ptr, ctx.geom.pgd_log2);
        let lo = e.la_mostly(tmp, pgd_current)?;
        e.ptr_addu(ptr, ptr, tmp);
        e.ptr_lw(ptr, lo, ptr);
        Ok(true)
    } else {
        let lo = e.la_mostly(ptr, pgd_current)?;
        e.ptr_lw(ptr, lo, ptr);
        Ok(false)
    }
}

/// 32-bit walk: leaves `ptr` pointing at the directory entry for BadVAddr.
pub fn build_get_pgde32(
    e: &mut Emitter,
    ctx: &HandlerContext,
    tmp: Reg,
    ptr: Reg,
) -> SynthResult<()> {
    build_load_pgd_base(e, ctx, tmp, ptr)?;
    e.mfc0(tmp, Cp0Reg::BADVADDR);
    e.srl(tmp, tmp, ctx.geom.pgdir_shift);
    e.sll(tmp, tmp, ctx.geom.pgd_log2);
    e.addu(ptr, ptr, tmp);
    Ok(())
}

/// 64-bit walk down to the lowest directory entry. Kernel addresses branch to
/// [`LabelId::Vmalloc`]; the tail emitted by [`build_get_pgd_vmalloc64`]
/// returns to [`LabelId::VmallocDone`] with `tmp` still holding BadVAddr.
pub fn build_get_pmde64(
    e: &mut Emitter,
    ctx: &HandlerContext,
    tmp: Reg,
    ptr: Reg,
) -> SynthResult<()> {
    let geom = ctx.geom;
    e.dmfc0(tmp, Cp0Reg::BADVADDR);
    if ctx.target.high_segbits(ctx.caps) {
        e.dsrl_safe(ptr, tmp, geom.va_bits());
        e.il_bnez(ptr, LabelId::Vmalloc);
    } else {
        e.il_bltz(tmp, LabelId::Vmalloc);
    }
    // The delay slot only writes ptr.
    if build_load_pgd_base(e, ctx, tmp, ptr)? {
        e.dmfc0(tmp, Cp0Reg::BADVADDR);
    }

    e.label(LabelId::VmallocDone)?;
    e.dsrl_safe(tmp, tmp, geom.pgdir_shift - 3);
    e.andi(tmp, tmp, (geom.ptrs_per_pgd - 1) << 3);
    e.daddu(ptr, ptr, tmp);

    if let Some(pmd_shift) = geom.pmd_shift {
        e.dmfc0(tmp, Cp0Reg::BADVADDR);
        e.ld(ptr, 0, ptr);
        e.dsrl_safe(tmp, tmp, pmd_shift - 3);
        e.andi(tmp, tmp, (geom.ptrs_per_pmd - 1) << 3);
        e.daddu(ptr, ptr, tmp);
    }
    Ok(())
}

/// Width-dispatching directory walk.
pub fn build_get_pgd(e: &mut Emitter, ctx: &HandlerContext, tmp: Reg, ptr: Reg) -> SynthResult<()> {
    if ctx.is_64() {
        build_get_pmde64(e, ctx, tmp, ptr)
    } else {
        build_get_pgde32(e, ctx, tmp, ptr)
    }
}

/// Turn the Context register value in `reg` into the byte offset of the even
/// PTE of the faulting pair within its table.
pub fn build_adjust_context(e: &mut Emitter, ctx: &HandlerContext, reg: Reg) {
    let geom = ctx.geom;
    let shift = 4 + PAGE_SHIFT - 12 - (geom.pte_log2 + 1);
    let mask = (geom.ptrs_per_pte / 2 - 1) << (geom.pte_log2 + 1);
    if shift != 0 {
        e.ptr_srl(reg, reg, shift);
    }
    e.andi(reg, reg, mask);
}

/// Follow the directory entry at `ptr` and point `ptr` at the even PTE.
pub fn build_get_ptep(e: &mut Emitter, ctx: &HandlerContext, tmp: Reg, ptr: Reg) {
    // Nevada needs the load issued before the mfc0.
    if ctx.caps.cpu == CpuType::Nevada {
        e.ptr_lw(ptr, 0, ptr);
        e.ptr_mfc0(tmp, Cp0Reg::CONTEXT);
    } else {
        e.ptr_mfc0(tmp, Cp0Reg::CONTEXT);
        e.ptr_lw(ptr, 0, ptr);
    }
    build_adjust_context(e, ctx, tmp);
    e.ptr_addu(ptr, ptr, tmp);
}

/// BCM1250 M3: bail out to `Leave` when BadVAddr and EntryHi disagree in the
/// region or VPN2 bits.
pub fn build_m3_asid_check(e: &mut Emitter, ctx: &HandlerContext) {
    if !ctx.has(CpuFeatures::BCM1250_M3_WAR) {
        return;
    }
    let segbits = 44;
    e.dmfc0(Reg::K0, Cp0Reg::BADVADDR);
    e.dmfc0(Reg::K1, Cp0Reg::ENTRYHI);
    e.xor(Reg::K0, Reg::K0, Reg::K1);
    e.dsrl_safe(Reg::K1, Reg::K0, 62);
    e.dsrl_safe(Reg::K0, Reg::K0, PAGE_SHIFT + 1);
    e.dsll_safe(Reg::K0, Reg::K0, 64 + PAGE_SHIFT + 1 - segbits);
    e.or(Reg::K0, Reg::K0, Reg::K1);
    e.il_bnez(Reg::K0, LabelId::Leave);
}

/// The out-of-line vmalloc tail for 64-bit walks. `bvaddr` holds BadVAddr.
pub fn build_get_pgd_vmalloc64(
    e: &mut Emitter,
    ctx: &HandlerContext,
    bvaddr: Reg,
    ptr: Reg,
    mode: VmallocMode,
) -> SynthResult<()> {
    let swapper = ctx.target.canonical(ctx.target.symbols.swapper_pg_dir);
    let single_insn = in_compat_space(swapper) && rel_lo(swapper as i64) == 0;
    let check_segbits = mode != VmallocMode::NotRefill && ctx.target.high_segbits(ctx.caps);
    let mut branched = false;

    e.label(LabelId::Vmalloc)?;
    if check_segbits {
        if single_insn {
            e.il_bltz(bvaddr, LabelId::VmallocDone);
            e.lui(ptr, rel_hi(swapper as i64) as u64);
            branched = true;
        } else {
            e.il_bgez(bvaddr, LabelId::LargeSegbitsFault);
        }
    }

    if !branched {
        if single_insn {
            e.il_b(LabelId::VmallocDone);
            e.lui(ptr, rel_hi(swapper as i64) as u64);
        } else {
            let lo = e.la_mostly(ptr, swapper)?;
            e.il_b(LabelId::VmallocDone);
            e.ptr_addiu(ptr, ptr, lo);
        }
    }

    if check_segbits {
        // User address above what the tables map: hand it to the slow path.
        e.label(LabelId::LargeSegbitsFault)?;
        let scratch = ctx.plan.scratch_reg.filter(|_| mode == VmallocMode::RefillScratch);
        if scratch.is_some() {
            e.ehb();
        }
        e.la(ptr, ctx.target.symbols.tlb_do_page_fault_0)?;
        e.jr(ptr);
        match scratch {
            Some(sel) => e.ptr_mfc0(Reg::AT, Cp0Reg::kscratch(sel)),
            None => e.nop(),
        }
    }
    Ok(())
}

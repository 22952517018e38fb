//! R3000-class handlers
//!
//! The R3000 TLB has one EntryLo per entry, returns with `jr` + `rfe` instead
//! of `eret`, and its refill vector has room for exactly 32 instructions. The
//! change handlers probe early and fall back to a random write when the probe
//! missed.

use crate::asm::{Area, Emitter, LabelId, ResolvedRoutine};
use crate::builders::check::{
    build_make_valid, build_make_write, build_pte_modifiable, build_pte_present,
    build_pte_writable,
};
use crate::builders::HandlerContext;
use crate::error::SynthResult;
use crate::isa::{Cp0Reg, Reg, TlbOp};

/// Size of the R3000 refill vector.
pub const R3000_REFILL_INSNS: usize = 32;

/// Capacity of each R3000 change handler.
pub const R3000_FASTPATH_INSNS: usize = 128;

/// Walk to the PTE: leaves `ptr` at the PTE and `pte` holding BadVAddr bits
/// until the final load.
fn build_r3000_walk(e: &mut Emitter, ctx: &HandlerContext, pte: Reg, ptr: Reg) -> SynthResult<()> {
    let geom = ctx.geom;
    e.mfc0(pte, Cp0Reg::BADVADDR);
    let lo = e.la_mostly(ptr, ctx.target.symbols.pgd_current)?;
    e.lw(ptr, lo, ptr);
    e.srl(pte, pte, geom.pgdir_shift);
    e.sll(pte, pte, geom.pgd_log2);
    e.addu(ptr, ptr, pte);
    e.mfc0(pte, Cp0Reg::CONTEXT);
    e.lw(ptr, 0, ptr);
    e.andi(pte, pte, (geom.ptrs_per_pte - 1) << geom.pte_log2);
    e.addu(ptr, ptr, pte);
    Ok(())
}

/// R3000 refill, installed at `ebase`. Returns the routine and its
/// instruction count before padding.
pub fn build_r3000_refill(
    ctx: &HandlerContext,
    ebase: u64,
) -> SynthResult<(ResolvedRoutine, usize)> {
    let (pte, ptr) = (Reg::K0, Reg::K1);
    let mut e = Emitter::new("refill", Area::Final, R3000_REFILL_INSNS, ctx.target.width);
    build_r3000_walk(&mut e, ctx, pte, ptr)?;
    e.lw(pte, 0, ptr);
    e.nop(); // load delay
    e.mtc0(pte, Cp0Reg::ENTRYLO0);
    e.mfc0(ptr, Cp0Reg::EPC);
    e.tlb(TlbOp::Tlbwr);
    e.jr(ptr);
    e.rfe();

    let insns = e.len();
    let (mut buf, relocs) = e.into_parts();
    buf.verify(relocs.routine())?;
    buf.pad_to(R3000_REFILL_INSNS);
    Ok((relocs.resolve_all(buf, ebase)?, insns))
}

fn build_r3000_change_head(
    e: &mut Emitter,
    ctx: &HandlerContext,
    pte: Reg,
    ptr: Reg,
) -> SynthResult<()> {
    build_r3000_walk(e, ctx, pte, ptr)?;
    e.lw(pte, 0, ptr);
    e.tlbp();
    Ok(())
}

/// Write EntryLo0 back with `tlbwi`, or `tlbwr` when the early probe missed.
fn build_r3000_tlb_reload_write(e: &mut Emitter, pte: Reg, tmp: Reg) -> SynthResult<()> {
    e.mfc0(tmp, Cp0Reg::INDEX);
    e.mtc0(pte, Cp0Reg::ENTRYLO0);
    e.il_bltz(tmp, LabelId::R3000WriteProbeFail);
    e.mfc0(tmp, Cp0Reg::EPC);
    e.tlb(TlbOp::Tlbwi);
    e.jr(tmp);
    e.rfe();
    e.label(LabelId::R3000WriteProbeFail)?;
    e.tlb(TlbOp::Tlbwr);
    e.jr(tmp);
    e.rfe();
    Ok(())
}

/// The modify path always hits the probed entry.
fn build_r3000_pte_reload_tlbwi(e: &mut Emitter, pte: Reg, tmp: Reg) {
    e.mtc0(pte, Cp0Reg::ENTRYLO0);
    e.mfc0(tmp, Cp0Reg::EPC);
    e.tlb(TlbOp::Tlbwi);
    e.jr(tmp);
    e.rfe();
}

fn build_r3000_slow_path(e: &mut Emitter, label: LabelId, slow_path: u64) -> SynthResult<()> {
    e.label(label)?;
    e.j_abs(slow_path);
    e.nop();
    Ok(())
}

fn new_emitter(ctx: &HandlerContext, routine: &'static str) -> Emitter {
    Emitter::new(routine, Area::Final, R3000_FASTPATH_INSNS, ctx.target.width)
}

pub fn build_r3000_tlb_load_handler(
    ctx: &HandlerContext,
    address: u64,
) -> SynthResult<ResolvedRoutine> {
    let (pte, ptr) = (Reg::K0, Reg::K1);
    let mut e = new_emitter(ctx, "tlbl");
    build_r3000_change_head(&mut e, ctx, pte, ptr)?;
    build_pte_present(&mut e, ctx, pte, ptr, None, LabelId::NopageTlbl);
    e.nop(); // load delay
    build_make_valid(&mut e, ctx, pte, ptr);
    build_r3000_tlb_reload_write(&mut e, pte, ptr)?;
    build_r3000_slow_path(&mut e, LabelId::NopageTlbl, ctx.target.symbols.tlb_do_page_fault_0)?;
    e.finish(address)
}

pub fn build_r3000_tlb_store_handler(
    ctx: &HandlerContext,
    address: u64,
) -> SynthResult<ResolvedRoutine> {
    let (pte, ptr) = (Reg::K0, Reg::K1);
    let mut e = new_emitter(ctx, "tlbs");
    build_r3000_change_head(&mut e, ctx, pte, ptr)?;
    build_pte_writable(&mut e, ctx, pte, ptr, None, LabelId::NopageTlbs);
    e.nop(); // load delay
    build_make_write(&mut e, ctx, pte, ptr);
    build_r3000_tlb_reload_write(&mut e, pte, ptr)?;
    build_r3000_slow_path(&mut e, LabelId::NopageTlbs, ctx.target.symbols.tlb_do_page_fault_1)?;
    e.finish(address)
}

pub fn build_r3000_tlb_modify_handler(
    ctx: &HandlerContext,
    address: u64,
) -> SynthResult<ResolvedRoutine> {
    let (pte, ptr) = (Reg::K0, Reg::K1);
    let mut e = new_emitter(ctx, "tlbm");
    build_r3000_change_head(&mut e, ctx, pte, ptr)?;
    build_pte_modifiable(&mut e, ctx, pte, ptr, None, LabelId::NopageTlbm);
    e.nop(); // load delay
    build_make_write(&mut e, ctx, pte, ptr);
    build_r3000_pte_reload_tlbwi(&mut e, pte, ptr);
    build_r3000_slow_path(&mut e, LabelId::NopageTlbm, ctx.target.symbols.tlb_do_page_fault_1)?;
    e.finish(address)
}

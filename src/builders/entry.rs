//! EntryLo loading
//!
//! A software PTE keeps bookkeeping bits below the hardware ones; converting
//! it to EntryLo format is a right shift, plus a rotate when RI/XI have to land
//! in the top two bits. Layouts that already store EntryLo bits need nothing.

use super::tlbw::build_tlb_probe_entry;
use super::HandlerContext;
use crate::asm::Emitter;
use crate::cpu::CpuFeatures;
use crate::isa::{Cp0Reg, Reg};
use crate::layout::{EntryLoConversion, PhysMode, HUGE_ENTRYLO_STEP};

pub fn build_convert_pte_to_entrylo(e: &mut Emitter, ctx: &HandlerContext, reg: Reg) {
    match ctx.layout.conversion {
        EntryLoConversion::Shift(shift) => e.ptr_srl(reg, reg, shift),
        EntryLoConversion::RotateRixi { shift, rotate } => {
            e.ptr_srl(reg, reg, shift);
            e.ptr_rotr(reg, reg, rotate);
        }
        EntryLoConversion::Stored => {}
    }
}

/// Load the even/odd PTE pair at `ptep` into EntryLo0/EntryLo1. Clobbers both
/// registers.
pub fn build_update_entries(e: &mut Emitter, ctx: &HandlerContext, tmp: Reg, ptep: Reg) {
    if ctx.target.phys == PhysMode::Phys64On32 {
        // High words carry the EntryLo image.
        e.lw(tmp, 4, ptep);
        e.mtc0(tmp, Cp0Reg::ENTRYLO0);
        e.lw(ptep, 12, ptep);
        e.mtc0(ptep, Cp0Reg::ENTRYLO1);
        return;
    }

    let r45k = ctx.has(CpuFeatures::R45K_BVAHWBUG);
    let r4k_250mhz = ctx.has(CpuFeatures::R4K_250MHZ_HWBUG);
    e.ptr_lw(tmp, 0, ptep);
    e.ptr_lw(ptep, ctx.geom.pte_size() as i64, ptep);
    if r45k {
        build_tlb_probe_entry(e, ctx.caps);
    }
    build_convert_pte_to_entrylo(e, ctx, tmp);
    if r4k_250mhz {
        e.ptr_mtc0(Reg::ZERO, Cp0Reg::ENTRYLO0);
    }
    e.ptr_mtc0(tmp, Cp0Reg::ENTRYLO0);
    build_convert_pte_to_entrylo(e, ctx, ptep);
    if r45k {
        e.mfc0(tmp, Cp0Reg::INDEX);
    }
    if r4k_250mhz {
        e.ptr_mtc0(Reg::ZERO, Cp0Reg::ENTRYLO1);
    }
    e.ptr_mtc0(ptep, Cp0Reg::ENTRYLO1);
}

/// A huge page maps both halves of the pair; the odd EntryLo is the even one
/// advanced by half the huge page.
pub fn build_huge_update_entries(e: &mut Emitter, ctx: &HandlerContext, pte: Reg, tmp: Reg) {
    let small_step = HUGE_ENTRYLO_STEP <= 0x7fff;
    if !small_step {
        e.lui(tmp, HUGE_ENTRYLO_STEP >> 16);
    }
    build_convert_pte_to_entrylo(e, ctx, pte);
    e.ptr_mtc0(pte, Cp0Reg::ENTRYLO0);
    if small_step {
        e.ptr_addiu(pte, pte, HUGE_ENTRYLO_STEP as i64);
    } else {
        e.ptr_addu(pte, pte, tmp);
    }
    e.ptr_mtc0(pte, Cp0Reg::ENTRYLO1);
}

//! R4000-style load, store and modify handlers
//!
//! All three share a head that saves work registers, walks to the PTE and
//! probes the TLB for the faulting entry, and a tail that rewrites that entry
//! with `tlbwi`. They differ in the permission check and the bits they set.
//! Anything that fails a check leaves through the kernel's slow path.

use crate::asm::{Area, Emitter, LabelId, ResolvedRoutine};
use crate::builders::check::{
    build_make_valid, build_make_write, build_pte_load, build_pte_modifiable, build_pte_present,
    build_pte_writable,
};
use crate::builders::regs::{build_get_work_registers, build_restore_work_registers, WorkRegs};
use crate::builders::tlbw::{
    build_huge_handler_tail, build_is_huge_pte, build_restore_pagemask, build_tlb_probe_entry,
    build_tlb_write_entry, WriteMode,
};
use crate::builders::walk::{
    build_get_pgd, build_get_pgd_vmalloc64, build_m3_asid_check, VmallocMode,
};
use crate::builders::{entry, HandlerContext};
use crate::cpu::{policy, CpuFeatures};
use crate::error::SynthResult;
use crate::isa::{BranchCond, Cp0Reg};
use crate::layout::{PteLayout, PAGE_SHIFT};

/// Capacity of each change handler.
pub const FASTPATH_INSNS: usize = 128;

fn build_r4000_handler_head(e: &mut Emitter, ctx: &HandlerContext) -> SynthResult<WorkRegs> {
    let wr = build_get_work_registers(e, ctx)?;
    let geom = ctx.geom;
    build_get_pgd(e, ctx, wr.r1, wr.r2)?;
    if ctx.target.huge_pages {
        build_is_huge_pte(e, ctx, wr.r1, wr.r2, LabelId::TlbHugeUpdate)?;
    }

    e.ptr_mfc0(wr.r1, Cp0Reg::BADVADDR);
    e.ptr_lw(wr.r2, 0, wr.r2);
    e.ptr_srl(wr.r1, wr.r1, PAGE_SHIFT - geom.pte_log2);
    e.andi(wr.r1, wr.r1, (geom.ptrs_per_pte - 1) << geom.pte_log2);
    e.ptr_addu(wr.r2, wr.r2, wr.r1);

    if ctx.target.smp {
        e.label(LabelId::SmpPgtableChange)?;
    }
    build_pte_load(e, ctx, wr.r1, wr.r2);
    if !ctx.has(CpuFeatures::M4KC_TLBP_WAR) {
        build_tlb_probe_entry(e, ctx.caps);
        if ctx.has(CpuFeatures::HTW) {
            // The walker may have dropped the entry since the exception.
            e.ehb();
            e.mfc0(wr.r3, Cp0Reg::INDEX);
            e.il_bltz(wr.r3, LabelId::Leave);
            e.nop();
        }
    }
    Ok(wr)
}

fn build_r4000_handler_tail(
    e: &mut Emitter,
    ctx: &HandlerContext,
    wr: &WorkRegs,
) -> SynthResult<()> {
    let (tmp, ptr) = (wr.r1, wr.r2);
    let pte_size = ctx.geom.pte_size();
    // Round down to the even PTE of the pair.
    e.ori(ptr, ptr, pte_size);
    e.xori(ptr, ptr, pte_size);
    entry::build_update_entries(e, ctx, tmp, ptr);
    build_tlb_write_entry(e, ctx.caps, WriteMode::Indexed)?;
    e.label(LabelId::Leave)?;
    build_restore_work_registers(e, ctx);
    e.eret();
    if ctx.is_64() {
        build_get_pgd_vmalloc64(e, ctx, tmp, ptr, VmallocMode::NotRefill)?;
    }
    Ok(())
}

fn probe_if_deferred(e: &mut Emitter, ctx: &HandlerContext) {
    if ctx.has(CpuFeatures::M4KC_TLBP_WAR) {
        build_tlb_probe_entry(e, ctx.caps);
    }
}

/// On cores that cannot raise RI/XI exceptions, a load fault on a valid PTE
/// may have been an RI/XI hit. Read the entry back and send such hits to the
/// slow path.
fn build_rixi_tlbr_check(
    e: &mut Emitter,
    ctx: &HandlerContext,
    wr: &WorkRegs,
    huge: bool,
) -> SynthResult<()> {
    let bbit = ctx.use_bbit();
    let goaround = if huge {
        LabelId::TlblGoaround2
    } else {
        LabelId::TlblGoaround1
    };

    // Not valid: RI/XI cannot have been the cause.
    if bbit {
        e.il_bbit0(wr.r1, ctx.layout.valid, goaround);
    } else {
        e.andi(wr.r3, wr.r1, PteLayout::bit(ctx.layout.valid));
        e.il_beqz(wr.r3, goaround);
    }
    e.nop();
    e.tlbr();
    if policy::needs_exec_hazard_barrier(ctx.caps) {
        e.ehb();
    }

    // EntryLo0 for the even PTE (loaded in the delay slot), EntryLo1 for the odd.
    if bbit {
        e.bbit_raw(false, wr.r2, ctx.geom.pte_log2, 2);
    } else {
        e.andi(wr.r3, wr.r2, ctx.geom.pte_size());
        e.branch_raw(BranchCond::Eq, wr.r3, 2);
    }
    e.ptr_mfc0(wr.r3, Cp0Reg::ENTRYLO0);
    e.ptr_mfc0(wr.r3, Cp0Reg::ENTRYLO1);

    // A valid TLB entry (EntryLo bit 1) means RI or XI raised the fault.
    if huge {
        if bbit {
            e.il_bbit0(wr.r3, 1, goaround);
        } else {
            e.andi(wr.r3, wr.r3, 2);
            e.il_beqz(wr.r3, goaround);
        }
        e.nop();
        // tlbr loaded the huge PageMask.
        build_restore_pagemask(e, ctx, LabelId::NopageTlbl, false);
    } else {
        if bbit {
            e.il_bbit1(wr.r3, 1, LabelId::NopageTlbl);
        } else {
            e.andi(wr.r3, wr.r3, 2);
            e.il_bnez(wr.r3, LabelId::NopageTlbl);
        }
        e.nop();
    }
    e.label(goaround)
}

fn build_slow_path_exit(
    e: &mut Emitter,
    ctx: &HandlerContext,
    label: LabelId,
    slow_path: u64,
) -> SynthResult<()> {
    e.label(label)?;
    build_restore_work_registers(e, ctx);
    e.j_abs(slow_path);
    e.nop();
    Ok(())
}

fn new_emitter(ctx: &HandlerContext, routine: &'static str) -> Emitter {
    Emitter::new(routine, Area::Final, FASTPATH_INSNS, ctx.target.width)
}

/// TLB load (TLBL) handler, installed at `address`.
pub fn build_r4000_tlb_load_handler(
    ctx: &HandlerContext,
    address: u64,
) -> SynthResult<ResolvedRoutine> {
    let mut e = new_emitter(ctx, "tlbl");
    let rixi_check = policy::rixi_tlbr_check(ctx.caps);

    build_m3_asid_check(&mut e, ctx);
    let wr = build_r4000_handler_head(&mut e, ctx)?;
    build_pte_present(&mut e, ctx, wr.r1, wr.r2, Some(wr.r3), LabelId::NopageTlbl);
    probe_if_deferred(&mut e, ctx);
    if rixi_check {
        build_rixi_tlbr_check(&mut e, ctx, &wr, false)?;
    }
    build_make_valid(&mut e, ctx, wr.r1, wr.r2);
    build_r4000_handler_tail(&mut e, ctx, &wr)?;

    if ctx.target.huge_pages {
        e.label(LabelId::TlbHugeUpdate)?;
        build_pte_load(&mut e, ctx, wr.r1, wr.r2);
        build_pte_present(&mut e, ctx, wr.r1, wr.r2, Some(wr.r3), LabelId::NopageTlbl);
        build_tlb_probe_entry(&mut e, ctx.caps);
        if rixi_check {
            build_rixi_tlbr_check(&mut e, ctx, &wr, true)?;
        }
        e.ori(wr.r1, wr.r1, ctx.layout.make_valid_mode());
        build_huge_handler_tail(&mut e, ctx, wr.r1, wr.r2)?;
    }

    build_slow_path_exit(&mut e, ctx, LabelId::NopageTlbl, ctx.target.symbols.tlb_do_page_fault_0)?;
    e.finish(address)
}

/// TLB store (TLBS) handler, installed at `address`.
pub fn build_r4000_tlb_store_handler(
    ctx: &HandlerContext,
    address: u64,
) -> SynthResult<ResolvedRoutine> {
    let mut e = new_emitter(ctx, "tlbs");

    let wr = build_r4000_handler_head(&mut e, ctx)?;
    build_pte_writable(&mut e, ctx, wr.r1, wr.r2, Some(wr.r3), LabelId::NopageTlbs);
    probe_if_deferred(&mut e, ctx);
    build_make_write(&mut e, ctx, wr.r1, wr.r2);
    build_r4000_handler_tail(&mut e, ctx, &wr)?;

    if ctx.target.huge_pages {
        e.label(LabelId::TlbHugeUpdate)?;
        build_pte_load(&mut e, ctx, wr.r1, wr.r2);
        build_pte_writable(&mut e, ctx, wr.r1, wr.r2, Some(wr.r3), LabelId::NopageTlbs);
        build_tlb_probe_entry(&mut e, ctx.caps);
        e.ori(wr.r1, wr.r1, ctx.layout.make_write_mode());
        build_huge_handler_tail(&mut e, ctx, wr.r1, wr.r2)?;
    }

    build_slow_path_exit(&mut e, ctx, LabelId::NopageTlbs, ctx.target.symbols.tlb_do_page_fault_1)?;
    e.finish(address)
}

/// TLB modify (Mod) handler, installed at `address`.
pub fn build_r4000_tlb_modify_handler(
    ctx: &HandlerContext,
    address: u64,
) -> SynthResult<ResolvedRoutine> {
    let mut e = new_emitter(ctx, "tlbm");

    let wr = build_r4000_handler_head(&mut e, ctx)?;
    build_pte_modifiable(&mut e, ctx, wr.r1, wr.r2, Some(wr.r3), LabelId::NopageTlbm);
    probe_if_deferred(&mut e, ctx);
    build_make_write(&mut e, ctx, wr.r1, wr.r2);
    build_r4000_handler_tail(&mut e, ctx, &wr)?;

    if ctx.target.huge_pages {
        e.label(LabelId::TlbHugeUpdate)?;
        build_pte_load(&mut e, ctx, wr.r1, wr.r2);
        build_pte_modifiable(&mut e, ctx, wr.r1, wr.r2, Some(wr.r3), LabelId::NopageTlbm);
        build_tlb_probe_entry(&mut e, ctx.caps);
        e.ori(wr.r1, wr.r1, ctx.layout.make_write_mode());
        build_huge_handler_tail(&mut e, ctx, wr.r1, wr.r2)?;
    }

    build_slow_path_exit(&mut e, ctx, LabelId::NopageTlbm, ctx.target.symbols.tlb_do_page_fault_1)?;
    e.finish(address)
}

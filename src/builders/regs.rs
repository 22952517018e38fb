//! Work registers
//!
//! Refill runs with only `k0`/`k1` free. The slower handlers need a third
//! register, so `$1` (and `$2` when no KScratch register is left) is saved first:
//! into KScratch when available, otherwise into a per-CPU memory save area.

use super::HandlerContext;
use crate::asm::Emitter;
use crate::error::SynthResult;
use crate::isa::{Cp0Reg, Reg};
use crate::layout::REG_SAVE_STRIDE_LOG2;

/// The three registers a change handler may clobber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkRegs {
    pub r1: Reg,
    pub r2: Reg,
    pub r3: Reg,
}

pub fn build_get_work_registers(e: &mut Emitter, ctx: &HandlerContext) -> SynthResult<WorkRegs> {
    if let Some(sel) = ctx.plan.scratch_reg {
        e.ptr_mtc0(Reg::AT, Cp0Reg::kscratch(sel));
        return Ok(WorkRegs {
            r1: Reg::K0,
            r2: Reg::K1,
            r3: Reg::AT,
        });
    }

    let save_area = ctx.target.symbols.handler_reg_save;
    if ctx.target.smp {
        e.ptr_mfc0(Reg::K0, Cp0Reg::CONTEXT);
        e.ptr_srl(Reg::K0, Reg::K0, ctx.target.smp_cpuid_shift());
        e.ptr_sll(Reg::K0, Reg::K0, REG_SAVE_STRIDE_LOG2);
        e.la(Reg::K1, save_area)?;
        e.ptr_addu(Reg::K0, Reg::K0, Reg::K1);
    } else {
        e.la(Reg::K0, save_area)?;
    }
    let slot = ctx.target.width.pointer_bytes() as i64;
    e.ptr_sw(Reg::AT, 0, Reg::K0);
    e.ptr_sw(Reg::V0, slot, Reg::K0);
    Ok(WorkRegs {
        r1: Reg::K1,
        r2: Reg::AT,
        r3: Reg::V0,
    })
}

/// Undo [`build_get_work_registers`]. `k0` must still hold the save-area
/// pointer when memory was used.
pub fn build_restore_work_registers(e: &mut Emitter, ctx: &HandlerContext) {
    if let Some(sel) = ctx.plan.scratch_reg {
        e.ehb();
        e.ptr_mfc0(Reg::AT, Cp0Reg::kscratch(sel));
        return;
    }
    let slot = ctx.target.width.pointer_bytes() as i64;
    e.ptr_lw(Reg::AT, 0, Reg::K0);
    e.ptr_lw(Reg::V0, slot, Reg::K0);
}

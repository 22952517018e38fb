//! Permission checks and PTE updates
//!
//! Each check branches to a fail label when the PTE does not allow the access.
//! When no spare register is supplied the check works in the PTE register
//! itself and reloads the PTE in the branch delay slot; otherwise the slot is
//! a `nop`.

use super::HandlerContext;
use crate::asm::{Emitter, LabelId};
use crate::cpu::CpuFeatures;
use crate::isa::Reg;
use crate::layout::PhysMode;

/// Load the PTE at `ptr`, linked on SMP so the later store can detect a race.
pub fn build_pte_load(e: &mut Emitter, ctx: &HandlerContext, pte: Reg, ptr: Reg) {
    let wide = ctx.target.phys == PhysMode::Phys64On32;
    match (ctx.target.smp, wide) {
        (true, true) => e.ll(pte, 0, ptr),
        (true, false) => e.ptr_ll(pte, 0, ptr),
        (false, true) => e.lw(pte, 0, ptr),
        (false, false) => e.ptr_lw(pte, 0, ptr),
    }
}

fn reload_or_nop(e: &mut Emitter, ctx: &HandlerContext, pte: Reg, ptr: Reg, t: Reg) {
    if t == pte {
        build_pte_load(e, ctx, pte, ptr);
    } else {
        e.nop();
    }
}

/// Branch to `fail` unless the PTE is present and readable.
pub fn build_pte_present(
    e: &mut Emitter,
    ctx: &HandlerContext,
    pte: Reg,
    ptr: Reg,
    scratch: Option<Reg>,
    fail: LabelId,
) {
    let t = scratch.unwrap_or(pte);
    let present = ctx.layout.present;

    if ctx.has(CpuFeatures::RIXI) {
        if ctx.use_bbit() {
            e.il_bbit0(pte, present, fail);
            e.nop();
            return;
        }
        let mut cur = pte;
        if present != 0 {
            e.srl(t, cur, present);
            cur = t;
        }
        e.andi(t, cur, 1);
        e.il_beqz(t, fail);
    } else {
        let mut cur = pte;
        if present != 0 {
            e.srl(t, cur, present);
            cur = t;
        }
        let mask = ctx.layout.readable_mask() >> present;
        e.andi(t, cur, mask);
        e.xori(t, t, mask);
        e.il_bnez(t, fail);
    }
    reload_or_nop(e, ctx, pte, ptr, t);
}

/// Branch to `fail` unless the PTE is present and writable.
pub fn build_pte_writable(
    e: &mut Emitter,
    ctx: &HandlerContext,
    pte: Reg,
    ptr: Reg,
    scratch: Option<Reg>,
    fail: LabelId,
) {
    let t = scratch.unwrap_or(pte);
    let present = ctx.layout.present;
    let mut cur = pte;
    if present != 0 {
        e.srl(t, cur, present);
        cur = t;
    }
    let mask = ctx.layout.writable_mask() >> present;
    e.andi(t, cur, mask);
    e.xori(t, t, mask);
    e.il_bnez(t, fail);
    reload_or_nop(e, ctx, pte, ptr, t);
}

/// Branch to `fail` unless the PTE is writable. Presence is implied by the
/// TLB entry that raised the modify exception.
pub fn build_pte_modifiable(
    e: &mut Emitter,
    ctx: &HandlerContext,
    pte: Reg,
    ptr: Reg,
    scratch: Option<Reg>,
    fail: LabelId,
) {
    let write = ctx.layout.write;
    if ctx.use_bbit() {
        e.il_bbit0(pte, write, fail);
        e.nop();
        return;
    }
    let t = scratch.unwrap_or(pte);
    e.srl(t, pte, write);
    e.andi(t, t, 1);
    e.il_beqz(t, fail);
    reload_or_nop(e, ctx, pte, ptr, t);
}

/// OR `mode` into the PTE and store it back. On SMP a failed store-conditional
/// restarts from `SmpPgtableChange`.
pub fn build_pte_store(e: &mut Emitter, ctx: &HandlerContext, pte: Reg, ptr: Reg, mode: u64) {
    let wide = ctx.target.phys == PhysMode::Phys64On32;
    let hw_mode = ctx.layout.hw_mode(mode);
    e.ori(pte, pte, mode);

    if ctx.target.smp {
        if wide {
            e.sc(pte, 0, ptr);
        } else {
            e.ptr_sc(pte, 0, ptr);
        }
        if ctx.has(CpuFeatures::R10000_LLSC_WAR) {
            e.il_beqzl(pte, LabelId::SmpPgtableChange);
        } else {
            e.il_beqz(pte, LabelId::SmpPgtableChange);
        }
        if wide {
            // The reload of the high word doubles as the delay slot.
            e.ll(pte, 4, ptr);
            e.ori(pte, pte, hw_mode);
            e.sc(pte, 4, ptr);
            e.il_beqz(pte, LabelId::SmpPgtableChange);
            e.lw(pte, 0, ptr);
        } else {
            e.nop();
        }
    } else if wide {
        e.sw(pte, 0, ptr);
        e.lw(pte, 4, ptr);
        e.ori(pte, pte, hw_mode);
        e.sw(pte, 4, ptr);
        e.lw(pte, 0, ptr);
    } else {
        e.ptr_sw(pte, 0, ptr);
    }
}

/// Mark the PTE accessed and valid.
pub fn build_make_valid(e: &mut Emitter, ctx: &HandlerContext, pte: Reg, ptr: Reg) {
    build_pte_store(e, ctx, pte, ptr, ctx.layout.make_valid_mode());
}

/// Mark the PTE accessed, modified, valid and dirty.
pub fn build_make_write(e: &mut Emitter, ctx: &HandlerContext, pte: Reg, ptr: Reg) {
    build_pte_store(e, ctx, pte, ptr, ctx.layout.make_write_mode());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{Area, Width};
    use crate::cpu::{CpuCaps, CpuType};
    use crate::isa::{ImmOp, Insn};
    use crate::layout::TargetConfig;
    use crate::synth::ScratchPlan;

    fn mnemonics(e: &Emitter) -> Vec<&'static str> {
        (0..e.len())
            .filter_map(|i| e.buffer().insn_at(i))
            .map(|i| i.mnemonic())
            .collect()
    }

    #[test]
    fn test_present_check_without_scratch_reloads_in_delay_slot() {
        let caps = CpuCaps::new(CpuType::R3000);
        let target = TargetConfig::new(Width::Bits32);
        let ctx = HandlerContext::new(&caps, &target, ScratchPlan::default());
        let mut e = Emitter::new("tlbl", Area::Final, 16, Width::Bits32);
        build_pte_present(&mut e, &ctx, Reg::K0, Reg::K1, None, LabelId::NopageTlbl);
        assert_eq!(mnemonics(&e), vec!["andi", "xori", "bne", "lw"]);
        assert_eq!(
            e.buffer().insn_at(0),
            Some(Insn::Imm {
                op: ImmOp::Andi,
                rt: Reg::K0,
                rs: Reg::K0,
                imm: 0b11
            })
        );
    }

    #[test]
    fn test_rixi_present_check_tests_one_bit() {
        let caps = CpuCaps::new(CpuType::P5600);
        let target = TargetConfig::new(Width::Bits32);
        let ctx = HandlerContext::new(&caps, &target, ScratchPlan::default());
        let mut e = Emitter::new("tlbl", Area::Final, 16, Width::Bits32);
        build_pte_present(&mut e, &ctx, Reg::K1, Reg::AT, Some(Reg::V0), LabelId::NopageTlbl);
        assert_eq!(mnemonics(&e), vec!["andi", "beq", "nop"]);
    }

    #[test]
    fn test_bbit_modify_check() {
        let caps = CpuCaps::new(CpuType::Octeon2);
        let target = TargetConfig::new(Width::Bits64);
        let ctx = HandlerContext::new(&caps, &target, ScratchPlan::default());
        let mut e = Emitter::new("tlbm", Area::Final, 16, Width::Bits64);
        build_pte_modifiable(&mut e, &ctx, Reg::K0, Reg::K1, Some(Reg::AT), LabelId::NopageTlbm);
        assert_eq!(mnemonics(&e), vec!["bbit0", "nop"]);
    }

    #[test]
    fn test_smp_store_retries() {
        let caps = CpuCaps::new(CpuType::M24K);
        let target = TargetConfig::new(Width::Bits32).with_smp(true);
        let ctx = HandlerContext::new(&caps, &target, ScratchPlan::default());
        let mut e = Emitter::new("tlbs", Area::Final, 16, Width::Bits32);
        build_make_write(&mut e, &ctx, Reg::K1, Reg::AT);
        assert_eq!(mnemonics(&e), vec!["ori", "sc", "beq", "nop"]);

        let wide = TargetConfig::new(Width::Bits32)
            .with_smp(true)
            .with_phys(PhysMode::Phys64On32);
        let ctx = HandlerContext::new(&caps, &wide, ScratchPlan::default());
        let mut e = Emitter::new("tlbs", Area::Final, 16, Width::Bits32);
        build_make_write(&mut e, &ctx, Reg::K1, Reg::AT);
        assert_eq!(
            mnemonics(&e),
            vec!["ori", "sc", "beq", "ll", "ori", "sc", "beq", "lw"]
        );
    }
}

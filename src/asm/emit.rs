//! Instruction emitter
//!
//! Thin mnemonic helpers over [`CodeBuffer`] and [`RelocTable`]. The `ptr_*`
//! helpers pick the 32- or 64-bit form matching the kernel's pointer width, the
//! `il_*` helpers emit a branch and record a relocation against a label.

use super::buffer::{Area, CodeBuffer, Loc};
use super::labels::{BranchKind, HazardSlot, LabelId, RelocTable, ResolvedRoutine};
use crate::error::{SynthError, SynthResult};
use crate::isa::{
    AluOp, BranchCond, Cp0Op, Cp0Reg, ImmOp, IndexedOp, Insn, MemOp, Reg, ShiftOp, TlbOp,
};

/// Kernel pointer width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    #[serde(rename = "32")]
    Bits32,
    #[serde(rename = "64")]
    Bits64,
}

impl Width {
    pub fn is_64(self) -> bool {
        self == Width::Bits64
    }

    pub fn pointer_bytes(self) -> u32 {
        match self {
            Width::Bits32 => 4,
            Width::Bits64 => 8,
        }
    }
}

/// Low 16 bits of `value`, sign-extended, as consumed by addiu/lw offsets.
pub fn rel_lo(value: i64) -> i32 {
    ((value & 0xffff) as i32 ^ 0x8000) - 0x8000
}

/// The lui half that pairs with [`rel_lo`].
pub fn rel_hi(value: i64) -> i32 {
    (((value + 0x8000) >> 16) & 0xffff) as i32
}

/// Whether `address` is a sign-extended 32-bit value.
pub fn in_compat_space(address: u64) -> bool {
    address as i64 == address as i32 as i64
}

pub struct Emitter {
    buf: CodeBuffer,
    relocs: RelocTable,
    width: Width,
    next_hazard: usize,
}

impl Emitter {
    pub fn new(routine: &'static str, area: Area, capacity: usize, width: Width) -> Self {
        Self {
            buf: CodeBuffer::new(area, capacity),
            relocs: RelocTable::new(routine),
            width,
            next_hazard: 0,
        }
    }

    pub fn routine(&self) -> &'static str {
        self.relocs.routine()
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn cursor(&self) -> Loc {
        self.buf.cursor()
    }

    pub fn buffer(&self) -> &CodeBuffer {
        &self.buf
    }

    pub fn relocs(&self) -> &RelocTable {
        &self.relocs
    }

    pub fn into_parts(self) -> (CodeBuffer, RelocTable) {
        (self.buf, self.relocs)
    }

    /// Verify capacity and resolve in one step, for routines that are not folded.
    pub fn finish(self, base: u64) -> SynthResult<ResolvedRoutine> {
        self.relocs.resolve_all(self.buf, base)
    }

    pub fn emit(&mut self, insn: Insn) -> usize {
        self.buf.emit(insn)
    }

    pub fn label(&mut self, id: LabelId) -> SynthResult<()> {
        let loc = self.buf.cursor();
        self.relocs.record_label(id, loc)
    }

    /// Claim the next TLB-write hazard label for this routine.
    pub fn next_hazard_label(&mut self) -> SynthResult<LabelId> {
        let slot = HazardSlot::new(self.next_hazard).ok_or(SynthError::HazardSlotsExhausted {
            routine: self.routine(),
            limit: HazardSlot::COUNT,
        })?;
        self.next_hazard += 1;
        Ok(LabelId::TlbwHazard(slot))
    }

    fn emit_reloc(&mut self, insn: Insn, target: LabelId, kind: BranchKind) {
        let loc = self.buf.cursor();
        self.buf.emit(insn);
        self.relocs.record_relocation(target, loc, kind);
    }

    // Plain instructions

    pub fn nop(&mut self) {
        self.emit(Insn::Nop);
    }

    pub fn ssnop(&mut self) {
        self.emit(Insn::Ssnop);
    }

    pub fn ehb(&mut self) {
        self.emit(Insn::Ehb);
    }

    fn alu(&mut self, op: AluOp, rd: Reg, rs: Reg, rt: Reg) {
        self.emit(Insn::Alu { op, rd, rs, rt });
    }

    pub fn addu(&mut self, rd: Reg, rs: Reg, rt: Reg) {
        self.alu(AluOp::Addu, rd, rs, rt);
    }

    pub fn daddu(&mut self, rd: Reg, rs: Reg, rt: Reg) {
        self.alu(AluOp::Daddu, rd, rs, rt);
    }

    pub fn or(&mut self, rd: Reg, rs: Reg, rt: Reg) {
        self.alu(AluOp::Or, rd, rs, rt);
    }

    pub fn xor(&mut self, rd: Reg, rs: Reg, rt: Reg) {
        self.alu(AluOp::Xor, rd, rs, rt);
    }

    fn imm(&mut self, op: ImmOp, rt: Reg, rs: Reg, imm: i64) {
        // Out-of-range immediates surface as encoding errors at verification.
        let imm = i32::try_from(imm).unwrap_or(i32::MAX);
        self.emit(Insn::Imm { op, rt, rs, imm });
    }

    pub fn addiu(&mut self, rt: Reg, rs: Reg, imm: i64) {
        self.imm(ImmOp::Addiu, rt, rs, imm);
    }

    pub fn daddiu(&mut self, rt: Reg, rs: Reg, imm: i64) {
        self.imm(ImmOp::Daddiu, rt, rs, imm);
    }

    pub fn andi(&mut self, rt: Reg, rs: Reg, imm: u64) {
        self.imm(ImmOp::Andi, rt, rs, imm.min(i64::MAX as u64) as i64);
    }

    pub fn ori(&mut self, rt: Reg, rs: Reg, imm: u64) {
        self.imm(ImmOp::Ori, rt, rs, imm.min(i64::MAX as u64) as i64);
    }

    pub fn xori(&mut self, rt: Reg, rs: Reg, imm: u64) {
        self.imm(ImmOp::Xori, rt, rs, imm.min(i64::MAX as u64) as i64);
    }

    pub fn lui(&mut self, rt: Reg, imm: u64) {
        let imm = i32::try_from(imm).unwrap_or(i32::MAX);
        self.emit(Insn::Lui { rt, imm });
    }

    fn shift(&mut self, op: ShiftOp, rd: Reg, rt: Reg, sa: u32) {
        let sa = u8::try_from(sa).unwrap_or(u8::MAX);
        self.emit(Insn::Shift { op, rd, rt, sa });
    }

    pub fn sll(&mut self, rd: Reg, rt: Reg, sa: u32) {
        self.shift(ShiftOp::Sll, rd, rt, sa);
    }

    pub fn srl(&mut self, rd: Reg, rt: Reg, sa: u32) {
        self.shift(ShiftOp::Srl, rd, rt, sa);
    }

    pub fn rotr(&mut self, rd: Reg, rt: Reg, sa: u32) {
        self.shift(ShiftOp::Rotr, rd, rt, sa);
    }

    /// `dsrl`, or `dsrl32` for amounts of 32 and above
    pub fn dsrl_safe(&mut self, rd: Reg, rt: Reg, sa: u32) {
        if sa >= 32 {
            self.shift(ShiftOp::Dsrl32, rd, rt, sa - 32);
        } else {
            self.shift(ShiftOp::Dsrl, rd, rt, sa);
        }
    }

    /// `dsll`, or `dsll32` for amounts of 32 and above
    pub fn dsll_safe(&mut self, rd: Reg, rt: Reg, sa: u32) {
        if sa >= 32 {
            self.shift(ShiftOp::Dsll32, rd, rt, sa - 32);
        } else {
            self.shift(ShiftOp::Dsll, rd, rt, sa);
        }
    }

    /// `drotr`, or `drotr32` for amounts of 32 and above
    pub fn drotr_safe(&mut self, rd: Reg, rt: Reg, sa: u32) {
        if sa >= 32 {
            self.shift(ShiftOp::Drotr32, rd, rt, sa - 32);
        } else {
            self.shift(ShiftOp::Drotr, rd, rt, sa);
        }
    }

    fn mem(&mut self, op: MemOp, rt: Reg, offset: i64, base: Reg) {
        let offset = i32::try_from(offset).unwrap_or(i32::MAX);
        self.emit(Insn::Mem {
            op,
            rt,
            base,
            offset,
        });
    }

    pub fn lw(&mut self, rt: Reg, offset: i64, base: Reg) {
        self.mem(MemOp::Lw, rt, offset, base);
    }

    pub fn ld(&mut self, rt: Reg, offset: i64, base: Reg) {
        self.mem(MemOp::Ld, rt, offset, base);
    }

    pub fn sw(&mut self, rt: Reg, offset: i64, base: Reg) {
        self.mem(MemOp::Sw, rt, offset, base);
    }

    pub fn sd(&mut self, rt: Reg, offset: i64, base: Reg) {
        self.mem(MemOp::Sd, rt, offset, base);
    }

    pub fn ll(&mut self, rt: Reg, offset: i64, base: Reg) {
        self.mem(MemOp::Ll, rt, offset, base);
    }

    pub fn lld(&mut self, rt: Reg, offset: i64, base: Reg) {
        self.mem(MemOp::Lld, rt, offset, base);
    }

    pub fn sc(&mut self, rt: Reg, offset: i64, base: Reg) {
        self.mem(MemOp::Sc, rt, offset, base);
    }

    pub fn scd(&mut self, rt: Reg, offset: i64, base: Reg) {
        self.mem(MemOp::Scd, rt, offset, base);
    }

    pub fn lwx(&mut self, rd: Reg, index: Reg, base: Reg) {
        self.emit(Insn::Indexed {
            op: IndexedOp::Lwx,
            rd,
            index,
            base,
        });
    }

    pub fn ldx(&mut self, rd: Reg, index: Reg, base: Reg) {
        self.emit(Insn::Indexed {
            op: IndexedOp::Ldx,
            rd,
            index,
            base,
        });
    }

    fn cp0(&mut self, op: Cp0Op, rt: Reg, reg: Cp0Reg) {
        self.emit(Insn::Cp0 { op, rt, reg });
    }

    pub fn mfc0(&mut self, rt: Reg, reg: Cp0Reg) {
        self.cp0(Cp0Op::Mfc0, rt, reg);
    }

    pub fn dmfc0(&mut self, rt: Reg, reg: Cp0Reg) {
        self.cp0(Cp0Op::Dmfc0, rt, reg);
    }

    pub fn mtc0(&mut self, rt: Reg, reg: Cp0Reg) {
        self.cp0(Cp0Op::Mtc0, rt, reg);
    }

    pub fn dmtc0(&mut self, rt: Reg, reg: Cp0Reg) {
        self.cp0(Cp0Op::Dmtc0, rt, reg);
    }

    pub fn tlb(&mut self, op: TlbOp) {
        self.emit(Insn::Tlb(op));
    }

    pub fn tlbp(&mut self) {
        self.tlb(TlbOp::Tlbp);
    }

    pub fn tlbr(&mut self) {
        self.tlb(TlbOp::Tlbr);
    }

    pub fn eret(&mut self) {
        self.tlb(TlbOp::Eret);
    }

    pub fn rfe(&mut self) {
        self.tlb(TlbOp::Rfe);
    }

    pub fn jr(&mut self, rs: Reg) {
        self.emit(Insn::Jr { rs });
    }

    /// `j` to a fixed kernel address; segment reachability is checked at resolution.
    pub fn j_abs(&mut self, target: u64) {
        let target = self.canonical(target);
        let loc = self.buf.cursor();
        self.emit(Insn::Jump {
            target: ((target >> 2) & 0x03ff_ffff) as u32,
        });
        self.relocs.record_abs_jump(loc, target);
    }

    /// Branch with a fixed instruction offset from the delay slot (no label).
    pub fn branch_raw(&mut self, cond: BranchCond, rs: Reg, offset: i32) {
        self.emit(Insn::Branch {
            cond,
            rs,
            rt: Reg::ZERO,
            offset,
        });
    }

    pub fn bbit_raw(&mut self, set: bool, rs: Reg, bit: u32, offset: i32) {
        let bit = u8::try_from(bit).unwrap_or(u8::MAX);
        self.emit(Insn::BitBranch {
            set,
            rs,
            bit,
            offset,
        });
    }

    // Branches to labels

    fn il_branch(&mut self, cond: BranchCond, rs: Reg, target: LabelId) {
        self.emit_reloc(
            Insn::Branch {
                cond,
                rs,
                rt: Reg::ZERO,
                offset: 0,
            },
            target,
            BranchKind::Pc16,
        );
    }

    pub fn il_b(&mut self, target: LabelId) {
        self.il_branch(BranchCond::Eq, Reg::ZERO, target);
    }

    pub fn il_beqz(&mut self, rs: Reg, target: LabelId) {
        self.il_branch(BranchCond::Eq, rs, target);
    }

    pub fn il_beqzl(&mut self, rs: Reg, target: LabelId) {
        self.il_branch(BranchCond::EqLikely, rs, target);
    }

    pub fn il_bnez(&mut self, rs: Reg, target: LabelId) {
        self.il_branch(BranchCond::Ne, rs, target);
    }

    pub fn il_bltz(&mut self, rs: Reg, target: LabelId) {
        self.il_branch(BranchCond::Ltz, rs, target);
    }

    pub fn il_bgez(&mut self, rs: Reg, target: LabelId) {
        self.il_branch(BranchCond::Gez, rs, target);
    }

    pub fn il_bgezl(&mut self, rs: Reg, target: LabelId) {
        self.il_branch(BranchCond::GezLikely, rs, target);
    }

    fn il_bbit(&mut self, set: bool, rs: Reg, bit: u32, target: LabelId) {
        let bit = u8::try_from(bit).unwrap_or(u8::MAX);
        self.emit_reloc(
            Insn::BitBranch {
                set,
                rs,
                bit,
                offset: 0,
            },
            target,
            BranchKind::Pc16,
        );
    }

    pub fn il_bbit0(&mut self, rs: Reg, bit: u32, target: LabelId) {
        self.il_bbit(false, rs, bit, target);
    }

    pub fn il_bbit1(&mut self, rs: Reg, bit: u32, target: LabelId) {
        self.il_bbit(true, rs, bit, target);
    }

    // Pointer-width forms

    pub fn ptr_lw(&mut self, rt: Reg, offset: i64, base: Reg) {
        match self.width {
            Width::Bits32 => self.lw(rt, offset, base),
            Width::Bits64 => self.ld(rt, offset, base),
        }
    }

    pub fn ptr_sw(&mut self, rt: Reg, offset: i64, base: Reg) {
        match self.width {
            Width::Bits32 => self.sw(rt, offset, base),
            Width::Bits64 => self.sd(rt, offset, base),
        }
    }

    pub fn ptr_ll(&mut self, rt: Reg, offset: i64, base: Reg) {
        match self.width {
            Width::Bits32 => self.ll(rt, offset, base),
            Width::Bits64 => self.lld(rt, offset, base),
        }
    }

    pub fn ptr_sc(&mut self, rt: Reg, offset: i64, base: Reg) {
        match self.width {
            Width::Bits32 => self.sc(rt, offset, base),
            Width::Bits64 => self.scd(rt, offset, base),
        }
    }

    pub fn ptr_addu(&mut self, rd: Reg, rs: Reg, rt: Reg) {
        match self.width {
            Width::Bits32 => self.addu(rd, rs, rt),
            Width::Bits64 => self.daddu(rd, rs, rt),
        }
    }

    pub fn ptr_addiu(&mut self, rt: Reg, rs: Reg, imm: i64) {
        match self.width {
            Width::Bits32 => self.addiu(rt, rs, imm),
            Width::Bits64 => self.daddiu(rt, rs, imm),
        }
    }

    pub fn ptr_srl(&mut self, rd: Reg, rt: Reg, sa: u32) {
        match self.width {
            Width::Bits32 => self.srl(rd, rt, sa),
            Width::Bits64 => self.dsrl_safe(rd, rt, sa),
        }
    }

    pub fn ptr_sll(&mut self, rd: Reg, rt: Reg, sa: u32) {
        match self.width {
            Width::Bits32 => self.sll(rd, rt, sa),
            Width::Bits64 => self.dsll_safe(rd, rt, sa),
        }
    }

    pub fn ptr_rotr(&mut self, rd: Reg, rt: Reg, sa: u32) {
        match self.width {
            Width::Bits32 => self.rotr(rd, rt, sa),
            Width::Bits64 => self.drotr_safe(rd, rt, sa),
        }
    }

    pub fn ptr_mfc0(&mut self, rt: Reg, reg: Cp0Reg) {
        match self.width {
            Width::Bits32 => self.mfc0(rt, reg),
            Width::Bits64 => self.dmfc0(rt, reg),
        }
    }

    pub fn ptr_mtc0(&mut self, rt: Reg, reg: Cp0Reg) {
        match self.width {
            Width::Bits32 => self.mtc0(rt, reg),
            Width::Bits64 => self.dmtc0(rt, reg),
        }
    }

    pub fn ptr_lwx(&mut self, rd: Reg, index: Reg, base: Reg) {
        match self.width {
            Width::Bits32 => self.lwx(rd, index, base),
            Width::Bits64 => self.ldx(rd, index, base),
        }
    }

    /// Canonical form of a kernel address for this width.
    fn canonical(&self, address: u64) -> u64 {
        match self.width {
            Width::Bits64 if address >> 32 != 0 => address,
            _ => address as u32 as i32 as i64 as u64,
        }
    }

    /// Load the upper part of `address` and return the low part, which the
    /// caller folds into the next load or add.
    pub fn la_mostly(&mut self, rt: Reg, address: u64) -> SynthResult<i64> {
        let address = self.canonical(address);
        if !in_compat_space(address) {
            return Err(SynthError::SymbolOutOfRange {
                routine: self.routine(),
                address,
            });
        }
        let value = address as i64;
        self.lui(rt, rel_hi(value) as u64);
        Ok(rel_lo(value) as i64)
    }

    /// Load the full `address` into `rt`.
    pub fn la(&mut self, rt: Reg, address: u64) -> SynthResult<()> {
        let lo = self.la_mostly(rt, address)?;
        if lo != 0 {
            self.ptr_addiu(rt, rt, lo);
        }
        Ok(())
    }
}

//! Instruction-level model of a MIPS core running one handler
//!
//! Registers are 64 bits wide; 32-bit operations sign-extend their result the
//! way MIPS64 does, so the same model runs 32-bit and 64-bit kernels. Memory is
//! sparse and big-endian, unwritten bytes read as zero.
//!
//! A run ends when the handler returns from the exception (`eret`, or `jr` to
//! EPC with `rfe` in the delay slot) or jumps anywhere outside the loaded code,
//! which for a TLB handler means the C slow path.

use super::tlb::{Tlb, TlbEntry, TlbWrite, WriteKind};
use super::trace::PathTrace;
use crate::asm::{ResolvedRoutine, Width};
use crate::cpu::CpuCaps;
use crate::isa::{
    AluOp, BranchCond, Cp0Op, Cp0Reg, ImmOp, IndexedOp, Insn, MemOp, Reg, ShiftOp, TlbOp,
};
use crate::layout::TargetConfig;
use std::collections::{BTreeMap, HashMap};

/// Joint TLB size unless overridden
pub const DEFAULT_TLB_ENTRIES: usize = 64;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Returned from the exception to `epc`
    Return { epc: u64 },
    /// Left the loaded code without returning, e.g. to the page-fault path
    Jump { target: u64 },
    /// A word the decoder does not know
    InvalidInstruction { pc: u64, word: u32 },
    MaxInstructionsExceeded,
}

/// What the executed instruction does to the program counter.
enum Flow {
    Next,
    /// Transfer to the target after the delay slot
    Delayed(u64),
    /// Likely branch not taken: the delay slot is annulled
    Annul,
    /// `eret`
    Return,
}

#[inline]
fn sext32(value: u64) -> u64 {
    value as u32 as i32 as i64 as u64
}

pub struct Machine {
    /// General-purpose registers; `$0` is never written
    pub regs: [u64; 32],
    cp0: HashMap<Cp0Reg, u64>,
    memory: BTreeMap<u64, u8>,
    code: BTreeMap<u64, u32>,
    width: Width,
    r3000: bool,
    cpuid_shift: u32,
    tlb: Tlb,
    writes: Vec<TlbWrite>,
    trace: PathTrace,
    rfe_executed: bool,
    instruction_count: u64,
    max_instructions: u64,
}

impl Machine {
    /// A core running a kernel of `width` with the R4000 exception model.
    pub fn new(width: Width) -> Self {
        Self {
            regs: [0; 32],
            cp0: HashMap::new(),
            memory: BTreeMap::new(),
            code: BTreeMap::new(),
            width,
            r3000: false,
            cpuid_shift: match width {
                Width::Bits32 => 23,
                Width::Bits64 => 51,
            },
            tlb: Tlb::new(DEFAULT_TLB_ENTRIES),
            writes: Vec::new(),
            trace: PathTrace::disabled(),
            rfe_executed: false,
            instruction_count: 0,
            max_instructions: 10_000,
        }
    }

    /// A core matching the CPU and kernel the handlers were built for.
    pub fn for_target(caps: &CpuCaps, target: &TargetConfig) -> Self {
        let mut machine = Self::new(target.width);
        machine.r3000 = caps.cpu.is_r3000_class();
        machine.cpuid_shift = target.smp_cpuid_shift();
        machine
    }

    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }

    pub fn with_tlb_size(mut self, size: usize) -> Self {
        self.tlb = Tlb::new(size);
        self
    }

    /// Record the executed path
    pub fn with_trace(mut self) -> Self {
        self.trace = PathTrace::new();
        self
    }

    /// Place the Context register's CPU number field, as SMP kernels do.
    pub fn with_cpu(mut self, cpu: u64) -> Self {
        let context = self.cp0(Cp0Reg::CONTEXT);
        let low = context & ((1u64 << self.cpuid_shift) - 1);
        self.set_cp0(Cp0Reg::CONTEXT, (cpu << self.cpuid_shift) | low);
        self
    }

    pub fn width(&self) -> Width {
        self.width
    }

    /// Kernel addresses as the core sees them: 32-bit values are sign-extended.
    pub fn canonical(&self, address: u64) -> u64 {
        match self.width {
            Width::Bits64 if address >> 32 != 0 => address,
            _ => sext32(address),
        }
    }

    pub fn load_words(&mut self, base: u64, words: &[u32]) {
        let base = self.canonical(base);
        for (i, word) in words.iter().enumerate() {
            self.code.insert(base.wrapping_add(4 * i as u64), *word);
        }
    }

    pub fn load_routine(&mut self, routine: &ResolvedRoutine) {
        self.load_words(routine.base(), routine.words());
    }

    pub fn reg(&self, reg: Reg) -> u64 {
        self.regs[reg.index() as usize]
    }

    pub fn set_reg(&mut self, reg: Reg, value: u64) {
        if reg != Reg::ZERO {
            self.regs[reg.index() as usize] = value;
        }
    }

    pub fn cp0(&self, reg: Cp0Reg) -> u64 {
        self.cp0.get(&reg).copied().unwrap_or(0)
    }

    pub fn set_cp0(&mut self, reg: Cp0Reg, value: u64) {
        self.cp0.insert(reg, value);
    }

    /// Set up CP0 the way the hardware does on a TLB exception at `vaddr`.
    pub fn raise_tlb_fault(&mut self, vaddr: u64, epc: u64) {
        let vaddr = self.canonical(vaddr);
        let context = self.cp0(Cp0Reg::CONTEXT);
        let entryhi = self.cp0(Cp0Reg::ENTRYHI);
        let (context, entryhi) = if self.r3000 {
            let bad_vpn = ((vaddr >> 12) & 0x7ffff) << 2;
            (
                (context & !0x1f_fffc) | bad_vpn,
                (vaddr & !0xfff) | (entryhi & 0xfc0),
            )
        } else {
            let bad_vpn2 = ((vaddr >> 13) & 0x7ffff) << 4;
            (
                (context & !0x7f_fff0) | bad_vpn2,
                (vaddr & !0x1fff) | (entryhi & 0xff),
            )
        };
        self.set_cp0(Cp0Reg::BADVADDR, vaddr);
        self.set_cp0(Cp0Reg::CONTEXT, context);
        self.set_cp0(Cp0Reg::ENTRYHI, entryhi);
        self.set_cp0(Cp0Reg::EPC, self.canonical(epc));
    }

    pub fn read_u32(&self, address: u64) -> u32 {
        let address = self.canonical(address);
        (0..4u64).fold(0, |acc, i| {
            (acc << 8) | self.memory.get(&address.wrapping_add(i)).copied().unwrap_or(0) as u32
        })
    }

    pub fn read_u64(&self, address: u64) -> u64 {
        ((self.read_u32(address) as u64) << 32) | self.read_u32(address.wrapping_add(4)) as u64
    }

    pub fn write_u32(&mut self, address: u64, value: u32) {
        let address = self.canonical(address);
        for (i, byte) in value.to_be_bytes().iter().enumerate() {
            self.memory.insert(address.wrapping_add(i as u64), *byte);
        }
    }

    pub fn write_u64(&mut self, address: u64, value: u64) {
        self.write_u32(address, (value >> 32) as u32);
        self.write_u32(address.wrapping_add(4), value as u32);
    }

    /// Read a kernel pointer
    pub fn read_ptr(&self, address: u64) -> u64 {
        match self.width {
            Width::Bits32 => sext32(self.read_u32(address) as u64),
            Width::Bits64 => self.read_u64(address),
        }
    }

    pub fn write_ptr(&mut self, address: u64, value: u64) {
        match self.width {
            Width::Bits32 => self.write_u32(address, value as u32),
            Width::Bits64 => self.write_u64(address, value),
        }
    }

    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    pub fn tlb_mut(&mut self) -> &mut Tlb {
        &mut self.tlb
    }

    /// TLB writes issued so far, oldest first.
    pub fn tlb_writes(&self) -> &[TlbWrite] {
        &self.writes
    }

    pub fn trace(&self) -> &PathTrace {
        &self.trace
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Execute from `entry` until the handler leaves.
    pub fn run(&mut self, entry: u64) -> Exit {
        let mut pc = self.canonical(entry);
        let mut delayed: Option<u64> = None;
        self.instruction_count = 0;
        self.rfe_executed = false;

        loop {
            if self.instruction_count >= self.max_instructions {
                return Exit::MaxInstructionsExceeded;
            }
            let word = match self.code.get(&pc) {
                Some(word) => *word,
                None => return self.leave(pc),
            };
            let insn = match Insn::decode(word) {
                Some(insn) => insn,
                None => return Exit::InvalidInstruction { pc, word },
            };
            self.trace.mark_executed(pc);
            self.instruction_count += 1;

            let pending = delayed.take();
            let flow = self.execute(pc, insn);
            let next = pc.wrapping_add(4);
            pc = match (pending, flow) {
                (_, Flow::Return) => {
                    return Exit::Return {
                        epc: self.cp0(Cp0Reg::EPC),
                    }
                }
                // Control transfers in a delay slot are not used by the handlers.
                (Some(target), _) => target,
                (None, Flow::Next) => next,
                (None, Flow::Delayed(target)) => {
                    delayed = Some(target);
                    next
                }
                (None, Flow::Annul) => next.wrapping_add(4),
            };
        }
    }

    fn leave(&self, pc: u64) -> Exit {
        if self.rfe_executed {
            Exit::Return { epc: pc }
        } else {
            Exit::Jump { target: pc }
        }
    }

    fn branch(&mut self, pc: u64, taken: bool, likely: bool, offset: i32) -> Flow {
        self.trace.mark_branch(pc, taken);
        match (taken, likely) {
            (true, _) => Flow::Delayed(pc.wrapping_add(4).wrapping_add((offset as i64 * 4) as u64)),
            (false, true) => Flow::Annul,
            (false, false) => Flow::Next,
        }
    }

    fn execute(&mut self, pc: u64, insn: Insn) -> Flow {
        match insn {
            Insn::Nop | Insn::Ssnop | Insn::Ehb => {}
            Insn::Alu { op, rd, rs, rt } => {
                let (a, b) = (self.reg(rs), self.reg(rt));
                let value = match op {
                    AluOp::Addu => sext32(a.wrapping_add(b)),
                    AluOp::Daddu => a.wrapping_add(b),
                    AluOp::And => a & b,
                    AluOp::Or => a | b,
                    AluOp::Xor => a ^ b,
                };
                self.set_reg(rd, value);
            }
            Insn::Shift { op, rd, rt, sa } => {
                let v = self.reg(rt);
                let sa = sa as u32;
                let value = match op {
                    ShiftOp::Sll => sext32(((v as u32) << sa) as u64),
                    ShiftOp::Srl => sext32(((v as u32) >> sa) as u64),
                    ShiftOp::Rotr => sext32((v as u32).rotate_right(sa) as u64),
                    ShiftOp::Dsll => v << sa,
                    ShiftOp::Dsrl => v >> sa,
                    ShiftOp::Drotr => v.rotate_right(sa),
                    ShiftOp::Dsll32 => v << (sa + 32),
                    ShiftOp::Dsrl32 => v >> (sa + 32),
                    ShiftOp::Drotr32 => v.rotate_right(sa + 32),
                };
                self.set_reg(rd, value);
            }
            Insn::Imm { op, rt, rs, imm } => {
                let a = self.reg(rs);
                let value = match op {
                    ImmOp::Addiu => sext32(a.wrapping_add(imm as i64 as u64)),
                    ImmOp::Daddiu => a.wrapping_add(imm as i64 as u64),
                    ImmOp::Andi => a & (imm as u64 & 0xffff),
                    ImmOp::Ori => a | (imm as u64 & 0xffff),
                    ImmOp::Xori => a ^ (imm as u64 & 0xffff),
                };
                self.set_reg(rt, value);
            }
            Insn::Lui { rt, imm } => self.set_reg(rt, sext32(((imm as u64) & 0xffff) << 16)),
            Insn::Mem {
                op,
                rt,
                base,
                offset,
            } => {
                let address = self.reg(base).wrapping_add(offset as i64 as u64);
                self.memory_op(op, rt, address);
            }
            Insn::Indexed {
                op,
                rd,
                index,
                base,
            } => {
                let address = self.reg(base).wrapping_add(self.reg(index));
                let value = match op {
                    IndexedOp::Lwx => sext32(self.read_u32(address) as u64),
                    IndexedOp::Ldx => self.read_u64(address),
                };
                self.set_reg(rd, value);
            }
            Insn::Branch {
                cond,
                rs,
                rt,
                offset,
            } => {
                let (a, b) = (self.reg(rs), self.reg(rt));
                let taken = match cond {
                    BranchCond::Eq | BranchCond::EqLikely => a == b,
                    BranchCond::Ne | BranchCond::NeLikely => a != b,
                    BranchCond::Ltz => (a as i64) < 0,
                    BranchCond::Gez | BranchCond::GezLikely => (a as i64) >= 0,
                };
                return self.branch(pc, taken, cond.is_likely(), offset);
            }
            Insn::BitBranch {
                set,
                rs,
                bit,
                offset,
            } => {
                let taken = ((self.reg(rs) >> bit) & 1 == 1) == set;
                return self.branch(pc, taken, false, offset);
            }
            Insn::Jump { target } => {
                let region = pc.wrapping_add(4) & !0x0fff_ffff;
                return Flow::Delayed(region | ((target as u64) << 2));
            }
            Insn::Jr { rs } => return Flow::Delayed(self.reg(rs)),
            Insn::Cp0 { op, rt, reg } => match op {
                Cp0Op::Mfc0 => self.set_reg(rt, sext32(self.cp0(reg))),
                Cp0Op::Dmfc0 => self.set_reg(rt, self.cp0(reg)),
                Cp0Op::Mtc0 => self.set_cp0(reg, sext32(self.reg(rt))),
                Cp0Op::Dmtc0 => self.set_cp0(reg, self.reg(rt)),
            },
            Insn::Tlb(op) => return self.tlb_op(op),
        }
        Flow::Next
    }

    fn memory_op(&mut self, op: MemOp, rt: Reg, address: u64) {
        match op {
            MemOp::Lw | MemOp::Ll => {
                let value = sext32(self.read_u32(address) as u64);
                self.set_reg(rt, value);
            }
            MemOp::Ld | MemOp::Lld => {
                let value = self.read_u64(address);
                self.set_reg(rt, value);
            }
            MemOp::Sw => self.write_u32(address, self.reg(rt) as u32),
            MemOp::Sd => self.write_u64(address, self.reg(rt)),
            // Nothing else runs, so every store-conditional succeeds.
            MemOp::Sc => {
                self.write_u32(address, self.reg(rt) as u32);
                self.set_reg(rt, 1);
            }
            MemOp::Scd => {
                self.write_u64(address, self.reg(rt));
                self.set_reg(rt, 1);
            }
        }
    }

    fn tlb_op(&mut self, op: TlbOp) -> Flow {
        match op {
            TlbOp::Tlbp => {
                let index = self.tlb.probe(self.cp0(Cp0Reg::ENTRYHI));
                self.set_cp0(Cp0Reg::INDEX, index);
            }
            TlbOp::Tlbr => {
                let entry = self.tlb.read(self.cp0(Cp0Reg::INDEX));
                self.set_cp0(Cp0Reg::ENTRYHI, entry.entryhi);
                self.set_cp0(Cp0Reg::ENTRYLO0, entry.entrylo0);
                self.set_cp0(Cp0Reg::ENTRYLO1, entry.entrylo1);
                self.set_cp0(Cp0Reg::PAGEMASK, entry.pagemask);
            }
            TlbOp::Tlbwi | TlbOp::Tlbwr => {
                let kind = if op == TlbOp::Tlbwi {
                    WriteKind::Indexed
                } else {
                    WriteKind::Random
                };
                let entry = TlbEntry {
                    entryhi: self.cp0(Cp0Reg::ENTRYHI),
                    entrylo0: self.cp0(Cp0Reg::ENTRYLO0),
                    entrylo1: self.cp0(Cp0Reg::ENTRYLO1),
                    pagemask: self.cp0(Cp0Reg::PAGEMASK),
                };
                let write = self.tlb.write(kind, self.cp0(Cp0Reg::INDEX), entry);
                self.writes.push(write);
            }
            TlbOp::Rfe => self.rfe_executed = true,
            TlbOp::Eret => return Flow::Return,
        }
        Flow::Next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Insn;

    fn words(insns: &[Insn]) -> Vec<u32> {
        insns.iter().map(|i| i.encode().unwrap()).collect()
    }

    #[test]
    fn test_32bit_ops_sign_extend() {
        let mut m = Machine::new(Width::Bits64);
        let prog = words(&[
            Insn::Lui {
                rt: Reg::K0,
                imm: 0x8000,
            },
            Insn::Shift {
                op: ShiftOp::Srl,
                rd: Reg::K1,
                rt: Reg::K0,
                sa: 0,
            },
            Insn::Shift {
                op: ShiftOp::Dsrl32,
                rd: Reg::AT,
                rt: Reg::K0,
                sa: 0,
            },
            Insn::Tlb(TlbOp::Eret),
        ]);
        m.load_words(0x8000_0000, &prog);
        m.set_cp0(Cp0Reg::EPC, 0x1234);
        assert_eq!(m.run(0x8000_0000), Exit::Return { epc: 0x1234 });
        assert_eq!(m.reg(Reg::K0), 0xffff_ffff_8000_0000);
        assert_eq!(m.reg(Reg::K1), 0xffff_ffff_8000_0000);
        assert_eq!(m.reg(Reg::AT), 0xffff_ffff);
    }

    #[test]
    fn test_delay_slot_runs_before_branch_target() {
        let mut m = Machine::new(Width::Bits32).with_trace();
        let prog = words(&[
            Insn::Branch {
                cond: BranchCond::Eq,
                rs: Reg::ZERO,
                rt: Reg::ZERO,
                offset: 2,
            },
            Insn::Imm {
                op: ImmOp::Ori,
                rt: Reg::K0,
                rs: Reg::ZERO,
                imm: 7,
            },
            Insn::Imm {
                op: ImmOp::Ori,
                rt: Reg::K1,
                rs: Reg::ZERO,
                imm: 9,
            },
            Insn::Tlb(TlbOp::Eret),
        ]);
        m.load_words(0x8000_0000, &prog);
        assert!(matches!(m.run(0x8000_0000), Exit::Return { .. }));
        assert_eq!(m.reg(Reg::K0), 7);
        assert_eq!(m.reg(Reg::K1), 0);
        assert_eq!(m.trace().branch_taken(0xffff_ffff_8000_0000), Some(true));
    }

    #[test]
    fn test_untaken_likely_branch_annuls_slot() {
        let mut m = Machine::new(Width::Bits32);
        m.set_reg(Reg::K0, 1);
        let prog = words(&[
            Insn::Branch {
                cond: BranchCond::EqLikely,
                rs: Reg::K0,
                rt: Reg::ZERO,
                offset: 2,
            },
            Insn::Imm {
                op: ImmOp::Ori,
                rt: Reg::K1,
                rs: Reg::ZERO,
                imm: 9,
            },
            Insn::Tlb(TlbOp::Eret),
        ]);
        m.load_words(0x8000_0000, &prog);
        assert!(matches!(m.run(0x8000_0000), Exit::Return { .. }));
        assert_eq!(m.reg(Reg::K1), 0);
    }

    #[test]
    fn test_jump_out_of_code_is_reported() {
        let mut m = Machine::new(Width::Bits32);
        let prog = words(&[
            Insn::Jump {
                target: (0x8011_0000 >> 2) & 0x03ff_ffff,
            },
            Insn::Nop,
        ]);
        m.load_words(0x8010_0000, &prog);
        assert_eq!(
            m.run(0x8010_0000),
            Exit::Jump {
                target: 0xffff_ffff_8011_0000
            }
        );
    }

    #[test]
    fn test_rfe_return_through_jr() {
        let mut m = Machine::new(Width::Bits32);
        let prog = words(&[
            Insn::Cp0 {
                op: Cp0Op::Mfc0,
                rt: Reg::K1,
                reg: Cp0Reg::EPC,
            },
            Insn::Tlb(TlbOp::Tlbwr),
            Insn::Jr { rs: Reg::K1 },
            Insn::Tlb(TlbOp::Rfe),
        ]);
        m.load_words(0x8000_0000, &prog);
        m.raise_tlb_fault(0x0040_2000, 0x0040_0010);
        assert_eq!(m.run(0x8000_0000), Exit::Return { epc: 0x0040_0010 });
        assert_eq!(m.tlb_writes().len(), 1);
        assert_eq!(m.tlb_writes()[0].kind, WriteKind::Random);
    }

    #[test]
    fn test_fault_fills_context() {
        let mut m = Machine::new(Width::Bits64).with_cpu(3);
        m.raise_tlb_fault(0x0000_0000_1234_5678, 0);
        let context = m.cp0(Cp0Reg::CONTEXT);
        assert_eq!(context >> 51, 3);
        assert_eq!((context >> 4) & 0x7ffff, 0x1234_5678 >> 13);
        assert_eq!(m.cp0(Cp0Reg::ENTRYHI), 0x1234_4000);
    }

    #[test]
    fn test_big_endian_memory() {
        let mut m = Machine::new(Width::Bits64);
        m.write_u64(0x9000_0000_0000_1000, 0x0102_0304_0506_0708);
        assert_eq!(m.read_u32(0x9000_0000_0000_1000), 0x0102_0304);
        assert_eq!(m.read_u32(0x9000_0000_0000_1004), 0x0506_0708);
        assert_eq!(m.read_u32(0x9000_0000_0000_2000), 0);
    }

    #[test]
    fn test_instruction_budget() {
        let mut m = Machine::new(Width::Bits32).with_max_instructions(8);
        let prog = words(&[
            Insn::Branch {
                cond: BranchCond::Eq,
                rs: Reg::ZERO,
                rt: Reg::ZERO,
                offset: -1,
            },
            Insn::Nop,
        ]);
        m.load_words(0x8000_0000, &prog);
        assert_eq!(m.run(0x8000_0000), Exit::MaxInstructionsExceeded);
    }
}

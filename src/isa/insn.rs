//! Instruction encoding and decoding
//!
//! Every instruction is a fixed 32-bit word. Operand fields are validated
//! against their encoded width; an operand that does not fit is reported as an
//! [`EncodeError`] rather than silently truncated.

use super::{Cp0Reg, Reg};
use std::fmt;
use thiserror::Error;

/// An operand did not fit the field the encoding provides for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{mnemonic}: {field} value {value:#x} does not fit the encoding")]
pub struct EncodeError {
    pub mnemonic: &'static str,
    pub field: &'static str,
    pub value: i64,
}

/// Three-register SPECIAL arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Addu,
    Daddu,
    And,
    Or,
    Xor,
}

impl AluOp {
    fn funct(self) -> u32 {
        match self {
            AluOp::Addu => 0x21,
            AluOp::Daddu => 0x2d,
            AluOp::And => 0x24,
            AluOp::Or => 0x25,
            AluOp::Xor => 0x26,
        }
    }

    fn from_funct(funct: u32) -> Option<Self> {
        Some(match funct {
            0x21 => AluOp::Addu,
            0x2d => AluOp::Daddu,
            0x24 => AluOp::And,
            0x25 => AluOp::Or,
            0x26 => AluOp::Xor,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Addu => "addu",
            AluOp::Daddu => "daddu",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
        }
    }
}

/// Shift and rotate by immediate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Sll,
    Srl,
    Rotr,
    Dsll,
    Dsrl,
    Drotr,
    Dsll32,
    Dsrl32,
    Drotr32,
}

impl ShiftOp {
    /// (funct, rs field)
    fn fields(self) -> (u32, u32) {
        match self {
            ShiftOp::Sll => (0x00, 0),
            ShiftOp::Srl => (0x02, 0),
            ShiftOp::Rotr => (0x02, 1),
            ShiftOp::Dsll => (0x38, 0),
            ShiftOp::Dsrl => (0x3a, 0),
            ShiftOp::Drotr => (0x3a, 1),
            ShiftOp::Dsll32 => (0x3c, 0),
            ShiftOp::Dsrl32 => (0x3e, 0),
            ShiftOp::Drotr32 => (0x3e, 1),
        }
    }

    fn from_fields(funct: u32, rs: u32) -> Option<Self> {
        Some(match (funct, rs) {
            (0x00, 0) => ShiftOp::Sll,
            (0x02, 0) => ShiftOp::Srl,
            (0x02, 1) => ShiftOp::Rotr,
            (0x38, 0) => ShiftOp::Dsll,
            (0x3a, 0) => ShiftOp::Dsrl,
            (0x3a, 1) => ShiftOp::Drotr,
            (0x3c, 0) => ShiftOp::Dsll32,
            (0x3e, 0) => ShiftOp::Dsrl32,
            (0x3e, 1) => ShiftOp::Drotr32,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Sll => "sll",
            ShiftOp::Srl => "srl",
            ShiftOp::Rotr => "rotr",
            ShiftOp::Dsll => "dsll",
            ShiftOp::Dsrl => "dsrl",
            ShiftOp::Drotr => "drotr",
            ShiftOp::Dsll32 => "dsll32",
            ShiftOp::Dsrl32 => "dsrl32",
            ShiftOp::Drotr32 => "drotr32",
        }
    }
}

/// Register-immediate arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImmOp {
    Addiu,
    Daddiu,
    Andi,
    Ori,
    Xori,
}

impl ImmOp {
    fn opcode(self) -> u32 {
        match self {
            ImmOp::Addiu => 0x09,
            ImmOp::Daddiu => 0x19,
            ImmOp::Andi => 0x0c,
            ImmOp::Ori => 0x0d,
            ImmOp::Xori => 0x0e,
        }
    }

    /// Whether the immediate is sign-extended (otherwise zero-extended)
    pub fn is_signed(self) -> bool {
        matches!(self, ImmOp::Addiu | ImmOp::Daddiu)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ImmOp::Addiu => "addiu",
            ImmOp::Daddiu => "daddiu",
            ImmOp::Andi => "andi",
            ImmOp::Ori => "ori",
            ImmOp::Xori => "xori",
        }
    }
}

/// Loads and stores with a base+offset address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemOp {
    Lw,
    Ld,
    Sw,
    Sd,
    Ll,
    Lld,
    Sc,
    Scd,
}

impl MemOp {
    fn opcode(self) -> u32 {
        match self {
            MemOp::Lw => 0x23,
            MemOp::Ld => 0x37,
            MemOp::Sw => 0x2b,
            MemOp::Sd => 0x3f,
            MemOp::Ll => 0x30,
            MemOp::Lld => 0x34,
            MemOp::Sc => 0x38,
            MemOp::Scd => 0x3c,
        }
    }

    fn from_opcode(op: u32) -> Option<Self> {
        Some(match op {
            0x23 => MemOp::Lw,
            0x37 => MemOp::Ld,
            0x2b => MemOp::Sw,
            0x3f => MemOp::Sd,
            0x30 => MemOp::Ll,
            0x34 => MemOp::Lld,
            0x38 => MemOp::Sc,
            0x3c => MemOp::Scd,
            _ => return None,
        })
    }

    pub fn is_doubleword(self) -> bool {
        matches!(self, MemOp::Ld | MemOp::Sd | MemOp::Lld | MemOp::Scd)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            MemOp::Lw => "lw",
            MemOp::Ld => "ld",
            MemOp::Sw => "sw",
            MemOp::Sd => "sd",
            MemOp::Ll => "ll",
            MemOp::Lld => "lld",
            MemOp::Sc => "sc",
            MemOp::Scd => "scd",
        }
    }
}

/// Indexed loads (`base + index`), Octeon II and later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexedOp {
    Lwx,
    Ldx,
}

impl IndexedOp {
    fn sa(self) -> u32 {
        match self {
            IndexedOp::Lwx => 0x00,
            IndexedOp::Ldx => 0x08,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            IndexedOp::Lwx => "lwx",
            IndexedOp::Ldx => "ldx",
        }
    }
}

/// Conditional branch forms with a 16-bit PC-relative offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCond {
    Eq,
    Ne,
    EqLikely,
    NeLikely,
    Ltz,
    Gez,
    GezLikely,
}

impl BranchCond {
    pub fn is_likely(self) -> bool {
        matches!(
            self,
            BranchCond::EqLikely | BranchCond::NeLikely | BranchCond::GezLikely
        )
    }

    fn uses_rt(self) -> bool {
        matches!(
            self,
            BranchCond::Eq | BranchCond::Ne | BranchCond::EqLikely | BranchCond::NeLikely
        )
    }
}

/// Coprocessor-0 moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cp0Op {
    Mfc0,
    Dmfc0,
    Mtc0,
    Dmtc0,
}

impl Cp0Op {
    fn rs(self) -> u32 {
        match self {
            Cp0Op::Mfc0 => 0,
            Cp0Op::Dmfc0 => 1,
            Cp0Op::Mtc0 => 4,
            Cp0Op::Dmtc0 => 5,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Cp0Op::Mfc0 => "mfc0",
            Cp0Op::Dmfc0 => "dmfc0",
            Cp0Op::Mtc0 => "mtc0",
            Cp0Op::Dmtc0 => "dmtc0",
        }
    }
}

/// TLB management and exception return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlbOp {
    Tlbr,
    Tlbwi,
    Tlbwr,
    Tlbp,
    Rfe,
    Eret,
}

impl TlbOp {
    fn funct(self) -> u32 {
        match self {
            TlbOp::Tlbr => 0x01,
            TlbOp::Tlbwi => 0x02,
            TlbOp::Tlbwr => 0x06,
            TlbOp::Tlbp => 0x08,
            TlbOp::Rfe => 0x10,
            TlbOp::Eret => 0x18,
        }
    }

    fn from_funct(funct: u32) -> Option<Self> {
        Some(match funct {
            0x01 => TlbOp::Tlbr,
            0x02 => TlbOp::Tlbwi,
            0x06 => TlbOp::Tlbwr,
            0x08 => TlbOp::Tlbp,
            0x10 => TlbOp::Rfe,
            0x18 => TlbOp::Eret,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            TlbOp::Tlbr => "tlbr",
            TlbOp::Tlbwi => "tlbwi",
            TlbOp::Tlbwr => "tlbwr",
            TlbOp::Tlbp => "tlbp",
            TlbOp::Rfe => "rfe",
            TlbOp::Eret => "eret",
        }
    }
}

/// One decoded MIPS instruction.
///
/// Branch offsets are counted in instructions relative to the delay slot,
/// which is exactly the value stored in the 16-bit offset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Insn {
    Nop,
    Ssnop,
    Ehb,
    Alu { op: AluOp, rd: Reg, rs: Reg, rt: Reg },
    Shift { op: ShiftOp, rd: Reg, rt: Reg, sa: u8 },
    Imm { op: ImmOp, rt: Reg, rs: Reg, imm: i32 },
    Lui { rt: Reg, imm: i32 },
    Mem { op: MemOp, rt: Reg, base: Reg, offset: i32 },
    Indexed { op: IndexedOp, rd: Reg, index: Reg, base: Reg },
    Branch { cond: BranchCond, rs: Reg, rt: Reg, offset: i32 },
    BitBranch { set: bool, rs: Reg, bit: u8, offset: i32 },
    Jump { target: u32 },
    Jr { rs: Reg },
    Cp0 { op: Cp0Op, rt: Reg, reg: Cp0Reg },
    Tlb(TlbOp),
}

const OP_SPECIAL: u32 = 0x00;
const OP_REGIMM: u32 = 0x01;
const OP_J: u32 = 0x02;
const OP_BEQ: u32 = 0x04;
const OP_BNE: u32 = 0x05;
const OP_LUI: u32 = 0x0f;
const OP_COP0: u32 = 0x10;
const OP_BEQL: u32 = 0x14;
const OP_BNEL: u32 = 0x15;
const OP_SPECIAL3: u32 = 0x1f;
const OP_BBIT0: u32 = 0x32;
const OP_BBIT032: u32 = 0x36;
const OP_BBIT1: u32 = 0x3a;
const OP_BBIT132: u32 = 0x3e;

const FUNCT_JR: u32 = 0x08;
const FUNCT_LX: u32 = 0x0a;

fn reg_field(r: Reg) -> u32 {
    r.index() as u32
}

fn check(
    mnemonic: &'static str,
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
) -> Result<i64, EncodeError> {
    if value < min || value > max {
        return Err(EncodeError {
            mnemonic,
            field,
            value,
        });
    }
    Ok(value)
}

fn simm16(mnemonic: &'static str, field: &'static str, value: i32) -> Result<u32, EncodeError> {
    let v = check(mnemonic, field, value as i64, -0x8000, 0x7fff)?;
    Ok((v as u32) & 0xffff)
}

fn uimm16(mnemonic: &'static str, field: &'static str, value: i32) -> Result<u32, EncodeError> {
    Ok(check(mnemonic, field, value as i64, 0, 0xffff)? as u32)
}

impl Insn {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Insn::Nop => "nop",
            Insn::Ssnop => "ssnop",
            Insn::Ehb => "ehb",
            Insn::Alu { op, .. } => op.mnemonic(),
            Insn::Shift { op, .. } => op.mnemonic(),
            Insn::Imm { op, .. } => op.mnemonic(),
            Insn::Lui { .. } => "lui",
            Insn::Mem { op, .. } => op.mnemonic(),
            Insn::Indexed { op, .. } => op.mnemonic(),
            Insn::Branch { cond, .. } => match cond {
                BranchCond::Eq => "beq",
                BranchCond::Ne => "bne",
                BranchCond::EqLikely => "beql",
                BranchCond::NeLikely => "bnel",
                BranchCond::Ltz => "bltz",
                BranchCond::Gez => "bgez",
                BranchCond::GezLikely => "bgezl",
            },
            Insn::BitBranch { set: false, bit, .. } if *bit >= 32 => "bbit032",
            Insn::BitBranch { set: false, .. } => "bbit0",
            Insn::BitBranch { set: true, bit, .. } if *bit >= 32 => "bbit132",
            Insn::BitBranch { set: true, .. } => "bbit1",
            Insn::Jump { .. } => "j",
            Insn::Jr { .. } => "jr",
            Insn::Cp0 { op, .. } => op.mnemonic(),
            Insn::Tlb(op) => op.mnemonic(),
        }
    }

    /// Encode into the 32-bit instruction word.
    pub fn encode(&self) -> Result<u32, EncodeError> {
        let mn = self.mnemonic();
        let word = match *self {
            Insn::Nop => 0,
            Insn::Ssnop => 1 << 6,
            Insn::Ehb => 3 << 6,
            Insn::Alu { op, rd, rs, rt } => {
                (OP_SPECIAL << 26)
                    | (reg_field(rs) << 21)
                    | (reg_field(rt) << 16)
                    | (reg_field(rd) << 11)
                    | op.funct()
            }
            Insn::Shift { op, rd, rt, sa } => {
                let sa = check(mn, "sa", sa as i64, 0, 31)? as u32;
                let (funct, rs) = op.fields();
                (OP_SPECIAL << 26)
                    | (rs << 21)
                    | (reg_field(rt) << 16)
                    | (reg_field(rd) << 11)
                    | (sa << 6)
                    | funct
            }
            Insn::Imm { op, rt, rs, imm } => {
                let imm = if op.is_signed() {
                    simm16(mn, "imm", imm)?
                } else {
                    uimm16(mn, "imm", imm)?
                };
                (op.opcode() << 26) | (reg_field(rs) << 21) | (reg_field(rt) << 16) | imm
            }
            Insn::Lui { rt, imm } => (OP_LUI << 26) | (reg_field(rt) << 16) | uimm16(mn, "imm", imm)?,
            Insn::Mem {
                op,
                rt,
                base,
                offset,
            } => {
                (op.opcode() << 26)
                    | (reg_field(base) << 21)
                    | (reg_field(rt) << 16)
                    | simm16(mn, "offset", offset)?
            }
            Insn::Indexed {
                op,
                rd,
                index,
                base,
            } => {
                (OP_SPECIAL3 << 26)
                    | (reg_field(base) << 21)
                    | (reg_field(index) << 16)
                    | (reg_field(rd) << 11)
                    | (op.sa() << 6)
                    | FUNCT_LX
            }
            Insn::Branch {
                cond,
                rs,
                rt,
                offset,
            } => {
                let off = simm16(mn, "offset", offset)?;
                let (op, rt_field) = match cond {
                    BranchCond::Eq => (OP_BEQ, reg_field(rt)),
                    BranchCond::Ne => (OP_BNE, reg_field(rt)),
                    BranchCond::EqLikely => (OP_BEQL, reg_field(rt)),
                    BranchCond::NeLikely => (OP_BNEL, reg_field(rt)),
                    BranchCond::Ltz => (OP_REGIMM, 0x00),
                    BranchCond::Gez => (OP_REGIMM, 0x01),
                    BranchCond::GezLikely => (OP_REGIMM, 0x03),
                };
                (op << 26) | (reg_field(rs) << 21) | (rt_field << 16) | off
            }
            Insn::BitBranch {
                set,
                rs,
                bit,
                offset,
            } => {
                let bit = check(mn, "bit", bit as i64, 0, 63)? as u32;
                let op = match (set, bit >= 32) {
                    (false, false) => OP_BBIT0,
                    (false, true) => OP_BBIT032,
                    (true, false) => OP_BBIT1,
                    (true, true) => OP_BBIT132,
                };
                (op << 26) | (reg_field(rs) << 21) | ((bit & 31) << 16) | simm16(mn, "offset", offset)?
            }
            Insn::Jump { target } => {
                (OP_J << 26) | check(mn, "target", target as i64, 0, 0x03ff_ffff)? as u32
            }
            Insn::Jr { rs } => (OP_SPECIAL << 26) | (reg_field(rs) << 21) | FUNCT_JR,
            Insn::Cp0 { op, rt, reg } => {
                let rd = check(mn, "cp0 register", reg.reg as i64, 0, 31)? as u32;
                let sel = check(mn, "select", reg.sel as i64, 0, 7)? as u32;
                (OP_COP0 << 26) | (op.rs() << 21) | (reg_field(rt) << 16) | (rd << 11) | sel
            }
            Insn::Tlb(op) => (OP_COP0 << 26) | (1 << 25) | op.funct(),
        };
        Ok(word)
    }

    /// Decode a 32-bit word; `None` for anything outside the supported repertoire.
    pub fn decode(word: u32) -> Option<Insn> {
        let op = word >> 26;
        let rs_f = (word >> 21) & 0x1f;
        let rt_f = (word >> 16) & 0x1f;
        let rd_f = (word >> 11) & 0x1f;
        let sa = (word >> 6) & 0x1f;
        let funct = word & 0x3f;
        let simm = (word & 0xffff) as u16 as i16 as i32;
        let uimm = (word & 0xffff) as i32;
        let rs = Reg::new(rs_f as u8)?;
        let rt = Reg::new(rt_f as u8)?;
        let rd = Reg::new(rd_f as u8)?;

        let insn = match op {
            OP_SPECIAL => match word {
                0 => Insn::Nop,
                0x40 => Insn::Ssnop,
                0xc0 => Insn::Ehb,
                _ => {
                    if funct == FUNCT_JR && rt_f == 0 && rd_f == 0 && sa == 0 {
                        Insn::Jr { rs }
                    } else if let Some(op) = AluOp::from_funct(funct) {
                        if sa != 0 {
                            return None;
                        }
                        Insn::Alu { op, rd, rs, rt }
                    } else {
                        let op = ShiftOp::from_fields(funct, rs_f)?;
                        Insn::Shift {
                            op,
                            rd,
                            rt,
                            sa: sa as u8,
                        }
                    }
                }
            },
            OP_REGIMM => {
                let cond = match rt_f {
                    0x00 => BranchCond::Ltz,
                    0x01 => BranchCond::Gez,
                    0x03 => BranchCond::GezLikely,
                    _ => return None,
                };
                Insn::Branch {
                    cond,
                    rs,
                    rt: Reg::ZERO,
                    offset: simm,
                }
            }
            OP_J => Insn::Jump {
                target: word & 0x03ff_ffff,
            },
            OP_BEQ | OP_BNE | OP_BEQL | OP_BNEL => {
                let cond = match op {
                    OP_BEQ => BranchCond::Eq,
                    OP_BNE => BranchCond::Ne,
                    OP_BEQL => BranchCond::EqLikely,
                    _ => BranchCond::NeLikely,
                };
                Insn::Branch {
                    cond,
                    rs,
                    rt,
                    offset: simm,
                }
            }
            0x09 | 0x19 | 0x0c | 0x0d | 0x0e => {
                let op = match op {
                    0x09 => ImmOp::Addiu,
                    0x19 => ImmOp::Daddiu,
                    0x0c => ImmOp::Andi,
                    0x0d => ImmOp::Ori,
                    _ => ImmOp::Xori,
                };
                let imm = if op.is_signed() { simm } else { uimm };
                Insn::Imm { op, rt, rs, imm }
            }
            OP_LUI if rs_f == 0 => Insn::Lui { rt, imm: uimm },
            OP_COP0 => {
                if word & (1 << 25) != 0 {
                    if word & 0x01ff_ffc0 != 0 {
                        return None;
                    }
                    Insn::Tlb(TlbOp::from_funct(funct)?)
                } else {
                    if word & 0x7f8 != 0 {
                        return None;
                    }
                    let op = match rs_f {
                        0 => Cp0Op::Mfc0,
                        1 => Cp0Op::Dmfc0,
                        4 => Cp0Op::Mtc0,
                        5 => Cp0Op::Dmtc0,
                        _ => return None,
                    };
                    Insn::Cp0 {
                        op,
                        rt,
                        reg: Cp0Reg::new(rd_f as u8, (word & 7) as u8),
                    }
                }
            }
            OP_SPECIAL3 if funct == FUNCT_LX => {
                let op = match sa {
                    0x00 => IndexedOp::Lwx,
                    0x08 => IndexedOp::Ldx,
                    _ => return None,
                };
                Insn::Indexed {
                    op,
                    rd,
                    index: rt,
                    base: rs,
                }
            }
            OP_BBIT0 | OP_BBIT032 | OP_BBIT1 | OP_BBIT132 => Insn::BitBranch {
                set: op & 0x08 != 0,
                rs,
                bit: (rt_f + if op & 0x04 != 0 { 32 } else { 0 }) as u8,
                offset: simm,
            },
            _ => Insn::Mem {
                op: MemOp::from_opcode(op)?,
                rt,
                base: rs,
                offset: simm,
            },
        };
        Some(insn)
    }

    /// Branches and jumps execute the following instruction before transferring.
    pub fn has_delay_slot(&self) -> bool {
        matches!(
            self,
            Insn::Branch { .. } | Insn::BitBranch { .. } | Insn::Jump { .. } | Insn::Jr { .. }
        )
    }

    /// PC-relative offset in instructions, for the 16-bit branch forms.
    pub fn branch_offset(&self) -> Option<i32> {
        match self {
            Insn::Branch { offset, .. } | Insn::BitBranch { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// The same branch retargeted to `offset`; other instructions are returned unchanged.
    pub fn with_branch_offset(self, new_offset: i32) -> Insn {
        match self {
            Insn::Branch { cond, rs, rt, .. } => Insn::Branch {
                cond,
                rs,
                rt,
                offset: new_offset,
            },
            Insn::BitBranch { set, rs, bit, .. } => Insn::BitBranch {
                set,
                rs,
                bit,
                offset: new_offset,
            },
            other => other,
        }
    }

    /// Render with branch and jump targets resolved against `pc` when known.
    pub fn render(&self, pc: Option<u64>) -> String {
        let target = |offset: i32| match pc {
            Some(pc) => format!("{:#x}", pc.wrapping_add(4).wrapping_add((offset as i64 * 4) as u64)),
            None => format!(".{:+}", (offset + 1) * 4),
        };
        match *self {
            Insn::Nop | Insn::Ssnop | Insn::Ehb | Insn::Tlb(_) => self.mnemonic().to_string(),
            Insn::Alu { op, rd, rs, rt } => {
                if op == AluOp::Or && rt == Reg::ZERO {
                    format!("move\t{}, {}", rd, rs)
                } else {
                    format!("{}\t{}, {}, {}", op.mnemonic(), rd, rs, rt)
                }
            }
            Insn::Shift { op, rd, rt, sa } => format!("{}\t{}, {}, {}", op.mnemonic(), rd, rt, sa),
            Insn::Imm { op, rt, rs, imm } => {
                if op.is_signed() {
                    format!("{}\t{}, {}, {}", op.mnemonic(), rt, rs, imm)
                } else {
                    format!("{}\t{}, {}, {:#x}", op.mnemonic(), rt, rs, imm)
                }
            }
            Insn::Lui { rt, imm } => format!("lui\t{}, {:#x}", rt, imm),
            Insn::Mem {
                op,
                rt,
                base,
                offset,
            } => format!("{}\t{}, {}({})", op.mnemonic(), rt, offset, base),
            Insn::Indexed {
                op,
                rd,
                index,
                base,
            } => format!("{}\t{}, {}({})", op.mnemonic(), rd, index, base),
            Insn::Branch {
                cond,
                rs,
                rt,
                offset,
            } => match cond {
                BranchCond::Eq if rs == Reg::ZERO && rt == Reg::ZERO => {
                    format!("b\t{}", target(offset))
                }
                BranchCond::Eq if rt == Reg::ZERO => format!("beqz\t{}, {}", rs, target(offset)),
                BranchCond::Ne if rt == Reg::ZERO => format!("bnez\t{}, {}", rs, target(offset)),
                BranchCond::EqLikely if rt == Reg::ZERO => {
                    format!("beqzl\t{}, {}", rs, target(offset))
                }
                c if c.uses_rt() => {
                    format!("{}\t{}, {}, {}", self.mnemonic(), rs, rt, target(offset))
                }
                _ => format!("{}\t{}, {}", self.mnemonic(), rs, target(offset)),
            },
            Insn::BitBranch {
                rs, bit, offset, ..
            } => format!("{}\t{}, {}, {}", self.mnemonic(), rs, bit & 31, target(offset)),
            Insn::Jump { target: t } => match pc {
                Some(pc) => format!(
                    "j\t{:#x}",
                    (pc.wrapping_add(4) & !0x0fff_ffff) | ((t as u64) << 2)
                ),
                None => format!("j\t{:#x}", (t as u64) << 2),
            },
            Insn::Jr { rs } => format!("jr\t{}", rs),
            Insn::Cp0 { op, rt, reg } => format!("{}\t{}, {}", op.mnemonic(), rt, reg),
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(insn: Insn) -> u32 {
        insn.encode().unwrap()
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(enc(Insn::Nop), 0x0000_0000);
        assert_eq!(enc(Insn::Ehb), 0x0000_00c0);
        assert_eq!(enc(Insn::Tlb(TlbOp::Eret)), 0x4200_0018);
        assert_eq!(enc(Insn::Tlb(TlbOp::Tlbwr)), 0x4200_0006);
        assert_eq!(enc(Insn::Tlb(TlbOp::Tlbp)), 0x4200_0008);
        // mfc0 k0, c0_badvaddr
        assert_eq!(
            enc(Insn::Cp0 {
                op: Cp0Op::Mfc0,
                rt: Reg::K0,
                reg: Cp0Reg::BADVADDR
            }),
            0x401a_4000
        );
        // lw k1, 0(k1)
        assert_eq!(
            enc(Insn::Mem {
                op: MemOp::Lw,
                rt: Reg::K1,
                base: Reg::K1,
                offset: 0
            }),
            0x8f7b_0000
        );
        // srl k0, k0, 22
        assert_eq!(
            enc(Insn::Shift {
                op: ShiftOp::Srl,
                rd: Reg::K0,
                rt: Reg::K0,
                sa: 22
            }),
            0x001a_d582
        );
        // jr k1
        assert_eq!(enc(Insn::Jr { rs: Reg::K1 }), 0x0360_0008);
    }

    #[test]
    fn test_field_overflow_is_rejected() {
        let err = Insn::Imm {
            op: ImmOp::Andi,
            rt: Reg::K0,
            rs: Reg::K0,
            imm: 0x1_0000,
        }
        .encode()
        .unwrap_err();
        assert_eq!(err.mnemonic, "andi");
        assert_eq!(err.field, "imm");

        assert!(Insn::Imm {
            op: ImmOp::Addiu,
            rt: Reg::K0,
            rs: Reg::K0,
            imm: -0x8000,
        }
        .encode()
        .is_ok());
        assert!(Insn::Shift {
            op: ShiftOp::Dsrl,
            rd: Reg::K0,
            rt: Reg::K0,
            sa: 32,
        }
        .encode()
        .is_err());
        assert!(Insn::Branch {
            cond: BranchCond::Ne,
            rs: Reg::K0,
            rt: Reg::ZERO,
            offset: 0x8000,
        }
        .encode()
        .is_err());
    }

    #[test]
    fn test_decode_inverts_encode_for_handler_repertoire() {
        let samples = [
            Insn::Ssnop,
            Insn::Alu {
                op: AluOp::Daddu,
                rd: Reg::K1,
                rs: Reg::K1,
                rt: Reg::K0,
            },
            Insn::Shift {
                op: ShiftOp::Drotr,
                rd: Reg::K0,
                rt: Reg::K0,
                sa: 2,
            },
            Insn::Imm {
                op: ImmOp::Daddiu,
                rt: Reg::K0,
                rs: Reg::K0,
                imm: -8,
            },
            Insn::Lui {
                rt: Reg::K1,
                imm: 0x8040,
            },
            Insn::Indexed {
                op: IndexedOp::Ldx,
                rd: Reg::AT,
                index: Reg::K0,
                base: Reg::K1,
            },
            Insn::Branch {
                cond: BranchCond::GezLikely,
                rs: Reg::ZERO,
                rt: Reg::ZERO,
                offset: 1,
            },
            Insn::BitBranch {
                set: true,
                rs: Reg::K0,
                bit: 36,
                offset: -4,
            },
            Insn::Jump { target: 0x20_0040 },
            Insn::Cp0 {
                op: Cp0Op::Dmtc0,
                rt: Reg::AT,
                reg: Cp0Reg::kscratch(2),
            },
            Insn::Tlb(TlbOp::Rfe),
        ];
        for insn in samples {
            assert_eq!(Insn::decode(enc(insn)), Some(insn), "{}", insn);
        }
    }

    #[test]
    fn test_render_pseudo_ops() {
        let b = Insn::Branch {
            cond: BranchCond::Eq,
            rs: Reg::ZERO,
            rt: Reg::ZERO,
            offset: 3,
        };
        assert_eq!(b.render(Some(0x8000_0000)), "b\t0x80000010");
        let bnez = Insn::Branch {
            cond: BranchCond::Ne,
            rs: Reg::K0,
            rt: Reg::ZERO,
            offset: -1,
        };
        assert_eq!(bnez.to_string(), "bnez\tk0, .+0");
    }
}

//! MIPS instruction-set layer
//!
//! Register identifiers, the [`Insn`] sum type covering the instructions the TLB
//! handlers are built from, and the fixed-width 32-bit encoder/decoder.
//!
//! # Register Usage in Synthesized Handlers
//!
//! | Register | Role |
//! |----------|------|
//! | `k0` ($26) | work register 1 (kernel reserved) |
//! | `k1` ($27) | work register 2 (kernel reserved) |
//! | `at` ($1)  | third work register, saved to KScratch or the save area |
//! | `v0` ($2)  | fourth register, only with the memory save area |

mod insn;

pub use insn::{
    AluOp, BranchCond, Cp0Op, EncodeError, ImmOp, IndexedOp, Insn, MemOp, ShiftOp, TlbOp,
};

use std::fmt;

/// A general-purpose register ($0-$31)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    pub const ZERO: Reg = Reg(0);
    pub const AT: Reg = Reg(1);
    pub const V0: Reg = Reg(2);
    pub const V1: Reg = Reg(3);
    pub const A0: Reg = Reg(4);
    pub const T0: Reg = Reg(8);
    pub const K0: Reg = Reg(26);
    pub const K1: Reg = Reg(27);
    pub const GP: Reg = Reg(28);
    pub const SP: Reg = Reg(29);
    pub const RA: Reg = Reg(31);

    /// Create a register from its number; `None` above $31.
    pub const fn new(index: u8) -> Option<Reg> {
        if index < 32 {
            Some(Reg(index))
        } else {
            None
        }
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    /// o32 ABI name
    pub fn name(self) -> &'static str {
        const NAMES: [&str; 32] = [
            "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5",
            "t6", "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1",
            "gp", "sp", "fp", "ra",
        ];
        NAMES[self.0 as usize]
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A coprocessor-0 register with its select field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cp0Reg {
    pub reg: u8,
    pub sel: u8,
}

impl Cp0Reg {
    pub const INDEX: Cp0Reg = Cp0Reg::new(0, 0);
    pub const ENTRYLO0: Cp0Reg = Cp0Reg::new(2, 0);
    pub const ENTRYLO1: Cp0Reg = Cp0Reg::new(3, 0);
    pub const CONTEXT: Cp0Reg = Cp0Reg::new(4, 0);
    pub const PAGEMASK: Cp0Reg = Cp0Reg::new(5, 0);
    pub const BADVADDR: Cp0Reg = Cp0Reg::new(8, 0);
    pub const ENTRYHI: Cp0Reg = Cp0Reg::new(10, 0);
    pub const STATUS: Cp0Reg = Cp0Reg::new(12, 0);
    pub const EPC: Cp0Reg = Cp0Reg::new(14, 0);
    pub const XCONTEXT: Cp0Reg = Cp0Reg::new(20, 0);

    /// CP0 register number of the KScratch bank
    pub const KSCRATCH_REG: u8 = 31;

    pub const fn new(reg: u8, sel: u8) -> Self {
        Self { reg, sel }
    }

    /// KScratch register `sel` (2..=7 on Release 2+ cores)
    pub const fn kscratch(sel: u8) -> Self {
        Self::new(Self::KSCRATCH_REG, sel)
    }

    pub fn name(&self) -> String {
        let base = match (self.reg, self.sel) {
            (0, 0) => "c0_index",
            (2, 0) => "c0_entrylo0",
            (3, 0) => "c0_entrylo1",
            (4, 0) => "c0_context",
            (5, 0) => "c0_pagemask",
            (8, 0) => "c0_badvaddr",
            (10, 0) => "c0_entryhi",
            (12, 0) => "c0_status",
            (14, 0) => "c0_epc",
            (20, 0) => "c0_xcontext",
            (31, sel) if sel >= 2 => return format!("c0_kscratch{}", sel - 1),
            _ => return format!("${},{}", self.reg, self.sel),
        };
        base.to_string()
    }
}

impl fmt::Display for Cp0Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_bounds() {
        assert_eq!(Reg::new(26), Some(Reg::K0));
        assert_eq!(Reg::new(32), None);
        assert_eq!(Reg::K1.name(), "k1");
        assert_eq!(Reg::ZERO.to_string(), "zero");
    }

    #[test]
    fn test_cp0_names() {
        assert_eq!(Cp0Reg::BADVADDR.name(), "c0_badvaddr");
        assert_eq!(Cp0Reg::kscratch(2).name(), "c0_kscratch1");
        assert_eq!(Cp0Reg::new(16, 1).name(), "$16,1");
    }
}

//! Synthesis error taxonomy
//!
//! Every variant is fatal at boot: nothing downstream can substitute for a
//! malformed fault handler. The messages name the routine and the check that
//! failed so the halt diagnostic is actionable.

use crate::asm::LabelId;
use crate::cpu::CpuType;
use crate::isa::EncodeError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthError {
    #[error("{routine}: instruction {index} cannot be encoded: {source}")]
    Encoding {
        routine: &'static str,
        index: usize,
        source: EncodeError,
    },

    #[error("{routine}: label {label} defined twice")]
    DuplicateLabel {
        routine: &'static str,
        label: LabelId,
    },

    #[error("{routine}: relocation at {index} refers to undefined label {label}")]
    UnresolvedRelocation {
        routine: &'static str,
        index: usize,
        label: LabelId,
    },

    #[error("{routine}: {what} {label} was never copied into the final image")]
    Unplaced {
        routine: &'static str,
        what: &'static str,
        label: LabelId,
    },

    #[error("{routine}: branch at {index} to {label} out of range (offset {offset})")]
    BranchOutOfRange {
        routine: &'static str,
        index: usize,
        label: LabelId,
        offset: i64,
    },

    #[error("{routine}: jump at {index} to {target:#x} leaves the 256MB segment")]
    JumpOutOfSegment {
        routine: &'static str,
        index: usize,
        target: u64,
    },

    #[error("{routine}: handler space exceeded ({len} instructions, limit {capacity})")]
    CapacityExceeded {
        routine: &'static str,
        len: usize,
        capacity: usize,
    },

    #[error("{routine}: no TLB write sequence for CPU type {cpu}")]
    UnsupportedCpu { routine: &'static str, cpu: CpuType },

    #[error("{routine}: more than {limit} TLB write hazard labels requested")]
    HazardSlotsExhausted { routine: &'static str, limit: usize },

    #[error("{routine}: address {address:#x} is outside the 32-bit compatibility space")]
    SymbolOutOfRange { routine: &'static str, address: u64 },

    #[error("{routine}: split label {label} not found while folding the handler")]
    MissingSplitLabel {
        routine: &'static str,
        label: LabelId,
    },

    #[error("cannot install {words} words at {address:#x}: {reason}")]
    Install {
        address: u64,
        words: usize,
        reason: &'static str,
    },

    #[error("invalid target configuration: {0}")]
    Config(String),
}

pub type SynthResult<T> = Result<T, SynthError>;

//! Micro-assembler
//!
//! Emission into fixed-capacity buffers, label/relocation bookkeeping and the
//! single resolution pass that turns an emitted buffer into a [`ResolvedRoutine`].

mod buffer;
mod emit;
mod labels;

pub use buffer::{Area, CodeBuffer, Loc};
pub use emit::{in_compat_space, rel_hi, rel_lo, Emitter, Width};
pub use labels::{BranchKind, HazardSlot, LabelId, Patch, RelocTable, ResolvedRoutine};

//! Refill folding for 64-bit kernels
//!
//! The 64-bit refill vector gives a handler 32 instructions at `ebase + 0x80`,
//! but the 32 words at `ebase + 0x000` (the unused 32-bit vector) are free as
//! well. A refill that does not fit in the first region is split: the head
//! stays at 0x80, the rest moves to 0x000 and a branch joins the two.
//!
//! The split point is the first out-of-line section (huge-page update, or the
//! vmalloc tail) when both halves fit that way; otherwise a fixed point is
//! chosen and a trampoline `b split` is inserted, whose delay slot is filled
//! with the next instruction when that instruction is not itself a branch.

use crate::asm::{Area, BranchKind, CodeBuffer, LabelId, Loc, RelocTable, ResolvedRoutine};
use crate::error::{SynthError, SynthResult};
use crate::isa::{BranchCond, Insn, Reg};
use log::debug;

/// Instructions per refill vector region.
pub const REFILL_REGION_INSNS: usize = 32;

/// Result of folding, with enough bookkeeping to map scratch positions to
/// their final place.
#[derive(Debug, Clone)]
pub struct FoldedRefill {
    pub routine: ResolvedRoutine,
    /// Instructions actually placed, trampoline included
    pub insns: usize,
    /// Scratch index at which the part placed at `ebase + 0` begins
    pub split: Option<usize>,
    /// A `b split` trampoline was inserted
    pub trampoline: bool,
    /// Scratch index copied into the trampoline's delay slot
    pub delay_copied: Option<usize>,
    placement: Vec<usize>,
}

impl FoldedRefill {
    /// Final image index of the scratch instruction at `index`.
    pub fn placement(&self, index: usize) -> Option<usize> {
        self.placement.get(index).copied()
    }
}

fn store_insn(
    image: &mut CodeBuffer,
    routine: &'static str,
    index: usize,
    insn: Insn,
) -> SynthResult<()> {
    let word = insn.encode().map_err(|source| SynthError::Encoding {
        routine,
        index,
        source,
    })?;
    image.store(routine, index, word)
}

/// Fold a refill built in the scratch area into the two-region image at `ebase`.
pub fn fold_refill(
    scratch: &CodeBuffer,
    mut relocs: RelocTable,
    split_label: LabelId,
    ebase: u64,
) -> SynthResult<FoldedRefill> {
    let routine = relocs.routine();
    let region = REFILL_REGION_INSNS;
    scratch.verify(routine)?;
    let len = scratch.len();

    let tight = len > 2 * region - 3 && relocs.has_delay_slot_at(scratch, region - 3);
    if len > 2 * region - 1 || tight {
        return Err(SynthError::CapacityExceeded {
            routine,
            len,
            capacity: 2 * region,
        });
    }

    let mut image = CodeBuffer::new(Area::Final, 2 * region);
    let mut placement = vec![0; len];
    let mut split_at = None;
    let mut trampoline = false;
    let mut delay_copied = None;
    let insns;

    if len <= region {
        relocs.copy_and_relabel(scratch, 0..len, &mut image, region)?;
        for (i, slot) in placement.iter_mut().enumerate() {
            *slot = region + i;
        }
        insns = len;
        debug!("{}: {} instructions, no split needed", routine, len);
    } else {
        let mut split = relocs
            .label(split_label)
            .filter(|loc| loc.area == Area::Scratch)
            .ok_or(SynthError::MissingSplitLabel {
                routine,
                label: split_label,
            })?
            .index;

        let overlap = split > region || split < len - region;
        if overlap {
            split = relocs.safe_split(scratch, region - 2);
        }

        relocs.copy_and_relabel(scratch, 0..split, &mut image, region)?;
        for (i, slot) in placement.iter_mut().enumerate().take(split) {
            *slot = region + i;
        }
        let mut head_end = region + split;

        if overlap {
            relocs.record_label(LabelId::Split, Loc::new(Area::Final, 0))?;
            let branch = Insn::Branch {
                cond: BranchCond::Eq,
                rs: Reg::ZERO,
                rt: Reg::ZERO,
                offset: 0,
            };
            store_insn(&mut image, routine, head_end, branch)?;
            relocs.record_relocation(
                LabelId::Split,
                Loc::new(Area::Final, head_end),
                BranchKind::Pc16,
            );
            head_end += 1;

            if relocs.has_delay_slot_at(scratch, split) {
                store_insn(&mut image, routine, head_end, Insn::Nop)?;
            } else {
                relocs.copy_and_relabel(scratch, split..split + 1, &mut image, head_end)?;
                // A label on the moved instruction now names the trampoline.
                relocs.move_labels(Area::Final, head_end..head_end + 1, -1);
                placement[split] = head_end;
                delay_copied = Some(split);
                split += 1;
            }
            head_end += 1;
            trampoline = true;
        }

        let rest = len - split;
        if rest > region {
            return Err(SynthError::CapacityExceeded {
                routine,
                len,
                capacity: 2 * region,
            });
        }
        relocs.copy_and_relabel(scratch, split..len, &mut image, 0)?;
        for (i, slot) in placement.iter_mut().enumerate().skip(split) {
            *slot = i - split;
        }
        insns = (head_end - region) + rest;
        split_at = Some(split);
        debug!(
            "{}: split at {} ({} + {} instructions{})",
            routine,
            split,
            head_end - region,
            rest,
            if trampoline { ", trampoline" } else { "" }
        );
    }

    image.pad_to(2 * region);
    let routine = relocs.resolve_all(image, ebase)?;
    Ok(FoldedRefill {
        routine,
        insns,
        split: split_at,
        trampoline,
        delay_copied,
        placement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{Emitter, Width};

    fn body(e: &mut Emitter, before: usize, after: usize) {
        e.il_bltz(Reg::K0, LabelId::Vmalloc);
        e.nop();
        for _ in 0..before {
            e.ssnop();
        }
        e.label(LabelId::VmallocDone).unwrap();
        e.eret();
        e.label(LabelId::Vmalloc).unwrap();
        for _ in 0..after {
            e.ssnop();
        }
        e.il_b(LabelId::VmallocDone);
        e.nop();
    }

    #[test]
    fn test_short_refill_goes_to_the_xtlb_vector() {
        let mut e = Emitter::new("refill", Area::Scratch, 128, Width::Bits64);
        body(&mut e, 4, 2);
        let (buf, relocs) = e.into_parts();
        let folded = fold_refill(&buf, relocs, LabelId::Vmalloc, 0x8000_0000).unwrap();
        assert_eq!(folded.split, None);
        assert_eq!(folded.routine.len(), 64);
        assert_eq!(folded.routine.label(LabelId::Vmalloc), Some(32 + 7));
        assert_eq!(folded.placement(0), Some(32));
    }

    #[test]
    fn test_split_at_label_without_trampoline() {
        let mut e = Emitter::new("refill", Area::Scratch, 128, Width::Bits64);
        body(&mut e, 25, 10);
        let (buf, relocs) = e.into_parts();
        let folded = fold_refill(&buf, relocs, LabelId::Vmalloc, 0x8000_0000).unwrap();
        assert_eq!(folded.split, Some(28));
        assert!(!folded.trampoline);
        assert_eq!(folded.routine.label(LabelId::Vmalloc), Some(0));
        // bltz at 32 reaches index 0: offset is relative to the delay slot.
        assert_eq!(folded.routine.insn_at(32).unwrap().branch_offset(), Some(-33));
    }

    #[test]
    fn test_trampoline_when_label_is_too_late() {
        let mut e = Emitter::new("refill", Area::Scratch, 128, Width::Bits64);
        body(&mut e, 40, 2);
        let (buf, relocs) = e.into_parts();
        let len = buf.len();
        let folded = fold_refill(&buf, relocs, LabelId::Vmalloc, 0x8000_0000).unwrap();
        assert!(folded.trampoline);
        assert_eq!(folded.delay_copied, Some(30));
        assert_eq!(folded.split, Some(31));
        assert_eq!(folded.insns, len + 1);
        assert_eq!(folded.routine.insn_at(62).unwrap().branch_offset(), Some(-63));
        assert_eq!(folded.routine.label(LabelId::Split), Some(0));
    }

    #[test]
    fn test_trampoline_keeps_raw_jr_with_its_delay_slot() {
        let mut e = Emitter::new("refill", Area::Scratch, 128, Width::Bits64);
        e.il_bltz(Reg::K0, LabelId::Vmalloc);
        e.nop();
        for _ in 0..27 {
            e.ssnop();
        }
        // Unrecorded jump at 29, delay slot at 30.
        e.jr(Reg::K1);
        e.nop();
        for _ in 0..10 {
            e.ssnop();
        }
        e.label(LabelId::VmallocDone).unwrap();
        e.eret();
        e.label(LabelId::Vmalloc).unwrap();
        e.ssnop();
        e.ssnop();
        e.il_b(LabelId::VmallocDone);
        e.nop();
        let (buf, relocs) = e.into_parts();
        assert_eq!(buf.len(), 46);

        let folded = fold_refill(&buf, relocs, LabelId::Vmalloc, 0x8000_0000).unwrap();
        assert!(folded.trampoline);
        assert_eq!(folded.split, Some(29));
        assert_eq!(folded.delay_copied, None);
        assert_eq!(folded.routine.insn_at(0), Some(Insn::Jr { rs: Reg::K1 }));
        assert_eq!(folded.routine.insn_at(1), Some(Insn::Nop));
        assert_eq!(folded.routine.insn_at(61).unwrap().branch_offset(), Some(-62));
        assert_eq!(folded.routine.insn_at(62), Some(Insn::Nop));
        assert_eq!(folded.placement(29), Some(0));
    }

    #[test]
    fn test_oversized_refill_is_rejected() {
        let mut e = Emitter::new("refill", Area::Scratch, 128, Width::Bits64);
        body(&mut e, 70, 2);
        let (buf, relocs) = e.into_parts();
        assert!(matches!(
            fold_refill(&buf, relocs, LabelId::Vmalloc, 0x8000_0000),
            Err(SynthError::CapacityExceeded { .. })
        ));
    }
}

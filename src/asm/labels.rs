//! Labels, relocations and their resolution
//!
//! Branches are frequently emitted before the code they jump to, so each branch
//! records a relocation against a [`LabelId`] and the offset is patched once the
//! whole routine is laid out. Resolution consumes the table and the buffer and
//! yields a [`ResolvedRoutine`], which has no way back to a patchable state.

use super::buffer::{Area, CodeBuffer, Loc};
use crate::error::{SynthError, SynthResult};
use crate::isa::Insn;
use std::fmt;
use std::ops::Range;

/// Index into the repeatable TLB-write hazard label family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HazardSlot(u8);

impl HazardSlot {
    pub const COUNT: usize = 8;

    pub fn new(index: usize) -> Option<Self> {
        if index < Self::COUNT {
            Some(HazardSlot(index as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Named code positions used by the handler fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelId {
    SecondPart,
    Leave,
    Vmalloc,
    VmallocDone,
    TlbwHazard(HazardSlot),
    Split,
    TlblGoaround1,
    TlblGoaround2,
    NopageTlbl,
    NopageTlbs,
    NopageTlbm,
    SmpPgtableChange,
    R3000WriteProbeFail,
    LargeSegbitsFault,
    TlbHugeUpdate,
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LabelId::SecondPart => "second_part",
            LabelId::Leave => "leave",
            LabelId::Vmalloc => "vmalloc",
            LabelId::VmallocDone => "vmalloc_done",
            LabelId::TlbwHazard(slot) => return write!(f, "tlbw_hazard_{}", slot.index()),
            LabelId::Split => "split",
            LabelId::TlblGoaround1 => "tlbl_goaround1",
            LabelId::TlblGoaround2 => "tlbl_goaround2",
            LabelId::NopageTlbl => "nopage_tlbl",
            LabelId::NopageTlbs => "nopage_tlbs",
            LabelId::NopageTlbm => "nopage_tlbm",
            LabelId::SmpPgtableChange => "smp_pgtable_change",
            LabelId::R3000WriteProbeFail => "r3000_write_probe_fail",
            LabelId::LargeSegbitsFault => "large_segbits_fault",
            LabelId::TlbHugeUpdate => "tlb_huge_update",
        };
        f.write_str(name)
    }
}

/// How a relocation's target is encoded into the branch word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// 16-bit instruction offset relative to the delay slot
    Pc16,
    /// 26-bit word index within the delay slot's 256MB segment
    Jump26,
}

#[derive(Debug, Clone, Copy)]
struct Label {
    id: LabelId,
    loc: Loc,
}

#[derive(Debug, Clone, Copy)]
struct Reloc {
    loc: Loc,
    target: LabelId,
    kind: BranchKind,
}

/// A `j` to a fixed kernel address outside the routine.
#[derive(Debug, Clone, Copy)]
struct AbsJump {
    loc: Loc,
    target: u64,
}

/// One branch patched during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub index: usize,
    pub label: LabelId,
    pub kind: BranchKind,
    /// Instruction index the branch now reaches
    pub target_index: usize,
}

#[derive(Debug, Clone)]
pub struct RelocTable {
    routine: &'static str,
    labels: Vec<Label>,
    relocs: Vec<Reloc>,
    jumps: Vec<AbsJump>,
}

impl RelocTable {
    pub fn new(routine: &'static str) -> Self {
        Self {
            routine,
            labels: Vec::new(),
            relocs: Vec::new(),
            jumps: Vec::new(),
        }
    }

    pub fn routine(&self) -> &'static str {
        self.routine
    }

    /// Bind `id` to `loc`. Each label, including each hazard slot, binds once.
    pub fn record_label(&mut self, id: LabelId, loc: Loc) -> SynthResult<()> {
        if self.labels.iter().any(|l| l.id == id) {
            return Err(SynthError::DuplicateLabel {
                routine: self.routine,
                label: id,
            });
        }
        self.labels.push(Label { id, loc });
        Ok(())
    }

    pub fn record_relocation(&mut self, target: LabelId, loc: Loc, kind: BranchKind) {
        self.relocs.push(Reloc { loc, target, kind });
    }

    pub fn record_abs_jump(&mut self, loc: Loc, target: u64) {
        self.jumps.push(AbsJump { loc, target });
    }

    pub fn label(&self, id: LabelId) -> Option<Loc> {
        self.labels.iter().find(|l| l.id == id).map(|l| l.loc)
    }

    pub fn relocation_count(&self) -> usize {
        self.relocs.len()
    }

    /// Whether the instruction at `index` of `buffer` has a delay slot after it.
    ///
    /// Recorded branches and jumps count, and so does any word that decodes to a
    /// branch or jump, including raw `jr` and fixed-offset branches.
    pub fn has_delay_slot_at(&self, buffer: &CodeBuffer, index: usize) -> bool {
        let loc = Loc::new(buffer.area(), index);
        self.relocs.iter().any(|r| r.loc == loc)
            || self.jumps.iter().any(|j| j.loc == loc)
            || buffer.insn_at(index).is_some_and(|insn| insn.has_delay_slot())
    }

    /// Back `split` up by one if it would separate a branch from its delay slot.
    ///
    /// Instructions `[..split)` stay on one side and `[split..)` move. A branch at
    /// `split - 1` would leave its delay slot behind, so the split moves before it.
    pub fn safe_split(&self, buffer: &CodeBuffer, split: usize) -> usize {
        if split > 0 && self.has_delay_slot_at(buffer, split - 1) {
            split - 1
        } else {
            split
        }
    }

    /// Copy `src[range]` to `dest` starting at `dest_start`, moving every label,
    /// relocation and jump check inside the range along with the code.
    pub fn copy_and_relabel(
        &mut self,
        src: &CodeBuffer,
        range: Range<usize>,
        dest: &mut CodeBuffer,
        dest_start: usize,
    ) -> SynthResult<()> {
        for (i, index) in range.clone().enumerate() {
            let word = src.word_at(index).unwrap_or(0);
            dest.store(self.routine, dest_start + i, word)?;
        }
        let from = src.area();
        let to = dest.area();
        let moved = |loc: &mut Loc| {
            if loc.area == from && range.contains(&loc.index) {
                *loc = Loc::new(to, loc.index - range.start + dest_start);
            }
        };
        self.labels.iter_mut().for_each(|l| moved(&mut l.loc));
        self.relocs.iter_mut().for_each(|r| moved(&mut r.loc));
        self.jumps.iter_mut().for_each(|j| moved(&mut j.loc));
        Ok(())
    }

    /// Shift labels inside `[range)` of `area` by `delta` without copying code.
    pub fn move_labels(&mut self, area: Area, range: Range<usize>, delta: isize) {
        for l in &mut self.labels {
            if l.loc.area == area && range.contains(&l.loc.index) {
                l.loc.index = (l.loc.index as isize + delta) as usize;
            }
        }
    }

    /// Patch every relocation into `buffer`, which will be installed at `base`.
    pub fn resolve_all(self, mut buffer: CodeBuffer, base: u64) -> SynthResult<ResolvedRoutine> {
        let routine = self.routine;
        buffer.verify(routine)?;
        let area = buffer.area();

        for label in &self.labels {
            if label.loc.area != area {
                return Err(SynthError::Unplaced {
                    routine,
                    what: "label",
                    label: label.id,
                });
            }
        }

        let mut patches = Vec::with_capacity(self.relocs.len());
        for reloc in &self.relocs {
            if reloc.loc.area != area {
                return Err(SynthError::Unplaced {
                    routine,
                    what: "branch to",
                    label: reloc.target,
                });
            }
            let index = reloc.loc.index;
            let target = self.label(reloc.target).ok_or(SynthError::UnresolvedRelocation {
                routine,
                index,
                label: reloc.target,
            })?;
            let word = buffer.word_at(index).unwrap_or(0);
            let patched = match reloc.kind {
                BranchKind::Pc16 => {
                    let offset = target.index as i64 - (index as i64 + 1);
                    let out_of_range = SynthError::BranchOutOfRange {
                        routine,
                        index,
                        label: reloc.target,
                        offset,
                    };
                    if !(-0x8000..=0x7fff).contains(&offset) {
                        return Err(out_of_range);
                    }
                    let insn = Insn::decode(word)
                        .filter(|i| i.branch_offset().is_some())
                        .ok_or_else(|| out_of_range.clone())?;
                    insn.with_branch_offset(offset as i32)
                        .encode()
                        .map_err(|_| out_of_range)?
                }
                BranchKind::Jump26 => {
                    let dest = base + (target.index as u64) * 4;
                    let slot = base + (index as u64 + 1) * 4;
                    if dest & !0x0fff_ffff != slot & !0x0fff_ffff {
                        return Err(SynthError::JumpOutOfSegment {
                            routine,
                            index,
                            target: dest,
                        });
                    }
                    (word & 0xfc00_0000) | (((dest >> 2) & 0x03ff_ffff) as u32)
                }
            };
            buffer.patch(index, patched);
            patches.push(Patch {
                index,
                label: reloc.target,
                kind: reloc.kind,
                target_index: target.index,
            });
        }

        for jump in &self.jumps {
            let slot = base + (jump.loc.index as u64 + 1) * 4;
            if jump.loc.area != area || jump.target & !0x0fff_ffff != slot & !0x0fff_ffff {
                return Err(SynthError::JumpOutOfSegment {
                    routine,
                    index: jump.loc.index,
                    target: jump.target,
                });
            }
        }

        let labels = self.labels.iter().map(|l| (l.id, l.loc.index)).collect();
        Ok(ResolvedRoutine {
            name: routine,
            base,
            words: buffer.words().to_vec(),
            labels,
            patches,
        })
    }
}

/// A routine whose branches are final. Only its words can be read out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoutine {
    name: &'static str,
    base: u64,
    words: Vec<u32>,
    labels: Vec<(LabelId, usize)>,
    patches: Vec<Patch>,
}

impl ResolvedRoutine {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn insn_at(&self, index: usize) -> Option<Insn> {
        self.words.get(index).copied().and_then(Insn::decode)
    }

    pub fn label(&self, id: LabelId) -> Option<usize> {
        self.labels.iter().find(|(l, _)| *l == id).map(|(_, i)| *i)
    }

    pub fn labels(&self) -> &[(LabelId, usize)] {
        &self.labels
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn address_of(&self, index: usize) -> u64 {
        self.base + index as u64 * 4
    }

    /// Big-endian image bytes, as fetched by a big-endian core
    pub fn to_be_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{BranchCond, Reg};

    fn beqz(buf: &mut CodeBuffer, relocs: &mut RelocTable, target: LabelId) {
        let loc = buf.cursor();
        buf.emit(Insn::Branch {
            cond: BranchCond::Eq,
            rs: Reg::K0,
            rt: Reg::ZERO,
            offset: 0,
        });
        relocs.record_relocation(target, loc, BranchKind::Pc16);
    }

    #[test]
    fn test_forward_and_backward_resolution() {
        let mut buf = CodeBuffer::new(Area::Final, 16);
        let mut relocs = RelocTable::new("test");
        relocs.record_label(LabelId::SmpPgtableChange, buf.cursor()).unwrap();
        buf.emit(Insn::Nop);
        beqz(&mut buf, &mut relocs, LabelId::Leave);
        buf.emit(Insn::Nop);
        beqz(&mut buf, &mut relocs, LabelId::SmpPgtableChange);
        buf.emit(Insn::Nop);
        relocs.record_label(LabelId::Leave, buf.cursor()).unwrap();
        buf.emit(Insn::Tlb(crate::isa::TlbOp::Eret));

        let resolved = relocs.resolve_all(buf, 0x8000_0000).unwrap();
        assert_eq!(resolved.insn_at(1).unwrap().branch_offset(), Some(3));
        assert_eq!(resolved.insn_at(3).unwrap().branch_offset(), Some(-4));
        assert_eq!(resolved.patches().len(), 2);
    }

    #[test]
    fn test_duplicate_label_rejected_but_hazard_slots_independent() {
        let mut relocs = RelocTable::new("refill");
        let loc = Loc::new(Area::Final, 0);
        relocs.record_label(LabelId::Leave, loc).unwrap();
        assert_eq!(
            relocs.record_label(LabelId::Leave, loc),
            Err(SynthError::DuplicateLabel {
                routine: "refill",
                label: LabelId::Leave
            })
        );
        for i in 0..HazardSlot::COUNT {
            let id = LabelId::TlbwHazard(HazardSlot::new(i).unwrap());
            relocs.record_label(id, loc).unwrap();
            assert!(relocs.record_label(id, loc).is_err());
        }
        assert!(HazardSlot::new(8).is_none());
    }

    #[test]
    fn test_missing_label_is_fatal() {
        let mut buf = CodeBuffer::new(Area::Final, 4);
        let mut relocs = RelocTable::new("load");
        beqz(&mut buf, &mut relocs, LabelId::NopageTlbl);
        let err = relocs.resolve_all(buf, 0).unwrap_err();
        assert_eq!(
            err,
            SynthError::UnresolvedRelocation {
                routine: "load",
                index: 0,
                label: LabelId::NopageTlbl
            }
        );
    }

    #[test]
    fn test_copy_and_relabel_moves_only_the_range() {
        let mut scratch = CodeBuffer::new(Area::Scratch, 8);
        let mut relocs = RelocTable::new("refill");
        relocs.record_label(LabelId::Leave, scratch.cursor()).unwrap();
        scratch.emit(Insn::Nop);
        scratch.emit(Insn::Nop);
        relocs.record_label(LabelId::Vmalloc, scratch.cursor()).unwrap();
        scratch.emit(Insn::Ssnop);

        let mut image = CodeBuffer::new(Area::Final, 8);
        relocs.copy_and_relabel(&scratch, 2..3, &mut image, 5).unwrap();
        assert_eq!(relocs.label(LabelId::Vmalloc), Some(Loc::new(Area::Final, 5)));
        assert_eq!(relocs.label(LabelId::Leave), Some(Loc::new(Area::Scratch, 0)));
        assert_eq!(image.word_at(5), Some(0x40));
    }

    #[test]
    fn test_safe_split_avoids_delay_slot() {
        let mut buf = CodeBuffer::new(Area::Scratch, 8);
        let mut relocs = RelocTable::new("refill");
        buf.emit(Insn::Nop);
        beqz(&mut buf, &mut relocs, LabelId::Leave);
        buf.emit(Insn::Nop);
        assert_eq!(relocs.safe_split(&buf, 2), 1);
        assert_eq!(relocs.safe_split(&buf, 3), 3);
        assert_eq!(relocs.safe_split(&buf, 1), 1);
    }

    #[test]
    fn test_safe_split_sees_unrecorded_jumps() {
        let mut buf = CodeBuffer::new(Area::Scratch, 8);
        let relocs = RelocTable::new("refill");
        buf.emit(Insn::Nop);
        buf.emit(Insn::Jr { rs: Reg::K1 });
        buf.emit(Insn::Nop);
        buf.emit(Insn::Branch {
            cond: BranchCond::Ne,
            rs: Reg::K0,
            rt: Reg::ZERO,
            offset: 4,
        });
        buf.emit(Insn::Nop);

        assert_eq!(relocs.relocation_count(), 0);
        assert!(relocs.has_delay_slot_at(&buf, 1));
        assert!(relocs.has_delay_slot_at(&buf, 3));
        assert!(!relocs.has_delay_slot_at(&buf, 2));
        assert_eq!(relocs.safe_split(&buf, 2), 1);
        assert_eq!(relocs.safe_split(&buf, 4), 3);
        assert_eq!(relocs.safe_split(&buf, 3), 3);
    }
}

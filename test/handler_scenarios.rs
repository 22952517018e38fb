//! Handler Scenario Tests
//!
//! Whole-handler synthesis for concrete CPU/kernel pairs, checked both on the
//! emitted instruction stream and by running the handlers in the interpreter
//! against synthetic page tables.

use tlbsynth::asm::{Area, Emitter, LabelId, Width};
use tlbsynth::cpu::{policy, CpuCaps, CpuType};
use tlbsynth::interp::{Exit, Machine, PageTables, TlbEntry, WriteKind, DEFAULT_ARENA};
use tlbsynth::isa::{Cp0Reg, Insn, MemOp, Reg, TlbOp};
use tlbsynth::layout::{PhysMode, PteLayout, TableLevels, TargetConfig, PM_HUGE_MASK};
use tlbsynth::synth::{fold_refill, FaultClass, Handler, Synthesizer, REFILL_REGION_INSNS};
use tlbsynth::SynthError;

const EPC: u64 = 0x0040_0100;

fn synth(cpu: CpuType, target: TargetConfig) -> Synthesizer {
    Synthesizer::for_target(CpuCaps::new(cpu), target).expect("target should be accepted")
}

fn insns(handler: &Handler) -> Vec<Insn> {
    handler
        .words()
        .iter()
        .map(|w| Insn::decode(*w).expect("handler word should decode"))
        .collect()
}

fn layout(synth: &Synthesizer) -> PteLayout {
    synth.target().pte_layout(synth.caps())
}

/// A PTE mapping `pfn` with the bits a refill cares about.
fn pte(layout: &PteLayout, pfn: u64) -> u64 {
    (pfn << layout.pfn)
        | PteLayout::bit(layout.present)
        | layout.read.map_or(0, PteLayout::bit)
        | PteLayout::bit(layout.valid)
        | PteLayout::bit(layout.dirty)
}

/// Machine with the refill loaded and page tables attached for CPU 0.
fn refill_machine(synth: &Synthesizer) -> (Machine, PageTables, Handler) {
    let target = *synth.target();
    let handler = synth.synthesize(FaultClass::Refill).unwrap();
    let mut m = Machine::for_target(synth.caps(), &target).with_trace();
    m.load_routine(&handler.routine);
    let tables = PageTables::new(&target, DEFAULT_ARENA);
    tables.attach(&mut m, 0);
    if let Some(sel) = synth.plan().pgd_reg {
        m.set_cp0(Cp0Reg::kscratch(sel), tables.pgd());
    }
    (m, tables, handler)
}

// ============================================================================
// Instruction selection
// ============================================================================

#[test]
fn test_generic_load_handler_uses_mask_compare_and_memory_save_area() {
    let s = synth(CpuType::Generic, TargetConfig::new(Width::Bits32));
    assert_eq!(s.plan().scratch_reg, None);

    let handler = s.synthesize(FaultClass::Load).unwrap();
    let code = insns(&handler);
    assert!(handler.descriptor.len <= 40, "{} words", handler.descriptor.len);
    assert!(handler.descriptor.len <= handler.descriptor.capacity);

    // No bit-test branches; the present check is andi/xori/bnez.
    assert!(!code.iter().any(|i| matches!(i, Insn::BitBranch { .. })));
    let mnemonics: Vec<_> = code.iter().map(|i| i.mnemonic()).collect();
    assert!(mnemonics
        .windows(3)
        .any(|w| w == ["andi", "xori", "bne"]));

    // $1 and $2 go to the save area instead of KScratch.
    assert!(code.contains(&Insn::Mem {
        op: MemOp::Sw,
        rt: Reg::AT,
        base: Reg::K0,
        offset: 0
    }));
    assert!(code.contains(&Insn::Mem {
        op: MemOp::Sw,
        rt: Reg::V0,
        base: Reg::K0,
        offset: 4
    }));
    assert!(!code.iter().any(|i| matches!(i, Insn::Cp0 { reg, .. } if *reg == Cp0Reg::kscratch(2))));

    // The generic bucket adds nothing around the write.
    let tlbwi = code
        .iter()
        .position(|i| *i == Insn::Tlb(TlbOp::Tlbwi))
        .unwrap();
    assert_ne!(code[tlbwi - 1], Insn::Nop);
    assert_ne!(code[tlbwi + 1], Insn::Nop);
}

#[test]
fn test_two_nop_bucket_differs_only_before_the_write() {
    let target = TargetConfig::new(Width::Bits32);
    let generic = insns(&synth(CpuType::Generic, target).synthesize(FaultClass::Load).unwrap());
    let vr4131 = insns(&synth(CpuType::Vr4131, target).synthesize(FaultClass::Load).unwrap());
    assert_eq!(vr4131.len(), generic.len() + 2);

    let write = Insn::Tlb(TlbOp::Tlbwi);
    let at = generic.iter().position(|i| *i == write).unwrap();
    assert_eq!(&vr4131[at..at + 3], &[Insn::Nop, Insn::Nop, write]);

    let map = |i: usize| if i < at { i } else { i + 2 };
    for (i, g) in generic.iter().enumerate() {
        let v = vr4131[map(i)];
        assert_eq!(g.with_branch_offset(0), v.with_branch_offset(0), "word {}", i);
        if let Some(offset) = g.branch_offset() {
            let target = (i as i64 + 1 + offset as i64) as usize;
            let expected = map(target) as i64 - (map(i) as i64 + 1);
            assert_eq!(v.branch_offset(), Some(expected as i32), "branch at {}", i);
        }
    }
}

#[test]
fn test_release2_write_uses_barrier_not_nops() {
    let s = synth(CpuType::M24K, TargetConfig::new(Width::Bits32));
    let code = insns(&s.synthesize(FaultClass::Refill).unwrap());
    let tlbwr = code
        .iter()
        .position(|i| *i == Insn::Tlb(TlbOp::Tlbwr))
        .unwrap();
    assert_eq!(code[tlbwr - 1], Insn::Ehb);
}

#[test]
fn test_branch_likely_bucket_in_refill() {
    let s = synth(CpuType::R4400SC, TargetConfig::new(Width::Bits64));
    let handler = s.synthesize(FaultClass::Refill).unwrap();
    let routine = &handler.routine;
    let hazard = routine
        .labels()
        .iter()
        .find(|(l, _)| matches!(l, LabelId::TlbwHazard(_)))
        .map(|(_, at)| *at)
        .expect("hazard label");
    assert_eq!(routine.insn_at(hazard - 1), Some(Insn::Tlb(TlbOp::Tlbwr)));
    assert_eq!(routine.insn_at(hazard - 2).unwrap().mnemonic(), "bgezl");
    assert_eq!(routine.insn_at(hazard - 2).unwrap().branch_offset(), Some(1));
}

#[test]
fn test_octeon_uses_bbit_and_indexed_loads() {
    let target = TargetConfig::new(Width::Bits64).with_huge_pages(true);
    let s = synth(CpuType::Octeon2, target);
    assert!(s.context().fast_refill());
    let code = insns(&s.synthesize(FaultClass::Refill).unwrap());
    let mnemonics: Vec<_> = code.iter().map(|i| i.mnemonic()).collect();
    assert!(mnemonics.contains(&"bbit1"));
    assert!(mnemonics.contains(&"ldx"));
}

// ============================================================================
// Interpreted refills
// ============================================================================

#[test]
fn test_huge_bit_selects_the_huge_update_path() {
    let target = TargetConfig::new(Width::Bits64).with_huge_pages(true);
    let s = synth(CpuType::Octeon2, target);
    let layout = layout(&s);
    let huge_bit = layout.huge.expect("64-bit layout has a huge bit");

    // Huge bit set in the directory entry.
    let (mut m, mut tables, handler) = refill_machine(&s);
    let huge_label = handler.routine.label(LabelId::TlbHugeUpdate).unwrap();
    let huge_address = handler.routine.address_of(huge_label);
    let vaddr = 0x0060_0000;
    let huge_pte = pte(&layout, 0x4_0000) | PteLayout::bit(huge_bit);
    tables.map_huge(&mut m, vaddr, huge_pte);
    m.raise_tlb_fault(vaddr + 0x3000, EPC);
    assert_eq!(m.run(s.refill_entry(target.ebase)), Exit::Return { epc: EPC });
    assert!(m.trace().executed(huge_address));

    let write = m.tlb_writes()[0];
    let lo0 = layout.to_entrylo(huge_pte, Width::Bits64);
    assert_eq!(write.kind, WriteKind::Random);
    assert_eq!(write.entry.pagemask, PM_HUGE_MASK);
    assert_eq!(write.entry.entrylo0, lo0);
    assert_eq!(write.entry.entrylo1, lo0 + 0x4000);
    // PageMask is back to the default and $1 is restored on the way out.
    assert_eq!(m.cp0(Cp0Reg::PAGEMASK), 0);

    // Huge bit clear: the directory entry is a PTE table pointer.
    let (mut m, mut tables, _) = refill_machine(&s);
    let even = pte(&layout, 0x1234);
    let odd = pte(&layout, 0x1235);
    tables.map(&mut m, vaddr, even);
    tables.map(&mut m, vaddr + 0x1000, odd);
    m.set_reg(Reg::AT, 0x55);
    m.raise_tlb_fault(vaddr + 0x1000, EPC);
    assert_eq!(m.run(s.refill_entry(target.ebase)), Exit::Return { epc: EPC });
    assert!(!m.trace().executed(huge_address));
    assert_eq!(m.reg(Reg::AT), 0x55);

    let write = m.tlb_writes()[0];
    assert_eq!(write.entry.pagemask, 0);
    assert_eq!(write.entry.entrylo0, layout.to_entrylo(even, Width::Bits64));
    assert_eq!(write.entry.entrylo1, layout.to_entrylo(odd, Width::Bits64));
    assert_eq!(write.entry.entryhi, vaddr);
}

#[test]
fn test_huge_path_without_kscratch() {
    let target = TargetConfig::new(Width::Bits64)
        .with_huge_pages(true)
        .with_levels(TableLevels::Three);
    let s = synth(CpuType::Generic, target);
    assert_eq!(s.plan().scratch_reg, None);
    let layout = layout(&s);

    let (mut m, mut tables, _) = refill_machine(&s);
    let vaddr = 0x1_4020_0000;
    let huge_pte = pte(&layout, 0x800) | PteLayout::bit(layout.huge.unwrap());
    tables.map_huge(&mut m, vaddr, huge_pte);
    m.raise_tlb_fault(vaddr, EPC);
    assert_eq!(m.run(s.refill_entry(target.ebase)), Exit::Return { epc: EPC });
    let write = m.tlb_writes()[0];
    assert_eq!(write.entry.pagemask, PM_HUGE_MASK);
    assert_eq!(write.entry.entrylo0, layout.to_entrylo(huge_pte, Width::Bits64));
}

#[test]
fn test_32bit_refill_loads_the_pte_pair() {
    let s = synth(CpuType::M24K, TargetConfig::new(Width::Bits32));
    let layout = layout(&s);
    let (mut m, mut tables, _) = refill_machine(&s);
    let vaddr = 0x1000_4000;
    tables.map(&mut m, vaddr, pte(&layout, 0x2_0000));
    tables.map(&mut m, vaddr + 0x1000, pte(&layout, 0x2_0001));
    m.raise_tlb_fault(vaddr, EPC);

    assert_eq!(m.run(s.refill_entry(s.target().ebase)), Exit::Return { epc: EPC });
    let write = m.tlb_writes()[0];
    let lo0 = layout.to_entrylo(pte(&layout, 0x2_0000), Width::Bits32);
    let lo1 = layout.to_entrylo(pte(&layout, 0x2_0001), Width::Bits32);
    assert_eq!(write.entry.entrylo0 as u32, lo0 as u32);
    assert_eq!(write.entry.entrylo1 as u32, lo1 as u32);
}

#[test]
fn test_smp_refill_indexes_pgd_current_by_cpu() {
    let target = TargetConfig::new(Width::Bits32).with_smp(true);
    let s = synth(CpuType::M34K, target);
    let layout = layout(&s);
    let handler = s.synthesize(FaultClass::Refill).unwrap();

    let mut m = Machine::for_target(s.caps(), &target).with_cpu(2);
    m.load_routine(&handler.routine);
    // CPU 0 has an empty directory; only CPU 2's maps the page.
    let cpu0 = PageTables::new(&target, DEFAULT_ARENA);
    cpu0.attach(&mut m, 0);
    let mut cpu2 = PageTables::new(&target, DEFAULT_ARENA + 0x10_0000);
    cpu2.attach(&mut m, 2);
    let vaddr = 0x0080_2000;
    cpu2.map(&mut m, vaddr, pte(&layout, 0x777));
    m.raise_tlb_fault(vaddr, EPC);

    assert_eq!(m.run(s.refill_entry(target.ebase)), Exit::Return { epc: EPC });
    assert_eq!(
        m.tlb_writes()[0].entry.entrylo0 as u32,
        layout.to_entrylo(pte(&layout, 0x777), Width::Bits32) as u32
    );
}

#[test]
fn test_64bit_kernel_address_walks_swapper() {
    let s = synth(CpuType::Generic, TargetConfig::new(Width::Bits64));
    let layout = layout(&s);
    let (mut m, mut tables, handler) = refill_machine(&s);
    let vaddr = 0xc000_0000_0000_2000;
    tables.map(&mut m, vaddr, pte(&layout, 0x99));
    m.raise_tlb_fault(vaddr, EPC);

    assert_eq!(m.run(s.refill_entry(s.target().ebase)), Exit::Return { epc: EPC });
    let vmalloc = handler.routine.label(LabelId::Vmalloc).unwrap();
    assert!(m.trace().executed(handler.routine.address_of(vmalloc)));
    assert_eq!(
        m.tlb_writes()[0].entry.entrylo0,
        layout.to_entrylo(pte(&layout, 0x99), Width::Bits64)
    );
}

#[test]
fn test_user_address_beyond_table_reach_goes_to_slow_path() {
    let s = synth(CpuType::Generic, TargetConfig::new(Width::Bits64));
    assert!(s.target().high_segbits(s.caps()));
    let (mut m, _, _) = refill_machine(&s);
    m.raise_tlb_fault(0x0000_0001_0000_0000, EPC);

    let slow_path = s.target().canonical(s.target().symbols.tlb_do_page_fault_0);
    assert_eq!(
        m.run(s.refill_entry(s.target().ebase)),
        Exit::Jump { target: slow_path }
    );
    assert!(m.tlb_writes().is_empty());
}

#[test]
fn test_r3000_refill_returns_with_rfe() {
    let s = synth(CpuType::R3000, TargetConfig::new(Width::Bits32));
    assert_eq!(s.refill_entry(0x8000_0000), 0xffff_ffff_8000_0000);
    let layout = layout(&s);
    let (mut m, mut tables, handler) = refill_machine(&s);
    assert!(handler.descriptor.len <= 32);
    let vaddr = 0x0040_3000;
    let value = (0x1_2345 << layout.pfn) | PteLayout::bit(layout.valid);
    tables.map(&mut m, vaddr, value);
    m.raise_tlb_fault(vaddr, EPC);

    assert_eq!(m.run(s.refill_entry(s.target().ebase)), Exit::Return { epc: EPC });
    assert_eq!(m.tlb_writes()[0].entry.entrylo0 as u32, value as u32);
}

#[test]
fn test_wide_pte_on_32bit_kernel_uses_high_words() {
    let target = TargetConfig::new(Width::Bits32).with_phys(PhysMode::Phys64On32);
    let s = synth(CpuType::M24K, target);
    let (mut m, mut tables, _) = refill_machine(&s);
    let vaddr = 0x2000_0000;
    tables.map(&mut m, vaddr, 0x0012_3457_0000_00c1);
    tables.map(&mut m, vaddr + 0x1000, 0x0012_3467_0000_00c1);
    m.raise_tlb_fault(vaddr, EPC);

    assert_eq!(m.run(s.refill_entry(target.ebase)), Exit::Return { epc: EPC });
    let write = m.tlb_writes()[0];
    assert_eq!(write.entry.entrylo0, 0x0012_3457);
    assert_eq!(write.entry.entrylo1, 0x0012_3467);
}

// ============================================================================
// Interpreted change handlers
// ============================================================================

#[test]
fn test_load_handler_marks_pte_valid_and_rewrites_probed_entry() {
    let target = TargetConfig::new(Width::Bits32);
    let s = synth(CpuType::Generic, target);
    let layout = layout(&s);
    let handler = s.synthesize(FaultClass::Load).unwrap();

    let mut m = Machine::for_target(s.caps(), &target);
    m.load_routine(&handler.routine);
    let mut tables = PageTables::new(&target, DEFAULT_ARENA);
    tables.attach(&mut m, 0);
    let vaddr = 0x0040_6000;
    let original = (0x4321 << layout.pfn)
        | PteLayout::bit(layout.present)
        | layout.read.map_or(0, PteLayout::bit);
    let address = tables.map(&mut m, vaddr, original);
    m.tlb_mut().insert(
        5,
        TlbEntry {
            entryhi: vaddr,
            ..Default::default()
        },
    );
    m.set_reg(Reg::AT, 0x11);
    m.set_reg(Reg::V0, 0x22);
    m.raise_tlb_fault(vaddr, EPC);

    assert_eq!(m.run(handler.descriptor.address), Exit::Return { epc: EPC });
    let updated = original | layout.make_valid_mode();
    assert_eq!(tables.read_pte(&m, address), updated);

    let write = m.tlb_writes()[0];
    assert_eq!(write.kind, WriteKind::Indexed);
    assert_eq!(write.index, 5);
    assert_eq!(write.entry.entrylo0 as u32, layout.to_entrylo(updated, Width::Bits32) as u32);
    assert_eq!((m.reg(Reg::AT), m.reg(Reg::V0)), (0x11, 0x22));
}

#[test]
fn test_store_to_read_only_pte_takes_slow_path() {
    let target = TargetConfig::new(Width::Bits32);
    let s = synth(CpuType::Generic, target);
    let layout = layout(&s);
    let handler = s.synthesize(FaultClass::Store).unwrap();

    let mut m = Machine::for_target(s.caps(), &target);
    m.load_routine(&handler.routine);
    let mut tables = PageTables::new(&target, DEFAULT_ARENA);
    tables.attach(&mut m, 0);
    let vaddr = 0x0040_8000;
    let read_only = PteLayout::bit(layout.present) | layout.read.map_or(0, PteLayout::bit);
    let address = tables.map(&mut m, vaddr, read_only);
    m.raise_tlb_fault(vaddr, EPC);

    let slow_path = target.canonical(target.symbols.tlb_do_page_fault_1);
    assert_eq!(
        m.run(handler.descriptor.address),
        Exit::Jump { target: slow_path }
    );
    assert_eq!(tables.read_pte(&m, address), read_only);
    assert!(m.tlb_writes().is_empty());
}

#[test]
fn test_smp_modify_handler_sets_dirty_with_ll_sc() {
    let target = TargetConfig::new(Width::Bits32).with_smp(true);
    let s = synth(CpuType::Generic, target);
    let layout = layout(&s);
    let handler = s.synthesize(FaultClass::Modify).unwrap();
    assert!(handler.routine.label(LabelId::SmpPgtableChange).is_some());

    let mut m = Machine::for_target(s.caps(), &target).with_cpu(1);
    m.load_routine(&handler.routine);
    let mut tables = PageTables::new(&target, DEFAULT_ARENA);
    tables.attach(&mut m, 1);
    let vaddr = 0x0100_0000;
    let original = pte(&layout, 0x50) | PteLayout::bit(layout.write);
    let address = tables.map(&mut m, vaddr, original);
    m.tlb_mut().insert(
        0,
        TlbEntry {
            entryhi: vaddr,
            ..Default::default()
        },
    );
    m.raise_tlb_fault(vaddr, EPC);

    assert_eq!(m.run(handler.descriptor.address), Exit::Return { epc: EPC });
    assert_eq!(tables.read_pte(&m, address), original | layout.make_write_mode());
    assert_eq!(m.tlb_writes()[0].kind, WriteKind::Indexed);
}

// ============================================================================
// Folding and label discipline
// ============================================================================

/// A refill-shaped body: `head` instructions ahead of the out-of-line tail
/// of `tail` instructions.
fn oversized_refill(head: usize, tail: usize) -> Emitter {
    let mut e = Emitter::new("refill", Area::Scratch, 128, Width::Bits64);
    e.il_bltz(Reg::K0, LabelId::Vmalloc);
    e.nop();
    for _ in 0..head {
        e.ssnop();
    }
    e.label(LabelId::VmallocDone).unwrap();
    e.tlb(TlbOp::Tlbwr);
    e.eret();
    e.label(LabelId::Vmalloc).unwrap();
    for _ in 0..tail {
        e.ssnop();
    }
    e.il_b(LabelId::VmallocDone);
    e.nop();
    e
}

#[test]
fn test_oversized_refill_is_folded_at_a_safe_point() {
    let region = REFILL_REGION_INSNS;
    for (head, tail) in [(26, 12), (40, 4), (50, 2)] {
        let e = oversized_refill(head, tail);
        let len = e.len();
        assert!(len > region);
        let (buf, relocs) = e.into_parts();
        let scratch_labels = relocs.clone();
        let folded = fold_refill(&buf, relocs, LabelId::Vmalloc, 0x8000_0000).unwrap();
        let split = folded.split.expect("body must be split");

        // Head stays in the long region at +0x80, the rest fits the short one.
        let head_len = folded.insns - (len - split);
        assert!(head_len <= region, "head {}", head_len);
        assert!(len - split <= region, "rest {}", len - split);

        // No branch is separated from its delay slot.
        for s in 0..len {
            if buf.insn_at(s).map_or(false, |i| i.has_delay_slot()) {
                assert_eq!(
                    folded.placement(s + 1),
                    folded.placement(s).map(|p| p + 1),
                    "delay slot of {} moved",
                    s
                );
            }
        }

        // Every branch still reaches the instruction its label named.
        for patch in folded.routine.patches() {
            if patch.label == LabelId::Split {
                assert_eq!(patch.target_index, 0);
                continue;
            }
            let loc = scratch_labels.label(patch.label).unwrap();
            let mut expected = folded.placement(loc.index).unwrap();
            if folded.delay_copied == Some(loc.index) {
                expected -= 1;
            }
            assert_eq!(expected, patch.target_index);
            let insn = folded.routine.insn_at(patch.index).unwrap();
            assert_eq!(
                insn.branch_offset(),
                Some(patch.target_index as i32 - patch.index as i32 - 1)
            );
        }
    }
}

#[test]
fn test_refill_too_large_for_both_regions_is_fatal() {
    let e = oversized_refill(60, 10);
    let (buf, relocs) = e.into_parts();
    assert!(matches!(
        fold_refill(&buf, relocs, LabelId::Vmalloc, 0x8000_0000),
        Err(SynthError::CapacityExceeded { routine: "refill", .. })
    ));
}

#[test]
fn test_duplicate_label_is_fatal_and_named() {
    let mut e = Emitter::new("tlbl", Area::Final, 16, Width::Bits32);
    e.label(LabelId::NopageTlbl).unwrap();
    e.nop();
    let err = e.label(LabelId::NopageTlbl).unwrap_err();
    assert_eq!(
        err,
        SynthError::DuplicateLabel {
            routine: "tlbl",
            label: LabelId::NopageTlbl
        }
    );
    assert_eq!(err.to_string(), "tlbl: label nopage_tlbl defined twice");
}

#[test]
fn test_unsupported_model_fails_synthesis() {
    let caps = CpuCaps::new(CpuType::R6000);
    assert!(policy::tlbw_sequence(&caps).is_none());
    let s = Synthesizer::for_target(caps, TargetConfig::new(Width::Bits32)).unwrap();
    assert!(matches!(
        s.synthesize(FaultClass::Refill),
        Err(SynthError::UnsupportedCpu {
            cpu: CpuType::R6000,
            ..
        })
    ));
}

#[test]
fn test_slow_path_in_another_segment_is_fatal() {
    let mut target = TargetConfig::new(Width::Bits32);
    target.symbols.tlb_do_page_fault_0 = 0x9011_0000;
    let s = synth(CpuType::Generic, target);
    let err = s.synthesize(FaultClass::Load).unwrap_err();
    assert!(
        matches!(
            err,
            SynthError::JumpOutOfSegment {
                routine: "tlbl",
                target: 0xffff_ffff_9011_0000,
                ..
            }
        ),
        "{}",
        err
    );
    assert!(err.to_string().contains("leaves the 256MB segment"));

    // Store and modify go to the other slow path, which is still reachable.
    assert!(s.synthesize(FaultClass::Store).is_ok());
    assert!(s.synthesize(FaultClass::Modify).is_ok());
}

#[test]
fn test_swapper_outside_compat_space_is_fatal() {
    let mut target = TargetConfig::new(Width::Bits64);
    target.symbols.swapper_pg_dir = 0x9800_0000_0050_0000;
    let s = synth(CpuType::Generic, target);
    assert_eq!(
        s.synthesize(FaultClass::Refill).unwrap_err(),
        SynthError::SymbolOutOfRange {
            routine: "refill",
            address: 0x9800_0000_0050_0000,
        }
    );
}

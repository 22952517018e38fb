//! Handler listings for the boot log
//!
//! One line per word: address, raw word and a best-effort disassembly, with
//! label names on their own lines.

use crate::asm::ResolvedRoutine;
use crate::synth::Handler;
use log::debug;
use std::fmt::Write;

/// Render `routine` as an annotated listing.
pub fn render(routine: &ResolvedRoutine) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: {} words at {:#x}",
        routine.name(),
        routine.len(),
        routine.base()
    );
    for (index, word) in routine.words().iter().enumerate() {
        for (label, _) in routine.labels().iter().filter(|(_, at)| *at == index) {
            let _ = writeln!(out, "{}:", label);
        }
        let address = routine.address_of(index);
        let text = match routine.insn_at(index) {
            Some(insn) => insn.render(Some(address)),
            None => format!(".word\t{:#010x}", word),
        };
        let _ = writeln!(out, "  {:016x}  {:08x}  {}", address, word, text);
    }
    out
}

/// Listing prefixed with the routine's placement summary.
pub fn render_handler(handler: &Handler) -> String {
    let d = &handler.descriptor;
    format!(
        "# {} handler: {} of {} instructions used\n{}",
        d.class,
        d.len,
        d.capacity,
        render(&handler.routine)
    )
}

/// Write the listing to the log at debug level.
pub fn dump_routine(routine: &ResolvedRoutine) {
    for line in render(routine).lines() {
        debug!("{}", line);
    }
}

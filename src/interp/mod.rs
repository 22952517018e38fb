//! Handler interpreter
//!
//! Runs synthesized handlers against a modelled core so tests (and the `trace`
//! command) can check what a handler does rather than only which words it
//! contains.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `machine` | registers, CP0, sparse big-endian memory, the fetch/execute loop |
//! | `tlb` | joint TLB with probe, read and write |
//! | `pagetable` | directory and PTE tables with the target kernel's geometry |
//! | `trace` | executed path and branch outcomes |

pub mod machine;
pub mod pagetable;
pub mod tlb;
pub mod trace;

pub use machine::{Exit, Machine, DEFAULT_TLB_ENTRIES};
pub use pagetable::{PageTables, DEFAULT_ARENA};
pub use tlb::{Tlb, TlbEntry, TlbWrite, WriteKind, PROBE_MISS};
pub use trace::PathTrace;

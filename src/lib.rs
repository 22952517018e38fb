//! tlbsynth - boot-time MIPS TLB handler synthesizer
//!
//! Generates the TLB refill handler and the load/store/modify fault handlers
//! for the exact CPU and kernel configuration found at boot, then installs them
//! into their fixed exception-vector regions.
//!
//! # Features
//!
//! - **Micro-assembler**: fixed-capacity buffers, labels with a bounded hazard
//!   family, relocations resolved in one consuming pass
//! - **CPU policy tables**: TLB-write hazard buckets as data, per-model workarounds
//! - **Handler builders**: page-table walks, EntryLo conversion, permission
//!   checks, atomic PTE updates, huge pages
//! - **Region folding**: the 64-bit refill is split across its two vectors
//!   without bisecting a delay slot
//! - **Interpreter**: runs synthesized handlers against synthetic page tables
//!
//! # Example
//!
//! ```rust
//! use tlbsynth::asm::Width;
//! use tlbsynth::cpu::{CpuCaps, CpuType};
//! use tlbsynth::install::EbaseImage;
//! use tlbsynth::layout::TargetConfig;
//! use tlbsynth::synth::Synthesizer;
//!
//! let caps = CpuCaps::new(CpuType::M24K);
//! let target = TargetConfig::new(Width::Bits32);
//! let mut synth = Synthesizer::for_target(caps, target).unwrap();
//!
//! let mut image = EbaseImage::new();
//! synth.build_for_cpu(target.ebase, &mut image).unwrap();
//! assert_eq!(image.installs(), 4);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐    ┌──────────────────┐
//! │ CpuCaps          │    │ TargetConfig     │  detected CPU, kernel build
//! └────────┬─────────┘    └────────┬─────────┘
//!          └───────────┬───────────┘
//!                      ▼
//!            ┌──────────────────┐
//!            │ Synthesizer      │  one per boot target, owns the KScratch plan
//!            └────────┬─────────┘
//!                     ▼
//!            ┌──────────────────┐
//!            │ builders::*      │  walk, convert, check, write fragments
//!            └────────┬─────────┘
//!                     ▼
//!            ┌──────────────────┐
//!            │ asm::Emitter     │  buffer + relocations -> ResolvedRoutine
//!            └────────┬─────────┘
//!                     ▼
//!            ┌──────────────────┐
//!            │ Installer        │  copy to the vector, flush the icache
//!            └──────────────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod asm;
pub mod builders;
pub mod config;
pub mod cpu;
pub mod error;
pub mod install;
pub mod interp;
pub mod isa;
pub mod layout;
pub mod listing;
pub mod synth;

// Re-export commonly used types
pub use asm::{Emitter, LabelId, ResolvedRoutine, Width};
pub use config::{ConfigError, ProfileConfig};
pub use cpu::{CpuCaps, CpuFeatures, CpuType};
pub use error::{SynthError, SynthResult};
pub use install::{EbaseImage, Installer};
pub use interp::{Exit, Machine, PageTables};
pub use isa::{Cp0Reg, Insn, Reg};
pub use layout::{PhysMode, PteLayout, TableLevels, TargetConfig};
pub use synth::{
    halt_on_error, FaultClass, Handler, HandlerSet, RoutineDescriptor, ScratchAllocator,
    Synthesizer,
};

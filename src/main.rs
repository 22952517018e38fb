//! tlbsynth - diagnostic CLI
//!
//! Synthesizes the handlers for a target profile and prints them, without a
//! kernel: listings, the installed image, the hazard table, and interpreted
//! refills against a synthetic page table.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tlbsynth::config::ProfileConfig;
use tlbsynth::cpu::{policy, CpuCaps, CpuFeatures, CpuType};
use tlbsynth::install::EbaseImage;
use tlbsynth::interp::{Exit, Machine, PageTables, DEFAULT_ARENA};
use tlbsynth::isa::Cp0Reg;
use tlbsynth::listing;
use tlbsynth::synth::{FaultClass, RoutineDescriptor, Synthesizer};

#[derive(Parser)]
#[command(name = "tlbsynth")]
#[command(version)]
#[command(about = "Boot-time MIPS TLB handler synthesizer", long_about = None)]
struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List CPU models and their TLB write hazard sequences
    Cpus,

    /// Synthesize handlers and print annotated listings
    Dump {
        /// Target profile (default: tlbsynth.toml in this or a parent directory)
        #[arg(short, long)]
        profile: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "all")]
        class: ClassArg,
    },

    /// Install every handler into an in-memory image and print it
    Image {
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Print a JSON routine summary instead of hex words
        #[arg(long)]
        json: bool,
    },

    /// Run the refill handler for one faulting address
    Trace {
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Faulting virtual address
        #[arg(long, value_parser = parse_u64)]
        vaddr: u64,

        /// PTE stored for the address
        #[arg(long, value_parser = parse_u64)]
        pte: u64,

        /// Store the PTE as a huge page in the directory entry
        #[arg(long)]
        huge: bool,

        /// CPU number the fault is taken on
        #[arg(long, default_value = "0")]
        cpu: u64,

        /// Print every executed address
        #[arg(long)]
        path: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ClassArg {
    Refill,
    Load,
    Store,
    Modify,
    All,
}

impl ClassArg {
    fn classes(self) -> Vec<FaultClass> {
        match self {
            ClassArg::Refill => vec![FaultClass::Refill],
            ClassArg::Load => vec![FaultClass::Load],
            ClassArg::Store => vec![FaultClass::Store],
            ClassArg::Modify => vec![FaultClass::Modify],
            ClassArg::All => FaultClass::ALL.to_vec(),
        }
    }
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim().replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    match cli.command {
        Commands::Cpus => cmd_cpus(),
        Commands::Dump { profile, class } => cmd_dump(profile.as_ref(), class),
        Commands::Image { profile, json } => cmd_image(profile.as_ref(), json),
        Commands::Trace {
            profile,
            vaddr,
            pte,
            huge,
            cpu,
            path,
        } => cmd_trace(profile.as_ref(), vaddr, pte, huge, cpu, path),
    }
}

fn load_synthesizer(profile: Option<&PathBuf>) -> Result<Synthesizer> {
    let config = match profile {
        Some(path) => ProfileConfig::load(path)
            .with_context(|| format!("Failed to load profile {}", path.display()))?,
        None => ProfileConfig::load_from_cwd().context("Failed to load tlbsynth.toml")?,
    };
    let (caps, target) = config.to_target().context("Invalid profile")?;
    Synthesizer::for_target(caps, target).context("Target rejected")
}

fn cmd_cpus() -> Result<()> {
    println!("{:<12} {:<8} TLB write sequence", "CPU", "R2");
    for &cpu in CpuType::all() {
        let caps = CpuCaps::new(cpu);
        let r2 = if caps.has(CpuFeatures::MIPS_R2) {
            "yes"
        } else {
            "no"
        };
        let sequence = match policy::tlbw_sequence(&caps) {
            Some(seq) => seq.describe(),
            None => "unsupported".to_string(),
        };
        println!("{:<12} {:<8} {}", cpu.name(), r2, sequence);
    }
    Ok(())
}

fn cmd_dump(profile: Option<&PathBuf>, class: ClassArg) -> Result<()> {
    let synth = load_synthesizer(profile)?;
    for class in class.classes() {
        let handler = synth
            .synthesize(class)
            .with_context(|| format!("Failed to synthesize {} handler", class))?;
        println!("{}", listing::render_handler(&handler));
    }
    Ok(())
}

fn cmd_image(profile: Option<&PathBuf>, json: bool) -> Result<()> {
    let mut synth = load_synthesizer(profile)?;
    let ebase = synth.target().ebase;
    let mut image = EbaseImage::new();
    synth
        .build_for_cpu(ebase, &mut image)
        .context("Synthesis failed")?;

    if json {
        let summary: Vec<RoutineDescriptor> = FaultClass::ALL
            .iter()
            .map(|&class| synth.synthesize(class).map(|h| h.descriptor))
            .collect::<Result<_, _>>()?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let words: Vec<(u64, u32)> = image.iter().collect();
    for chunk in words.chunks(8) {
        let bytes: Vec<u8> = chunk.iter().flat_map(|(_, w)| w.to_be_bytes()).collect();
        println!("{:016x}: {}", chunk[0].0, hex::encode(bytes));
    }
    Ok(())
}

fn cmd_trace(
    profile: Option<&PathBuf>,
    vaddr: u64,
    pte: u64,
    huge: bool,
    cpu: u64,
    show_path: bool,
) -> Result<()> {
    let synth = load_synthesizer(profile)?;
    let target = *synth.target();
    if huge && !target.huge_pages {
        bail!("the profile does not enable huge pages");
    }
    let handler = synth
        .synthesize(FaultClass::Refill)
        .context("Failed to synthesize refill handler")?;

    let mut machine = Machine::for_target(synth.caps(), &target)
        .with_cpu(cpu)
        .with_trace();
    machine.load_routine(&handler.routine);

    let mut tables = PageTables::new(&target, DEFAULT_ARENA);
    tables.attach(&mut machine, cpu);
    if let Some(sel) = synth.plan().pgd_reg {
        machine.set_cp0(Cp0Reg::kscratch(sel), tables.pgd());
    }
    if huge {
        tables.map_huge(&mut machine, vaddr, pte);
    } else {
        tables.map(&mut machine, vaddr, pte);
    }

    let epc = 0x0040_0000;
    machine.raise_tlb_fault(vaddr, epc);
    let exit = machine.run(synth.refill_entry(target.ebase));

    if show_path {
        print!("{}", machine.trace());
    }
    match exit {
        Exit::Return { epc } => println!("returned to {:#x}", epc),
        Exit::Jump { target } => println!("left handler for {:#x}", target),
        Exit::InvalidInstruction { pc, word } => {
            bail!("invalid instruction {:08x} at {:#x}", word, pc)
        }
        Exit::MaxInstructionsExceeded => bail!("handler did not terminate"),
    }
    println!("{} instructions executed", machine.instruction_count());
    for write in machine.tlb_writes() {
        println!(
            "tlbw {:?} [{}]: entryhi {:#x} entrylo0 {:#x} entrylo1 {:#x} pagemask {:#x}",
            write.kind,
            write.index,
            write.entry.entryhi,
            write.entry.entrylo0,
            write.entry.entrylo1,
            write.entry.pagemask
        );
    }
    Ok(())
}

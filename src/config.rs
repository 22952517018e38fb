//! Target profiles
//!
//! Handles parsing of `tlbsynth.toml` files describing one boot target: the
//! CPU as detected and the kernel build the handlers are generated for.
//!
//! ```toml
//! [cpu]
//! type = "octeon2"
//! features = ["rixi"]
//! disable_features = []
//! kscratch_mask = 0x0c
//!
//! [kernel]
//! width = 64
//! phys = "native64"
//! levels = 3
//! smp = true
//! huge_pages = true
//!
//! [symbols]
//! pgd_current = 0x80400000
//! ```
//!
//! Addresses are written as 32-bit kernel addresses and sign-extended.

use crate::asm::Width;
use crate::cpu::{CpuCaps, CpuFeatures, CpuType, UnknownCpu};
use crate::error::SynthError;
use crate::layout::{HandlerAddresses, KernelSymbols, PhysMode, TableLevels, TargetConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// File name searched for by [`ProfileConfig::find_and_load`]
pub const PROFILE_FILE: &str = "tlbsynth.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    UnknownCpu(#[from] UnknownCpu),

    #[error("unknown CPU feature '{0}'")]
    UnknownFeature(String),

    #[error("kernel width must be 32 or 64, got {0}")]
    BadWidth(u8),

    #[error("page tables have 2 or 3 levels, got {0}")]
    BadLevels(u8),

    #[error("profile rejected: {0}")]
    Rejected(#[from] SynthError),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root of a `tlbsynth.toml` profile.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfileConfig {
    #[serde(default)]
    pub cpu: CpuSection,

    #[serde(default)]
    pub kernel: KernelSection,

    #[serde(default)]
    pub symbols: KernelSymbols,

    #[serde(default)]
    pub handlers: HandlerAddresses,
}

impl ProfileConfig {
    /// Load a profile from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Find and load a profile by searching up from the given directory.
    /// Falls back to the default (generic 32-bit) profile.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let path = dir.join(PROFILE_FILE);
            if path.exists() {
                return Self::load(&path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Load from the current directory or its parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir()?;
        Self::find_and_load(&cwd)
    }

    pub fn caps(&self) -> ConfigResult<CpuCaps> {
        let cpu: CpuType = self.cpu.cpu_type.parse()?;
        let mut caps = CpuCaps::new(cpu)
            .with_features(parse_features(&self.cpu.features)?)
            .without_features(parse_features(&self.cpu.disable_features)?);
        if let Some(mask) = self.cpu.kscratch_mask {
            caps = caps.with_kscratch_mask(mask);
        }
        if let Some(vmbits) = self.cpu.vmbits {
            caps = caps.with_vmbits(vmbits);
        }
        Ok(caps)
    }

    pub fn target(&self) -> ConfigResult<TargetConfig> {
        let k = &self.kernel;
        let width = match k.width {
            32 => Width::Bits32,
            64 => Width::Bits64,
            other => return Err(ConfigError::BadWidth(other)),
        };
        let levels = match k.levels {
            2 => TableLevels::Two,
            3 => TableLevels::Three,
            other => return Err(ConfigError::BadLevels(other)),
        };
        let mut target = TargetConfig::new(width)
            .with_levels(levels)
            .with_smp(k.smp)
            .with_huge_pages(k.huge_pages)
            .with_pgd_in_kscratch(k.pgd_in_kscratch)
            .with_local_ebase(k.local_ebase);
        if let Some(phys) = k.phys {
            target = target.with_phys(phys);
        }
        if let Some(ebase) = k.ebase {
            target.ebase = ebase;
        }
        target.symbols = self.symbols;
        target.handlers = self.handlers;
        Ok(target)
    }

    /// Validated capabilities and kernel configuration.
    pub fn to_target(&self) -> ConfigResult<(CpuCaps, TargetConfig)> {
        let caps = self.caps()?;
        let target = self.target()?;
        target.validate(&caps)?;
        Ok((caps, target))
    }
}

fn parse_features(names: &[String]) -> ConfigResult<CpuFeatures> {
    names.iter().try_fold(CpuFeatures::empty(), |acc, name| {
        CpuFeatures::from_profile_name(name)
            .map(|f| acc | f)
            .ok_or_else(|| ConfigError::UnknownFeature(name.clone()))
    })
}

/// The processor as detected at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuSection {
    /// Model name, as listed by `tlbsynth cpus`
    #[serde(rename = "type", default = "default_cpu")]
    pub cpu_type: String,

    /// Flags added to the model's defaults
    #[serde(default)]
    pub features: Vec<String>,

    /// Flags removed from the model's defaults
    #[serde(default)]
    pub disable_features: Vec<String>,

    #[serde(default)]
    pub kscratch_mask: Option<u8>,

    #[serde(default)]
    pub vmbits: Option<u8>,
}

fn default_cpu() -> String {
    "generic".to_string()
}

impl Default for CpuSection {
    fn default() -> Self {
        Self {
            cpu_type: default_cpu(),
            features: Vec::new(),
            disable_features: Vec::new(),
            kscratch_mask: None,
            vmbits: None,
        }
    }
}

/// Kernel build options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSection {
    /// 32 or 64
    #[serde(default = "default_width")]
    pub width: u8,

    /// Defaults to the natural mode of the width
    #[serde(default)]
    pub phys: Option<PhysMode>,

    /// 2 or 3
    #[serde(default = "default_levels")]
    pub levels: u8,

    #[serde(default)]
    pub smp: bool,

    #[serde(default)]
    pub huge_pages: bool,

    #[serde(default)]
    pub pgd_in_kscratch: bool,

    #[serde(default)]
    pub local_ebase: bool,

    #[serde(default)]
    pub ebase: Option<u64>,

    /// CPUs brought up, for per-CPU synthesis
    #[serde(default = "default_cpus")]
    pub cpus: u32,
}

fn default_width() -> u8 {
    32
}

fn default_levels() -> u8 {
    2
}

fn default_cpus() -> u32 {
    1
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            width: default_width(),
            phys: None,
            levels: default_levels(),
            smp: false,
            huge_pages: false,
            pgd_in_kscratch: false,
            local_ebase: false,
            ebase: None,
            cpus: default_cpus(),
        }
    }
}

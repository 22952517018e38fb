//! KScratch register allocation

/// Hands out KScratch selects in ascending order from the CPU's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchAllocator {
    available: u8,
    used: u8,
}

impl ScratchAllocator {
    pub fn new(available: u8) -> Self {
        Self { available, used: 0 }
    }

    /// Lowest free select, or `None` when the mask is exhausted.
    pub fn allocate(&mut self) -> Option<u8> {
        let free = self.available & !self.used;
        if free == 0 {
            return None;
        }
        let sel = free.trailing_zeros() as u8;
        self.used |= 1 << sel;
        Some(sel)
    }

    pub fn used(&self) -> u8 {
        self.used
    }
}

/// Which KScratch registers the handlers may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchPlan {
    /// Holds `$1` while a handler runs
    pub scratch_reg: Option<u8>,
    /// Holds the current page-directory pointer
    pub pgd_reg: Option<u8>,
}

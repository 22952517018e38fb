//! Execution path recording for interpreted handlers.
//!
//! Records which addresses ran, in order, and which way each conditional
//! branch went. Tests use it to tell the fast path from the huge or vmalloc
//! path; the CLI prints it.

use std::collections::HashMap;
use std::fmt;

/// Ordered record of one run.
#[derive(Debug, Default, Clone)]
pub struct PathTrace {
    /// Executed addresses in program order
    steps: Vec<u64>,

    /// Branch outcomes: address -> (taken_count, not_taken_count)
    branch_outcomes: HashMap<u64, (u32, u32)>,

    enabled: bool,
}

impl PathTrace {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// A tracker that records nothing
    pub fn disabled() -> Self {
        Self::default()
    }

    #[inline]
    pub fn mark_executed(&mut self, pc: u64) {
        if self.enabled {
            self.steps.push(pc);
        }
    }

    #[inline]
    pub fn mark_branch(&mut self, pc: u64, taken: bool) {
        if !self.enabled {
            return;
        }
        let entry = self.branch_outcomes.entry(pc).or_insert((0, 0));
        if taken {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    pub fn executed(&self, pc: u64) -> bool {
        self.steps.contains(&pc)
    }

    /// Whether the branch at `pc` was taken the last time it ran; `None` if it
    /// never ran.
    pub fn branch_taken(&self, pc: u64) -> Option<bool> {
        self.branch_outcomes.get(&pc).map(|(taken, _)| *taken > 0)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for PathTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pc in &self.steps {
            match self.branch_outcomes.get(pc) {
                Some((taken, _)) if *taken > 0 => writeln!(f, "{:016x}  taken", pc)?,
                Some(_) => writeln!(f, "{:016x}  not taken", pc)?,
                None => writeln!(f, "{:016x}", pc)?,
            }
        }
        Ok(())
    }
}

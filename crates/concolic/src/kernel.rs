use std::collections::BTreeSet;

use crate::architecture::{Error, Feature, Result};
use crate::semantics::{Partitioner, RiscOperators};

/// Effect of a modeled system call on the symbolic state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// The effect was applied; execution continues after the call instruction
    Continue,

    /// The program exited with the given status
    Exit(i64),
}

/// Model of the operating system a specimen runs on.
pub trait Kernel {
    /// Call numbers this kernel models
    fn system_calls(&self) -> Vec<u64>;

    /// Apply the effect of the system call the program is about to make. Implementations must
    /// return an error for calls they cannot model rather than leave the state untouched.
    fn syscall(
        &mut self,
        partitioner: &dyn Partitioner,
        ops: &mut dyn RiscOperators,
    ) -> Result<SyscallOutcome>;
}

/// Kernel for bare-metal targets. It models no system calls.
#[derive(Copy, Clone, Default, Debug)]
pub struct NoKernel {}

impl Kernel for NoKernel {
    fn system_calls(&self) -> Vec<u64> {
        Vec::new()
    }

    fn syscall(
        &mut self,
        _partitioner: &dyn Partitioner,
        _ops: &mut dyn RiscOperators,
    ) -> Result<SyscallOutcome> {
        Err(Error::Unsupported {
            architecture: "bare metal".to_owned(),
            feature: Feature::SystemCalls,
        })
    }
}

/// System call numbers registered by an architecture instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemCallTable {
    numbers: BTreeSet<u64>,
}

impl SystemCallTable {
    pub fn register(&mut self, number: u64) -> bool {
        self.numbers.insert(number)
    }

    pub fn is_modeled(&self, number: u64) -> bool {
        self.numbers.contains(&number)
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.numbers.iter().copied()
    }
}

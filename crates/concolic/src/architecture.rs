use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::{self, Config};
use crate::event::{ExecutionEvent, MemoryDigest};
use crate::kernel::SyscallOutcome;
use crate::mem::{self, AddressInterval, ByteOrder, MemoryMap, Permissions};
use crate::semantics::{Dispatcher, Engine, InputVariables, Partitioner, RiscOperators, SmtSolver};
use crate::store::{self, Database, TestCaseId};
use crate::supervisor::LoadReport;
use crate::{debugger, semantics};

mod binding;
mod memory;

pub use self::binding::{ArchitectureCore, Binding, Lifecycle};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The backend does not implement the operation. This is neither an environment failure nor
    /// a caller defect; use [Architecture::supports] to check ahead of time.
    #[error("{} is not supported by the {architecture} architecture", .feature.operation())]
    Unsupported {
        architecture: String,
        feature: Feature,
    },

    /// The instance was loaded but no debug session could be attached
    #[error("no debug session is attached")]
    NoDebugSession,

    /// The debugger reported that the specimen is no longer running
    #[error("the debugged specimen has terminated")]
    Terminated,

    /// Another instance is bound to the test case in the same store
    #[error("test case {0} already has a live architecture instance")]
    InstanceExists(TestCaseId),

    #[error("architecture {0} is already registered")]
    DuplicateArchitecture(String),

    #[error("no registered architecture matches {}", .name.as_deref().unwrap_or("a configuration without an architecture name"))]
    NoMatchingArchitecture { name: Option<String> },

    /// A memory hash checkpoint did not match the concrete memory contents
    #[error("memory {interval} diverged: expected {expected}, found {actual}")]
    MemoryDivergence {
        interval: AddressInterval,
        expected: MemoryDigest,
        actual: MemoryDigest,
    },

    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Memory(#[from] mem::Error),

    #[error(transparent)]
    Debugger(#[from] debugger::Error),

    #[error(transparent)]
    Store(#[from] store::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error reported by an analysis collaborator
    #[error("dependency error: {0}")]
    DependencyError(semantics::DependencyError),
}

/// Optional operations of the architecture contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    MapMemory,
    UnmapMemory,
    MemoryRestore,
    MemoryHash,
    MemoryAdjust,
    EventReplay,
    InputVariables,
    SystemCalls,
    Dispatch,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::MapMemory,
        Feature::UnmapMemory,
        Feature::MemoryRestore,
        Feature::MemoryHash,
        Feature::MemoryAdjust,
        Feature::EventReplay,
        Feature::InputVariables,
        Feature::SystemCalls,
        Feature::Dispatch,
    ];

    /// Name of the [Architecture] method providing the feature
    pub fn operation(&self) -> &'static str {
        match self {
            Feature::MapMemory => "map_memory",
            Feature::UnmapMemory => "unmap_memory",
            Feature::MemoryRestore => "create_memory_restore_events",
            Feature::MemoryHash => "create_memory_hash_events",
            Feature::MemoryAdjust => "create_memory_adjust_events",
            Feature::EventReplay => "play_event",
            Feature::InputVariables => "create_input_variables",
            Feature::SystemCalls => "system_call",
            Feature::Dispatch => "make_dispatcher",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// The error returned by operations a backend does not implement. Panics if `core` is a factory,
/// since the operation is not valid on factories regardless of support.
pub fn unsupported<T>(core: &ArchitectureCore, feature: Feature) -> Result<T> {
    core.binding(feature.operation());
    Err(Error::Unsupported {
        architecture: core.name().to_owned(),
        feature,
    })
}

/// Execution contract of a platform backend.
///
/// Every backend exists in two roles. A *factory* is a stateless prototype held by the
/// [crate::registry::ArchitectureRegistry] and only answers [Self::name], [Self::is_factory],
/// [Self::supports], [Self::match_factory] and [Self::instance_from_factory]. An *instance* is
/// bound to one test case in a [Database] and answers everything else. Calling an operation in
/// the wrong role is a caller defect and panics.
///
/// Operations that are optional for a backend default to returning [Error::Unsupported].
pub trait Architecture {
    fn core(&self) -> &ArchitectureCore;
    fn core_mut(&mut self) -> &mut ArchitectureCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn is_factory(&self) -> bool {
        self.core().is_factory()
    }

    /// Returns true if the configuration selects this backend. Only the `architecture` key is
    /// consulted.
    fn match_factory(&self, config: &Config) -> bool {
        assert!(
            self.is_factory(),
            "match_factory called on a {} instance",
            self.name()
        );
        config.architecture() == Some(self.name())
    }

    /// Create an instance bound to the test case. The instance has this factory's name and
    /// nothing else of its state.
    fn instance_from_factory(
        &self,
        database: Arc<dyn Database>,
        test_case_id: TestCaseId,
        config: &Config,
    ) -> Result<Box<dyn Architecture>>;

    /// Whether the backend implements the optional feature
    fn supports(&self, _feature: Feature) -> bool {
        false
    }

    /// Current lifecycle state. Polls the debug session for termination.
    fn lifecycle(&mut self) -> Lifecycle {
        self.core_mut().lifecycle()
    }

    /// Start the emulator on the test case specimen and attach a debug session. May be called
    /// once per instance.
    fn load(&mut self, temp_directory: &Path) -> Result<LoadReport>;

    /// Byte order of emulated memory. Fixed for the lifetime of the instance.
    fn memory_byte_order(&self) -> ByteOrder;

    fn map_memory(&mut self, _interval: AddressInterval, _permissions: Permissions) -> Result<()> {
        unsupported(self.core(), Feature::MapMemory)
    }

    fn unmap_memory(&mut self, _interval: AddressInterval) -> Result<()> {
        unsupported(self.core(), Feature::UnmapMemory)
    }

    /// Events that, replayed in order, return memory to its current contents.
    fn create_memory_restore_events(&mut self) -> Result<Vec<ExecutionEvent>> {
        unsupported(self.core(), Feature::MemoryRestore)
    }

    /// Events that checkpoint the current memory contents.
    fn create_memory_hash_events(&mut self) -> Result<Vec<ExecutionEvent>> {
        unsupported(self.core(), Feature::MemoryHash)
    }

    /// Events that reconcile the analysis-time memory map with concrete memory before the
    /// instruction at `insn_va` executes.
    fn create_memory_adjust_events(
        &mut self,
        _map: &MemoryMap,
        _insn_va: u64,
    ) -> Result<Vec<ExecutionEvent>> {
        unsupported(self.core(), Feature::MemoryAdjust)
    }

    /// Apply a previously created event to the running specimen.
    fn play_event(&mut self, _event: &ExecutionEvent) -> Result<()> {
        unsupported(self.core(), Feature::EventReplay)
    }

    fn create_input_variables(
        &mut self,
        _partitioner: &dyn Partitioner,
        _ops: &mut dyn RiscOperators,
        _solver: &mut dyn SmtSolver,
    ) -> Result<InputVariables> {
        unsupported(self.core(), Feature::InputVariables)
    }

    /// Record the memory regions the configuration shares with device models. None are shared
    /// unless the configuration has a `shared-memory` list.
    fn configure_shared_memory(&mut self, config: &Config) -> Result<()> {
        let regions = config.shared_memory()?;
        let binding = self.core_mut().binding_mut("configure_shared_memory");
        for region in regions {
            binding.add_shared_memory(region);
        }
        Ok(())
    }

    /// Register the system calls this backend models. Backends without an operating system
    /// register none.
    fn configure_system_calls(&mut self) {}

    /// Apply the effect of the system call about to be executed.
    fn system_call(
        &mut self,
        _partitioner: &dyn Partitioner,
        _ops: &mut dyn RiscOperators,
    ) -> Result<SyscallOutcome> {
        unsupported(self.core(), Feature::SystemCalls)
    }

    /// Recover the program model of the specimen.
    fn partition(
        &self,
        engine: &mut dyn Engine,
        specimen_name: &str,
    ) -> Result<Box<dyn Partitioner>> {
        self.core().binding("partition");
        debug!("partitioning {specimen_name}");
        engine
            .partition(specimen_name)
            .map_err(Error::DependencyError)
    }

    /// Instruction-semantics dispatcher for this backend's instruction set.
    fn make_dispatcher(&self, _ops: &dyn RiscOperators) -> Result<Dispatcher> {
        unsupported(self.core(), Feature::Dispatch)
    }
}

impl fmt::Debug for dyn Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Architecture")
            .field("name", &self.name())
            .field("factory", &self.is_factory())
            .finish()
    }
}

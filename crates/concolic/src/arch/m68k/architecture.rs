use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::architecture::{unsupported, Architecture, ArchitectureCore, Feature, Result};
use crate::config::Config;
use crate::event::ExecutionEvent;
use crate::kernel::{Kernel, NoKernel, SyscallOutcome};
use crate::mem::{AddressInterval, ByteOrder, MemoryMap, Permissions};
use crate::semantics::{
    Dispatcher, InputVariables, InstructionSet, Partitioner, RiscOperators, SmtSolver,
};
use crate::store::{Database, TestCase, TestCaseId};
use crate::supervisor::{EmulatorSupervisor, ExecutionEnvironment, LoadReport};

/// Name the backend registers under and the value of the `architecture` configuration key that
/// selects it
pub const ARCHITECTURE_NAME: &str = "M68kSystem";

/// QEMU full-system emulator for the m68k family
pub const EMULATOR_NAME: &str = "qemu-system-m68k";

pub const WORD_SIZE_BITS: usize = 32;

/// Bare-metal m68k firmware executed by QEMU and controlled through its gdb stub.
///
/// Firmware has no program inputs, so [Architecture::create_input_variables] declares none.
/// System calls are modeled by `K`, which defaults to [NoKernel].
#[derive(Debug)]
pub struct M68kSystem<K = NoKernel>
where
    K: Kernel,
{
    core: ArchitectureCore,
    environment: ExecutionEnvironment,
    kernel: K,
}

impl M68kSystem<NoKernel> {
    /// Factory prototype for bare-metal firmware
    pub fn factory(environment: ExecutionEnvironment) -> Self {
        Self::factory_with_kernel(environment)
    }
}

impl<K: Kernel + Default + 'static> M68kSystem<K> {
    /// Factory prototype whose instances model system calls with `K`
    pub fn factory_with_kernel(environment: ExecutionEnvironment) -> Self {
        Self {
            core: ArchitectureCore::factory(ARCHITECTURE_NAME),
            environment,
            kernel: K::default(),
        }
    }

    /// Create an instance bound to the test case
    pub fn instance(
        environment: ExecutionEnvironment,
        database: Arc<dyn Database>,
        test_case_id: TestCaseId,
        config: &Config,
    ) -> Result<Self> {
        Self::bind(ARCHITECTURE_NAME, environment, database, test_case_id, config)
    }

    /// Create an instance bound to the test case, adding it to the store if it is not there yet
    pub fn instance_for_test_case(
        environment: ExecutionEnvironment,
        database: Arc<dyn Database>,
        test_case: &TestCase,
        config: &Config,
    ) -> Result<Self> {
        let test_case_id = database.test_case_id(test_case)?;
        Self::instance(environment, database, test_case_id, config)
    }

    fn bind(
        name: &str,
        environment: ExecutionEnvironment,
        database: Arc<dyn Database>,
        test_case_id: TestCaseId,
        config: &Config,
    ) -> Result<Self> {
        let mut instance = Self {
            core: ArchitectureCore::instance(name, database, test_case_id)?,
            environment,
            kernel: K::default(),
        };
        instance.configure_system_calls();
        instance.configure_shared_memory(config)?;
        Ok(instance)
    }

    /// Get a reference to the kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<K: Kernel + Default + 'static> Architecture for M68kSystem<K> {
    fn core(&self) -> &ArchitectureCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ArchitectureCore {
        &mut self.core
    }

    fn instance_from_factory(
        &self,
        database: Arc<dyn Database>,
        test_case_id: TestCaseId,
        config: &Config,
    ) -> Result<Box<dyn Architecture>> {
        assert!(
            self.is_factory(),
            "instance_from_factory called on a {} instance",
            self.name()
        );
        let instance = Self::bind(
            self.name(),
            self.environment.clone(),
            database,
            test_case_id,
            config,
        )?;
        Ok(Box::new(instance))
    }

    fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::SystemCalls => !self.kernel.system_calls().is_empty(),
            Feature::MapMemory
            | Feature::UnmapMemory
            | Feature::MemoryRestore
            | Feature::MemoryHash
            | Feature::MemoryAdjust
            | Feature::EventReplay
            | Feature::InputVariables
            | Feature::Dispatch => true,
        }
    }

    fn load(&mut self, temp_directory: &Path) -> Result<LoadReport> {
        let test_case = self.core.begin_load();
        let (supervisor, report) = EmulatorSupervisor::launch(
            &self.environment,
            EMULATOR_NAME,
            test_case.specimen(),
            temp_directory,
        )?;
        self.core.finish_load(supervisor);
        Ok(report)
    }

    fn memory_byte_order(&self) -> ByteOrder {
        self.core.binding("memory_byte_order");
        ByteOrder::BigEndian
    }

    fn map_memory(&mut self, interval: AddressInterval, permissions: Permissions) -> Result<()> {
        self.core.map_region(interval, permissions)
    }

    fn unmap_memory(&mut self, interval: AddressInterval) -> Result<()> {
        self.core.unmap_region(interval)
    }

    fn create_memory_restore_events(&mut self) -> Result<Vec<ExecutionEvent>> {
        self.core.memory_restore_events()
    }

    fn create_memory_hash_events(&mut self) -> Result<Vec<ExecutionEvent>> {
        self.core.memory_hash_events()
    }

    fn create_memory_adjust_events(
        &mut self,
        map: &MemoryMap,
        insn_va: u64,
    ) -> Result<Vec<ExecutionEvent>> {
        self.core.memory_adjust_events(map, insn_va)
    }

    fn play_event(&mut self, event: &ExecutionEvent) -> Result<()> {
        self.core.replay(event)
    }

    fn create_input_variables(
        &mut self,
        _partitioner: &dyn Partitioner,
        _ops: &mut dyn RiscOperators,
        _solver: &mut dyn SmtSolver,
    ) -> Result<InputVariables> {
        self.core.require_loaded("create_input_variables");
        debug!("bare-metal firmware has no program inputs");
        Ok(InputVariables::none())
    }

    fn configure_system_calls(&mut self) {
        let numbers = self.kernel.system_calls();
        let binding = self.core.binding_mut("configure_system_calls");
        for number in numbers {
            binding.register_system_call(number);
        }
    }

    fn system_call(
        &mut self,
        partitioner: &dyn Partitioner,
        ops: &mut dyn RiscOperators,
    ) -> Result<SyscallOutcome> {
        let binding = self.core.require_loaded("system_call");
        if binding.system_calls().is_empty() {
            return unsupported(&self.core, Feature::SystemCalls);
        }

        // No further operations once the specimen has terminated
        self.core.debugger("system_call")?;
        self.kernel.syscall(partitioner, ops)
    }

    fn make_dispatcher(&self, ops: &dyn RiscOperators) -> Result<Dispatcher> {
        self.core.binding("make_dispatcher");
        Ok(Dispatcher::new(InstructionSet::M68k, ops))
    }
}

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::{Error, Result};
use crate::config::SharedMemory;
use crate::debugger::DebugSession;
use crate::kernel::SystemCallTable;
use crate::mem::RegionMap;
use crate::store::{Database, TestCase, TestCaseId};
use crate::supervisor::EmulatorSupervisor;

/// Lifecycle of an architecture instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created but not loaded
    Bound,

    /// [super::Architecture::load] has run. A debug session is attached unless the load degraded.
    Loaded,

    /// The debug session reported that the specimen terminated
    Terminated,
}

/// Test cases with a live instance, keyed by the address of their store.
static LIVE_INSTANCES: Mutex<BTreeSet<(usize, TestCaseId)>> = Mutex::new(BTreeSet::new());

/// Claim on a (store, test case) pair, held for the lifetime of the instance bound to it.
///
/// Instances keep their store alive, so a store address cannot be reused while a lease on it
/// exists.
struct InstanceLease {
    key: (usize, TestCaseId),
}

impl InstanceLease {
    fn acquire(database: &Arc<dyn Database>, test_case_id: TestCaseId) -> Result<Self> {
        let key = (Arc::as_ptr(database).cast::<()>() as usize, test_case_id);
        let mut live = LIVE_INSTANCES
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !live.insert(key) {
            return Err(Error::InstanceExists(test_case_id));
        }
        Ok(Self { key })
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        LIVE_INSTANCES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// State of an instance bound to a test case.
pub struct Binding {
    test_case_id: TestCaseId,
    test_case: Arc<TestCase>,
    pub(super) lifecycle: Lifecycle,
    pub(super) supervisor: Option<EmulatorSupervisor>,
    pub(super) memory: RegionMap,
    pub(super) system_calls: SystemCallTable,
    shared_memory: Vec<SharedMemory>,
    // Fields drop in order: the emulator is gone before the lease is released, and the store
    // outlives the lease
    _lease: InstanceLease,
    database: Arc<dyn Database>,
}

impl Binding {
    /// The shared store this instance records to
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn test_case_id(&self) -> TestCaseId {
        self.test_case_id
    }

    pub fn test_case(&self) -> &Arc<TestCase> {
        &self.test_case
    }

    /// The addressable-memory view
    pub fn memory(&self) -> &RegionMap {
        &self.memory
    }

    /// The emulator started by [super::Architecture::load], if the load got that far
    pub fn emulator(&mut self) -> Option<&mut EmulatorSupervisor> {
        self.supervisor.as_mut()
    }

    pub fn system_calls(&self) -> &SystemCallTable {
        &self.system_calls
    }

    /// Record that the backend models the call number
    pub fn register_system_call(&mut self, number: u64) {
        if self.system_calls.register(number) {
            debug!("test case {} models system call {number}", self.test_case_id);
        }
    }

    /// Memory shared with device models, from the `shared-memory` configuration
    pub fn shared_memory(&self) -> &[SharedMemory] {
        &self.shared_memory
    }

    pub fn add_shared_memory(&mut self, region: SharedMemory) {
        debug!(
            "test case {} shares {} with {}",
            self.test_case_id,
            region.interval,
            region.driver.as_deref().unwrap_or("no driver")
        );
        self.shared_memory.push(region);
    }

    fn poll(&mut self) -> Lifecycle {
        if self.lifecycle == Lifecycle::Loaded {
            let terminated = self
                .supervisor
                .as_mut()
                .and_then(EmulatorSupervisor::debugger)
                .is_some_and(|session| session.is_terminated());
            if terminated {
                warn!("debugger reports test case {} terminated", self.test_case_id);
                self.lifecycle = Lifecycle::Terminated;
            }
        }

        self.lifecycle
    }
}

/// Name and role shared by every backend. A core without a [Binding] is a factory.
pub struct ArchitectureCore {
    name: String,
    binding: Option<Binding>,
}

impl ArchitectureCore {
    /// Core of a factory prototype
    pub fn factory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: None,
        }
    }

    /// Core of an instance bound to the test case. The test case is looked up in the store.
    ///
    /// Returns [Error::InstanceExists] while another instance is bound to the same test case of
    /// the same store.
    pub fn instance(
        name: impl Into<String>,
        database: Arc<dyn Database>,
        test_case_id: TestCaseId,
    ) -> Result<Self> {
        let test_case = database.test_case(test_case_id)?;
        let lease = InstanceLease::acquire(&database, test_case_id)?;
        Ok(Self {
            name: name.into(),
            binding: Some(Binding {
                database,
                test_case_id,
                test_case,
                lifecycle: Lifecycle::Bound,
                supervisor: None,
                memory: RegionMap::new(),
                system_calls: SystemCallTable::default(),
                shared_memory: Vec::new(),
                _lease: lease,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_factory(&self) -> bool {
        self.binding.is_none()
    }

    /// Instance state.
    ///
    /// # Panics
    ///
    /// Panics if this is a factory. `operation` names the caller in the panic message.
    pub fn binding(&self, operation: &str) -> &Binding {
        match &self.binding {
            Some(binding) => binding,
            None => factory_fault(&self.name, operation),
        }
    }

    /// Mutable instance state. See [Self::binding].
    pub fn binding_mut(&mut self, operation: &str) -> &mut Binding {
        match &mut self.binding {
            Some(binding) => binding,
            None => factory_fault(&self.name, operation),
        }
    }

    pub fn lifecycle(&mut self) -> Lifecycle {
        self.binding_mut("lifecycle").poll()
    }

    /// Mark the instance as loaded and return the test case to load.
    ///
    /// # Panics
    ///
    /// Panics if this is a factory or if the instance was already loaded.
    pub fn begin_load(&mut self) -> Arc<TestCase> {
        let binding = self.binding_mut("load");
        assert_eq!(
            binding.lifecycle,
            Lifecycle::Bound,
            "load called more than once for test case {}",
            binding.test_case_id
        );
        binding.lifecycle = Lifecycle::Loaded;
        binding.test_case.clone()
    }

    /// Take ownership of the emulator started by [Self::begin_load]'s caller.
    pub fn finish_load(&mut self, supervisor: EmulatorSupervisor) {
        let binding = self.binding_mut("load");
        debug!("test case {} loaded: {supervisor:?}", binding.test_case_id);
        binding.supervisor = Some(supervisor);
    }

    /// Assert that [super::Architecture::load] has run.
    ///
    /// # Panics
    ///
    /// Panics if this is a factory or the instance was never loaded.
    pub fn require_loaded(&mut self, operation: &str) -> &mut Binding {
        let binding = self.binding_mut(operation);
        assert_ne!(
            binding.lifecycle,
            Lifecycle::Bound,
            "{operation} called before load for test case {}",
            binding.test_case_id
        );
        binding
    }

    /// The live debug session of a loaded instance. Returns [Error::NoDebugSession] when the
    /// load degraded and [Error::Terminated] once the session has reported termination.
    pub fn debugger(&mut self, operation: &str) -> Result<&mut dyn DebugSession> {
        let binding = self.require_loaded(operation);
        live_session(&mut binding.lifecycle, &mut binding.supervisor)
    }
}

pub(super) fn live_session<'a>(
    lifecycle: &mut Lifecycle,
    supervisor: &'a mut Option<EmulatorSupervisor>,
) -> Result<&'a mut dyn DebugSession> {
    if *lifecycle == Lifecycle::Terminated {
        return Err(Error::Terminated);
    }

    let session = supervisor
        .as_mut()
        .and_then(EmulatorSupervisor::debugger)
        .ok_or(Error::NoDebugSession)?;

    if session.is_terminated() {
        warn!("debugger reports the specimen terminated");
        *lifecycle = Lifecycle::Terminated;
        return Err(Error::Terminated);
    }

    Ok(session)
}

fn factory_fault(name: &str, operation: &str) -> ! {
    panic!("{operation} called on the {name} factory; only instances support it")
}

impl fmt::Debug for ArchitectureCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ArchitectureCore");
        s.field("name", &self.name);
        match &self.binding {
            None => s.field("factory", &true),
            Some(binding) => s
                .field("test_case", &binding.test_case_id)
                .field("lifecycle", &binding.lifecycle)
                .field("supervisor", &binding.supervisor),
        };
        s.finish()
    }
}

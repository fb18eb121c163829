use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::arch::m68k::{registers, M68kSystem, WORD_SIZE_BITS};
use crate::architecture::Architecture;
use crate::config::Config;
use crate::debugger::{self, DebugConnector, DebugEndpoint, DebugSession};
use crate::semantics::{
    DependencyError, Engine, Partitioner, RegisterDictionary, RiscOperators, SmtSolver,
    SymbolicVariable,
};
use crate::store::{Database, InMemoryDatabase, Specimen, TestCase, TestCaseId};
use crate::supervisor::{
    ConcreteExecutionProvider, EmulatorProcess, ExecutionEnvironment, LaunchCommand,
};

pub fn initialize_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("log buffer poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber recording everything logged on this thread. Returns the result of
/// `f` and the formatted log lines.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let output = buffer.0.lock().expect("log buffer poisoned");
    let lines = String::from_utf8_lossy(&output)
        .lines()
        .map(str::to_owned)
        .collect();
    (result, lines)
}

/// Returns true if some captured line has the level and contains the message.
pub fn logged(lines: &[String], level: &str, message: &str) -> bool {
    lines
        .iter()
        .any(|line| line.contains(level) && line.contains(message))
}

/// Emulated memory and status shared between a test and the session it hands out.
#[derive(Debug, Default)]
pub struct Target {
    pub memory: RefCell<BTreeMap<u64, u8>>,
    pub terminated: Cell<bool>,
    pub detached: Cell<bool>,
    pub attach_count: Cell<usize>,
    pub endpoints: RefCell<Vec<DebugEndpoint>>,
    pub fail_attach: Cell<bool>,
}

impl Target {
    pub fn write(&self, address: u64, bytes: &[u8]) {
        let mut memory = self.memory.borrow_mut();
        for (offset, byte) in (address..).zip(bytes) {
            memory.insert(offset, *byte);
        }
    }

    pub fn read(&self, address: u64, len: usize) -> Vec<u8> {
        let memory = self.memory.borrow();
        (address..)
            .take(len)
            .map(|offset| memory.get(&offset).copied().unwrap_or(0))
            .collect()
    }
}

pub struct FakeSession {
    target: Rc<Target>,
}

impl DebugSession for FakeSession {
    fn is_terminated(&mut self) -> bool {
        self.target.terminated.get()
    }

    fn read_memory(&mut self, address: u64, buffer: &mut [u8]) -> debugger::Result<usize> {
        buffer.copy_from_slice(&self.target.read(address, buffer.len()));
        Ok(buffer.len())
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> debugger::Result<usize> {
        self.target.write(address, data);
        Ok(data.len())
    }

    fn step(&mut self) -> debugger::Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> debugger::Result<()> {
        Ok(())
    }

    fn detach(&mut self) {
        self.target.detached.set(true);
    }
}

pub struct FakeConnector {
    pub target: Rc<Target>,
}

impl DebugConnector for FakeConnector {
    fn attach(&self, endpoint: &DebugEndpoint) -> debugger::Result<Box<dyn DebugSession>> {
        self.target.endpoints.borrow_mut().push(endpoint.clone());
        if self.target.fail_attach.get() {
            return Err(debugger::Error::Attach {
                host: endpoint.host.clone(),
                port: endpoint.port,
                reason: "connection refused".to_owned(),
            });
        }

        self.target.attach_count.set(self.target.attach_count.get() + 1);
        Ok(Box::new(FakeSession {
            target: self.target.clone(),
        }))
    }
}

/// Status of the processes started by a [FakeProvider]
#[derive(Debug, Default)]
pub struct Processes {
    pub commands: RefCell<Vec<LaunchCommand>>,
    pub running: Cell<usize>,
    pub terminated: Cell<usize>,
}

struct FakeProcess {
    id: u32,
    processes: Rc<Processes>,
    running: bool,
}

impl EmulatorProcess for FakeProcess {
    fn id(&self) -> u32 {
        self.id
    }

    fn is_running(&mut self) -> bool {
        self.running
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.running {
            self.running = false;
            self.processes.running.set(self.processes.running.get() - 1);
            self.processes
                .terminated
                .set(self.processes.terminated.get() + 1);
        }
        Ok(())
    }
}

pub struct FakeProvider {
    /// Directory the emulator is found in, `None` if it is not installed
    pub install_dir: Option<PathBuf>,
    pub processes: Rc<Processes>,
}

impl ConcreteExecutionProvider for FakeProvider {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.install_dir.as_ref().map(|dir| dir.join(program))
    }

    fn spawn(&self, command: &LaunchCommand) -> io::Result<Box<dyn EmulatorProcess>> {
        let mut commands = self.processes.commands.borrow_mut();
        commands.push(command.clone());
        self.processes.running.set(self.processes.running.get() + 1);
        Ok(Box::new(FakeProcess {
            id: 1000 + commands.len() as u32,
            processes: self.processes.clone(),
            running: true,
        }))
    }
}

pub struct FakeOps {
    registers: Arc<RegisterDictionary>,
    next_variable: u64,
}

impl FakeOps {
    pub fn m68k() -> Self {
        Self {
            registers: Arc::new(registers::dictionary()),
            next_variable: 0,
        }
    }
}

impl RiscOperators for FakeOps {
    fn word_size_bits(&self) -> usize {
        WORD_SIZE_BITS
    }

    fn register_dictionary(&self) -> Arc<RegisterDictionary> {
        self.registers.clone()
    }

    fn new_variable(&mut self, nbits: usize, comment: &str) -> SymbolicVariable {
        self.next_variable += 1;
        SymbolicVariable {
            id: self.next_variable,
            nbits,
            comment: comment.to_owned(),
        }
    }
}

#[derive(Default)]
pub struct FakeSolver {
    pub declared: Vec<SymbolicVariable>,
}

impl SmtSolver for FakeSolver {
    fn declare(&mut self, variable: &SymbolicVariable) {
        self.declared.push(variable.clone());
    }
}

pub struct FakePartitioner(pub String);

impl Partitioner for FakePartitioner {
    fn specimen_name(&self) -> &str {
        &self.0
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub fail: bool,
}

impl Engine for FakeEngine {
    fn partition(&mut self, specimen_name: &str) -> Result<Box<dyn Partitioner>, DependencyError> {
        if self.fail {
            Err(format!("cannot disassemble {specimen_name}").into())
        } else {
            Ok(Box::new(FakePartitioner(specimen_name.to_owned())))
        }
    }
}

/// A database with one test case plus substitutes for every collaborator of the m68k backend.
pub struct Harness {
    pub database: Arc<InMemoryDatabase>,
    pub test_case_id: TestCaseId,
    pub target: Rc<Target>,
    pub processes: Rc<Processes>,
    pub temp_dir: assert_fs::TempDir,
    pub environment: ExecutionEnvironment,
}

impl Harness {
    pub fn new(specimen: Specimen) -> Self {
        Self::with_install_dir(specimen, Some(PathBuf::from("/opt/qemu/bin")))
    }

    pub fn with_install_dir(specimen: Specimen, install_dir: Option<PathBuf>) -> Self {
        initialize_logger();
        let database = Arc::new(InMemoryDatabase::new());
        let test_case_id = database
            .insert_test_case(TestCase::new("test", Arc::new(specimen)))
            .expect("failed to insert test case");
        let target = Rc::new(Target::default());
        let processes = Rc::new(Processes::default());
        let environment = ExecutionEnvironment::new(
            Arc::new(FakeProvider {
                install_dir,
                processes: processes.clone(),
            }),
            Arc::new(FakeConnector {
                target: target.clone(),
            }),
        );

        Self {
            database,
            test_case_id,
            target,
            processes,
            temp_dir: assert_fs::TempDir::new().expect("failed to create temp dir"),
            environment,
        }
    }

    pub fn firmware() -> Self {
        Self::new(Specimen::new("images/fw.bin", vec![0x4e, 0x71, 0x4e, 0x75]))
    }

    pub fn factory(&self) -> M68kSystem {
        M68kSystem::factory(self.environment.clone())
    }

    pub fn instance(&self) -> Box<dyn Architecture> {
        self.factory()
            .instance_from_factory(
                self.database.clone(),
                self.test_case_id,
                &Config::for_architecture("M68kSystem"),
            )
            .expect("failed to create instance")
    }

    pub fn loaded(&self) -> Box<dyn Architecture> {
        let mut instance = self.instance();
        instance
            .load(self.temp_dir.path())
            .expect("failed to load specimen");
        instance
    }
}

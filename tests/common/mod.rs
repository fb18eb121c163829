use std::cell::{Cell, RefCell};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use assert_fs::prelude::*;
use concolic_arch::arch::m68k::{M68kSystem, EMULATOR_NAME};
use concolic_arch::debugger::{self, DebugConnector, DebugEndpoint, DebugSession};
use concolic_arch::registry::ArchitectureRegistry;
use concolic_arch::supervisor::{
    search_path, ConcreteExecutionProvider, EmulatorProcess, ExecutionEnvironment, LaunchCommand,
    SystemProvider,
};

pub fn initialize_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Starts real processes, but only finds programs in one directory.
pub struct InstalledEngines {
    bin: PathBuf,
}

impl InstalledEngines {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl ConcreteExecutionProvider for InstalledEngines {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        search_path(program, self.bin.as_os_str())
    }

    fn spawn(&self, command: &LaunchCommand) -> io::Result<Box<dyn EmulatorProcess>> {
        SystemProvider.spawn(command)
    }
}

/// Install a stand-in for the emulator in `bin` which ignores its arguments and idles.
#[cfg(unix)]
pub fn install_idle_engine(bin: &assert_fs::fixture::ChildPath) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    bin.create_dir_all().expect("failed to create bin dir");
    let engine = bin.child(EMULATOR_NAME);
    engine
        .write_str("#!/bin/sh\nexec sleep 60\n")
        .expect("failed to write engine");
    std::fs::set_permissions(engine.path(), std::fs::Permissions::from_mode(0o755))
        .expect("failed to make engine executable");
    engine.path().to_path_buf()
}

/// Memory of the emulated machine, shared with every session attached to it.
#[derive(Debug)]
pub struct Machine {
    pub ram: RefCell<Vec<u8>>,
    pub halted: Cell<bool>,
    pub sessions: Cell<usize>,
    pub detached: Cell<usize>,
}

impl Machine {
    pub fn with_ram(size: usize) -> Rc<Self> {
        Rc::new(Self {
            ram: RefCell::new(vec![0; size]),
            halted: Cell::new(false),
            sessions: Cell::new(0),
            detached: Cell::new(0),
        })
    }

    pub fn poke(&self, address: u64, bytes: &[u8]) {
        let start = address as usize;
        self.ram.borrow_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn peek(&self, address: u64, len: usize) -> Vec<u8> {
        let start = address as usize;
        self.ram.borrow()[start..start + len].to_vec()
    }
}

struct RamSession {
    machine: Rc<Machine>,
}

impl RamSession {
    fn range(&self, address: u64, len: usize) -> debugger::Result<std::ops::Range<usize>> {
        let size = self.machine.ram.borrow().len();
        usize::try_from(address)
            .ok()
            .filter(|&start| start <= size)
            .map(|start| start..size.min(start + len))
            .ok_or_else(|| debugger::Error::Protocol(format!("E14: bad address {address:#x}")))
    }
}

impl DebugSession for RamSession {
    fn is_terminated(&mut self) -> bool {
        self.machine.halted.get()
    }

    fn read_memory(&mut self, address: u64, buffer: &mut [u8]) -> debugger::Result<usize> {
        let range = self.range(address, buffer.len())?;
        let len = range.len();
        buffer[..len].copy_from_slice(&self.machine.ram.borrow()[range]);
        Ok(len)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> debugger::Result<usize> {
        let range = self.range(address, data.len())?;
        let len = range.len();
        self.machine.ram.borrow_mut()[range].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn step(&mut self) -> debugger::Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> debugger::Result<()> {
        Ok(())
    }

    fn detach(&mut self) {
        self.machine.detached.set(self.machine.detached.get() + 1);
    }
}

/// Attaches sessions to a [Machine] regardless of the endpoint.
pub struct Loopback {
    pub machine: Rc<Machine>,
    pub endpoints: RefCell<Vec<DebugEndpoint>>,
}

impl DebugConnector for Loopback {
    fn attach(&self, endpoint: &DebugEndpoint) -> debugger::Result<Box<dyn DebugSession>> {
        self.endpoints.borrow_mut().push(endpoint.clone());
        self.machine.sessions.set(self.machine.sessions.get() + 1);
        Ok(Box::new(RamSession {
            machine: self.machine.clone(),
        }))
    }
}

/// A registry containing the m68k backend wired to engines found in `bin`.
pub fn registry(bin: &Path, connector: Arc<Loopback>) -> ArchitectureRegistry {
    let environment = ExecutionEnvironment::new(Arc::new(InstalledEngines::new(bin)), connector);
    let mut registry = ArchitectureRegistry::new();
    registry
        .register(Box::new(M68kSystem::factory(environment)))
        .expect("failed to register m68k backend");
    registry
}

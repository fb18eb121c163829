//! Supervision of the external emulator that executes the specimen concretely.

use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use tracing::{debug, error};

use crate::debugger::{self, DebugConnector, DebugEndpoint, DebugSession};
use crate::store::Specimen;

/// File name used for the materialized specimen when the specimen name has no usable file name
pub const DEFAULT_EXECUTABLE_NAME: &str = "a.out";

/// A running emulator process.
pub trait EmulatorProcess {
    /// Operating system process id
    fn id(&self) -> u32;

    /// Returns false once the process has exited
    fn is_running(&mut self) -> bool;

    /// Stop the process and reap it. Terminating an exited process is not an error.
    fn terminate(&mut self) -> io::Result<()>;
}

/// Capability to find and start the concrete execution engine.
pub trait ConcreteExecutionProvider {
    /// Resolve an executable name to a path
    fn locate(&self, program: &str) -> Option<PathBuf>;

    fn spawn(&self, command: &LaunchCommand) -> io::Result<Box<dyn EmulatorProcess>>;
}

/// Collaborators an architecture needs to run a specimen.
#[derive(Clone)]
pub struct ExecutionEnvironment {
    pub provider: Arc<dyn ConcreteExecutionProvider>,
    pub connector: Arc<dyn DebugConnector>,
}

impl ExecutionEnvironment {
    pub fn new(
        provider: Arc<dyn ConcreteExecutionProvider>,
        connector: Arc<dyn DebugConnector>,
    ) -> Self {
        Self {
            provider,
            connector,
        }
    }

    /// Environment that starts real processes found on `$PATH`
    pub fn system(connector: Arc<dyn DebugConnector>) -> Self {
        Self::new(Arc::new(SystemProvider), connector)
    }
}

impl fmt::Debug for ExecutionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEnvironment").finish_non_exhaustive()
    }
}

/// Program and arguments used to start an emulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Full-system QEMU invocation: no display, gdb stub on [debugger::DEBUG_PORT], halted before
    /// the first instruction, exit instead of rebooting, `image` loaded as the kernel.
    pub fn qemu_system(engine: impl Into<PathBuf>, image: &Path) -> Self {
        Self {
            program: engine.into(),
            args: [
                "-display",
                "none",
                "-s",
                "-S",
                "-no-reboot",
                "-kernel",
            ]
            .into_iter()
            .map(str::to_owned)
            .chain(std::iter::once(image.to_string_lossy().into_owned()))
            .collect(),
        }
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bourne_escape(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", bourne_escape(arg))?;
        }
        Ok(())
    }
}

/// Quote `word` so that a Bourne shell reads it back unchanged.
pub fn bourne_escape(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if plain {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r#"'\''"#))
    }
}

/// Starts engines as child processes of this process.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemProvider;

impl ConcreteExecutionProvider for SystemProvider {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        search_path(program, std::env::var_os("PATH")?.as_os_str())
    }

    fn spawn(&self, command: &LaunchCommand) -> io::Result<Box<dyn EmulatorProcess>> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Box::new(ChildProcess { child }))
    }
}

/// Find `program` in the directories listed by `path`. Names containing a path separator are
/// checked as given.
pub fn search_path(program: &str, path: &OsStr) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    if program.contains(std::path::MAIN_SEPARATOR) {
        let candidate = PathBuf::from(program);
        return is_executable(&candidate).then_some(candidate);
    }

    std::env::split_paths(path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// An [EmulatorProcess] backed by a [std::process::Child]. The child is killed and reaped when
/// dropped.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl EmulatorProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.is_running() {
            self.child.kill()?;
        }
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            error!("failed to terminate emulator process {}: {err}", self.child.id());
        }
    }
}

/// Location the specimen is written to inside `temp_directory`.
pub fn executable_path(temp_directory: &Path, specimen_name: &str) -> PathBuf {
    let base = Path::new(specimen_name)
        .file_name()
        .filter(|name| !name.is_empty())
        .unwrap_or(OsStr::new(DEFAULT_EXECUTABLE_NAME));
    temp_directory.join(base)
}

/// Write the specimen content to `path` and make it accessible to its owner. Failures are logged
/// rather than returned; returns true if a non-empty executable was written.
pub fn materialize(path: &Path, content: &[u8]) -> bool {
    let written = match File::create(path) {
        Err(err) => {
            error!("cannot write to {}: {err}", path.display());
            false
        }
        Ok(_) if content.is_empty() => {
            error!("specimen content is empty");
            false
        }
        Ok(mut file) => match file.write_all(content) {
            Ok(()) => true,
            Err(err) => {
                error!("cannot write to {}: {err}", path.display());
                false
            }
        },
    };

    if let Err(err) = set_owner_all(path) {
        error!("cannot set permissions on {}: {err}", path.display());
    }

    written
}

#[cfg(unix)]
fn set_owner_all(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_owner_all(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

/// What happened while loading a specimen into the emulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadReport {
    /// Where the specimen was written
    pub executable: PathBuf,

    /// Whether a non-empty specimen was written to [Self::executable]
    pub artifact_written: bool,

    /// Resolved path of the emulator executable
    pub engine: Option<PathBuf>,

    /// Process id of the emulator, if one was started
    pub process_id: Option<u32>,

    /// Whether a debug session is attached
    pub attached: bool,
}

/// Owns the emulator process and the debug session attached to it. Dropping the supervisor
/// detaches the session and then terminates the process.
#[derive(Default)]
pub struct EmulatorSupervisor {
    process: Option<Box<dyn EmulatorProcess>>,
    debugger: Option<Box<dyn DebugSession>>,
}

impl EmulatorSupervisor {
    /// Materialize the specimen in `temp_directory`, start `engine_name` on it and attach a debug
    /// session. Environment problems are logged and leave the supervisor without a process or
    /// session. A failed attach is returned as an error after the process has been released.
    ///
    /// # Panics
    ///
    /// Panics if a newly attached session already reports termination.
    pub fn launch(
        environment: &ExecutionEnvironment,
        engine_name: &str,
        specimen: &Specimen,
        temp_directory: &Path,
    ) -> debugger::Result<(Self, LoadReport)> {
        let executable = executable_path(temp_directory, specimen.name());
        let artifact_written = materialize(&executable, specimen.content());

        let engine = environment.provider.locate(engine_name);
        if engine.is_none() {
            error!("cannot find {engine_name} in your executable search path ($PATH)");
        }

        let mut supervisor = Self::default();
        if let Some(engine) = &engine {
            let command = LaunchCommand::qemu_system(engine, &executable);
            debug!("executing emulator for {engine_name}: {command}");
            match environment.provider.spawn(&command) {
                Ok(process) => supervisor.process = Some(process),
                Err(err) => error!("failed to start {}: {err}", engine.display()),
            }
        }

        let process_id = supervisor.process.as_ref().map(|process| process.id());
        let running = supervisor
            .process
            .as_mut()
            .is_some_and(|process| process.is_running());

        if artifact_written && running {
            let endpoint = DebugEndpoint::local(&executable);
            debug!(
                "attaching debugger to {}:{} for {}",
                endpoint.host,
                endpoint.port,
                endpoint.executable.display()
            );

            // Dropping the supervisor on error or panic detaches and releases the process
            let session = supervisor
                .debugger
                .insert(environment.connector.attach(&endpoint)?);
            assert!(
                !session.is_terminated(),
                "debugger reports termination immediately after attaching to {}:{}",
                endpoint.host,
                endpoint.port
            );
        } else if running {
            error!("no runnable specimen at {}; not attaching debugger", executable.display());
        }

        let report = LoadReport {
            executable,
            artifact_written,
            engine,
            process_id,
            attached: supervisor.debugger.is_some(),
        };

        Ok((supervisor, report))
    }

    pub fn debugger(&mut self) -> Option<&mut (dyn DebugSession + 'static)> {
        self.debugger.as_deref_mut()
    }

    pub fn process(&mut self) -> Option<&mut (dyn EmulatorProcess + 'static)> {
        self.process.as_deref_mut()
    }

    /// Detach the session and terminate the process. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.debugger.take() {
            session.detach();
        }

        if let Some(mut process) = self.process.take() {
            let id = process.id();
            match process.terminate() {
                Ok(()) => debug!("emulator process {id} terminated"),
                Err(err) => error!("failed to terminate emulator process {id}: {err}"),
            }
        }
    }
}

impl Drop for EmulatorSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for EmulatorSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatorSupervisor")
            .field("process", &self.process.as_ref().map(|process| process.id()))
            .field("attached", &self.debugger.is_some())
            .finish()
    }
}

//! Seam to the remote debug protocol client. The wire protocol is implemented elsewhere; this
//! module only describes the operations the architecture layer issues through it.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to attach to {host}:{port}: {reason}")]
    Attach {
        host: String,
        port: u16,
        reason: String,
    },

    /// The session transferred fewer bytes than requested
    #[error("short memory transfer at {address:#x}: expected {expected} byte(s), got {actual}")]
    ShortTransfer {
        address: u64,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("debugger error: {0}")]
    Protocol(String),
}

/// Host the emulator publishes its debug stub on
pub const DEBUG_HOST: &str = "localhost";

/// Port the emulator publishes its debug stub on. This is the port implied by QEMU's `-s` flag.
pub const DEBUG_PORT: u16 = 1234;

/// Where to attach, and which executable to resolve symbols against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugEndpoint {
    pub executable: PathBuf,
    pub host: String,
    pub port: u16,
}

impl DebugEndpoint {
    /// Endpoint published by a locally supervised emulator
    pub fn local(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            host: DEBUG_HOST.to_owned(),
            port: DEBUG_PORT,
        }
    }
}

/// A live control channel to a running emulator.
pub trait DebugSession {
    /// Returns true once the debugged program has exited or the connection was lost. Responsiveness
    /// timeouts are the responsibility of the implementation and are reported as termination.
    fn is_terminated(&mut self) -> bool;

    /// Read into `buffer` starting at `address`. Returns the number of bytes read.
    fn read_memory(&mut self, address: u64, buffer: &mut [u8]) -> Result<usize>;

    /// Write `data` starting at `address`. Returns the number of bytes written.
    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize>;

    /// Execute a single instruction
    fn step(&mut self) -> Result<()>;

    /// Continue execution until the next stop
    fn resume(&mut self) -> Result<()>;

    /// Close the session. Called exactly once, before the emulator process is terminated.
    fn detach(&mut self);
}

/// Opens [DebugSession]s against an endpoint.
pub trait DebugConnector {
    fn attach(&self, endpoint: &DebugEndpoint) -> Result<Box<dyn DebugSession>>;
}

/// Fill `buffer` from the session, failing if the session returns fewer bytes.
pub fn read_exact(session: &mut dyn DebugSession, address: u64, buffer: &mut [u8]) -> Result<()> {
    let actual = session.read_memory(address, buffer)?;
    if actual == buffer.len() {
        Ok(())
    } else {
        Err(Error::ShortTransfer {
            address,
            expected: buffer.len(),
            actual,
        })
    }
}

/// Write all of `data` through the session, failing if the session accepts fewer bytes.
pub fn write_all(session: &mut dyn DebugSession, address: u64, data: &[u8]) -> Result<()> {
    let actual = session.write_memory(address, data)?;
    if actual == data.len() {
        Ok(())
    } else {
        Err(Error::ShortTransfer {
            address,
            expected: data.len(),
            actual,
        })
    }
}

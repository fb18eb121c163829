//! Architecture layer of a concolic testing framework. A backend implements the
//! [architecture::Architecture] contract for one platform: it starts the specimen in an
//! instruction-set emulator, attaches a debug session to it and bridges the concrete state it
//! observes into the symbolic domain of the concolic driver.
//!
//! ### Factories and instances
//!
//! Backends are registered in an [registry::ArchitectureRegistry] as stateless factory
//! prototypes. The driver selects one with a [config::Config] and creates an instance bound to a
//! single test case. The instance owns the emulator process and the debug session, which are
//! released when the instance is dropped.
//!
//! ### Collaborators
//!
//! The remote debug client, disassembler, instruction semantics and constraint solver are
//! provided by the caller through the traits in [debugger] and [semantics]. The emulator is
//! started through a [supervisor::ConcreteExecutionProvider] so that it can be substituted.

/// Platform backends.
pub mod arch;

/// The backend contract and the state shared by every backend.
pub mod architecture;

pub mod config;
pub mod debugger;
pub mod event;

/// System call modeling.
pub mod kernel;

/// Address intervals, permissions and memory views.
pub mod mem;

pub mod registry;
pub mod semantics;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::mem::{AddressInterval, Permissions};

/// SHA-256 digest of a memory region. Only used to detect divergence between runs of the same
/// test session.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryDigest([u8; 32]);

impl MemoryDigest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(bytes));
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MemoryDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryDigest({self})")
    }
}

impl fmt::Display for MemoryDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The state change recorded by an [ExecutionEvent].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    /// Make the interval addressable with the given permissions
    MapMemory {
        interval: AddressInterval,
        permissions: Permissions,
    },

    /// Remove the interval from the addressable memory
    UnmapMemory { interval: AddressInterval },

    /// Write bytes starting at the address
    WriteMemory { address: u64, bytes: Vec<u8> },

    /// Checkpoint: the interval is expected to hash to the digest
    HashMemory {
        interval: AddressInterval,
        digest: MemoryDigest,
    },
}

/// A replayable unit of recorded state change. Events are replayed in the order they were
/// created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Address of the instruction before which the event applies. Events without a location
    /// apply before execution begins.
    pub location: Option<u64>,
    pub action: EventAction,
}

impl ExecutionEvent {
    pub fn map_memory(interval: AddressInterval, permissions: Permissions) -> Self {
        Self {
            location: None,
            action: EventAction::MapMemory {
                interval,
                permissions,
            },
        }
    }

    pub fn unmap_memory(interval: AddressInterval) -> Self {
        Self {
            location: None,
            action: EventAction::UnmapMemory { interval },
        }
    }

    pub fn write_memory(address: u64, bytes: Vec<u8>) -> Self {
        Self {
            location: None,
            action: EventAction::WriteMemory { address, bytes },
        }
    }

    pub fn hash_memory(interval: AddressInterval, bytes: &[u8]) -> Self {
        Self {
            location: None,
            action: EventAction::HashMemory {
                interval,
                digest: MemoryDigest::of(bytes),
            },
        }
    }

    /// Attach the event to the instruction at `address`
    pub fn at(mut self, address: u64) -> Self {
        self.location = Some(address);
        self
    }
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = self.location {
            write!(f, "@{location:#010x} ")?;
        }

        match &self.action {
            EventAction::MapMemory {
                interval,
                permissions,
            } => write!(f, "map {interval} {permissions}"),
            EventAction::UnmapMemory { interval } => write!(f, "unmap {interval}"),
            EventAction::WriteMemory { address, bytes } => {
                write!(f, "write {len} byte(s) at {address:#010x}", len = bytes.len())
            }
            EventAction::HashMemory { interval, digest } => write!(f, "hash {interval} = {digest}"),
        }
    }
}

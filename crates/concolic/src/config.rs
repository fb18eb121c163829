use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::mem::AddressInterval;

/// Key of the configuration entry naming the architecture backend
pub const ARCHITECTURE_KEY: &str = "architecture";

/// Key of the list of memory regions shared between the specimen and device models
pub const SHARED_MEMORY_KEY: &str = "shared-memory";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("configuration must be a mapping, found {0}")]
    NotAMapping(String),

    #[error("invalid {key} entry: {source}")]
    InvalidEntry {
        key: &'static str,
        source: serde_yaml::Error,
    },

    #[error("shared memory at {address:#x} with size {size:#x} is empty or wraps the address space")]
    InvalidSharedMemory { address: u64, size: u64 },

    #[error("shared memory {0} overlaps {1}")]
    OverlappingSharedMemory(AddressInterval, AddressInterval),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SharedMemoryEntry {
    address: u64,
    size: u64,
    #[serde(default)]
    driver: Option<String>,
}

/// Memory the specimen shares with a device model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedMemory {
    pub interval: AddressInterval,

    /// Device model serving accesses to the region, if one is named
    pub driver: Option<String>,
}

/// Configuration descriptor for a concolic run. Backends are selected by the `architecture`
/// key; every other key is left for the selected backend to interpret.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    root: Mapping,
}

impl Config {
    pub fn from_mapping(root: Mapping) -> Self {
        Self { root }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, Error> {
        match serde_yaml::from_str::<Value>(text)? {
            Value::Mapping(root) => Ok(Self { root }),
            Value::Null => Ok(Self::default()),
            other => Err(Error::NotAMapping(describe(&other).to_owned())),
        }
    }

    /// Configuration with only the architecture name set
    pub fn for_architecture(name: impl Into<String>) -> Self {
        let mut root = Mapping::new();
        root.insert(ARCHITECTURE_KEY.into(), Value::String(name.into()));
        Self { root }
    }

    /// Name of the requested architecture. `None` if the key is missing or is not a string.
    pub fn architecture(&self) -> Option<&str> {
        self.get(ARCHITECTURE_KEY).and_then(Value::as_str)
    }

    /// Regions listed under `shared-memory`, sorted by address. Each entry has an `address`, a
    /// `size` in bytes and optionally a `driver`. A missing or null list shares nothing.
    pub fn shared_memory(&self) -> Result<Vec<SharedMemory>, Error> {
        let entries: Vec<SharedMemoryEntry> = match self.get(SHARED_MEMORY_KEY) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(value) => {
                serde_yaml::from_value(value.clone()).map_err(|source| Error::InvalidEntry {
                    key: SHARED_MEMORY_KEY,
                    source,
                })?
            }
        };

        let mut regions = entries
            .into_iter()
            .map(|entry| {
                let interval = AddressInterval::from_base_size(entry.address, entry.size).ok_or(
                    Error::InvalidSharedMemory {
                        address: entry.address,
                        size: entry.size,
                    },
                )?;
                Ok(SharedMemory {
                    interval,
                    driver: entry.driver,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        regions.sort_by_key(|region| region.interval);
        for pair in regions.windows(2) {
            if pair[0].interval.overlaps(&pair[1].interval) {
                return Err(Error::OverlappingSharedMemory(
                    pair[1].interval,
                    pair[0].interval,
                ));
            }
        }

        Ok(regions)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.root.insert(Value::String(key.into()), value.into())
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

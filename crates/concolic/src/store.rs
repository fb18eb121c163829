use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::event::ExecutionEvent;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("test case {0} does not exist")]
    UnknownTestCase(TestCaseId),

    /// The store lock was poisoned by a panicking writer
    #[error("database is unavailable: {0}")]
    Unavailable(String),
}

/// The binary under test. Content is never modified once created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Specimen {
    name: String,
    content: Vec<u8>,
}

impl Specimen {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// Identifier of a test case in a [Database]. Ids are never zero.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestCaseId(u64);

impl TestCaseId {
    pub fn new(id: u64) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One concolic run: a specimen plus the concrete inputs it is run with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub specimen: Arc<Specimen>,
    pub arguments: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub stdin: Vec<u8>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, specimen: Arc<Specimen>) -> Self {
        Self {
            name: name.into(),
            specimen,
            ..Default::default()
        }
    }

    pub fn specimen(&self) -> &Specimen {
        &self.specimen
    }
}

/// Persistent store of test cases and the events recorded while running them. The store is
/// shared by every architecture instance and outlives all of them.
pub trait Database {
    fn insert_test_case(&self, test_case: TestCase) -> Result<TestCaseId>;
    fn test_case(&self, id: TestCaseId) -> Result<Arc<TestCase>>;

    /// Id of the stored test case equal to `test_case`, inserting a copy if there is none.
    fn test_case_id(&self, test_case: &TestCase) -> Result<TestCaseId>;

    /// Append events recorded for the test case.
    fn save_events(&self, id: TestCaseId, events: &[ExecutionEvent]) -> Result<()>;

    /// All events recorded for the test case in the order they were saved.
    fn events(&self, id: TestCaseId) -> Result<Vec<ExecutionEvent>>;
}

#[derive(Debug, Default)]
struct Tables {
    test_cases: BTreeMap<TestCaseId, Arc<TestCase>>,
    events: BTreeMap<TestCaseId, Vec<ExecutionEvent>>,
    next_id: u64,
}

impl Tables {
    fn insert(&mut self, test_case: TestCase) -> TestCaseId {
        self.next_id += 1;
        let id = TestCaseId(self.next_id);
        self.test_cases.insert(id, Arc::new(test_case));
        id
    }
}

/// A [Database] held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    tables: RwLock<Tables>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> Error {
    Error::Unavailable(err.to_string())
}

impl Database for InMemoryDatabase {
    fn insert_test_case(&self, test_case: TestCase) -> Result<TestCaseId> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        Ok(tables.insert(test_case))
    }

    fn test_case(&self, id: TestCaseId) -> Result<Arc<TestCase>> {
        let tables = self.tables.read().map_err(poisoned)?;
        tables
            .test_cases
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownTestCase(id))
    }

    fn test_case_id(&self, test_case: &TestCase) -> Result<TestCaseId> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let existing = tables
            .test_cases
            .iter()
            .find(|(_, stored)| stored.as_ref() == test_case)
            .map(|(&id, _)| id);
        if let Some(id) = existing {
            return Ok(id);
        }

        Ok(tables.insert(test_case.clone()))
    }

    fn save_events(&self, id: TestCaseId, events: &[ExecutionEvent]) -> Result<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        if !tables.test_cases.contains_key(&id) {
            return Err(Error::UnknownTestCase(id));
        }

        tables
            .events
            .entry(id)
            .or_default()
            .extend_from_slice(events);
        Ok(())
    }

    fn events(&self, id: TestCaseId) -> Result<Vec<ExecutionEvent>> {
        let tables = self.tables.read().map_err(poisoned)?;
        if !tables.test_cases.contains_key(&id) {
            return Err(Error::UnknownTestCase(id));
        }

        Ok(tables.events.get(&id).cloned().unwrap_or_default())
    }
}

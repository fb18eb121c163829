use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::architecture::{Architecture, Error, Result};
use crate::config::Config;
use crate::store::{Database, TestCase, TestCaseId};

/// Factory prototypes of the available backends, keyed by name.
#[derive(Debug, Default)]
pub struct ArchitectureRegistry {
    factories: BTreeMap<String, Box<dyn Architecture>>,
}

impl ArchitectureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory prototype. Names must be unique.
    ///
    /// # Panics
    ///
    /// Panics if `factory` is an instance rather than a factory.
    pub fn register(&mut self, factory: Box<dyn Architecture>) -> Result<()> {
        assert!(
            factory.is_factory(),
            "cannot register the {} instance as a factory",
            factory.name()
        );

        let name = factory.name().to_owned();
        if self.factories.contains_key(&name) {
            return Err(Error::DuplicateArchitecture(name));
        }

        debug!("registered architecture {name}");
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// The factory selected by the configuration
    pub fn find(&self, config: &Config) -> Option<&dyn Architecture> {
        self.factories
            .values()
            .map(Box::as_ref)
            .find(|factory| factory.match_factory(config))
    }

    /// Create the instance of the backend selected by the configuration, bound to the test case.
    pub fn instance(
        &self,
        database: Arc<dyn Database>,
        test_case_id: TestCaseId,
        config: &Config,
    ) -> Result<Box<dyn Architecture>> {
        let factory = self
            .find(config)
            .ok_or_else(|| Error::NoMatchingArchitecture {
                name: config.architecture().map(str::to_owned),
            })?;

        debug!(
            "creating {} instance for test case {test_case_id}",
            factory.name()
        );
        factory.instance_from_factory(database, test_case_id, config)
    }

    /// Like [Self::instance], adding the test case to the store if it is not there yet.
    pub fn instance_for_test_case(
        &self,
        database: Arc<dyn Database>,
        test_case: &TestCase,
        config: &Config,
    ) -> Result<Box<dyn Architecture>> {
        let test_case_id = database.test_case_id(test_case)?;
        self.instance(database, test_case_id, config)
    }
}

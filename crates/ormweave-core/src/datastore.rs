//! Datastore registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::adapter::Adapter;
use crate::error::{Error, Result};

/// Adapters keyed by datastore name.
#[derive(Clone, Default)]
pub struct Datastores {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl Datastores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter behind a datastore name.
    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(name.into(), adapter);
    }

    pub fn with(mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        self.register(name, adapter);
        self
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn Adapter>> {
        self.adapters
            .get(name)
            .ok_or_else(|| Error::DatastoreNotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl fmt::Debug for Datastores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Datastores").field("names", &names).finish()
    }
}

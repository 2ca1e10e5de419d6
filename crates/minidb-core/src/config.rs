//! Store configuration

use serde::{Deserialize, Serialize};

use crate::engine::Record;
use crate::error::{Error, Result};

/// Default key path for records.
pub const DEFAULT_KEY_PATH: &str = "id";

/// Default suffix appended to the database name to name its collection.
pub const DEFAULT_COLLECTION_SUFFIX: &str = "_store";

fn default_key_path() -> String {
    DEFAULT_KEY_PATH.to_string()
}

fn default_collection_suffix() -> String {
    DEFAULT_COLLECTION_SUFFIX.to_string()
}

/// Everything needed to open a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Name of the database
    pub database_name: String,
    /// Record field holding the primary key
    #[serde(default = "default_key_path")]
    pub key_path: String,
    /// Appended to `database_name` to name the collection
    #[serde(default = "default_collection_suffix")]
    pub collection_suffix: String,
    /// Records written when the collection is first created
    #[serde(default)]
    pub initial_records: Vec<Record>,
}

impl StoreConfig {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            key_path: default_key_path(),
            collection_suffix: default_collection_suffix(),
            initial_records: Vec::new(),
        }
    }

    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = key_path.into();
        self
    }

    pub fn with_collection_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.collection_suffix = suffix.into();
        self
    }

    pub fn with_initial_records(mut self, records: Vec<Record>) -> Self {
        self.initial_records = records;
        self
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Name of the collection this store uses.
    pub fn collection_name(&self) -> String {
        format!("{}{}", self.database_name, self.collection_suffix)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_name.is_empty() {
            return Err(Error::Config("database_name must not be empty".into()));
        }
        if self.key_path.is_empty() {
            return Err(Error::Config("key_path must not be empty".into()));
        }
        Ok(())
    }
}

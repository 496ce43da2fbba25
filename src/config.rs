use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::storage::page::PAGE_SIZE;

/// whether index pages are checked after each mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    /// panic on the first broken invariant
    Assert,
    Off,
}

impl Default for Validation {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Validation::Assert
        } else {
            Validation::Off
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// pages mapped when a store is created; the region doubles from there
    pub initial_pages: u64,

    pub validation: Validation,

    pub sync_on_close: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_pages: 4,                       // 16 KB
            validation: Validation::default(),
            sync_on_close: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&contents)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        if self.initial_pages == 0 {
            return Err(StoreError::InvalidConfig(
                "initial_pages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// bytes to map initially; never less than the header page plus the
    /// root index page
    pub fn initial_capacity(&self) -> u64 {
        self.initial_pages.max(2) * PAGE_SIZE as u64
    }
}

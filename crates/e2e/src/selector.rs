//! Selector chains and the declarative YAML catalog that names them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{HealError, HealResult};

/// Primary selector plus the alternatives tried when it stops matching.
///
/// Selectors are opaque strings in whatever syntax the engine accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorChain {
    pub primary: String,

    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl SelectorChain {
    pub fn new(primary: impl Into<String>, fallbacks: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks,
        }
    }

    pub fn single(primary: impl Into<String>) -> Self {
        Self::new(primary, Vec::new())
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallbacks.push(fallback.into());
        self
    }

    /// Primary first, then fallbacks in order
    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// Logical element names mapped to their selector chains
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorCatalog {
    #[serde(default)]
    pub elements: BTreeMap<String, SelectorChain>,
}

impl SelectorCatalog {
    /// Parse a catalog from YAML string
    pub fn from_yaml(yaml: &str) -> HealResult<Self> {
        serde_yaml::from_str(yaml).map_err(HealError::from)
    }

    /// Parse a catalog from a YAML file
    pub fn from_file(path: &Path) -> HealResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn chain(&self, name: &str) -> HealResult<&SelectorChain> {
        self.elements
            .get(name)
            .ok_or_else(|| HealError::UnknownChain(name.to_string()))
    }

    pub fn insert(&mut self, name: impl Into<String>, chain: SelectorChain) {
        self.elements.insert(name.into(), chain);
    }
}

//! Shape rules: how a template recognizes contracts it describes.

use std::collections::BTreeSet;

use alloy_primitives::{Address, B256};
use anyhow::Result;

use crate::source::ContractSources;

/// Pluggable shape rule.
///
/// A template carries any number of rules and matches a contract when at
/// least one of them does. Rules only look at data the source registry has
/// already returned, so they are synchronous.
///
/// # Example
///
/// ```rust,ignore
/// pub struct NamedRule(&'static str);
///
/// impl ShapeRule for NamedRule {
///     fn name(&self) -> &str { "contract-name" }
///
///     fn matches(&self, _address: Address, sources: &ContractSources) -> anyhow::Result<bool> {
///         Ok(sources.name == self.0)
///     }
/// }
/// ```
pub trait ShapeRule: Send + Sync {
    /// Rule name, used in logs and in [`TemplateMatch`](super::TemplateMatch).
    fn name(&self) -> &str;

    /// Whether `sources` fit this rule.
    ///
    /// An `Err` is treated as "no match" by the template service and logged.
    fn matches(&self, address: Address, sources: &ContractSources) -> Result<bool>;
}

/// Matches when any source bundle hashes to one of the known hashes.
#[derive(Debug, Clone, Default)]
pub struct SourceHashRule {
    hashes: BTreeSet<B256>,
}

impl SourceHashRule {
    pub fn new(hashes: impl IntoIterator<Item = B256>) -> Self {
        Self {
            hashes: hashes.into_iter().collect(),
        }
    }
}

impl ShapeRule for SourceHashRule {
    fn name(&self) -> &str {
        "source-hash"
    }

    fn matches(&self, _address: Address, sources: &ContractSources) -> Result<bool> {
        if !sources.is_verified {
            return Ok(false);
        }
        Ok(sources
            .source_hashes()
            .iter()
            .any(|hash| self.hashes.contains(hash)))
    }
}

/// Matches when the merged ABI exposes every listed function.
#[derive(Debug, Clone)]
pub struct AbiFunctionsRule {
    functions: Vec<String>,
}

impl AbiFunctionsRule {
    pub fn new<I, S>(functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            functions: functions.into_iter().map(Into::into).collect(),
        }
    }
}

impl ShapeRule for AbiFunctionsRule {
    fn name(&self) -> &str {
        "abi-functions"
    }

    fn matches(&self, _address: Address, sources: &ContractSources) -> Result<bool> {
        if self.functions.is_empty() {
            anyhow::bail!("abi-functions rule has no functions to look for");
        }
        Ok(self
            .functions
            .iter()
            .all(|function| sources.has_function(function)))
    }
}

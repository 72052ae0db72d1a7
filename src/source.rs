//! Source registry interface (ABI, verification status and source bundles).

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{keccak256, Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Verified source files of one contract (the address itself or an implementation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBundle {
    pub name: String,
    pub address: Address,
    /// File path → file content.
    pub files: BTreeMap<String, String>,
}

impl SourceBundle {
    /// Stable hash of the bundle: keccak256 over the files in path order.
    ///
    /// Used by shape matching, so two deployments of the same sources hash equal
    /// regardless of their address or name.
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::new();
        for (path, content) in &self.files {
            buf.extend_from_slice(path.as_bytes());
            buf.push(0);
            buf.extend_from_slice(content.as_bytes());
            buf.push(0);
        }
        keccak256(buf)
    }
}

/// Everything the source registry knows about an address and its implementations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSources {
    pub name: String,
    pub is_verified: bool,
    /// Merged ABI of the address and its implementations (human-readable entries).
    pub abi: Vec<String>,
    /// ABI per address.
    pub abis: BTreeMap<Address, Vec<String>>,
    pub source_bundles: Vec<SourceBundle>,
}

impl ContractSources {
    pub fn has_function(&self, name: &str) -> bool {
        self.abi
            .iter()
            .any(|entry| abi_function_name(entry) == Some(name))
    }

    pub fn source_hashes(&self) -> BTreeSet<B256> {
        self.source_bundles.iter().map(SourceBundle::hash).collect()
    }
}

/// Function name of a human-readable ABI entry (`function owner() view returns (address)`).
pub fn abi_function_name(entry: &str) -> Option<&str> {
    let rest = entry.trim().strip_prefix("function ")?;
    let end = rest.find('(')?;
    Some(rest[..end].trim())
}

/// Merged ABI of `address` and `implementations`, without duplicates and
/// without functions listed in `ignore`.
pub fn merge_abis(
    abis: &BTreeMap<Address, Vec<String>>,
    address: Address,
    implementations: &[Address],
    ignore: &[String],
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    std::iter::once(&address)
        .chain(implementations)
        .filter_map(|addr| abis.get(addr))
        .flatten()
        .filter(|entry| {
            abi_function_name(entry).map_or(true, |name| !ignore.iter().any(|i| i == name))
        })
        .filter(|entry| seen.insert(entry.as_str()))
        .cloned()
        .collect()
}

#[async_trait]
pub trait SourceRegistry: Send + Sync {
    /// Verification status, ABI and source bundles for `address` plus its implementations.
    async fn sources(&self, address: Address, implementations: &[Address])
        -> Result<ContractSources>;

    /// ABI used for watch-mode re-extraction.
    ///
    /// Defaults to [`merge_abis`]: functions named in `ignore` are dropped so
    /// they are not read at all.
    fn relevant_abi(
        &self,
        abis: &BTreeMap<Address, Vec<String>>,
        address: Address,
        implementations: &[Address],
        ignore: &[String],
    ) -> Vec<String> {
        merge_abis(abis, address, implementations, ignore)
    }
}

//! Discovery records.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::SourceBundle;
use crate::value::ContractValue;

/// Relative address → template names suggested for it by the referrer.
///
/// Every relative is present with an explicit (possibly empty) set.
pub type AddressesWithTemplates = BTreeMap<Address, BTreeSet<String>>;

/// Result of analyzing one address at one block height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Analysis {
    /// No code at the address. Terminal, never produces relatives.
    Account(AnalyzedAccount),
    Contract(AnalyzedContract),
}

impl Analysis {
    pub fn address(&self) -> Address {
        match self {
            Analysis::Account(account) => account.address,
            Analysis::Contract(contract) => contract.address,
        }
    }

    pub fn as_contract(&self) -> Option<&AnalyzedContract> {
        match self {
            Analysis::Contract(contract) => Some(contract),
            Analysis::Account(_) => None,
        }
    }

    pub fn is_account(&self) -> bool {
        matches!(self, Analysis::Account(_))
    }

    /// Relatives of a contract; accounts have none.
    pub fn relatives(&self) -> Option<&AddressesWithTemplates> {
        self.as_contract().map(|contract| &contract.relatives)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedAccount {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedContract {
    pub address: Address,
    /// Override name when one was configured, otherwise the source name.
    pub name: String,
    /// Source name, only set when `name` came from an override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_name: Option<String>,
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_block_number: Option<u64>,
    pub upgradeability: UpgradeabilityParameters,
    pub implementations: Vec<Address>,
    pub values: BTreeMap<String, ContractValue>,
    pub errors: BTreeMap<String, String>,
    pub abis: BTreeMap<Address, Vec<String>>,
    pub source_bundles: Vec<SourceBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_template: Option<ExtendedTemplate>,
    #[serde(default)]
    pub ignore_in_watch_mode: Vec<String>,
    pub relatives: AddressesWithTemplates,
}

/// The template a contract was resolved to, and which resolution path chose it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedTemplate {
    pub template: String,
    pub reason: TemplateReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateReason {
    /// `extends` was set in the contract's overrides.
    ExplicitOverride,
    /// A referrer's field configuration suggested the template.
    ReferrerSuggested,
    /// The template library matched the contract's sources.
    ShapeMatched,
}

/// Upgradeability descriptor as reported by the proxy resolver.
///
/// `kind` is the proxy pattern (`"immutable"` for non-proxies); `details`
/// holds pattern-specific parameters such as admin or beacon addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeabilityParameters {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, ContractValue>,
}

impl UpgradeabilityParameters {
    pub fn immutable() -> Self {
        Self {
            kind: "immutable".to_string(),
            details: BTreeMap::new(),
        }
    }

    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<ContractValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_immutable(&self) -> bool {
        self.kind == "immutable"
    }
}

impl Default for UpgradeabilityParameters {
    fn default() -> Self {
        Self::immutable()
    }
}

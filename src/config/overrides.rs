//! Per-contract discovery overrides.

use std::collections::BTreeMap;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Optional per-contract configuration.
///
/// Every field is optional; the default value of each is a no-op:
/// - `extends: None` runs automatic template resolution (referrer suggestion, then shape match).
/// - `name: None` keeps the name reported by the source registry.
/// - `proxy_type: None` lets the proxy resolver try every known pattern.
/// - empty `fields` reads only what the ABI exposes by default.
/// - empty ignore lists ignore nothing.
/// - `ignore_discovery: false` crawls the address normally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_type: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldOverride>,
    /// Functions the extractor must not call.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore_methods: Vec<String>,
    /// Field names whose addresses are not followed, or addresses to drop.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore_relatives: Vec<String>,
    /// Fields left out of watch-mode comparison.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore_in_watch_mode: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_discovery: bool,
}

impl ContractOverrides {
    pub fn extending(template: impl Into<String>) -> Self {
        Self {
            extends: Some(template.into()),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldOverride) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Template suggested for the addresses found in `field`, if any.
    pub fn suggested_template(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)?
            .target
            .as_ref()?
            .template
            .as_deref()
    }

    /// Addresses listed in `ignore_relatives` (entries that are not field names).
    pub fn ignored_relative_addresses(&self) -> Vec<Address> {
        self.ignore_relatives
            .iter()
            .filter_map(|entry| Address::from_str(entry).ok())
            .collect()
    }

    /// Merges `base` (e.g. a template) underneath `self`.
    ///
    /// Scalars and fields from `self` win; ignore lists are unions in
    /// `base`-then-`self` order without duplicates.
    pub fn merged_over(&self, base: &ContractOverrides) -> ContractOverrides {
        let mut fields = base.fields.clone();
        fields.extend(self.fields.clone());

        ContractOverrides {
            extends: self.extends.clone(),
            name: self.name.clone().or_else(|| base.name.clone()),
            proxy_type: self.proxy_type.clone().or_else(|| base.proxy_type.clone()),
            fields,
            ignore_methods: union(&base.ignore_methods, &self.ignore_methods),
            ignore_relatives: union(&base.ignore_relatives, &self.ignore_relatives),
            ignore_in_watch_mode: union(&base.ignore_in_watch_mode, &self.ignore_in_watch_mode),
            ignore_discovery: self.ignore_discovery || base.ignore_discovery,
        }
    }
}

fn union(first: &[String], second: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(first.len() + second.len());
    for item in first.iter().chain(second) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Configuration of one extracted field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldOverride {
    /// Handler definition, opaque to the discovery core and interpreted by the field extractor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<FieldTarget>,
}

impl FieldOverride {
    pub fn with_handler(handler: serde_json::Value) -> Self {
        Self {
            handler: Some(handler),
            target: None,
        }
    }

    pub fn targeting(mut self, template: impl Into<String>) -> Self {
        self.target = Some(FieldTarget {
            template: Some(template.into()),
        });
        self
    }
}

/// What the addresses in a field are expected to be.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldTarget {
    /// Template suggested to the referenced contracts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Address-keyed overrides for a whole discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryOverrides {
    contracts: BTreeMap<Address, ContractOverrides>,
}

impl DiscoveryOverrides {
    pub fn new(contracts: BTreeMap<Address, ContractOverrides>) -> Self {
        Self { contracts }
    }

    pub fn get(&self, address: &Address) -> Option<&ContractOverrides> {
        self.contracts.get(address)
    }

    pub fn insert(&mut self, address: Address, overrides: ContractOverrides) {
        self.contracts.insert(address, overrides);
    }

    pub fn is_ignored(&self, address: &Address) -> bool {
        self.get(address).is_some_and(|o| o.ignore_discovery)
    }
}

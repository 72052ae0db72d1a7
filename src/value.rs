//! Decoded field values.
//!
//! Values returned by the field extractor are JSON shaped, with one addition:
//! strings that parse as a 20-byte hex address are kept as [`ContractValue::Address`].
//! Relative discovery only follows address-typed values.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// A decoded contract field value.
///
/// Variant order matters for deserialization: untagged enums try variants top
/// to bottom, so address-shaped strings become [`ContractValue::Address`]
/// before falling back to [`ContractValue::String`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContractValue {
    Bool(bool),
    Number(serde_json::Number),
    Address(Address),
    String(String),
    Array(Vec<ContractValue>),
    Object(BTreeMap<String, ContractValue>),
}

impl ContractValue {
    /// Collects every address-typed value, descending into arrays and objects.
    pub fn addresses(&self) -> Vec<Address> {
        let mut out = Vec::new();
        self.collect_addresses(&mut out);
        out
    }

    fn collect_addresses(&self, out: &mut Vec<Address>) {
        match self {
            ContractValue::Address(address) => out.push(*address),
            ContractValue::Array(items) => {
                for item in items {
                    item.collect_addresses(out);
                }
            }
            ContractValue::Object(entries) => {
                for value in entries.values() {
                    value.collect_addresses(out);
                }
            }
            ContractValue::Bool(_) | ContractValue::Number(_) | ContractValue::String(_) => {}
        }
    }
}

impl From<Address> for ContractValue {
    fn from(address: Address) -> Self {
        ContractValue::Address(address)
    }
}

impl From<bool> for ContractValue {
    fn from(value: bool) -> Self {
        ContractValue::Bool(value)
    }
}

impl From<u64> for ContractValue {
    fn from(value: u64) -> Self {
        ContractValue::Number(value.into())
    }
}

impl From<&str> for ContractValue {
    fn from(value: &str) -> Self {
        ContractValue::String(value.to_string())
    }
}

impl From<String> for ContractValue {
    fn from(value: String) -> Self {
        ContractValue::String(value)
    }
}

impl<T: Into<ContractValue>> From<Vec<T>> for ContractValue {
    fn from(values: Vec<T>) -> Self {
        ContractValue::Array(values.into_iter().map(Into::into).collect())
    }
}

//! Field extractor interface.
//!
//! The extractor reads contract fields (view functions, storage slots, event
//! scans, ...) as configured by the effective overrides and returns one
//! [`HandlerResult`] per field.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ContractOverrides;
use crate::logger::DiscoveryLogger;
use crate::value::ContractValue;

/// Outcome of reading one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResult {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ContractValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Addresses in this value are not followed during discovery.
    #[serde(default)]
    pub ignore_relative: bool,
}

impl HandlerResult {
    pub fn value(field: impl Into<String>, value: impl Into<ContractValue>) -> Self {
        Self {
            field: field.into(),
            value: Some(value.into()),
            error: None,
            ignore_relative: false,
        }
    }

    pub fn error(field: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: None,
            error: Some(error.into()),
            ignore_relative: false,
        }
    }

    pub fn with_ignore_relative(mut self, ignore: bool) -> Self {
        self.ignore_relative = ignore;
        self
    }
}

/// Raw handler results plus the value and error maps derived from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub results: Vec<HandlerResult>,
    pub values: BTreeMap<String, ContractValue>,
    pub errors: BTreeMap<String, String>,
}

impl ExecutionResult {
    /// Splits results into values and errors. A result with an error never
    /// contributes a value, even if it also carries one.
    pub fn from_results(results: Vec<HandlerResult>) -> Self {
        let mut values = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for result in &results {
            if let Some(error) = &result.error {
                errors.insert(result.field.clone(), error.clone());
            } else if let Some(value) = &result.value {
                values.insert(result.field.clone(), value.clone());
            }
        }
        Self {
            results,
            values,
            errors,
        }
    }
}

#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Reads every field the ABI and `overrides` call for at `block_number`.
    ///
    /// Per-field failures are reported in [`ExecutionResult::errors`]; an `Err`
    /// means the extractor itself could not run.
    async fn execute(
        &self,
        address: Address,
        abi: &[String],
        overrides: Option<&ContractOverrides>,
        block_number: u64,
        logger: &DiscoveryLogger,
    ) -> Result<ExecutionResult>;
}

//! Crawl result.

use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::types::{Analysis, AnalyzedAccount, AnalyzedContract};

/// Why an address reached by the crawl was not analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// `ignoreDiscovery` is set for the address.
    IgnoredByConfig,
    /// Only referenced from beyond `max_depth`.
    DepthExceeded,
    /// Still pending when `max_addresses` was reached.
    AddressLimit,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::IgnoredByConfig => "ignored by config",
            SkipReason::DepthExceeded => "depth exceeded",
            SkipReason::AddressLimit => "address limit reached",
        };
        f.write_str(reason)
    }
}

/// Everything one crawl produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryOutput {
    pub analyses: BTreeMap<Address, Analysis>,
    /// Addresses whose analysis failed with a non-systemic error.
    pub failures: BTreeMap<Address, String>,
    pub skipped: BTreeMap<Address, SkipReason>,
    /// `false` when the crawl was cancelled, ran out of time or hit the
    /// address limit.
    pub completed: bool,
}

impl DiscoveryOutput {
    pub fn get(&self, address: &Address) -> Option<&Analysis> {
        self.analyses.get(address)
    }

    /// Graph edges `(referrer, relative)` in address order.
    pub fn edges(&self) -> Vec<(Address, Address)> {
        self.contracts()
            .flat_map(|contract| {
                contract
                    .relatives
                    .keys()
                    .map(move |relative| (contract.address, *relative))
            })
            .collect()
    }

    pub fn contracts(&self) -> impl Iterator<Item = &AnalyzedContract> {
        self.analyses.values().filter_map(Analysis::as_contract)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AnalyzedAccount> {
        self.analyses.values().filter_map(|analysis| match analysis {
            Analysis::Account(account) => Some(account),
            Analysis::Contract(_) => None,
        })
    }
}

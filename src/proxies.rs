//! Proxy resolver interface.

use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::UpgradeabilityParameters;

/// What the proxy resolver learned about a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDetails {
    pub implementations: Vec<Address>,
    /// Addresses embedded in the proxy wiring (admin, beacon, ...).
    pub relatives: Vec<Address>,
    pub upgradeability: UpgradeabilityParameters,
}

#[async_trait]
pub trait ProxyResolver: Send + Sync {
    /// Classifies `address`. `None` means it is not a proxy.
    ///
    /// `proxy_type_hint` comes from the contract's effective overrides and
    /// restricts detection to that pattern when set.
    async fn detect_proxy(
        &self,
        address: Address,
        block_number: u64,
        proxy_type_hint: Option<&str>,
    ) -> Result<Option<ProxyDetails>>;
}

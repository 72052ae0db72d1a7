//! Chain reader interface.

pub mod retry;

use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use retry::{RetryPolicy, RetryingChainReader};

/// Best-effort deployment metadata. Either part may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub timestamp: Option<DateTime<Utc>>,
    pub block_number: Option<u64>,
}

/// Low-level chain state access.
///
/// Implementations decide which faults are systemic by attaching
/// [`SystemicFailure`](crate::error::SystemicFailure) to the returned error.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Deployed code at `address` as of `block_number`. Empty for accounts.
    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes>;

    /// Deployment metadata; `None` when the chain reader cannot tell.
    async fn deployment_info(&self, address: Address) -> Result<Option<DeploymentInfo>>;
}

#[async_trait]
impl<T: ChainReader + ?Sized> ChainReader for Arc<T> {
    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes> {
        (**self).code_at(address, block_number).await
    }

    async fn deployment_info(&self, address: Address) -> Result<Option<DeploymentInfo>> {
        (**self).deployment_info(address).await
    }
}

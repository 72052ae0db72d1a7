//! Template library.
//!
//! A template is a reusable [`ContractOverrides`] fragment (field handlers,
//! ignore lists, proxy hints) describing a well-known contract kind, plus
//! shape rules that recognize deployments of it. The analyzer consumes it
//! through the [`TemplateLibrary`] trait; [`TemplateService`] is the in-memory
//! implementation.

mod rule;
mod service;

use std::collections::BTreeMap;

use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use rule::{AbiFunctionsRule, ShapeRule, SourceHashRule};
pub use service::{TemplateDefinition, TemplateService};

use crate::config::ContractOverrides;
use crate::source::ContractSources;

/// Why a template matched a contract's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMatch {
    pub template: String,
    /// Name of the first rule that matched.
    pub rule: String,
}

#[async_trait]
pub trait TemplateLibrary: Send + Sync {
    /// Every template whose shape fits `sources`, keyed by template name.
    async fn match_by_shape(
        &self,
        address: Address,
        sources: &ContractSources,
    ) -> Result<BTreeMap<String, TemplateMatch>>;

    /// Applies `template` underneath `overrides` (the contract's own settings win).
    ///
    /// Fails when the template is unknown.
    fn apply_template(&self, overrides: &ContractOverrides, template: &str)
        -> Result<ContractOverrides>;
}

//! Discovery logging handle.
//!
//! A [`DiscoveryLogger`] is passed by reference through the analyzer, the
//! field extractor and the engine instead of living in a global. It carries
//! the crawl label so every event can be attributed to a project, and can be
//! silenced for nested or repeated runs (watch mode re-extraction).

use std::collections::BTreeSet;
use std::sync::Arc;

use alloy_primitives::Address;

use crate::types::{AddressesWithTemplates, ExtendedTemplate};

#[derive(Debug, Clone)]
pub struct DiscoveryLogger {
    label: Arc<str>,
    enabled: bool,
}

impl Default for DiscoveryLogger {
    fn default() -> Self {
        Self::new("discovery")
    }
}

impl DiscoveryLogger {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self {
            label: Arc::from(label.as_ref()),
            enabled: true,
        }
    }

    /// A logger that drops every event.
    pub fn silent() -> Self {
        Self {
            label: Arc::from("silent"),
            enabled: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn log_analyzing(&self, address: Address, depth: usize) {
        if self.enabled {
            tracing::debug!(
                target: "discovery::analyzer",
                crawl = %self.label,
                address = %address,
                depth,
                "Analyzing address"
            );
        }
    }

    pub fn log_account(&self, address: Address) {
        if self.enabled {
            tracing::debug!(
                target: "discovery::analyzer",
                crawl = %self.label,
                address = %address,
                "No code, recording as account"
            );
        }
    }

    pub fn log_name(&self, address: Address, name: &str) {
        if self.enabled {
            tracing::debug!(
                target: "discovery::analyzer",
                crawl = %self.label,
                address = %address,
                name,
                "Resolved contract name"
            );
        }
    }

    pub fn log_template(&self, address: Address, template: &ExtendedTemplate) {
        if self.enabled {
            tracing::debug!(
                target: "discovery::analyzer",
                crawl = %self.label,
                address = %address,
                template = %template.template,
                reason = ?template.reason,
                "Extending template"
            );
        }
    }

    pub fn log_template_conflict(&self, address: Address, candidates: &BTreeSet<String>) {
        if self.enabled {
            tracing::warn!(
                target: "discovery::analyzer",
                crawl = %self.label,
                address = %address,
                candidates = ?candidates,
                "Multiple template candidates"
            );
        }
    }

    pub fn log_relatives(&self, address: Address, relatives: &AddressesWithTemplates) {
        if self.enabled {
            tracing::debug!(
                target: "discovery::analyzer",
                crawl = %self.label,
                address = %address,
                relatives = relatives.len(),
                "Found relatives"
            );
        }
    }

    pub fn log_skip(&self, address: Address, reason: &str) {
        if self.enabled {
            tracing::info!(
                target: "discovery::engine",
                crawl = %self.label,
                address = %address,
                reason,
                "Skipping address"
            );
        }
    }

    pub fn log_failure(&self, address: Address, error: &dyn std::error::Error) {
        if self.enabled {
            tracing::warn!(
                target: "discovery::engine",
                crawl = %self.label,
                address = %address,
                error = %error,
                "Analysis failed"
            );
        }
    }
}

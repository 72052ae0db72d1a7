//! Watch mode: cheap drift detection against a previous discovery.
//!
//! Instead of re-running the whole crawl, each previously discovered address
//! is re-checked on its own. Contracts have their fields re-read and compared;
//! accounts are checked for having become contracts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alloy_primitives::Address;
use futures::stream::{self, StreamExt};

use crate::config::{ContractOverrides, DiscoveryOverrides, DEFAULT_CONCURRENCY};
use crate::error::{Collaborator, DiscoveryError};
use crate::handlers::FieldExtractor;
use crate::logger::DiscoveryLogger;
use crate::provider::ChainReader;
use crate::source::SourceRegistry;
use crate::templates::TemplateLibrary;
use crate::types::{Analysis, AnalyzedAccount, AnalyzedContract};
use crate::value::ContractValue;

pub struct WatchModeDetector {
    chain: Arc<dyn ChainReader>,
    sources: Arc<dyn SourceRegistry>,
    extractor: Arc<dyn FieldExtractor>,
    templates: Arc<dyn TemplateLibrary>,
    logger: DiscoveryLogger,
    concurrency: usize,
}

impl WatchModeDetector {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        sources: Arc<dyn SourceRegistry>,
        extractor: Arc<dyn FieldExtractor>,
        templates: Arc<dyn TemplateLibrary>,
        logger: DiscoveryLogger,
    ) -> Self {
        Self {
            chain,
            sources,
            extractor,
            templates,
            logger,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Number of checks [`changed_addresses`](Self::changed_addresses) runs at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Whether `previous` would be discovered differently at `block_number`.
    ///
    /// A contract that was unverified reports its new verification status.
    /// Otherwise its fields are re-read with the same template and compared,
    /// leaving out `ignore_in_watch_mode` fields. A re-read that fails on a
    /// field that did not fail before is a [`DiscoveryError::WatchModeInconsistency`].
    pub async fn has_changed(
        &self,
        previous: &AnalyzedContract,
        overrides: Option<&ContractOverrides>,
        block_number: u64,
    ) -> Result<bool, DiscoveryError> {
        let address = previous.address;

        if !previous.is_verified {
            let sources = self
                .sources
                .sources(address, &previous.implementations)
                .await
                .map_err(|e| DiscoveryError::collaborator(Collaborator::SourceRegistry, address, e))?;
            if sources.is_verified {
                tracing::info!(
                    target: "discovery::watch",
                    address = %address,
                    "Contract became verified"
                );
            }
            return Ok(sources.is_verified);
        }

        let effective = self.effective_overrides(previous, overrides);
        let ignored: Vec<String> = effective
            .ignore_in_watch_mode
            .iter()
            .chain(&previous.ignore_in_watch_mode)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let abi = self.sources.relevant_abi(
            &previous.abis,
            address,
            &previous.implementations,
            &ignored,
        );
        let execution = self
            .extractor
            .execute(address, &abi, Some(&effective), block_number, &self.logger)
            .await
            .map_err(|e| DiscoveryError::collaborator(Collaborator::FieldExtractor, address, e))?;

        let new_errors: BTreeMap<String, String> = execution
            .errors
            .into_iter()
            .filter(|(field, _)| !previous.errors.contains_key(field))
            .collect();
        if !new_errors.is_empty() {
            return Err(DiscoveryError::WatchModeInconsistency {
                address,
                errors: new_errors,
            });
        }

        let changed = watched_values(&previous.values, &ignored) != watched_values(&execution.values, &ignored);
        if changed {
            tracing::info!(
                target: "discovery::watch",
                address = %address,
                block_number,
                "Contract values changed"
            );
        }
        Ok(changed)
    }

    /// Whether an address that had no code now has some.
    pub async fn has_become_contract(
        &self,
        previous: &AnalyzedAccount,
        block_number: u64,
    ) -> Result<bool, DiscoveryError> {
        let code = self
            .chain
            .code_at(previous.address, block_number)
            .await
            .map_err(|e| DiscoveryError::collaborator(Collaborator::ChainReader, previous.address, e))?;
        Ok(!code.is_empty())
    }

    /// Checks every previous record concurrently and returns the addresses
    /// that need to be discovered again. The first error aborts the batch.
    pub async fn changed_addresses(
        &self,
        previous: &BTreeMap<Address, Analysis>,
        overrides: &DiscoveryOverrides,
        block_number: u64,
    ) -> Result<BTreeSet<Address>, DiscoveryError> {
        let mut checks = stream::iter(previous)
            .map(|(address, analysis)| async move {
                let changed = match analysis {
                    Analysis::Contract(contract) => {
                        self.has_changed(contract, overrides.get(address), block_number)
                            .await?
                    }
                    Analysis::Account(account) => {
                        self.has_become_contract(account, block_number).await?
                    }
                };
                Ok::<_, DiscoveryError>((*address, changed))
            })
            .buffer_unordered(self.concurrency);

        let mut changed = BTreeSet::new();
        while let Some(result) = checks.next().await {
            let (address, has_changed) = result?;
            if has_changed {
                changed.insert(address);
            }
        }

        tracing::debug!(
            target: "discovery::watch",
            checked = previous.len(),
            changed = changed.len(),
            block_number,
            "Watch mode check complete"
        );

        Ok(changed)
    }

    /// The overrides used when `previous` was discovered: the given ones with
    /// the previously extended template applied again.
    fn effective_overrides(
        &self,
        previous: &AnalyzedContract,
        overrides: Option<&ContractOverrides>,
    ) -> ContractOverrides {
        let own = overrides.cloned().unwrap_or_default();
        let Some(extended) = &previous.extended_template else {
            return own;
        };
        match self.templates.apply_template(&own, &extended.template) {
            Ok(applied) => applied,
            Err(e) => {
                tracing::debug!(
                    target: "discovery::watch",
                    address = %previous.address,
                    template = %extended.template,
                    error = %e,
                    "Template no longer applies, using plain overrides"
                );
                own
            }
        }
    }
}

fn watched_values<'a>(
    values: &'a BTreeMap<String, ContractValue>,
    ignored: &[String],
) -> BTreeMap<&'a str, &'a ContractValue> {
    values
        .iter()
        .filter(|(field, _)| !ignored.contains(field))
        .map(|(field, value)| (field.as_str(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{ExecutionResult, HandlerResult};
    use crate::provider::DeploymentInfo;
    use crate::source::ContractSources;
    use crate::templates::{TemplateDefinition, TemplateService};
    use crate::types::{ExtendedTemplate, TemplateReason, UpgradeabilityParameters};
    use alloy_primitives::{address, Bytes};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const BRIDGE: Address = address!("0x1000000000000000000000000000000000000001");
    const OWNER: Address = address!("0x2000000000000000000000000000000000000002");
    const NEW_OWNER: Address = address!("0x3000000000000000000000000000000000000003");

    #[derive(Default)]
    struct Fake {
        code: Bytes,
        verified: bool,
        results: Vec<HandlerResult>,
        seen_abi: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChainReader for Fake {
        async fn code_at(&self, _address: Address, _block_number: u64) -> anyhow::Result<Bytes> {
            Ok(self.code.clone())
        }

        async fn deployment_info(&self, _address: Address) -> anyhow::Result<Option<DeploymentInfo>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl SourceRegistry for Fake {
        async fn sources(
            &self,
            _address: Address,
            _implementations: &[Address],
        ) -> anyhow::Result<ContractSources> {
            Ok(ContractSources {
                is_verified: self.verified,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl FieldExtractor for Fake {
        async fn execute(
            &self,
            _address: Address,
            abi: &[String],
            _overrides: Option<&ContractOverrides>,
            _block_number: u64,
            _logger: &DiscoveryLogger,
        ) -> anyhow::Result<ExecutionResult> {
            *self.seen_abi.lock().unwrap() = abi.to_vec();
            Ok(ExecutionResult::from_results(self.results.clone()))
        }
    }

    fn build(fake: Fake) -> (WatchModeDetector, Arc<Fake>) {
        let fake = Arc::new(fake);
        let templates = TemplateService::new().with_template(TemplateDefinition::new(
            "Bridge",
            ContractOverrides {
                ignore_in_watch_mode: vec!["nonce".to_string()],
                ..Default::default()
            },
        ));
        let detector = WatchModeDetector::new(
            fake.clone(),
            fake.clone(),
            fake.clone(),
            Arc::new(templates),
            DiscoveryLogger::silent(),
        );
        (detector, fake)
    }

    fn previous() -> AnalyzedContract {
        AnalyzedContract {
            address: BRIDGE,
            name: "Bridge".to_string(),
            derived_name: None,
            is_verified: true,
            deployment_timestamp: None,
            deployment_block_number: None,
            upgradeability: UpgradeabilityParameters::immutable(),
            implementations: Vec::new(),
            values: BTreeMap::from([
                ("owner".to_string(), ContractValue::from(OWNER)),
                ("nonce".to_string(), ContractValue::from(1u64)),
            ]),
            errors: BTreeMap::from([("paused".to_string(), "Execution reverted".to_string())]),
            abis: BTreeMap::from([(
                BRIDGE,
                vec![
                    "function owner() view returns (address)".to_string(),
                    "function nonce() view returns (uint256)".to_string(),
                    "function paused() view returns (bool)".to_string(),
                ],
            )]),
            source_bundles: Vec::new(),
            extended_template: Some(ExtendedTemplate {
                template: "Bridge".to_string(),
                reason: TemplateReason::ShapeMatched,
            }),
            ignore_in_watch_mode: vec!["nonce".to_string()],
            relatives: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_unchanged_values_report_no_change() {
        let (detector, fake) = build(Fake {
            verified: true,
            results: vec![
                HandlerResult::value("owner", OWNER),
                HandlerResult::error("paused", "Execution reverted"),
            ],
            ..Default::default()
        });

        assert!(!detector.has_changed(&previous(), None, 200).await.unwrap());
        let abi = fake.seen_abi.lock().unwrap().clone();
        assert_eq!(abi.len(), 2);
        assert!(!abi.iter().any(|entry| entry.contains("nonce")));
    }

    #[tokio::test]
    async fn test_changed_value_is_reported() {
        let (detector, _) = build(Fake {
            verified: true,
            results: vec![HandlerResult::value("owner", NEW_OWNER)],
            ..Default::default()
        });

        assert!(detector.has_changed(&previous(), None, 200).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_error_is_inconsistency() {
        let (detector, _) = build(Fake {
            verified: true,
            results: vec![
                HandlerResult::value("owner", OWNER),
                HandlerResult::error("guardian", "Execution reverted"),
            ],
            ..Default::default()
        });

        let err = detector.has_changed(&previous(), None, 200).await.unwrap_err();
        match err {
            DiscoveryError::WatchModeInconsistency { address, errors } => {
                assert_eq!(address, BRIDGE);
                assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["guardian"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unverified_contract_reports_verification() {
        let mut unverified = previous();
        unverified.is_verified = false;

        let (detector, _) = build(Fake {
            verified: true,
            ..Default::default()
        });
        assert!(detector.has_changed(&unverified, None, 200).await.unwrap());

        let (detector, _) = build(Fake::default());
        assert!(!detector.has_changed(&unverified, None, 200).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_become_contract() {
        let account = AnalyzedAccount { address: OWNER };

        let (detector, _) = build(Fake::default());
        assert!(!detector.has_become_contract(&account, 200).await.unwrap());

        let (detector, _) = build(Fake {
            code: Bytes::from_static(&[0x60, 0x80]),
            ..Default::default()
        });
        assert!(detector.has_become_contract(&account, 200).await.unwrap());
    }
}

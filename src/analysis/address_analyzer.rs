//! Address analyzer: turns one address into an [`Analysis`] record.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alloy_primitives::Address;
use itertools::Itertools;

use super::relatives::get_relatives_with_suggested_templates;
use crate::config::ContractOverrides;
use crate::error::{Collaborator, DiscoveryError};
use crate::handlers::FieldExtractor;
use crate::logger::DiscoveryLogger;
use crate::provider::{ChainReader, RetryPolicy, RetryingChainReader};
use crate::proxies::ProxyResolver;
use crate::source::SourceRegistry;
use crate::templates::TemplateLibrary;
use crate::types::{Analysis, AnalyzedAccount, AnalyzedContract, ExtendedTemplate, TemplateReason};

/// Error key for template resolution problems.
pub const TEMPLATE_ERROR_KEY: &str = "@template";

/// Analyzes addresses against the collaborators it was built with.
///
/// Holds no mutable state, so one analyzer is shared (behind an `Arc`) by
/// every concurrent analysis of a crawl.
#[derive(Clone)]
pub struct AddressAnalyzer {
    chain: Arc<dyn ChainReader>,
    proxies: Arc<dyn ProxyResolver>,
    sources: Arc<dyn SourceRegistry>,
    extractor: Arc<dyn FieldExtractor>,
    templates: Arc<dyn TemplateLibrary>,
}

/// Template chosen before extraction, plus the resolution errors to record.
struct TemplateResolution {
    extended: Option<ExtendedTemplate>,
    errors: BTreeMap<String, String>,
}

impl AddressAnalyzer {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        proxies: Arc<dyn ProxyResolver>,
        sources: Arc<dyn SourceRegistry>,
        extractor: Arc<dyn FieldExtractor>,
        templates: Arc<dyn TemplateLibrary>,
    ) -> Self {
        Self {
            chain,
            proxies,
            sources,
            extractor,
            templates,
        }
    }

    /// Wraps the chain reader so every read follows `policy`.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.chain = Arc::new(RetryingChainReader::new(self.chain, policy));
        self
    }

    /// Analyzes `address` at `block_number`.
    ///
    /// Template resolution goes, first match wins: `overrides.extends`, then
    /// `suggested_templates` (first in order), then shape matching once the
    /// sources are known. Competing candidates are reported under
    /// `errors["@template"]` without failing the analysis.
    ///
    /// Collaborator failures are returned as [`DiscoveryError::Collaborator`];
    /// per-field failures end up in the record's `errors`.
    pub async fn analyze(
        &self,
        address: Address,
        overrides: Option<&ContractOverrides>,
        block_number: u64,
        logger: &DiscoveryLogger,
        suggested_templates: &BTreeSet<String>,
    ) -> Result<Analysis, DiscoveryError> {
        let code = self
            .chain
            .code_at(address, block_number)
            .await
            .map_err(|e| DiscoveryError::collaborator(Collaborator::ChainReader, address, e))?;

        if code.is_empty() {
            logger.log_account(address);
            return Ok(Analysis::Account(AnalyzedAccount { address }));
        }

        let deployment = self
            .chain
            .deployment_info(address)
            .await
            .map_err(|e| DiscoveryError::collaborator(Collaborator::ChainReader, address, e))?
            .unwrap_or_default();

        let own_overrides = overrides.cloned().unwrap_or_default();
        let mut resolution =
            resolve_by_configuration(address, &own_overrides, suggested_templates, logger);
        let mut effective = self.apply_resolved(address, &own_overrides, &mut resolution, logger);

        let proxy = self
            .proxies
            .detect_proxy(address, block_number, effective.proxy_type.as_deref())
            .await
            .map_err(|e| DiscoveryError::collaborator(Collaborator::ProxyResolver, address, e))?;
        let (implementations, proxy_relatives, upgradeability) = match proxy {
            Some(details) => (details.implementations, details.relatives, details.upgradeability),
            None => (Vec::new(), Vec::new(), Default::default()),
        };

        let sources = self
            .sources
            .sources(address, &implementations)
            .await
            .map_err(|e| DiscoveryError::collaborator(Collaborator::SourceRegistry, address, e))?;

        if resolution.extended.is_none() {
            let matches = self
                .templates
                .match_by_shape(address, &sources)
                .await
                .map_err(|e| DiscoveryError::collaborator(Collaborator::TemplateLibrary, address, e))?;
            let candidates: BTreeSet<String> = matches.into_keys().collect();
            resolution = resolve_candidates(
                address,
                &candidates,
                TemplateReason::ShapeMatched,
                "Multiple shapes matched",
                logger,
            );
            effective = self.apply_resolved(address, &own_overrides, &mut resolution, logger);
        }

        let execution = self
            .extractor
            .execute(address, &sources.abi, Some(&effective), block_number, logger)
            .await
            .map_err(|e| DiscoveryError::collaborator(Collaborator::FieldExtractor, address, e))?;

        let relatives = get_relatives_with_suggested_templates(
            &execution.results,
            Some(&effective),
            &proxy_relatives,
            &implementations,
        );
        logger.log_relatives(address, &relatives);

        let (name, derived_name) = match &own_overrides.name {
            Some(name) => (name.clone(), Some(sources.name.clone())),
            None => (sources.name.clone(), None),
        };
        logger.log_name(address, &name);

        let mut errors = resolution.errors;
        errors.extend(execution.errors);

        Ok(Analysis::Contract(AnalyzedContract {
            address,
            name,
            derived_name,
            is_verified: sources.is_verified,
            deployment_timestamp: deployment.timestamp,
            deployment_block_number: deployment.block_number,
            upgradeability,
            implementations,
            values: execution.values,
            errors,
            abis: sources.abis,
            source_bundles: sources.source_bundles,
            extended_template: resolution.extended,
            ignore_in_watch_mode: effective.ignore_in_watch_mode,
            relatives,
        }))
    }

    /// Applies the resolved template (if any) to `overrides`. A template that
    /// cannot be applied is recorded as a resolution error and the contract's
    /// own overrides are used as-is.
    fn apply_resolved(
        &self,
        address: Address,
        overrides: &ContractOverrides,
        resolution: &mut TemplateResolution,
        logger: &DiscoveryLogger,
    ) -> ContractOverrides {
        let Some(extended) = &resolution.extended else {
            return overrides.clone();
        };
        logger.log_template(address, extended);

        match self.templates.apply_template(overrides, &extended.template) {
            Ok(applied) => applied,
            Err(e) => {
                tracing::warn!(
                    target: "discovery::analyzer",
                    address = %address,
                    template = %extended.template,
                    error = %e,
                    "Failed to apply template"
                );
                resolution
                    .errors
                    .insert(TEMPLATE_ERROR_KEY.to_string(), e.to_string());
                overrides.clone()
            }
        }
    }
}

/// Resolution paths that need no sources: explicit `extends`, then referrer
/// suggestions.
fn resolve_by_configuration(
    address: Address,
    overrides: &ContractOverrides,
    suggested_templates: &BTreeSet<String>,
    logger: &DiscoveryLogger,
) -> TemplateResolution {
    if let Some(template) = &overrides.extends {
        return TemplateResolution {
            extended: Some(ExtendedTemplate {
                template: template.clone(),
                reason: TemplateReason::ExplicitOverride,
            }),
            errors: BTreeMap::new(),
        };
    }
    resolve_candidates(
        address,
        suggested_templates,
        TemplateReason::ReferrerSuggested,
        "Multiple templates suggested",
        logger,
    )
}

/// Picks the first candidate in order. More than one candidate is recorded
/// as `"<conflict> (A, B, ...)"` under `@template`.
fn resolve_candidates(
    address: Address,
    candidates: &BTreeSet<String>,
    reason: TemplateReason,
    conflict: &str,
    logger: &DiscoveryLogger,
) -> TemplateResolution {
    let mut errors = BTreeMap::new();
    if candidates.len() > 1 {
        logger.log_template_conflict(address, candidates);
        errors.insert(
            TEMPLATE_ERROR_KEY.to_string(),
            format!("{} ({})", conflict, candidates.iter().join(", ")),
        );
    }
    TemplateResolution {
        extended: candidates.first().map(|template| ExtendedTemplate {
            template: template.clone(),
            reason,
        }),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldOverride;
    use crate::handlers::{ExecutionResult, HandlerResult};
    use crate::provider::DeploymentInfo;
    use crate::proxies::ProxyDetails;
    use crate::source::ContractSources;
    use crate::templates::{AbiFunctionsRule, TemplateDefinition, TemplateService};
    use crate::types::UpgradeabilityParameters;
    use alloy_primitives::{address, Bytes};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    const TOKEN: Address = address!("0x1000000000000000000000000000000000000001");
    const PROXY: Address = address!("0x2000000000000000000000000000000000000002");
    const IMPL: Address = address!("0x3000000000000000000000000000000000000003");
    const OWNER: Address = address!("0x4000000000000000000000000000000000000004");
    const EOA: Address = address!("0x5000000000000000000000000000000000000005");

    /// One fake implementing every collaborator.
    #[derive(Default)]
    struct Fake {
        contracts: BTreeMap<Address, ContractSources>,
        proxies: BTreeMap<Address, ProxyDetails>,
        values: BTreeMap<Address, Vec<HandlerResult>>,
        /// Overrides each `execute` call received.
        executed_with: Mutex<Vec<ContractOverrides>>,
        fail_sources: bool,
    }

    #[async_trait]
    impl ChainReader for Fake {
        async fn code_at(&self, address: Address, _block_number: u64) -> anyhow::Result<Bytes> {
            if self.contracts.contains_key(&address) {
                Ok(Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]))
            } else {
                Ok(Bytes::new())
            }
        }

        async fn deployment_info(&self, _address: Address) -> anyhow::Result<Option<DeploymentInfo>> {
            Ok(Some(DeploymentInfo {
                timestamp: None,
                block_number: Some(17_000_000),
            }))
        }
    }

    #[async_trait]
    impl ProxyResolver for Fake {
        async fn detect_proxy(
            &self,
            address: Address,
            _block_number: u64,
            _proxy_type_hint: Option<&str>,
        ) -> anyhow::Result<Option<ProxyDetails>> {
            Ok(self.proxies.get(&address).cloned())
        }
    }

    #[async_trait]
    impl SourceRegistry for Fake {
        async fn sources(
            &self,
            address: Address,
            _implementations: &[Address],
        ) -> anyhow::Result<ContractSources> {
            if self.fail_sources {
                anyhow::bail!("explorer returned 502");
            }
            Ok(self.contracts.get(&address).cloned().unwrap_or_default())
        }
    }

    #[async_trait]
    impl FieldExtractor for Fake {
        async fn execute(
            &self,
            address: Address,
            _abi: &[String],
            overrides: Option<&ContractOverrides>,
            _block_number: u64,
            _logger: &DiscoveryLogger,
        ) -> anyhow::Result<ExecutionResult> {
            self.executed_with
                .lock()
                .unwrap()
                .push(overrides.cloned().unwrap_or_default());
            Ok(ExecutionResult::from_results(
                self.values.get(&address).cloned().unwrap_or_default(),
            ))
        }
    }

    fn sources(name: &str, functions: &[&str]) -> ContractSources {
        ContractSources {
            name: name.to_string(),
            is_verified: true,
            abi: functions
                .iter()
                .map(|f| format!("function {f}() view returns (uint256)"))
                .collect(),
            ..Default::default()
        }
    }

    fn templates() -> TemplateService {
        TemplateService::new()
            .with_template(
                TemplateDefinition::new(
                    "ERC20",
                    ContractOverrides {
                        ignore_in_watch_mode: vec!["totalSupply".to_string()],
                        ..Default::default()
                    }
                    .with_field("totalSupply", FieldOverride::with_handler(json!({"type": "call"}))),
                )
                .with_rule(AbiFunctionsRule::new(["totalSupply"])),
            )
            .with_template(
                TemplateDefinition::new("Safe", ContractOverrides::default())
                    .with_rule(AbiFunctionsRule::new(["getThreshold"])),
            )
            .with_template(TemplateDefinition::new("Multisig", ContractOverrides::default()))
    }

    fn build(fake: Fake) -> (AddressAnalyzer, Arc<Fake>) {
        let fake = Arc::new(fake);
        let analyzer = AddressAnalyzer::new(
            fake.clone(),
            fake.clone(),
            fake.clone(),
            fake.clone(),
            Arc::new(templates()),
        );
        (analyzer, fake)
    }

    fn fake_with(address: Address, sources: ContractSources) -> Fake {
        let mut fake = Fake::default();
        fake.contracts.insert(address, sources);
        fake
    }

    #[tokio::test]
    async fn test_empty_code_is_account_regardless_of_overrides() {
        let (analyzer, fake) = build(Fake::default());
        let overrides = ContractOverrides::extending("ERC20");

        let analysis = analyzer
            .analyze(
                EOA,
                Some(&overrides),
                100,
                &DiscoveryLogger::silent(),
                &BTreeSet::from(["Safe".to_string()]),
            )
            .await
            .unwrap();

        assert_eq!(analysis, Analysis::Account(AnalyzedAccount { address: EOA }));
        assert!(analysis.relatives().is_none());
        assert!(fake.executed_with.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_override_applies_template() {
        let (analyzer, fake) = build(fake_with(TOKEN, sources("Token", &["getThreshold"])));

        let analysis = analyzer
            .analyze(
                TOKEN,
                Some(&ContractOverrides::extending("ERC20")),
                100,
                &DiscoveryLogger::silent(),
                &BTreeSet::from(["Safe".to_string()]),
            )
            .await
            .unwrap();

        let contract = analysis.as_contract().unwrap();
        assert_eq!(
            contract.extended_template,
            Some(ExtendedTemplate {
                template: "ERC20".to_string(),
                reason: TemplateReason::ExplicitOverride,
            })
        );
        assert!(!contract.errors.contains_key(TEMPLATE_ERROR_KEY));
        assert_eq!(contract.ignore_in_watch_mode, vec!["totalSupply".to_string()]);

        let executed = fake.executed_with.lock().unwrap();
        assert!(executed[0].fields.contains_key("totalSupply"));
    }

    #[tokio::test]
    async fn test_referrer_suggestion_wins_over_shape() {
        let (analyzer, _) = build(fake_with(TOKEN, sources("Token", &["totalSupply"])));

        let analysis = analyzer
            .analyze(
                TOKEN,
                None,
                100,
                &DiscoveryLogger::silent(),
                &BTreeSet::from(["Safe".to_string()]),
            )
            .await
            .unwrap();

        let template = analysis.as_contract().unwrap().extended_template.clone().unwrap();
        assert_eq!(template.template, "Safe");
        assert_eq!(template.reason, TemplateReason::ReferrerSuggested);
    }

    #[tokio::test]
    async fn test_multiple_suggestions_record_conflict() {
        let (analyzer, _) = build(fake_with(TOKEN, sources("Token", &[])));

        let analysis = analyzer
            .analyze(
                TOKEN,
                None,
                100,
                &DiscoveryLogger::silent(),
                &BTreeSet::from(["Safe".to_string(), "Multisig".to_string()]),
            )
            .await
            .unwrap();

        let contract = analysis.as_contract().unwrap();
        assert_eq!(
            contract.errors[TEMPLATE_ERROR_KEY],
            "Multiple templates suggested (Multisig, Safe)"
        );
        let template = contract.extended_template.clone().unwrap();
        assert_eq!(template.template, "Multisig");
        assert_eq!(template.reason, TemplateReason::ReferrerSuggested);
    }

    #[tokio::test]
    async fn test_shape_match_and_conflict() {
        let (analyzer, _) = build(fake_with(TOKEN, sources("Token", &["totalSupply"])));
        let analysis = analyzer
            .analyze(TOKEN, None, 100, &DiscoveryLogger::silent(), &BTreeSet::new())
            .await
            .unwrap();
        let contract = analysis.as_contract().unwrap();
        assert_eq!(
            contract.extended_template,
            Some(ExtendedTemplate {
                template: "ERC20".to_string(),
                reason: TemplateReason::ShapeMatched,
            })
        );
        assert!(contract.errors.is_empty());

        let (analyzer, _) =
            build(fake_with(TOKEN, sources("Token", &["totalSupply", "getThreshold"])));
        let analysis = analyzer
            .analyze(TOKEN, None, 100, &DiscoveryLogger::silent(), &BTreeSet::new())
            .await
            .unwrap();
        let contract = analysis.as_contract().unwrap();
        assert_eq!(contract.errors[TEMPLATE_ERROR_KEY], "Multiple shapes matched (ERC20, Safe)");
        assert_eq!(contract.extended_template.as_ref().unwrap().template, "ERC20");
    }

    #[tokio::test]
    async fn test_unknown_template_is_recorded() {
        let (analyzer, _) = build(fake_with(TOKEN, sources("Token", &[])));

        let analysis = analyzer
            .analyze(
                TOKEN,
                Some(&ContractOverrides::extending("Missing")),
                100,
                &DiscoveryLogger::silent(),
                &BTreeSet::new(),
            )
            .await
            .unwrap();

        let contract = analysis.as_contract().unwrap();
        assert_eq!(contract.errors[TEMPLATE_ERROR_KEY], "Unknown template: Missing");
        assert_eq!(contract.extended_template.as_ref().unwrap().template, "Missing");
    }

    #[tokio::test]
    async fn test_proxy_contract_record() {
        let mut fake = fake_with(PROXY, sources("Proxy", &["owner"]));
        fake.proxies.insert(
            PROXY,
            ProxyDetails {
                implementations: vec![IMPL],
                relatives: vec![OWNER],
                upgradeability: UpgradeabilityParameters::new("EIP1967 proxy")
                    .with_detail("admin", OWNER),
            },
        );
        fake.values.insert(
            PROXY,
            vec![
                HandlerResult::value("owner", OWNER),
                HandlerResult::error("guardian", "Execution reverted"),
            ],
        );
        let (analyzer, _) = build(fake);

        let overrides = ContractOverrides {
            name: Some("Portal".to_string()),
            ..Default::default()
        }
        .with_field("owner", FieldOverride::default().targeting("Safe"));

        let analysis = analyzer
            .analyze(PROXY, Some(&overrides), 100, &DiscoveryLogger::silent(), &BTreeSet::new())
            .await
            .unwrap();
        let contract = analysis.as_contract().unwrap();

        assert_eq!(contract.name, "Portal");
        assert_eq!(contract.derived_name.as_deref(), Some("Proxy"));
        assert_eq!(contract.implementations, vec![IMPL]);
        assert_eq!(contract.upgradeability.kind, "EIP1967 proxy");
        assert_eq!(contract.deployment_block_number, Some(17_000_000));
        assert_eq!(contract.errors["guardian"], "Execution reverted");
        assert_eq!(contract.relatives[&OWNER], BTreeSet::from(["Safe".to_string()]));
        assert!(contract.relatives[&IMPL].is_empty());
    }

    #[tokio::test]
    async fn test_collaborator_failure_propagates() {
        let mut fake = fake_with(TOKEN, sources("Token", &[]));
        fake.fail_sources = true;
        let (analyzer, _) = build(fake);

        let err = analyzer
            .analyze(TOKEN, None, 100, &DiscoveryLogger::silent(), &BTreeSet::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DiscoveryError::Collaborator {
                collaborator: Collaborator::SourceRegistry,
                systemic: false,
                ..
            }
        ));
    }
}

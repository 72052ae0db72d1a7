//! Discovery - contract topology crawler.
//!
//! Starting from a few seed addresses, the crawl engine recursively analyzes
//! every contract reachable through proxy wiring and field values, producing a
//! map of address to [`Analysis`] that can be audited and re-checked for drift
//! with [`WatchModeDetector`].
//!
//! Chain access, proxy detection, source lookup and field extraction are
//! collaborators supplied by the caller through the [`ChainReader`],
//! [`ProxyResolver`], [`SourceRegistry`] and [`FieldExtractor`] traits.
//! Templates are provided through [`TemplateLibrary`], with [`TemplateService`]
//! as the in-memory implementation.
//!
//! ```rust,ignore
//! let analyzer = AddressAnalyzer::new(chain, proxies, sources, extractor, templates);
//! let config = DiscoveryConfig::from_file("discovery.json")?;
//! let engine = DiscoveryEngine::new(
//!     analyzer,
//!     config.resolve_overrides()?,
//!     config.crawl_config(),
//!     DiscoveryLogger::new(&config.name),
//! );
//! let output = engine.crawl(config.seeds(), block_number).await?;
//! ```

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod provider;
pub mod proxies;
pub mod source;
pub mod templates;
pub mod types;
pub mod value;
pub mod watch;

// Re-export commonly used types for collaborator implementors
pub use alloy_primitives::{Address, Bytes};
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

pub use analysis::AddressAnalyzer;
pub use config::{
    ContractOverrides, CrawlConfig, CrawlConfigBuilder, DiscoveryConfig, DiscoveryOverrides,
    FieldOverride, FieldTarget, Seed,
};
pub use engine::{DiscoveryEngine, DiscoveryOutput, SkipReason};
pub use error::{Collaborator, DiscoveryError, SystemicFailure};
pub use handlers::{ExecutionResult, FieldExtractor, HandlerResult};
pub use logger::DiscoveryLogger;
pub use provider::{ChainReader, DeploymentInfo, RetryPolicy, RetryingChainReader};
pub use proxies::{ProxyDetails, ProxyResolver};
pub use source::{ContractSources, SourceBundle, SourceRegistry};
pub use templates::{
    AbiFunctionsRule, ShapeRule, SourceHashRule, TemplateDefinition, TemplateLibrary,
    TemplateMatch, TemplateService,
};
pub use types::{
    AddressesWithTemplates, Analysis, AnalyzedAccount, AnalyzedContract, ExtendedTemplate,
    TemplateReason, UpgradeabilityParameters,
};
pub use value::ContractValue;
pub use watch::WatchModeDetector;

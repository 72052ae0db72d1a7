//! Discovery errors.
//!
//! Collaborators report failures as `anyhow::Error`; the analyzer wraps them
//! in [`DiscoveryError::Collaborator`] and keeps whether they were marked
//! [`SystemicFailure`].

use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::Address;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which collaborator a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    ChainReader,
    ProxyResolver,
    SourceRegistry,
    FieldExtractor,
    TemplateLibrary,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collaborator::ChainReader => "chain reader",
            Collaborator::ProxyResolver => "proxy resolver",
            Collaborator::SourceRegistry => "source registry",
            Collaborator::FieldExtractor => "field extractor",
            Collaborator::TemplateLibrary => "template library",
        };
        f.write_str(name)
    }
}

/// Marker a collaborator attaches to an error when the fault is not specific
/// to one address (e.g. the RPC endpoint is unreachable).
///
/// Collaborators return it either as the root error or as context:
///
/// ```rust,ignore
/// Err(anyhow::Error::new(SystemicFailure::new("rpc endpoint unreachable")))
/// // or
/// client.call(..).await.context(SystemicFailure::new("rpc endpoint unreachable"))?
/// ```
#[derive(Debug, Clone, thiserror::Error)]
#[error("systemic failure: {reason}")]
pub struct SystemicFailure {
    pub reason: String,
}

impl SystemicFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Whether the error (or any context layer on it) is a [`SystemicFailure`].
    pub fn is_in(err: &anyhow::Error) -> bool {
        err.downcast_ref::<SystemicFailure>().is_some()
            || err.chain().any(|cause| cause.is::<SystemicFailure>())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("{collaborator} failed for {address}: {source}")]
    Collaborator {
        collaborator: Collaborator,
        address: Address,
        systemic: bool,
        #[source]
        source: BoxError,
    },
    #[error("watch mode re-extraction of {address} produced new errors: {}", format_errors(.errors))]
    WatchModeInconsistency {
        address: Address,
        errors: BTreeMap<String, String>,
    },
    #[error("Invalid discovery config: {0}")]
    Config(String),
    #[error("Failed to parse discovery config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to read discovery config: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Wraps a collaborator error, keeping the collaborator's systemic classification.
    pub fn collaborator(collaborator: Collaborator, address: Address, err: anyhow::Error) -> Self {
        let systemic = SystemicFailure::is_in(&err);
        DiscoveryError::Collaborator {
            collaborator,
            address,
            systemic,
            source: err.into(),
        }
    }

    /// Systemic failures abort a crawl; everything else is recorded per node.
    pub fn is_systemic(&self) -> bool {
        matches!(self, DiscoveryError::Collaborator { systemic: true, .. })
    }
}

fn format_errors(errors: &BTreeMap<String, String>) -> String {
    errors
        .iter()
        .map(|(key, message)| format!("{key}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

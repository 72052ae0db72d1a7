//! In-memory chain for discovery tests.
//!
//! [`MockChain`] implements every collaborator trait of the discovery crate
//! over a map of [`MockContract`]s, counts calls per address and can inject
//! failures or latency.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use discovery::{
    ChainReader, ContractOverrides, ContractSources, ContractValue, DeploymentInfo,
    DiscoveryLogger, ExecutionResult, FieldExtractor, HandlerResult, ProxyDetails, ProxyResolver,
    SourceBundle, SourceRegistry, SystemicFailure, UpgradeabilityParameters,
};

/// Bytecode returned for every mock contract.
pub const MOCK_CODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52];

/// A contract living on the [`MockChain`].
#[derive(Debug, Clone)]
pub struct MockContract {
    pub name: String,
    pub verified: bool,
    pub abi: Vec<String>,
    pub files: BTreeMap<String, String>,
    /// Field results, returned when the field is in the ABI passed to the
    /// extractor or configured in the overrides.
    pub fields: BTreeMap<String, HandlerResult>,
    pub proxy: Option<ProxyDetails>,
    pub deployed_at: Option<u64>,
}

impl MockContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verified: true,
            abi: Vec::new(),
            files: BTreeMap::new(),
            fields: BTreeMap::new(),
            proxy: None,
            deployed_at: None,
        }
    }

    pub fn unverified(mut self) -> Self {
        self.verified = false;
        self
    }

    /// Adds a view function `field` returning `value`.
    pub fn with_value(mut self, field: &str, value: impl Into<ContractValue>) -> Self {
        self.abi.push(format!("function {field}() view"));
        self.fields
            .insert(field.to_string(), HandlerResult::value(field, value));
        self
    }

    /// Adds a view function `field` that reverts.
    pub fn with_error(mut self, field: &str, error: &str) -> Self {
        self.abi.push(format!("function {field}() view"));
        self.fields
            .insert(field.to_string(), HandlerResult::error(field, error));
        self
    }

    /// Adds a value only readable through a handler configured in the overrides.
    pub fn with_handler_value(mut self, field: &str, value: impl Into<ContractValue>) -> Self {
        self.fields
            .insert(field.to_string(), HandlerResult::value(field, value));
        self
    }

    pub fn with_function(mut self, name: &str) -> Self {
        self.abi.push(format!("function {name}()"));
        self
    }

    pub fn with_source(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_proxy(mut self, kind: &str, implementations: Vec<Address>, relatives: Vec<Address>) -> Self {
        self.proxy = Some(ProxyDetails {
            implementations,
            relatives,
            upgradeability: UpgradeabilityParameters::new(kind),
        });
        self
    }

    pub fn deployed_at(mut self, block_number: u64) -> Self {
        self.deployed_at = Some(block_number);
        self
    }

    fn bundle(&self, address: Address) -> Option<SourceBundle> {
        (self.verified && !self.files.is_empty()).then(|| SourceBundle {
            name: self.name.clone(),
            address,
            files: self.files.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Transient,
    Systemic,
}

#[derive(Debug, Default)]
struct State {
    contracts: HashMap<Address, MockContract>,
    failures: HashMap<Address, Failure>,
    code_calls: HashMap<Address, usize>,
    extractor_calls: HashMap<Address, usize>,
}

/// In-memory chain implementing every discovery collaborator.
#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<State>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(self, address: Address, contract: MockContract) -> Self {
        self.insert_contract(address, contract);
        self
    }

    /// Delays every `code_at` call, so crawls have analyses in flight.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn insert_contract(&self, address: Address, contract: MockContract) {
        self.state().contracts.insert(address, contract);
    }

    /// Overwrites the result of `field` on an existing contract.
    pub fn set_value(&self, address: Address, field: &str, value: impl Into<ContractValue>) {
        if let Some(contract) = self.state().contracts.get_mut(&address) {
            contract
                .fields
                .insert(field.to_string(), HandlerResult::value(field, value));
        }
    }

    pub fn set_error(&self, address: Address, field: &str, error: &str) {
        if let Some(contract) = self.state().contracts.get_mut(&address) {
            contract
                .fields
                .insert(field.to_string(), HandlerResult::error(field, error));
        }
    }

    pub fn set_verified(&self, address: Address, verified: bool) {
        if let Some(contract) = self.state().contracts.get_mut(&address) {
            contract.verified = verified;
        }
    }

    /// Makes every chain read for `address` fail with a plain error.
    pub fn fail(&self, address: Address) {
        self.state().failures.insert(address, Failure::Transient);
    }

    /// Makes every chain read for `address` fail with a [`SystemicFailure`].
    pub fn fail_systemic(&self, address: Address) {
        self.state().failures.insert(address, Failure::Systemic);
    }

    /// How many times the code at `address` was read.
    pub fn code_calls(&self, address: Address) -> usize {
        self.state().code_calls.get(&address).copied().unwrap_or(0)
    }

    pub fn extractor_calls(&self, address: Address) -> usize {
        self.state().extractor_calls.get(&address).copied().unwrap_or(0)
    }

    /// Highest number of concurrent `code_at` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn contract(&self, address: Address) -> Option<MockContract> {
        self.state().contracts.get(&address).cloned()
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn code_at(&self, address: Address, _block_number: u64) -> Result<Bytes> {
        let failure = {
            let mut state = self.state();
            *state.code_calls.entry(address).or_default() += 1;
            state.failures.get(&address).copied()
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match failure {
            Some(Failure::Systemic) => {
                Err(anyhow::Error::new(SystemicFailure::new("rpc endpoint unreachable")))
            }
            Some(Failure::Transient) => anyhow::bail!("eth_getCode reverted for {address}"),
            None => Ok(match self.contract(address) {
                Some(_) => Bytes::from_static(MOCK_CODE),
                None => Bytes::new(),
            }),
        }
    }

    async fn deployment_info(&self, address: Address) -> Result<Option<DeploymentInfo>> {
        Ok(self
            .contract(address)
            .and_then(|contract| contract.deployed_at)
            .map(|block_number| DeploymentInfo {
                timestamp: None,
                block_number: Some(block_number),
            }))
    }
}

#[async_trait]
impl ProxyResolver for MockChain {
    async fn detect_proxy(
        &self,
        address: Address,
        _block_number: u64,
        _proxy_type_hint: Option<&str>,
    ) -> Result<Option<ProxyDetails>> {
        Ok(self.contract(address).and_then(|contract| contract.proxy))
    }
}

#[async_trait]
impl SourceRegistry for MockChain {
    async fn sources(&self, address: Address, implementations: &[Address]) -> Result<ContractSources> {
        let Some(contract) = self.contract(address) else {
            return Ok(ContractSources::default());
        };

        let mut abis = BTreeMap::new();
        let mut source_bundles = Vec::new();
        let mut abi = Vec::new();
        for addr in std::iter::once(address).chain(implementations.iter().copied()) {
            let Some(source) = self.contract(addr) else {
                continue;
            };
            if !source.verified {
                continue;
            }
            abi.extend(source.abi.iter().cloned());
            abis.insert(addr, source.abi.clone());
            source_bundles.extend(source.bundle(addr));
        }

        Ok(ContractSources {
            name: contract.name,
            is_verified: contract.verified,
            abi,
            abis,
            source_bundles,
        })
    }
}

#[async_trait]
impl FieldExtractor for MockChain {
    async fn execute(
        &self,
        address: Address,
        abi: &[String],
        overrides: Option<&ContractOverrides>,
        _block_number: u64,
        _logger: &DiscoveryLogger,
    ) -> Result<ExecutionResult> {
        *self.state().extractor_calls.entry(address).or_default() += 1;

        let Some(contract) = self.contract(address) else {
            return Ok(ExecutionResult::default());
        };
        let ignored = overrides.map(|o| o.ignore_methods.as_slice()).unwrap_or_default();

        let results = contract
            .fields
            .into_iter()
            .filter(|(field, _)| {
                let in_abi = abi
                    .iter()
                    .any(|entry| discovery::source::abi_function_name(entry) == Some(field.as_str()));
                let configured = overrides.is_some_and(|o| o.fields.contains_key(field));
                (in_abi || configured) && !ignored.contains(field)
            })
            .map(|(_, result)| result)
            .collect();

        Ok(ExecutionResult::from_results(results))
    }
}

/// Shorthand for a handler definition in template or override fields.
pub fn call_handler(method: &str) -> serde_json::Value {
    serde_json::json!({ "type": "call", "method": method })
}

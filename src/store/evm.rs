//! On-chain configuration store.
//!
//! # Responsibilities
//! - Read registry slots through the primary RPC endpoint, then failovers
//! - Submit transitions as transactions signed by the configured wallet
//! - Decode contract custom errors back into `RegistryError`
//! - Publish events decoded from receipts on the store event stream
//!
//! # Design Decisions
//! - Proposals are validated locally before sending, so malformed input never
//!   costs gas and surfaces with the same error as the in-memory store
//! - Promotion checks the active slot before sending; the contract itself
//!   accepts a zero `to_revoke` unconditionally
//! - Every RPC read is bounded by `rpc_timeout_secs`; writes wait up to
//!   `tx_timeout_secs` for a receipt

use std::future::Future;
use std::time::Duration;

use alloy::network::Ethereum;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy::rpc::types::Log;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::StoreConfig;
use crate::observability::metrics;
use crate::registry::codec::CommitteeHome::{self, CommitteeHomeErrors, CommitteeHomeInstance};
use crate::registry::validation::validate_proposal;
use crate::registry::{
    ConfigDigest, DomainId, DynamicConfig, RegistryError, RegistryEvent, RejectedRule,
    StaticConfig, ValidationError, VersionedConfig,
};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{ConfigStore, StoreEvent, EVENT_CHANNEL_CAPACITY};

/// Environment variable holding the hex-encoded signing key.
pub const PRIVATE_KEY_ENV_VAR: &str = "REGISTRY_PRIVATE_KEY";

/// Load the signing key from `REGISTRY_PRIVATE_KEY`.
///
/// The key is never logged; only the derived address is.
pub fn signer_from_env() -> StoreResult<PrivateKeySigner> {
    let private_key = std::env::var(PRIVATE_KEY_ENV_VAR).map_err(|_| {
        StoreError::Wallet(format!("Environment variable {} not set", PRIVATE_KEY_ENV_VAR))
    })?;
    let key_hex = private_key.strip_prefix("0x").unwrap_or(&private_key);
    let signer: PrivateKeySigner = key_hex
        .parse()
        .map_err(|e| StoreError::Wallet(format!("Invalid private key format: {}", e)))?;
    tracing::info!(address = %signer.address(), "Signer loaded");
    Ok(signer)
}

/// [`ConfigStore`] backed by registry contracts on an EVM chain.
pub struct EvmConfigStore {
    /// Read providers (primary + failovers).
    providers: Vec<DynProvider>,
    /// Signing provider on the primary endpoint.
    writer: Option<DynProvider>,
    contracts: DashMap<DomainId, Address>,
    chain_id: u64,
    rpc_timeout: Duration,
    tx_timeout: Duration,
    events: broadcast::Sender<StoreEvent>,
}

impl EvmConfigStore {
    /// Build providers for the configured endpoints. No request is made here.
    ///
    /// Without a signer the store is read-only and writes fail with
    /// [`StoreError::Wallet`].
    pub fn connect(config: &StoreConfig, signer: Option<PrivateKeySigner>) -> StoreResult<Self> {
        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            StoreError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;

        let mut providers = vec![ProviderBuilder::new().connect_http(primary_url.clone()).erased()];
        for url_str in &config.failover_urls {
            match url_str.parse::<url::Url>() {
                Ok(url) => providers.push(ProviderBuilder::new().connect_http(url).erased()),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let writer = signer.map(|signer| {
            ProviderBuilder::new()
                .wallet(signer)
                .connect_http(primary_url)
                .erased()
        });

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        tracing::info!(
            rpc_url = %config.rpc_url,
            failovers = providers.len() - 1,
            writable = writer.is_some(),
            "EVM store initialized"
        );

        Ok(Self {
            providers,
            writer,
            contracts: DashMap::new(),
            chain_id: config.chain_id,
            rpc_timeout: config.rpc_timeout(),
            tx_timeout: config.tx_timeout(),
            events,
        })
    }

    /// Map a domain to its registry contract.
    pub fn register_domain(&self, domain: DomainId, registry: Address) {
        tracing::debug!(domain = %domain, registry = %registry, "Domain registered");
        self.contracts.insert(domain, registry);
    }

    fn address(&self, domain: &DomainId) -> StoreResult<Address> {
        self.contracts
            .get(domain)
            .map(|a| *a)
            .ok_or_else(|| StoreError::UnknownDomain(domain.clone()))
    }

    /// Check the endpoint serves the configured chain.
    pub async fn verify_chain_id(&self) -> StoreResult<()> {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.rpc_timeout, provider.get_chain_id()).await {
                Ok(Ok(actual)) if actual == self.chain_id => return Ok(()),
                Ok(Ok(actual)) => {
                    return Err(StoreError::Unavailable(format!(
                        "chain mismatch: expected {}, endpoint serves {}",
                        self.chain_id, actual
                    )))
                }
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, error = %e, "RPC error, trying next provider")
                }
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout, trying next provider"),
            }
        }
        Err(StoreError::Rpc("All RPC providers failed".to_string()))
    }

    /// Contract type and version string, e.g. `"CommitteeHome 1.0.0"`.
    pub async fn type_and_version(&self, domain: &DomainId) -> StoreResult<String> {
        self.read(domain, |c| async move { c.typeAndVersion().call().await })
            .await
    }

    /// Run a view call against each provider in turn.
    async fn read<T, F, Fut>(&self, domain: &DomainId, call: F) -> StoreResult<T>
    where
        F: Fn(CommitteeHomeInstance<DynProvider>) -> Fut,
        Fut: Future<Output = Result<T, alloy::contract::Error>>,
    {
        let address = self.address(domain)?;
        let mut last_error = StoreError::Unavailable("no RPC providers".to_string());
        for (i, provider) in self.providers.iter().enumerate() {
            let contract = CommitteeHome::new(address, provider.clone());
            match timeout(self.rpc_timeout, call(contract)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    tracing::warn!(domain = %domain, provider_idx = i, error = %e, "RPC error");
                    last_error = StoreError::Rpc(e.to_string());
                }
                Err(_) => {
                    tracing::warn!(domain = %domain, provider_idx = i, "RPC timeout");
                    last_error = StoreError::Timeout(self.rpc_timeout);
                }
            }
        }
        Err(last_error)
    }

    fn writer(&self, domain: &DomainId) -> StoreResult<CommitteeHomeInstance<DynProvider>> {
        let address = self.address(domain)?;
        let writer = self.writer.clone().ok_or_else(|| {
            StoreError::Wallet(format!("store is read-only; set {}", PRIVATE_KEY_ENV_VAR))
        })?;
        Ok(CommitteeHome::new(address, writer))
    }

    /// Wait for a sent transaction, then decode and publish its events.
    async fn confirm(
        &self,
        domain: &DomainId,
        operation: &'static str,
        sent: Result<PendingTransactionBuilder<Ethereum>, alloy::contract::Error>,
    ) -> StoreResult<Vec<RegistryEvent>> {
        let result = self.confirm_inner(domain, sent).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(StoreError::Registry(_)) => "rejected",
            Err(_) => "error",
        };
        metrics::record_transition(domain.as_str(), operation, outcome);
        result
    }

    async fn confirm_inner(
        &self,
        domain: &DomainId,
        sent: Result<PendingTransactionBuilder<Ethereum>, alloy::contract::Error>,
    ) -> StoreResult<Vec<RegistryEvent>> {
        let address = self.address(domain)?;
        let pending = sent.map_err(|e| map_contract_error(&e))?;
        let tx_hash = *pending.tx_hash();
        tracing::debug!(domain = %domain, tx_hash = %tx_hash, "Transaction sent");

        let receipt = pending
            .with_timeout(Some(self.tx_timeout))
            .get_receipt()
            .await
            .map_err(|e| StoreError::Rpc(format!("receipt for {}: {}", tx_hash, e)))?;
        if !receipt.status() {
            return Err(StoreError::Reverted(format!("transaction {} reverted", tx_hash)));
        }

        let events: Vec<RegistryEvent> = receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == address)
            .filter_map(decode_event)
            .collect();
        for event in &events {
            tracing::info!(
                domain = %domain,
                event = event.name(),
                digest = %event.digest(),
                tx_hash = %tx_hash,
                "Registry event"
            );
            let _ = self.events.send(StoreEvent {
                domain: domain.clone(),
                event: event.clone(),
            });
        }
        Ok(events)
    }
}

#[async_trait]
impl ConfigStore for EvmConfigStore {
    async fn set_candidate(
        &self,
        domain: &DomainId,
        static_config: StaticConfig,
        dynamic_config: DynamicConfig,
        expected_candidate: ConfigDigest,
    ) -> StoreResult<ConfigDigest> {
        validate_proposal(&static_config, &dynamic_config).map_err(RegistryError::from)?;

        let contract = self.writer(domain)?;
        let sent = contract
            .setCandidate(
                (&static_config).into(),
                (&dynamic_config).into(),
                expected_candidate.0,
            )
            .send()
            .await;
        let events = self.confirm(domain, "set_candidate", sent).await?;

        events
            .iter()
            .find_map(|e| match e {
                RegistryEvent::ConfigSet { digest, .. } => Some(*digest),
                _ => None,
            })
            .ok_or_else(|| StoreError::Inconsistent("receipt carries no ConfigSet event".into()))
    }

    async fn promote_candidate_and_revoke_active(
        &self,
        domain: &DomainId,
        to_promote: ConfigDigest,
        to_revoke: ConfigDigest,
    ) -> StoreResult<()> {
        if to_promote.is_zero() {
            return Err(RegistryError::PromotingZeroDigestNotAllowed.into());
        }
        if to_revoke.is_zero() {
            let (active, _) = self.get_config_digests(domain).await?;
            if !active.is_zero() {
                return Err(RegistryError::DigestMismatch {
                    expected: to_revoke,
                    actual: active,
                }
                .into());
            }
        }

        let contract = self.writer(domain)?;
        let sent = contract
            .promoteCandidateAndRevokeActive(to_promote.0, to_revoke.0)
            .send()
            .await;
        self.confirm(domain, "promote", sent).await.map(|_| ())
    }

    async fn revoke_candidate(&self, domain: &DomainId, digest: ConfigDigest) -> StoreResult<()> {
        if digest.is_zero() {
            return Err(RegistryError::RevokingZeroDigestNotAllowed.into());
        }
        let contract = self.writer(domain)?;
        let sent = contract.revokeCandidate(digest.0).send().await;
        self.confirm(domain, "revoke_candidate", sent).await.map(|_| ())
    }

    async fn get_config(
        &self,
        domain: &DomainId,
        digest: ConfigDigest,
    ) -> StoreResult<Option<VersionedConfig>> {
        if digest.is_zero() {
            return Ok(None);
        }
        let found = self
            .read(domain, |c| async move { c.getConfig(digest.0).call().await })
            .await?;
        if !found.ok {
            return Ok(None);
        }
        Ok(found.versionedConfig.into_config())
    }

    async fn get_config_digests(
        &self,
        domain: &DomainId,
    ) -> StoreResult<(ConfigDigest, ConfigDigest)> {
        let digests = self
            .read(domain, |c| async move { c.getConfigDigests().call().await })
            .await?;
        Ok((
            digests.activeConfigDigest.into(),
            digests.candidateConfigDigest.into(),
        ))
    }

    async fn get_all_configs(
        &self,
        domain: &DomainId,
    ) -> StoreResult<(Option<VersionedConfig>, Option<VersionedConfig>)> {
        let configs = self
            .read(domain, |c| async move { c.getAllConfigs().call().await })
            .await?;
        Ok((
            configs.activeConfig.into_config(),
            configs.candidateConfig.into_config(),
        ))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

/// Translate a failed contract call, decoding registry reverts.
fn map_contract_error(error: &alloy::contract::Error) -> StoreError {
    match error.as_decoded_interface_error::<CommitteeHomeErrors>() {
        Some(revert) => map_revert(revert),
        None => StoreError::Rpc(error.to_string()),
    }
}

fn rejected(rule: RejectedRule) -> RegistryError {
    RegistryError::Validation(ValidationError::Rejected(rule))
}

fn map_revert(revert: CommitteeHomeErrors) -> StoreError {
    let registry = match revert {
        // The contract names the stored digest "expected" and the caller's "got".
        CommitteeHomeErrors::ConfigDigestMismatch(e) => RegistryError::DigestMismatch {
            expected: e.gotConfigDigest.into(),
            actual: e.expectedConfigDigest.into(),
        },
        CommitteeHomeErrors::DigestNotFound(e) => RegistryError::DigestNotFound(e.configDigest.into()),
        CommitteeHomeErrors::NoOpStateTransitionNotAllowed(_) => {
            RegistryError::NoOpTransitionNotAllowed
        }
        CommitteeHomeErrors::RevokingZeroDigestNotAllowed(_) => {
            RegistryError::RevokingZeroDigestNotAllowed
        }
        CommitteeHomeErrors::DuplicateOffchainPublicKey(_) => {
            rejected(RejectedRule::DuplicateAuxiliaryKey)
        }
        CommitteeHomeErrors::DuplicatePeerId(_) => rejected(RejectedRule::DuplicateIdentityKey),
        CommitteeHomeErrors::DuplicateSourceChain(_) => rejected(RejectedRule::DuplicateScope),
        CommitteeHomeErrors::MinObserversTooHigh(_) => rejected(RejectedRule::QuorumTooHigh),
        CommitteeHomeErrors::OutOfBoundsNodesLength(_) => {
            rejected(RejectedRule::NodeCountOutOfBounds)
        }
        CommitteeHomeErrors::OutOfBoundsObserverNodeIndex(_) => {
            rejected(RejectedRule::MemberIndexOutOfBounds)
        }
    };
    StoreError::Registry(registry)
}

/// Decode one registry event log; other logs yield `None`.
fn decode_event(log: &Log) -> Option<RegistryEvent> {
    if let Ok(decoded) = log.log_decode::<CommitteeHome::ConfigSet>() {
        let event = decoded.inner.data;
        return Some(RegistryEvent::ConfigSet {
            digest: event.configDigest.into(),
            version: event.version,
            static_config: event.staticConfig.into(),
            dynamic_config: event.dynamicConfig.into(),
        });
    }
    if let Ok(decoded) = log.log_decode::<CommitteeHome::ConfigPromoted>() {
        return Some(RegistryEvent::ConfigPromoted {
            digest: decoded.inner.data.configDigest.into(),
        });
    }
    if let Ok(decoded) = log.log_decode::<CommitteeHome::ActiveConfigRevoked>() {
        return Some(RegistryEvent::ActiveConfigRevoked {
            digest: decoded.inner.data.configDigest.into(),
        });
    }
    if let Ok(decoded) = log.log_decode::<CommitteeHome::CandidateConfigRevoked>() {
        return Some(RegistryEvent::CandidateConfigRevoked {
            digest: decoded.inner.data.configDigest.into(),
        });
    }
    None
}

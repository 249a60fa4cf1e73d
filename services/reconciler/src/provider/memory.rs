//! In-memory provider for tests and local development.
//!
//! Models both provider bindings on shared state keyed by subscription:
//! Resource Manager networks, the classic configuration document and subnet
//! security group bindings. Every mutation returns a pending operation that
//! reports `InProgress` a configurable number of times before finishing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azvnet_reconcile::OperationStatus;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    ClassicNetworks, NetworkConfiguration, OperationHandle, OperationTracker, ProviderError,
    ProviderFactory, RemoteVirtualNetwork, SecurityGroupBindings, VirtualNetworkSite,
    VirtualNetworkSpec, VirtualNetworks,
};
use crate::credentials::{AccessToken, AuthenticatedClient, IdentityProvider, OAuthConfig};
use crate::error::HandlerResult;

/// A mutating call recorded by the in-memory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    CreateOrUpdate {
        resource_group: String,
        name: String,
    },
    Delete {
        resource_group: String,
        name: String,
    },
    SetNetworkConfiguration,
    Associate {
        group: String,
        network: String,
        subnet: String,
    },
    Disassociate {
        group: String,
        network: String,
        subnet: String,
    },
}

impl ProviderCall {
    pub fn associate(group: &str, network: &str, subnet: &str) -> Self {
        ProviderCall::Associate {
            group: group.to_string(),
            network: network.to_string(),
            subnet: subnet.to_string(),
        }
    }

    pub fn disassociate(group: &str, network: &str, subnet: &str) -> Self {
        ProviderCall::Disassociate {
            group: group.to_string(),
            network: network.to_string(),
            subnet: subnet.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Account {
    networks: BTreeMap<(String, String), RemoteVirtualNetwork>,
    document: NetworkConfiguration,
    bindings: BTreeMap<(String, String), String>,
    next_site_id: u64,
}

#[derive(Debug)]
struct PendingOperation {
    polls_left: u32,
    outcome: OperationStatus,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    calls: Vec<ProviderCall>,
    failing: Vec<ProviderCall>,
    operations: HashMap<String, PendingOperation>,
    next_operation: u64,
}

impl State {
    fn account(&mut self, subscription: &str) -> &mut Account {
        self.accounts.entry(subscription.to_string()).or_default()
    }

    /// Record a mutation and open an operation for it.
    ///
    /// Returns the handle and whether the mutation should take effect.
    fn record(&mut self, call: ProviderCall, polls: u32) -> (OperationHandle, bool) {
        let fails = self.failing.contains(&call);
        self.calls.push(call);

        self.next_operation += 1;
        let token = format!("op-{}", self.next_operation);
        let outcome = if fails {
            OperationStatus::Failed("injected failure".to_string())
        } else {
            OperationStatus::Succeeded
        };
        self.operations.insert(
            token.clone(),
            PendingOperation {
                polls_left: polls,
                outcome,
            },
        );

        (OperationHandle::Pending(token), !fails)
    }
}

struct Inner {
    state: Mutex<State>,
    document_latency: Duration,
    pending_polls: u32,
}

/// Shared in-memory provider. Clones share state.
#[derive(Clone)]
pub struct InMemoryProvider {
    inner: Arc<Inner>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::with_options(Duration::ZERO, 1)
    }

    /// Build a provider with a delay between reading the configuration
    /// document and returning it, and a number of `InProgress` polls per
    /// operation.
    pub fn with_options(document_latency: Duration, pending_polls: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                document_latency,
                pending_polls,
            }),
        }
    }

    /// Make the operation started by `call` finish as failed.
    pub async fn fail_operation(&self, call: ProviderCall) {
        self.inner.state.lock().await.failing.push(call);
    }

    /// All mutating calls in the order they were made.
    pub async fn mutations(&self) -> Vec<ProviderCall> {
        self.inner.state.lock().await.calls.clone()
    }

    pub async fn clear_mutations(&self) {
        self.inner.state.lock().await.calls.clear();
    }

    pub async fn network(
        &self,
        subscription: &str,
        resource_group: &str,
        name: &str,
    ) -> Option<RemoteVirtualNetwork> {
        let state = self.inner.state.lock().await;
        state
            .accounts
            .get(subscription)?
            .networks
            .get(&(resource_group.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn network_count(&self, subscription: &str) -> usize {
        let state = self.inner.state.lock().await;
        state
            .accounts
            .get(subscription)
            .map(|a| a.networks.len())
            .unwrap_or(0)
    }

    /// The classic configuration document of a subscription.
    pub async fn document(&self, subscription: &str) -> NetworkConfiguration {
        let state = self.inner.state.lock().await;
        state
            .accounts
            .get(subscription)
            .map(|a| a.document.clone())
            .unwrap_or_default()
    }

    pub async fn seed_site(&self, subscription: &str, mut site: VirtualNetworkSite) {
        let mut state = self.inner.state.lock().await;
        let account = state.account(subscription);
        if site.id.is_empty() {
            account.next_site_id += 1;
            site.id = format!("site-{}", account.next_site_id);
        }
        account.document.upsert_site(site);
    }

    pub async fn seed_binding(&self, subscription: &str, network: &str, subnet: &str, group: &str) {
        let mut state = self.inner.state.lock().await;
        state
            .account(subscription)
            .bindings
            .insert((network.to_string(), subnet.to_string()), group.to_string());
    }

    pub async fn binding(&self, subscription: &str, network: &str, subnet: &str) -> Option<String> {
        let state = self.inner.state.lock().await;
        state
            .accounts
            .get(subscription)?
            .bindings
            .get(&(network.to_string(), subnet.to_string()))
            .cloned()
    }
}

impl ProviderFactory for InMemoryProvider {
    fn virtual_networks(
        &self,
        client: &AuthenticatedClient,
    ) -> HandlerResult<Arc<dyn VirtualNetworks>> {
        Ok(Arc::new(self.account_client(client)))
    }

    fn classic_networks(
        &self,
        client: &AuthenticatedClient,
    ) -> HandlerResult<Arc<dyn ClassicNetworks>> {
        Ok(Arc::new(self.account_client(client)))
    }
}

impl InMemoryProvider {
    fn account_client(&self, client: &AuthenticatedClient) -> AccountClient {
        AccountClient {
            provider: self.clone(),
            subscription: client.subscription_id.clone(),
        }
    }
}

/// Provider client scoped to one subscription.
struct AccountClient {
    provider: InMemoryProvider,
    subscription: String,
}

impl AccountClient {
    fn resource_id(&self, resource_group: &str, name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}",
            self.subscription, resource_group, name
        )
    }

    fn polls(&self) -> u32 {
        self.provider.inner.pending_polls
    }
}

#[async_trait]
impl OperationTracker for AccountClient {
    async fn operation_status(&self, token: &str) -> Result<OperationStatus, ProviderError> {
        let mut state = self.provider.inner.state.lock().await;
        let op = state
            .operations
            .get_mut(token)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown operation {token}")))?;

        if op.polls_left > 0 {
            op.polls_left -= 1;
            return Ok(OperationStatus::InProgress);
        }
        Ok(op.outcome.clone())
    }
}

#[async_trait]
impl VirtualNetworks for AccountClient {
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        spec: &VirtualNetworkSpec,
    ) -> Result<OperationHandle, ProviderError> {
        let id = self.resource_id(resource_group, name);
        let polls = self.polls();
        let mut state = self.provider.inner.state.lock().await;

        let (handle, applies) = state.record(
            ProviderCall::CreateOrUpdate {
                resource_group: resource_group.to_string(),
                name: name.to_string(),
            },
            polls,
        );
        if applies {
            state.account(&self.subscription).networks.insert(
                (resource_group.to_string(), name.to_string()),
                RemoteVirtualNetwork {
                    id: Some(id),
                    name: name.to_string(),
                    location: spec.location.clone(),
                    address_spaces: spec.address_spaces.clone(),
                    dns_servers: spec.dns_servers.clone(),
                    tags: spec.tags.clone(),
                    subnets: spec.subnets.clone(),
                },
            );
        }
        debug!(resource_group, name, "[MEMORY] create_or_update");
        Ok(handle)
    }

    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<RemoteVirtualNetwork>, ProviderError> {
        Ok(self
            .provider
            .network(&self.subscription, resource_group, name)
            .await)
    }

    async fn delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<OperationHandle, ProviderError> {
        let polls = self.polls();
        let mut state = self.provider.inner.state.lock().await;
        let key = (resource_group.to_string(), name.to_string());
        if !state.account(&self.subscription).networks.contains_key(&key) {
            return Ok(OperationHandle::Completed);
        }

        let (handle, applies) = state.record(
            ProviderCall::Delete {
                resource_group: resource_group.to_string(),
                name: name.to_string(),
            },
            polls,
        );
        if applies {
            state.account(&self.subscription).networks.remove(&key);
        }
        Ok(handle)
    }
}

#[async_trait]
impl SecurityGroupBindings for AccountClient {
    async fn subnet_security_group(
        &self,
        network: &str,
        subnet: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(self.provider.binding(&self.subscription, network, subnet).await)
    }

    async fn associate_security_group(
        &self,
        group: &str,
        network: &str,
        subnet: &str,
    ) -> Result<OperationHandle, ProviderError> {
        let polls = self.polls();
        let mut state = self.provider.inner.state.lock().await;
        let key = (network.to_string(), subnet.to_string());
        let occupied = state.account(&self.subscription).bindings.contains_key(&key);

        let (handle, applies) =
            state.record(ProviderCall::associate(group, network, subnet), polls);
        if occupied {
            if let OperationHandle::Pending(token) = &handle {
                if let Some(op) = state.operations.get_mut(token) {
                    op.outcome = OperationStatus::Failed(format!(
                        "subnet {subnet} already has a security group"
                    ));
                }
            }
        } else if applies {
            state
                .account(&self.subscription)
                .bindings
                .insert(key, group.to_string());
        }
        Ok(handle)
    }

    async fn disassociate_security_group(
        &self,
        group: &str,
        network: &str,
        subnet: &str,
    ) -> Result<OperationHandle, ProviderError> {
        let polls = self.polls();
        let mut state = self.provider.inner.state.lock().await;
        let key = (network.to_string(), subnet.to_string());
        let bound = state.account(&self.subscription).bindings.get(&key) == Some(&group.to_string());
        if !bound {
            return Err(ProviderError::Rejected(format!(
                "security group {group} is not bound to subnet {subnet}"
            )));
        }

        let (handle, applies) =
            state.record(ProviderCall::disassociate(group, network, subnet), polls);
        if applies {
            state.account(&self.subscription).bindings.remove(&key);
        }
        Ok(handle)
    }
}

#[async_trait]
impl ClassicNetworks for AccountClient {
    async fn network_configuration(&self) -> Result<NetworkConfiguration, ProviderError> {
        let document = self.provider.document(&self.subscription).await;
        if !self.provider.inner.document_latency.is_zero() {
            tokio::time::sleep(self.provider.inner.document_latency).await;
        }
        Ok(document)
    }

    async fn set_network_configuration(
        &self,
        config: &NetworkConfiguration,
    ) -> Result<OperationHandle, ProviderError> {
        let polls = self.polls();
        let mut state = self.provider.inner.state.lock().await;

        let (handle, applies) = state.record(ProviderCall::SetNetworkConfiguration, polls);
        if applies {
            let account = state.account(&self.subscription);
            let mut document = config.clone();
            for site in document.sites.iter_mut().filter(|s| s.id.is_empty()) {
                account.next_site_id += 1;
                site.id = format!("site-{}", account.next_site_id);
            }
            account
                .bindings
                .retain(|(network, _), _| document.site(network).is_some());
            account.document = document;
        }
        Ok(handle)
    }
}

/// Identity provider that accepts any service principal.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentity;

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    async fn oauth_config(&self, tenant_id: &str) -> Result<Option<OAuthConfig>, ProviderError> {
        if tenant_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(OAuthConfig {
            tenant_id: tenant_id.to_string(),
            token_endpoint: format!("memory://{tenant_id}/oauth2/token"),
        }))
    }

    async fn acquire_token(
        &self,
        config: &OAuthConfig,
        client_id: &str,
        _client_secret: &str,
    ) -> Result<AccessToken, ProviderError> {
        Ok(AccessToken::new(format!(
            "memory-token:{}:{}",
            config.tenant_id, client_id
        )))
    }
}

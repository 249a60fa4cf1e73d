//! Remote provider interface.
//!
//! Two bindings of the network provider exist:
//! - Resource Manager: per-network create-or-update, get and delete calls
//! - Classic: one shared network configuration document per subscription,
//!   plus subnet security group bindings
//!
//! Every mutation may complete asynchronously and returns an
//! [`OperationHandle`] that has to be awaited with [`await_operation`].

pub mod arm;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use azvnet_events::Subnet;
use azvnet_reconcile::{wait_for_operation, OperationStatus, PollPolicy, WaitError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::AuthenticatedClient;
use crate::error::HandlerResult;

pub use arm::{ArmClient, ArmProviderFactory};
pub use memory::{InMemoryIdentity, InMemoryProvider, ProviderCall};

/// Provider call errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an unexpected status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider's answer could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider refused the request.
    #[error("{0}")]
    Rejected(String),
}

/// Token for a possibly asynchronous provider mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationHandle {
    /// The provider finished the mutation synchronously.
    Completed,

    /// The mutation is running; the token is provider specific.
    Pending(String),
}

/// Anything that can report the status of its own asynchronous operations.
#[async_trait]
pub trait OperationTracker: Send + Sync {
    async fn operation_status(&self, token: &str) -> Result<OperationStatus, ProviderError>;
}

/// Block until the operation behind `handle` has finished.
pub async fn await_operation<T>(
    tracker: &T,
    handle: &OperationHandle,
    resource: &str,
    policy: &PollPolicy,
) -> Result<(), WaitError<ProviderError>>
where
    T: OperationTracker + ?Sized,
{
    match handle {
        OperationHandle::Completed => Ok(()),
        OperationHandle::Pending(token) => {
            wait_for_operation(resource, policy, move || tracker.operation_status(token)).await
        }
    }
}

// =============================================================================
// Resource Manager binding
// =============================================================================

/// Desired shape of a virtual network sent on create-or-update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualNetworkSpec {
    pub location: String,
    pub tags: BTreeMap<String, String>,
    pub address_spaces: Vec<String>,
    pub dns_servers: Vec<String>,
    pub subnets: Vec<Subnet>,
}

/// A virtual network as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteVirtualNetwork {
    pub id: Option<String>,
    pub name: String,
    pub location: String,
    pub address_spaces: Vec<String>,
    pub dns_servers: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub subnets: Vec<Subnet>,
}

/// Resource Manager virtual network operations.
#[async_trait]
pub trait VirtualNetworks: OperationTracker {
    /// Create or fully replace a network.
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        spec: &VirtualNetworkSpec,
    ) -> Result<OperationHandle, ProviderError>;

    /// Read a network. `None` means the provider reported it as not found.
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<RemoteVirtualNetwork>, ProviderError>;

    /// Delete a network. Deleting an absent network completes immediately.
    async fn delete(&self, resource_group: &str, name: &str)
        -> Result<OperationHandle, ProviderError>;
}

// =============================================================================
// Classic binding
// =============================================================================

/// A subnet entry in the network configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSubnet {
    pub name: String,
    pub address_prefix: String,
}

/// A virtual network entry in the network configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetworkSite {
    /// Assigned by the provider when the document is applied.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub location: String,
    pub address_spaces: Vec<String>,
    pub dns_servers: Vec<String>,
    pub subnets: Vec<SiteSubnet>,
}

/// The per-subscription network configuration document.
///
/// The provider stores every classic network of a subscription in this one
/// document; changes are made by reading it, editing it and submitting it
/// whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    pub sites: Vec<VirtualNetworkSite>,
}

impl NetworkConfiguration {
    pub fn site(&self, name: &str) -> Option<&VirtualNetworkSite> {
        self.sites.iter().find(|s| s.name == name)
    }

    /// Insert a site, replacing any same-named entry in place.
    pub fn upsert_site(&mut self, site: VirtualNetworkSite) {
        match self.sites.iter_mut().find(|s| s.name == site.name) {
            Some(existing) => {
                let id = std::mem::take(&mut existing.id);
                *existing = VirtualNetworkSite { id, ..site };
            }
            None => self.sites.push(site),
        }
    }

    /// Remove a site by name, returning it if it was present.
    pub fn remove_site(&mut self, name: &str) -> Option<VirtualNetworkSite> {
        let index = self.sites.iter().position(|s| s.name == name)?;
        Some(self.sites.remove(index))
    }
}

/// Subnet to network security group bindings.
///
/// A subnet holds at most one security group at a time.
#[async_trait]
pub trait SecurityGroupBindings: OperationTracker {
    /// The group currently bound to a subnet. Not found is reported as `None`.
    async fn subnet_security_group(
        &self,
        network: &str,
        subnet: &str,
    ) -> Result<Option<String>, ProviderError>;

    async fn associate_security_group(
        &self,
        group: &str,
        network: &str,
        subnet: &str,
    ) -> Result<OperationHandle, ProviderError>;

    async fn disassociate_security_group(
        &self,
        group: &str,
        network: &str,
        subnet: &str,
    ) -> Result<OperationHandle, ProviderError>;
}

/// Classic network configuration operations.
#[async_trait]
pub trait ClassicNetworks: SecurityGroupBindings {
    async fn network_configuration(&self) -> Result<NetworkConfiguration, ProviderError>;

    async fn set_network_configuration(
        &self,
        config: &NetworkConfiguration,
    ) -> Result<OperationHandle, ProviderError>;
}

/// Builds provider clients for an authenticated subscription.
pub trait ProviderFactory: Send + Sync {
    fn virtual_networks(&self, client: &AuthenticatedClient)
        -> HandlerResult<Arc<dyn VirtualNetworks>>;

    fn classic_networks(&self, client: &AuthenticatedClient)
        -> HandlerResult<Arc<dyn ClassicNetworks>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str) -> VirtualNetworkSite {
        VirtualNetworkSite {
            name: name.to_string(),
            location: "westeurope".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_site_keeps_provider_id() {
        let mut config = NetworkConfiguration::default();
        config.upsert_site(site("a"));
        config.sites[0].id = "id-a".to_string();

        let mut replacement = site("a");
        replacement.location = "northeurope".to_string();
        config.upsert_site(replacement);

        assert_eq!(config.sites.len(), 1);
        assert_eq!(config.sites[0].id, "id-a");
        assert_eq!(config.sites[0].location, "northeurope");
    }

    #[test]
    fn test_remove_site() {
        let mut config = NetworkConfiguration::default();
        config.upsert_site(site("a"));
        config.upsert_site(site("b"));

        assert!(config.remove_site("a").is_some());
        assert!(config.remove_site("a").is_none());
        assert_eq!(config.sites.len(), 1);
        assert!(config.site("b").is_some());
    }
}

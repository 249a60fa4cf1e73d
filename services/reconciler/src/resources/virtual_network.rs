//! Resource Manager virtual networks.
//!
//! Create is an idempotent create-or-update followed by a read-back, so the
//! event always ends up carrying the provider's view of the network. Update
//! is the same full replace.

use std::sync::Arc;

use async_trait::async_trait;
use azvnet_events::{NetworkEvent, ResourceKind};
use azvnet_reconcile::PollPolicy;
use tracing::{debug, info, instrument};

use super::{validate_network, Resource};
use crate::credentials::AuthenticatedClient;
use crate::error::{HandlerError, HandlerResult};
use crate::provider::{
    await_operation, ProviderFactory, RemoteVirtualNetwork, VirtualNetworkSpec, VirtualNetworks,
};

/// Reconciler for `virtual_network.*` subjects.
pub struct VirtualNetworkResource {
    providers: Arc<dyn ProviderFactory>,
    poll: PollPolicy,
}

impl VirtualNetworkResource {
    pub fn new(providers: Arc<dyn ProviderFactory>, poll: PollPolicy) -> Self {
        Self { providers, poll }
    }

    /// Refresh the event from the provider.
    async fn read(&self, networks: &dyn VirtualNetworks, event: &mut NetworkEvent) -> HandlerResult<()> {
        let remote = networks
            .get(&event.resource_group, &event.name)
            .await
            .map_err(|e| HandlerError::remote("read", &event.name, &event.resource_group, e))?;

        match remote {
            Some(remote) => apply_remote(event, remote),
            None => {
                debug!(name = %event.name, "Virtual network not found");
                event.id.clear();
            }
        }
        Ok(())
    }
}

/// Overwrite local fields with the provider's representation.
fn apply_remote(event: &mut NetworkEvent, remote: RemoteVirtualNetwork) {
    if let Some(id) = remote.id {
        event.id = id;
    }
    event.name = remote.name;
    event.location = remote.location;
    event.address_spaces = remote.address_spaces;
    event.dns_server_names = remote.dns_servers;
    event.tags = remote.tags;
}

fn spec_for(event: &NetworkEvent) -> VirtualNetworkSpec {
    VirtualNetworkSpec {
        location: event.location.clone(),
        tags: event.tags.clone(),
        address_spaces: event.address_spaces.clone(),
        dns_servers: event.dns_server_names.clone(),
        subnets: event.subnets.clone(),
    }
}

#[async_trait]
impl Resource for VirtualNetworkResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualNetwork
    }

    fn validate(&self, event: &NetworkEvent) -> HandlerResult<()> {
        validate_network(event)
    }

    #[instrument(skip_all, fields(name = %event.name, resource_group = %event.resource_group))]
    async fn create(
        &self,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
    ) -> HandlerResult<()> {
        let networks = self.providers.virtual_networks(client)?;
        let (name, resource_group) = (event.name.clone(), event.resource_group.clone());

        info!("Creating or updating virtual network");
        let handle = networks
            .create_or_update(&resource_group, &name, &spec_for(event))
            .await
            .map_err(|e| HandlerError::remote("create", &name, &resource_group, e))?;
        await_operation(&*networks, &handle, &name, &self.poll)
            .await
            .map_err(|e| HandlerError::remote("create", &name, &resource_group, e))?;

        let id = networks
            .get(&resource_group, &name)
            .await
            .map_err(|e| HandlerError::remote("read", &name, &resource_group, e))?
            .and_then(|remote| remote.id)
            .ok_or_else(|| {
                HandlerError::remote("create", &name, &resource_group, "cannot read network ID")
            })?;
        event.id = id;

        self.read(&*networks, event).await
    }

    async fn update(
        &self,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
    ) -> HandlerResult<()> {
        self.create(client, event).await
    }

    #[instrument(skip_all, fields(name = %event.name, resource_group = %event.resource_group))]
    async fn delete(
        &self,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
    ) -> HandlerResult<()> {
        let networks = self.providers.virtual_networks(client)?;
        let (name, resource_group) = (event.name.clone(), event.resource_group.clone());

        info!("Deleting virtual network");
        let handle = networks
            .delete(&resource_group, &name)
            .await
            .map_err(|e| HandlerError::remote("delete", &name, &resource_group, e))?;
        await_operation(&*networks, &handle, &name, &self.poll)
            .await
            .map_err(|e| HandlerError::remote("delete", &name, &resource_group, e))?;

        event.id.clear();
        Ok(())
    }

    #[instrument(skip_all, fields(name = %event.name, resource_group = %event.resource_group))]
    async fn get(
        &self,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
    ) -> HandlerResult<()> {
        let networks = self.providers.virtual_networks(client)?;
        self.read(&*networks, event).await
    }
}

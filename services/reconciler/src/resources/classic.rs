//! Classic virtual networks.
//!
//! Every classic network of a subscription lives in one shared network
//! configuration document. Changes are read-modify-submit cycles on that
//! document, serialized per subscription by [`DocumentLocks`]. The lock is
//! released once the document has been submitted; waiting on the submit
//! operation and security group convergence happen outside it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use azvnet_events::{NetworkEvent, ResourceKind};
use azvnet_reconcile::PollPolicy;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::{validate_network, Resource};
use crate::convergence::ConvergenceEngine;
use crate::credentials::AuthenticatedClient;
use crate::error::{HandlerError, HandlerResult};
use crate::provider::{
    await_operation, ClassicNetworks, ProviderFactory, SiteSubnet, VirtualNetworkSite,
};

/// Per-subscription locks on the network configuration document.
///
/// Clones share the same lock table.
#[derive(Debug, Clone, Default)]
pub struct DocumentLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `subscription`'s document.
    pub async fn lock_for(&self, subscription: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(subscription.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Reconciler for `classic_virtual_network.*` subjects.
pub struct ClassicVirtualNetworkResource {
    providers: Arc<dyn ProviderFactory>,
    locks: DocumentLocks,
    poll: PollPolicy,
    engine: ConvergenceEngine,
}

impl ClassicVirtualNetworkResource {
    pub fn new(providers: Arc<dyn ProviderFactory>, locks: DocumentLocks, poll: PollPolicy) -> Self {
        Self {
            providers,
            locks,
            poll,
            engine: ConvergenceEngine::new(poll),
        }
    }

    /// Write the event's site into the document, then converge its subnets.
    ///
    /// With `replace` unset an existing same-named site is an error.
    async fn write_site(
        &self,
        operation: &'static str,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
        replace: bool,
    ) -> HandlerResult<()> {
        let classic = self.providers.classic_networks(client)?;
        let (name, resource_group) = (event.name.clone(), event.resource_group.clone());

        let handle = {
            let lock = self.locks.lock_for(&client.subscription_id).await;
            let _guard = lock.lock().await;

            let mut document = classic
                .network_configuration()
                .await
                .map_err(|e| HandlerError::remote("read", &name, &resource_group, e))?;
            if !replace && document.site(&name).is_some() {
                return Err(HandlerError::AlreadyExists(name));
            }

            document.upsert_site(site_for(event));
            info!(sites = document.sites.len(), "Submitting network configuration");
            classic
                .set_network_configuration(&document)
                .await
                .map_err(|e| HandlerError::remote(operation, &name, &resource_group, e))?
        };

        await_operation(&*classic, &handle, &name, &self.poll)
            .await
            .map_err(|e| HandlerError::remote(operation, &name, &resource_group, e))?;

        self.engine
            .converge(&*classic, &name, &event.subnets)
            .await?;

        self.read(&*classic, event).await?;
        if !event.exists() {
            return Err(HandlerError::remote(
                operation,
                &name,
                &resource_group,
                "cannot read network ID",
            ));
        }
        Ok(())
    }

    async fn read(&self, classic: &dyn ClassicNetworks, event: &mut NetworkEvent) -> HandlerResult<()> {
        let document = classic
            .network_configuration()
            .await
            .map_err(|e| HandlerError::remote("read", &event.name, &event.resource_group, e))?;

        match document.site(&event.name) {
            Some(site) => {
                event.id = site.id.clone();
                event.name = site.name.clone();
                event.location = site.location.clone();
                event.address_spaces = site.address_spaces.clone();
                event.dns_server_names = site.dns_servers.clone();
            }
            None => {
                debug!(name = %event.name, "Classic virtual network not found");
                event.id.clear();
            }
        }
        Ok(())
    }
}

fn site_for(event: &NetworkEvent) -> VirtualNetworkSite {
    VirtualNetworkSite {
        id: String::new(),
        name: event.name.clone(),
        location: event.location.clone(),
        address_spaces: event.address_spaces.clone(),
        dns_servers: event.dns_server_names.clone(),
        subnets: event
            .subnets
            .iter()
            .map(|s| SiteSubnet {
                name: s.name.clone(),
                address_prefix: s.address_prefix.clone(),
            })
            .collect(),
    }
}

#[async_trait]
impl Resource for ClassicVirtualNetworkResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ClassicVirtualNetwork
    }

    fn validate(&self, event: &NetworkEvent) -> HandlerResult<()> {
        validate_network(event)
    }

    #[instrument(skip_all, fields(name = %event.name, subscription = %client.subscription_id))]
    async fn create(
        &self,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
    ) -> HandlerResult<()> {
        self.write_site("create", client, event, false).await
    }

    #[instrument(skip_all, fields(name = %event.name, subscription = %client.subscription_id))]
    async fn update(
        &self,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
    ) -> HandlerResult<()> {
        self.write_site("update", client, event, true).await
    }

    #[instrument(skip_all, fields(name = %event.name, subscription = %client.subscription_id))]
    async fn delete(
        &self,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
    ) -> HandlerResult<()> {
        let classic = self.providers.classic_networks(client)?;
        let (name, resource_group) = (event.name.clone(), event.resource_group.clone());

        let handle = {
            let lock = self.locks.lock_for(&client.subscription_id).await;
            let _guard = lock.lock().await;

            let mut document = classic
                .network_configuration()
                .await
                .map_err(|e| HandlerError::remote("read", &name, &resource_group, e))?;
            if document.remove_site(&name).is_none() {
                debug!("Classic virtual network already absent");
                event.id.clear();
                return Ok(());
            }

            info!("Removing site from network configuration");
            classic
                .set_network_configuration(&document)
                .await
                .map_err(|e| HandlerError::remote("delete", &name, &resource_group, e))?
        };

        await_operation(&*classic, &handle, &name, &self.poll)
            .await
            .map_err(|e| HandlerError::remote("delete", &name, &resource_group, e))?;

        event.id.clear();
        Ok(())
    }

    #[instrument(skip_all, fields(name = %event.name, subscription = %client.subscription_id))]
    async fn get(
        &self,
        client: &AuthenticatedClient,
        event: &mut NetworkEvent,
    ) -> HandlerResult<()> {
        let classic = self.providers.classic_networks(client)?;
        self.read(&*classic, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use azvnet_events::Subnet;

    use crate::credentials::AccessToken;
    use crate::provider::{InMemoryProvider, ProviderCall};

    fn client(subscription: &str) -> AuthenticatedClient {
        AuthenticatedClient {
            subscription_id: subscription.to_string(),
            token: AccessToken::new("t"),
        }
    }

    fn resource(provider: &InMemoryProvider) -> ClassicVirtualNetworkResource {
        ClassicVirtualNetworkResource::new(
            Arc::new(provider.clone()),
            DocumentLocks::new(),
            PollPolicy::new(Duration::from_millis(1), Some(Duration::from_secs(5))),
        )
    }

    fn event(name: &str) -> NetworkEvent {
        NetworkEvent {
            name: name.to_string(),
            location: "West Europe".to_string(),
            address_spaces: vec!["10.1.0.0/16".to_string()],
            subnets: vec![
                Subnet::new("web", "10.1.1.0/24", "sg-web"),
                Subnet::new("db", "10.1.2.0/24", ""),
            ],
            tags: BTreeMap::from([("owner".to_string(), "ops".to_string())]),
            subject: "classic_virtual_network.create".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_document_locks_are_per_subscription() {
        let locks = DocumentLocks::new();
        let a1 = locks.lock_for("sub-a").await;
        let a2 = locks.lock_for("sub-a").await;
        let b = locks.lock_for("sub-b").await;

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        let _held = a1.lock().await;
        assert!(b.try_lock().is_ok());
        assert!(a2.try_lock().is_err());
    }

    #[tokio::test]
    async fn test_create_adds_site_and_converges() {
        let provider = InMemoryProvider::new();
        let mut event = event("vnet");

        resource(&provider)
            .create(&client("sub"), &mut event)
            .await
            .unwrap();

        assert_eq!(event.id, "site-1");
        assert_eq!(event.tags.get("owner").map(String::as_str), Some("ops"));
        assert_eq!(
            provider.binding("sub", "vnet", "web").await.as_deref(),
            Some("sg-web")
        );
        assert_eq!(
            provider.mutations().await,
            vec![
                ProviderCall::SetNetworkConfiguration,
                ProviderCall::associate("sg-web", "vnet", "web"),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_existing_site_fails() {
        let provider = InMemoryProvider::new();
        let resource = resource(&provider);
        resource
            .create(&client("sub"), &mut event("vnet"))
            .await
            .unwrap();

        let err = resource
            .create(&client("sub"), &mut event("vnet"))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::AlreadyExists(ref name) if name == "vnet"));
    }

    #[tokio::test]
    async fn test_concurrent_creates_of_one_name() {
        let provider = InMemoryProvider::with_options(Duration::from_millis(20), 1);
        let resource = resource(&provider);
        let (mut first, mut second) = (event("vnet"), event("vnet"));
        let client = client("sub");

        let (a, b) = tokio::join!(
            resource.create(&client, &mut first),
            resource.create(&client, &mut second),
        );

        let outcomes = [a, b];
        let created = outcomes.iter().filter(|r| r.is_ok()).count();
        let rejected = outcomes
            .iter()
            .filter(|r| matches!(r, Err(HandlerError::AlreadyExists(_))))
            .count();
        assert_eq!((created, rejected), (1, 1));
        assert_eq!(provider.document("sub").await.sites.len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_site() {
        let provider = InMemoryProvider::new();
        let resource = resource(&provider);
        let mut created = event("vnet");
        resource.create(&client("sub"), &mut created).await.unwrap();

        let mut changed = event("vnet");
        changed.address_spaces = vec!["10.2.0.0/16".to_string()];
        changed.subnets = vec![Subnet::new("web", "10.2.1.0/24", "sg-other")];
        resource.update(&client("sub"), &mut changed).await.unwrap();

        let document = provider.document("sub").await;
        assert_eq!(document.sites.len(), 1);
        assert_eq!(changed.id, created.id);
        assert_eq!(changed.address_spaces, vec!["10.2.0.0/16"]);
        assert_eq!(
            provider.binding("sub", "vnet", "web").await.as_deref(),
            Some("sg-other")
        );
    }

    #[tokio::test]
    async fn test_convergence_failure_keeps_submitted_document() {
        let provider = InMemoryProvider::new();
        provider
            .fail_operation(ProviderCall::associate("sg-web", "vnet", "web"))
            .await;
        let mut event = event("vnet");

        let err = resource(&provider)
            .create(&client("sub"), &mut event)
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Convergence { ref subnet, .. } if subnet == "web"));
        assert!(provider.document("sub").await.site("vnet").is_some());
    }

    #[tokio::test]
    async fn test_delete_removes_site() {
        let provider = InMemoryProvider::new();
        let resource = resource(&provider);
        let mut event = event("vnet");
        resource.create(&client("sub"), &mut event).await.unwrap();

        resource.delete(&client("sub"), &mut event).await.unwrap();
        assert!(provider.document("sub").await.site("vnet").is_none());

        resource.get(&client("sub"), &mut event).await.unwrap();
        assert!(!event.exists());
    }

    #[tokio::test]
    async fn test_delete_absent_site_submits_nothing() {
        let provider = InMemoryProvider::new();
        let mut event = event("missing");

        resource(&provider)
            .delete(&client("sub"), &mut event)
            .await
            .unwrap();
        assert!(provider.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_reads_seeded_site() {
        let provider = InMemoryProvider::new();
        provider
            .seed_site(
                "sub",
                VirtualNetworkSite {
                    name: "legacy".to_string(),
                    location: "North Europe".to_string(),
                    address_spaces: vec!["172.16.0.0/16".to_string()],
                    dns_servers: vec!["172.16.0.4".to_string()],
                    ..Default::default()
                },
            )
            .await;

        let mut event = NetworkEvent {
            name: "legacy".to_string(),
            ..Default::default()
        };
        resource(&provider)
            .get(&client("sub"), &mut event)
            .await
            .unwrap();

        assert_eq!(event.id, "site-1");
        assert_eq!(event.location, "North Europe");
        assert_eq!(event.dns_server_names, vec!["172.16.0.4"]);
    }
}

//! Resource reconcilers.
//!
//! Every resource kind implements the same capability set
//! (`validate`, `create`, `update`, `delete`, `get`, `find`) and is looked up
//! by [`ResourceKind`] when a request is dispatched.

mod classic;
mod validation;
mod virtual_network;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use azvnet_events::{NetworkEvent, ResourceKind};
use azvnet_reconcile::PollPolicy;

use crate::credentials::AuthenticatedClient;
use crate::error::{HandlerError, HandlerResult};
use crate::provider::ProviderFactory;

pub use classic::{ClassicVirtualNetworkResource, DocumentLocks};
pub use validation::{validate_name, validate_network};
pub use virtual_network::VirtualNetworkResource;

/// Lifecycle operations for one resource kind.
#[async_trait]
pub trait Resource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Check the decoded event before any remote call is made.
    fn validate(&self, _event: &NetworkEvent) -> HandlerResult<()> {
        Ok(())
    }

    async fn create(&self, client: &AuthenticatedClient, event: &mut NetworkEvent)
        -> HandlerResult<()>;

    async fn update(&self, client: &AuthenticatedClient, event: &mut NetworkEvent)
        -> HandlerResult<()>;

    async fn delete(&self, client: &AuthenticatedClient, event: &mut NetworkEvent)
        -> HandlerResult<()>;

    async fn get(&self, client: &AuthenticatedClient, event: &mut NetworkEvent)
        -> HandlerResult<()>;

    /// Search for resources. Unsupported unless a kind opts in.
    async fn find(&self, event: &mut NetworkEvent) -> HandlerResult<()> {
        Err(HandlerError::UnsupportedOperation(event.subject.clone()))
    }
}

/// Resource reconcilers keyed by kind.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    resources: HashMap<ResourceKind, Arc<dyn Resource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both virtual network kinds backed by `providers`.
    pub fn with_defaults(providers: Arc<dyn ProviderFactory>, poll: PollPolicy) -> Self {
        Self::new()
            .register(Arc::new(VirtualNetworkResource::new(
                Arc::clone(&providers),
                poll,
            )))
            .register(Arc::new(ClassicVirtualNetworkResource::new(
                providers,
                DocumentLocks::new(),
                poll,
            )))
    }

    /// Register a reconciler, replacing any previous one for the same kind.
    pub fn register(mut self, resource: Arc<dyn Resource>) -> Self {
        self.resources.insert(resource.kind(), resource);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn Resource>> {
        self.resources.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

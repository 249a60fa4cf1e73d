//! Resource Manager REST client for virtual networks.
//!
//! Long-running operations are tracked through the `Azure-AsyncOperation`
//! header, falling back to `Location`, and polled until they report a
//! terminal status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azvnet_events::Subnet;
use azvnet_reconcile::OperationStatus;
use reqwest::{header::HeaderMap, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{
    ClassicNetworks, OperationHandle, OperationTracker, ProviderError, ProviderFactory,
    RemoteVirtualNetwork, VirtualNetworkSpec, VirtualNetworks,
};
use crate::credentials::AuthenticatedClient;
use crate::error::{HandlerError, HandlerResult};

/// Network resource provider API version.
pub const NETWORK_API_VERSION: &str = "2023-09-01";

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const LOCATION_HEADER: &str = "location";

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct ResourceRef {
    id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    network_security_group: Option<ResourceRef>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubnetResource {
    name: String,
    #[serde(default)]
    properties: SubnetProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressSpace {
    #[serde(default)]
    address_prefixes: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhcpOptions {
    #[serde(default)]
    dns_servers: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualNetworkProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address_space: Option<AddressSpace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dhcp_options: Option<DhcpOptions>,
    #[serde(default)]
    subnets: Vec<SubnetResource>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VirtualNetworkResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
    #[serde(default)]
    properties: VirtualNetworkProperties,
}

impl VirtualNetworkResource {
    fn from_spec(name: &str, spec: &VirtualNetworkSpec) -> Self {
        let subnets = spec
            .subnets
            .iter()
            .map(|s| SubnetResource {
                name: s.name.clone(),
                properties: SubnetProperties {
                    address_prefix: Some(s.address_prefix.clone()),
                    network_security_group: s
                        .desired_security_group()
                        .map(|id| ResourceRef { id: id.to_string() }),
                },
            })
            .collect();

        Self {
            id: None,
            name: Some(name.to_string()),
            location: spec.location.clone(),
            tags: Some(spec.tags.clone()),
            properties: VirtualNetworkProperties {
                address_space: Some(AddressSpace {
                    address_prefixes: spec.address_spaces.clone(),
                }),
                dhcp_options: Some(DhcpOptions {
                    dns_servers: spec.dns_servers.clone(),
                }),
                subnets,
            },
        }
    }

    fn into_remote(self, fallback_name: &str) -> RemoteVirtualNetwork {
        let subnets = self
            .properties
            .subnets
            .into_iter()
            .map(|s| Subnet {
                name: s.name,
                address_prefix: s.properties.address_prefix.unwrap_or_default(),
                security_group: s
                    .properties
                    .network_security_group
                    .map(|g| g.id)
                    .unwrap_or_default(),
            })
            .collect();

        RemoteVirtualNetwork {
            id: self.id.filter(|id| !id.is_empty()),
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            location: self.location,
            address_spaces: self
                .properties
                .address_space
                .map(|a| a.address_prefixes)
                .unwrap_or_default(),
            dns_servers: self
                .properties
                .dhcp_options
                .map(|d| d.dns_servers)
                .unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
            subnets,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AsyncOperation {
    status: Option<String>,
    error: Option<OperationError>,
}

// =============================================================================
// Client
// =============================================================================

/// Virtual network client for one subscription.
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_id: String,
    token: String,
}

impl ArmClient {
    pub fn new(http: reqwest::Client, endpoint: &str, client: &AuthenticatedClient) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription_id: client.subscription_id.clone(),
            token: client.token.secret().to_string(),
        }
    }

    fn network_url(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}?api-version={}",
            self.endpoint, self.subscription_id, resource_group, name, NETWORK_API_VERSION
        )
    }

    async fn failure(response: Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!(status, body = %body, "Resource Manager request failed");
        ProviderError::Status { status, body }
    }
}

/// Pick the operation tracking URL out of a mutation response.
fn operation_handle(headers: &HeaderMap) -> OperationHandle {
    [ASYNC_OPERATION_HEADER, LOCATION_HEADER]
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(|url| OperationHandle::Pending(url.to_string()))
        .unwrap_or(OperationHandle::Completed)
}

#[async_trait]
impl OperationTracker for ArmClient {
    async fn operation_status(&self, token: &str) -> Result<OperationStatus, ProviderError> {
        let response = self.http.get(token).bearer_auth(&self.token).send().await?;

        match response.status() {
            StatusCode::ACCEPTED => return Ok(OperationStatus::InProgress),
            StatusCode::NO_CONTENT => return Ok(OperationStatus::Succeeded),
            s if !s.is_success() => return Err(Self::failure(response).await),
            _ => {}
        }

        let body = response.bytes().await?;
        let operation: AsyncOperation = match serde_json::from_slice(&body) {
            Ok(op) => op,
            // Location polling ends with the final resource rather than a status document
            Err(_) => return Ok(OperationStatus::Succeeded),
        };

        let status = match operation.status.as_deref() {
            None | Some("Succeeded") => OperationStatus::Succeeded,
            Some(s @ ("Failed" | "Canceled")) => {
                let reason = operation
                    .error
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or_else(|| s.to_string());
                OperationStatus::Failed(reason)
            }
            Some(_) => OperationStatus::InProgress,
        };
        Ok(status)
    }
}

#[async_trait]
impl VirtualNetworks for ArmClient {
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        spec: &VirtualNetworkSpec,
    ) -> Result<OperationHandle, ProviderError> {
        let url = self.network_url(resource_group, name);
        debug!(url = %url, "Creating or updating virtual network");

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(&VirtualNetworkResource::from_spec(name, spec))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(operation_handle(response.headers()))
    }

    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<RemoteVirtualNetwork>, ProviderError> {
        let url = self.network_url(resource_group, name);
        debug!(url = %url, "Reading virtual network");

        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let resource: VirtualNetworkResource = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(Some(resource.into_remote(name)))
    }

    async fn delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<OperationHandle, ProviderError> {
        let url = self.network_url(resource_group, name);
        debug!(url = %url, "Deleting virtual network");

        let response = self.http.delete(&url).bearer_auth(&self.token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(OperationHandle::Completed);
        }
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(operation_handle(response.headers()))
    }
}

/// Builds Resource Manager clients.
///
/// The classic network configuration API has no wire client; requests for
/// classic networks fail with an unsupported-operation error.
#[derive(Clone)]
pub struct ArmProviderFactory {
    http: reqwest::Client,
    endpoint: String,
}

impl ArmProviderFactory {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

impl ProviderFactory for ArmProviderFactory {
    fn virtual_networks(
        &self,
        client: &AuthenticatedClient,
    ) -> HandlerResult<Arc<dyn VirtualNetworks>> {
        Ok(Arc::new(ArmClient::new(
            self.http.clone(),
            &self.endpoint,
            client,
        )))
    }

    fn classic_networks(
        &self,
        _client: &AuthenticatedClient,
    ) -> HandlerResult<Arc<dyn ClassicNetworks>> {
        Err(HandlerError::UnsupportedOperation(
            "classic network configuration API".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let spec = VirtualNetworkSpec {
            location: "westeurope".to_string(),
            tags: BTreeMap::from([("env".to_string(), "dev".to_string())]),
            address_spaces: vec!["10.0.0.0/16".to_string()],
            dns_servers: vec!["10.0.0.4".to_string()],
            subnets: vec![
                Subnet::new("web", "10.0.1.0/24", "/nsg/web"),
                Subnet::new("db", "10.0.2.0/24", ""),
            ],
        };

        let body = serde_json::to_value(VirtualNetworkResource::from_spec("vnet", &spec)).unwrap();
        assert_eq!(body["name"], "vnet");
        assert_eq!(body["location"], "westeurope");
        assert_eq!(body["tags"]["env"], "dev");
        assert_eq!(body["properties"]["addressSpace"]["addressPrefixes"][0], "10.0.0.0/16");
        assert_eq!(body["properties"]["dhcpOptions"]["dnsServers"][0], "10.0.0.4");
        assert_eq!(
            body["properties"]["subnets"][0]["properties"]["networkSecurityGroup"]["id"],
            "/nsg/web"
        );
        assert!(body["properties"]["subnets"][1]["properties"]
            .get("networkSecurityGroup")
            .is_none());
        assert!(body.get("id").is_none());
    }

    #[test]
    fn test_response_parsing_tolerates_nulls() {
        let resource: VirtualNetworkResource = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet",
            "name": "vnet",
            "location": "westeurope",
            "tags": null,
            "properties": {
                "addressSpace": {"addressPrefixes": ["10.0.0.0/16"]},
                "subnets": [{"name": "web", "properties": {"addressPrefix": "10.0.1.0/24"}}]
            }
        }))
        .unwrap();

        let remote = resource.into_remote("vnet");
        assert!(remote.id.is_some());
        assert!(remote.tags.is_empty());
        assert!(remote.dns_servers.is_empty());
        assert_eq!(remote.subnets[0].security_group, "");
    }

    #[test]
    fn test_operation_handle_prefers_async_operation_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(operation_handle(&headers), OperationHandle::Completed);

        headers.insert("location", "https://example/location".parse().unwrap());
        assert_eq!(
            operation_handle(&headers),
            OperationHandle::Pending("https://example/location".to_string())
        );

        headers.insert("azure-asyncoperation", "https://example/op".parse().unwrap());
        assert_eq!(
            operation_handle(&headers),
            OperationHandle::Pending("https://example/op".to_string())
        );
    }
}

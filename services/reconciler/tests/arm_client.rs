//! Integration tests for the Resource Manager and Azure AD HTTP clients.
//!
//! Uses wiremock to stand in for both endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use azvnet_events::Subnet;
use azvnet_reconcile::{OperationStatus, PollPolicy};
use azvnet_reconciler::credentials::{
    AccessToken, AuthenticatedClient, AzureIdentity, CredentialResolver, IdentityProvider,
};
use azvnet_reconciler::handler::Handler;
use azvnet_reconciler::provider::{
    await_operation, ArmClient, ArmProviderFactory, OperationHandle, OperationTracker,
    VirtualNetworkSpec, VirtualNetworks,
};
use azvnet_reconciler::resources::ResourceRegistry;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NETWORK_PATH: &str =
    "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Network/virtualNetworks/vnet-a";

fn authenticated() -> AuthenticatedClient {
    AuthenticatedClient {
        subscription_id: "sub-1".to_string(),
        token: AccessToken::new("token-1"),
    }
}

fn poll() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(5), Some(Duration::from_secs(5)))
}

fn network_body(server: &MockServer) -> serde_json::Value {
    json!({
        "id": NETWORK_PATH,
        "name": "vnet-a",
        "location": "westeurope",
        "tags": {"env": "test"},
        "properties": {
            "provisioningState": "Succeeded",
            "addressSpace": {"addressPrefixes": ["10.0.0.0/16"]},
            "dhcpOptions": {"dnsServers": ["10.0.0.4"]},
            "subnets": [{
                "name": "web",
                "properties": {
                    "addressPrefix": "10.0.1.0/24",
                    "networkSecurityGroup": {"id": format!("{}/nsg/web", server.uri())}
                }
            }]
        }
    })
}

#[tokio::test]
async fn test_create_or_update_tracks_async_operation() {
    let server = MockServer::start().await;
    let operation_url = format!("{}/operations/op-1", server.uri());

    Mock::given(method("PUT"))
        .and(path(NETWORK_PATH))
        .and(query_param("api-version", "2023-09-01"))
        .and(header("authorization", "Bearer token-1"))
        .and(body_string_contains("\"addressPrefixes\":[\"10.0.0.0/16\"]"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("azure-asyncoperation", operation_url.as_str())
                .set_body_json(network_body(&server)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
        .mount(&server)
        .await;

    let client = ArmClient::new(reqwest::Client::new(), &server.uri(), &authenticated());
    let spec = VirtualNetworkSpec {
        location: "westeurope".to_string(),
        tags: BTreeMap::new(),
        address_spaces: vec!["10.0.0.0/16".to_string()],
        dns_servers: vec![],
        subnets: vec![Subnet::new("web", "10.0.1.0/24", "")],
    };

    let handle = client.create_or_update("rg-a", "vnet-a", &spec).await.unwrap();
    assert_eq!(handle, OperationHandle::Pending(operation_url.clone()));

    assert_eq!(
        client.operation_status(&operation_url).await.unwrap(),
        OperationStatus::InProgress
    );
    await_operation(&client, &handle, "vnet-a", &poll())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_operation_reports_provider_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/operations/op-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Failed",
            "error": {"code": "InUseSubnetCannotBeDeleted", "message": "subnet web is in use"}
        })))
        .mount(&server)
        .await;

    let client = ArmClient::new(reqwest::Client::new(), &server.uri(), &authenticated());
    let handle = OperationHandle::Pending(format!("{}/operations/op-2", server.uri()));

    let err = await_operation(&client, &handle, "vnet-a", &poll())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("InUseSubnetCannotBeDeleted: subnet web is in use"));
}

#[tokio::test]
async fn test_get_parses_network_and_maps_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(NETWORK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(network_body(&server)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Network/virtualNetworks/missing",
        ))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "ResourceNotFound", "message": "not found"}
        })))
        .mount(&server)
        .await;

    let client = ArmClient::new(reqwest::Client::new(), &server.uri(), &authenticated());

    let network = client.get("rg-a", "vnet-a").await.unwrap().unwrap();
    assert_eq!(network.id.as_deref(), Some(NETWORK_PATH));
    assert_eq!(network.address_spaces, vec!["10.0.0.0/16"]);
    assert_eq!(network.dns_servers, vec!["10.0.0.4"]);
    assert_eq!(network.tags.get("env").map(String::as_str), Some("test"));
    assert!(network.subnets[0].security_group.ends_with("/nsg/web"));

    assert!(client.get("rg-a", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_not_found_completes() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path(NETWORK_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = ArmClient::new(reqwest::Client::new(), &server.uri(), &authenticated());
    let handle = client.delete("rg-a", "vnet-a").await.unwrap();
    assert_eq!(handle, OperationHandle::Completed);
}

#[tokio::test]
async fn test_server_error_is_reported_with_status() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(NETWORK_PATH))
        .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
        .mount(&server)
        .await;

    let client = ArmClient::new(reqwest::Client::new(), &server.uri(), &authenticated());
    let err = client
        .create_or_update("rg-a", "vnet-a", &VirtualNetworkSpec::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "unexpected status 409: conflict");
}

#[tokio::test]
async fn test_azure_identity_acquires_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=client-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": "issued-token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = AzureIdentity::new(server.uri(), "https://management.azure.com/").unwrap();
    let config = identity.oauth_config("tenant-1").await.unwrap().unwrap();
    let token = identity
        .acquire_token(&config, "client-1", "secret-1")
        .await
        .unwrap();

    assert_eq!(token.secret(), "issued-token");
}

#[tokio::test]
async fn test_rejected_token_request_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .mount(&server)
        .await;

    let resolver = CredentialResolver::new(Arc::new(
        AzureIdentity::new(server.uri(), "https://management.azure.com/").unwrap(),
    ));
    let creds = azvnet_events::Credentials {
        client_id: "client-1".to_string(),
        client_secret: "wrong".to_string(),
        tenant_id: "tenant-1".to_string(),
        subscription_id: "sub-1".to_string(),
    };

    let err = resolver.resolve(&creds, "").await.unwrap_err();
    assert!(err.to_string().contains("tenant-1"));
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_create_without_id_reports_remote_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "token-1"})),
        )
        .mount(&server)
        .await;

    let mut body = network_body(&server);
    body.as_object_mut().unwrap().remove("id");

    Mock::given(method("PUT"))
        .and(path(NETWORK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(NETWORK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let handler = Handler::new(
        CredentialResolver::new(Arc::new(AzureIdentity::new(server.uri(), server.uri()).unwrap())),
        ResourceRegistry::with_defaults(
            Arc::new(ArmProviderFactory::new(server.uri()).unwrap()),
            poll(),
        ),
        "",
    );

    let request = json!({
        "name": "vnet-a",
        "address_space": ["10.0.0.0/16"],
        "location": "westeurope",
        "resource_group_name": "rg-a",
        "azure_client_id": "client-1",
        "azure_client_secret": "secret-1",
        "azure_tenant_id": "tenant-1",
        "azure_subscription_id": "sub-1"
    });
    let response = handler
        .handle("virtual_network.create", &serde_json::to_vec(&request).unwrap())
        .await;

    assert_eq!(response.subject, "virtual_network.create.error");
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(
        body["error"],
        "create virtual network vnet-a (resource group rg-a): cannot read network ID"
    );
}

#[tokio::test]
async fn test_handler_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "token-1"})),
        )
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(NETWORK_PATH))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(network_body(&server)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(NETWORK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(network_body(&server)))
        .mount(&server)
        .await;

    let identity = AzureIdentity::new(server.uri(), server.uri()).unwrap();
    let factory = ArmProviderFactory::new(server.uri()).unwrap();
    let handler = Handler::new(
        CredentialResolver::new(Arc::new(identity)),
        ResourceRegistry::with_defaults(Arc::new(factory), poll()),
        "",
    );

    let request = json!({
        "name": "vnet-a",
        "address_space": ["10.0.0.0/16"],
        "location": "westeurope",
        "resource_group_name": "rg-a",
        "azure_client_id": "client-1",
        "azure_client_secret": "secret-1",
        "azure_tenant_id": "tenant-1",
        "azure_subscription_id": "sub-1"
    });
    let response = handler
        .handle("virtual_network.create", &serde_json::to_vec(&request).unwrap())
        .await;

    assert_eq!(response.subject, "virtual_network.create.done");
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["id"], NETWORK_PATH);
    assert_eq!(body["dns_server_names"][0], "10.0.0.4");

    // the classic binding has no wire client
    let response = handler
        .handle("classic_virtual_network.get", &serde_json::to_vec(&request).unwrap())
        .await;
    assert_eq!(response.subject, "classic_virtual_network.get.error");
}

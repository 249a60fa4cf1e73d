//! Credential resolution.
//!
//! Turns the (possibly encrypted) service principal carried on an event into
//! an authenticated client for one subscription. Nothing here is cached:
//! decrypted secrets and tokens live for a single request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azvnet_events::Credentials;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{HandlerError, HandlerResult};
use crate::provider::ProviderError;

/// Public cloud Azure AD authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Public cloud Resource Manager endpoint, also the token audience.
pub const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com";

/// OAuth endpoints for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub tenant_id: String,
    pub token_endpoint: String,
}

/// A bearer token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Authenticated handle bound to a single subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient {
    pub subscription_id: String,
    pub token: AccessToken,
}

/// Identity endpoint used to obtain service principal tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the OAuth configuration for a tenant.
    ///
    /// `Ok(None)` means the provider had no configuration for the tenant.
    async fn oauth_config(&self, tenant_id: &str) -> Result<Option<OAuthConfig>, ProviderError>;

    /// Obtain a token for a service principal.
    async fn acquire_token(
        &self,
        config: &OAuthConfig,
        client_id: &str,
        client_secret: &str,
    ) -> Result<AccessToken, ProviderError>;
}

/// Decrypt every credential field with `crypto_key`.
///
/// An empty key means the fields are already plaintext.
pub fn decrypt_credentials(creds: &Credentials, crypto_key: &str) -> HandlerResult<Credentials> {
    if crypto_key.is_empty() {
        return Ok(creds.clone());
    }

    let open = |field: &'static str, value: &str| {
        azvnet_crypto::decrypt(value, crypto_key).map_err(|source| {
            warn!(field, error = %source, "Failed to decrypt credential field");
            HandlerError::CredentialDecrypt { field, source }
        })
    };

    Ok(Credentials {
        client_id: open("client_id", &creds.client_id)?,
        client_secret: open("client_secret", &creds.client_secret)?,
        tenant_id: open("tenant_id", &creds.tenant_id)?,
        subscription_id: open("subscription_id", &creds.subscription_id)?,
    })
}

/// Resolves event credentials into authenticated clients.
#[derive(Clone)]
pub struct CredentialResolver {
    identity: Arc<dyn IdentityProvider>,
}

impl CredentialResolver {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    /// Decrypt the credentials if needed and authenticate against the tenant.
    #[instrument(skip_all)]
    pub async fn resolve(
        &self,
        creds: &Credentials,
        crypto_key: &str,
    ) -> HandlerResult<AuthenticatedClient> {
        let creds = decrypt_credentials(creds, crypto_key)?;

        let config = self
            .identity
            .oauth_config(&creds.tenant_id)
            .await
            .map_err(|e| {
                HandlerError::AuthConfig(format!(
                    "unable to configure OAuth for tenant {}: {}",
                    creds.tenant_id, e
                ))
            })?
            .ok_or_else(|| {
                HandlerError::AuthConfig(format!(
                    "unable to configure OAuth for tenant {}",
                    creds.tenant_id
                ))
            })?;

        let token = self
            .identity
            .acquire_token(&config, &creds.client_id, &creds.client_secret)
            .await
            .map_err(|e| {
                HandlerError::AuthConfig(format!(
                    "unable to obtain service principal token for tenant {}: {}",
                    creds.tenant_id, e
                ))
            })?;

        debug!(subscription_id = %creds.subscription_id, "Resolved credentials");

        Ok(AuthenticatedClient {
            subscription_id: creds.subscription_id,
            token,
        })
    }
}

// =============================================================================
// Azure AD
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Azure AD client-credentials identity provider.
pub struct AzureIdentity {
    http: reqwest::Client,
    authority_host: String,
    resource: String,
}

impl AzureIdentity {
    pub fn new(
        authority_host: impl Into<String>,
        resource: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            authority_host: authority_host.into().trim_end_matches('/').to_string(),
            resource: resource.into(),
        })
    }

    /// Public cloud defaults.
    pub fn public_cloud() -> Result<Self, ProviderError> {
        Self::new(DEFAULT_AUTHORITY_HOST, DEFAULT_RESOURCE_MANAGER_ENDPOINT)
    }
}

fn segment_count(url: &reqwest::Url) -> usize {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).count())
        .unwrap_or(0)
}

#[async_trait]
impl IdentityProvider for AzureIdentity {
    async fn oauth_config(&self, tenant_id: &str) -> Result<Option<OAuthConfig>, ProviderError> {
        if tenant_id.is_empty() {
            return Ok(None);
        }

        let endpoint = format!("{}/{}/oauth2/token", self.authority_host, tenant_id);
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid token endpoint: {e}")))?;
        let authority = reqwest::Url::parse(&self.authority_host)
            .map_err(|e| ProviderError::InvalidResponse(format!("invalid authority host: {e}")))?;

        // the tenant must add exactly one segment in front of `oauth2/token`
        if segment_count(&url) != segment_count(&authority) + 3 {
            return Ok(None);
        }

        Ok(Some(OAuthConfig {
            tenant_id: tenant_id.to_string(),
            token_endpoint: url.to_string(),
        }))
    }

    async fn acquire_token(
        &self,
        config: &OAuthConfig,
        client_id: &str,
        client_secret: &str,
    ) -> Result<AccessToken, ProviderError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("resource", self.resource.as_str()),
        ];

        let response = self
            .http
            .post(&config.token_endpoint)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(AccessToken::new(token.access_token))
    }
}

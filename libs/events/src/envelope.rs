//! The network event payload and its JSON encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::EventError;

/// A subnet as declared on the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subnet {
    pub name: String,
    pub address_prefix: String,

    /// Desired network security group, empty for none.
    pub security_group: String,
}

impl Subnet {
    pub fn new(
        name: impl Into<String>,
        address_prefix: impl Into<String>,
        security_group: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address_prefix: address_prefix.into(),
            security_group: security_group.into(),
        }
    }

    /// The desired security group, `None` when the subnet should have none.
    pub fn desired_security_group(&self) -> Option<&str> {
        if self.security_group.is_empty() {
            None
        } else {
            Some(&self.security_group)
        }
    }
}

/// Service principal credentials carried on the event.
///
/// When a crypto key is configured every field holds ciphertext.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    #[serde(rename = "azure_client_id")]
    pub client_id: String,
    #[serde(rename = "azure_client_secret")]
    pub client_secret: String,
    #[serde(rename = "azure_tenant_id")]
    pub tenant_id: String,
    #[serde(rename = "azure_subscription_id")]
    pub subscription_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// A virtual network request.
///
/// Created fresh for every inbound message, mutated by each pipeline stage
/// and dropped once the response body has been encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkEvent {
    /// Remote identifier; empty until the provider has created the network.
    pub id: String,

    pub name: String,

    #[serde(rename = "address_space")]
    pub address_spaces: Vec<String>,

    pub dns_server_names: Vec<String>,

    pub subnets: Vec<Subnet>,

    pub location: String,

    #[serde(rename = "resource_group_name")]
    pub resource_group: String,

    pub tags: BTreeMap<String, String>,

    #[serde(flatten)]
    pub credentials: Credentials,

    /// Set when the most recent operation failed.
    #[serde(rename = "error", skip_serializing_if = "String::is_empty")]
    pub error_message: String,

    /// Inbound routing subject, never serialized.
    #[serde(skip)]
    pub subject: String,

    /// Key the credential fields are encrypted with, never serialized.
    #[serde(skip)]
    pub crypto_key: String,
}

impl NetworkEvent {
    /// Create an empty event bound to a subject.
    ///
    /// Used to answer requests whose body could not be decoded.
    pub fn empty(subject: impl Into<String>, crypto_key: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            crypto_key: crypto_key.into(),
            ..Self::default()
        }
    }

    /// Decode an event from a raw message body.
    pub fn decode(subject: &str, body: &[u8], crypto_key: &str) -> Result<Self, EventError> {
        let mut event: NetworkEvent = serde_json::from_slice(body)?;
        event.subject = subject.to_string();
        event.crypto_key = crypto_key.to_string();
        Ok(event)
    }

    /// Encode the event as a response body.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Record a failure on the event.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_message = message.into();
    }

    pub fn has_failed(&self) -> bool {
        !self.error_message.is_empty()
    }

    /// Returns true if the provider has assigned an identity.
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    /// Find a declared subnet by name.
    pub fn subnet(&self, name: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.name == name)
    }
}

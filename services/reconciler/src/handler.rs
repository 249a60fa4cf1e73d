//! Request handling.
//!
//! A request is a raw subject plus a JSON body. Handling runs the fixed
//! pipeline decode → validate → resolve credentials → dispatch and always
//! answers with exactly one [`Response`]: the event re-encoded on
//! `<subject>.done`, or the event with `error` set on `<subject>.error`.

use std::str::FromStr;
use std::sync::Arc;

use azvnet_events::{error_subject, Action, ActionToken, NetworkEvent, Subject};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::credentials::CredentialResolver;
use crate::error::{HandlerError, HandlerResult};
use crate::resources::{validate_name, Resource, ResourceRegistry};

/// What to do with a subject whose action segment is not recognized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownActionPolicy {
    /// Answer on `.done` with the event unchanged.
    #[default]
    Ignore,

    /// Answer on `.error` with an unsupported-operation message.
    Reject,
}

impl FromStr for UnknownActionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(UnknownActionPolicy::Ignore),
            "reject" => Ok(UnknownActionPolicy::Reject),
            other => Err(format!("unknown action policy '{other}'")),
        }
    }
}

/// The single reply to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub subject: String,
    pub body: Vec<u8>,
}

/// Decodes, validates and dispatches requests.
#[derive(Clone)]
pub struct Handler {
    resolver: CredentialResolver,
    registry: Arc<ResourceRegistry>,
    crypto_key: String,
    unknown_actions: UnknownActionPolicy,
}

impl Handler {
    pub fn new(
        resolver: CredentialResolver,
        registry: ResourceRegistry,
        crypto_key: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            registry: Arc::new(registry),
            crypto_key: crypto_key.into(),
            unknown_actions: UnknownActionPolicy::default(),
        }
    }

    pub fn with_unknown_actions(mut self, policy: UnknownActionPolicy) -> Self {
        self.unknown_actions = policy;
        self
    }

    /// Decode the subject and body, then validate what the action reads.
    ///
    /// Create and update run the resource kind's full validation, get and
    /// delete only need a name. Find and unknown actions are not validated.
    /// On failure the event decoded so far (or an empty one) is returned
    /// along with the error so that it can still be answered.
    pub fn process(
        &self,
        subject: &str,
        body: &[u8],
    ) -> Result<(Subject, NetworkEvent), (NetworkEvent, HandlerError)> {
        let empty = || NetworkEvent::empty(subject, self.crypto_key.as_str());

        let parsed = Subject::parse(subject).map_err(|e| (empty(), e.into()))?;
        let resource = self
            .resource_for(&parsed)
            .map_err(|e| (empty(), e))?;

        let event = NetworkEvent::decode(subject, body, &self.crypto_key)
            .map_err(|e| (empty(), e.into()))?;

        let checked = match parsed.action() {
            ActionToken::Known(Action::Create | Action::Update) => resource.validate(&event),
            ActionToken::Known(Action::Get | Action::Delete) => validate_name(&event),
            ActionToken::Known(Action::Find) | ActionToken::Unknown(_) => Ok(()),
        };
        if let Err(e) = checked {
            return Err((event, e));
        }

        Ok((parsed, event))
    }

    /// Route a processed event to its resource operation.
    pub async fn dispatch(&self, subject: &Subject, event: &mut NetworkEvent) -> HandlerResult<()> {
        let action = match subject.action() {
            ActionToken::Known(action) => *action,
            ActionToken::Unknown(token) => {
                return match self.unknown_actions {
                    UnknownActionPolicy::Ignore => {
                        debug!(action = %token, "Ignoring unknown action");
                        Ok(())
                    }
                    UnknownActionPolicy::Reject => {
                        Err(HandlerError::UnsupportedOperation(subject.to_string()))
                    }
                };
            }
        };

        let resource = self.resource_for(subject)?;

        if !action.needs_credentials() {
            return resource.find(event).await;
        }

        let client = self
            .resolver
            .resolve(&event.credentials, &event.crypto_key)
            .await?;

        match action {
            Action::Create => resource.create(&client, event).await,
            Action::Update => resource.update(&client, event).await,
            Action::Delete => resource.delete(&client, event).await,
            Action::Get => resource.get(&client, event).await,
            Action::Find => resource.find(event).await,
        }
    }

    /// Handle one request end to end.
    pub async fn handle(&self, subject: &str, body: &[u8]) -> Response {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id, subject);

        async move {
            let result = match self.process(subject, body) {
                Ok((parsed, mut event)) => match self.dispatch(&parsed, &mut event).await {
                    Ok(()) => Ok((parsed, event)),
                    Err(e) => Err((event, e)),
                },
                Err(failed) => Err(failed),
            };

            match result {
                Ok((parsed, event)) => {
                    info!("Request completed");
                    respond(parsed.done(), &event)
                }
                Err((mut event, e)) => {
                    warn!(error = %e, error_kind = e.kind(), "Request failed");
                    event.fail(e.to_string());
                    respond(error_subject(subject), &event)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn resource_for(&self, subject: &Subject) -> HandlerResult<&Arc<dyn Resource>> {
        self.registry
            .get(subject.kind())
            .ok_or_else(|| HandlerError::UnsupportedOperation(subject.to_string()))
    }
}

fn respond(subject: String, event: &NetworkEvent) -> Response {
    let body = match event.encode() {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to encode response event");
            serde_json::json!({ "error": e.to_string() })
                .to_string()
                .into_bytes()
        }
    };
    Response { subject, body }
}

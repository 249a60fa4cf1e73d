//! Subject routing types.
//!
//! A subject is decoded exactly once into a [`Subject`]; everything past the
//! boundary matches on [`ResourceKind`] and [`ActionToken`] instead of
//! splitting strings.

use std::str::FromStr;

use crate::EventError;

// =============================================================================
// Subject Constants
// =============================================================================

/// Suffixes appended to the inbound subject when responding.
pub mod subjects {
    pub const DONE_SUFFIX: &str = ".done";
    pub const ERROR_SUFFIX: &str = ".error";
}

// =============================================================================
// Resource Kinds
// =============================================================================

/// The kinds of remote resource this service reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Resource Manager virtual network (create-or-update binding).
    VirtualNetwork,
    /// Classic virtual network kept in the shared network configuration document.
    ClassicVirtualNetwork,
}

impl ResourceKind {
    /// Canonical subject segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VirtualNetwork => "virtual_network",
            ResourceKind::ClassicVirtualNetwork => "classic_virtual_network",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("azure_").unwrap_or(s);
        match s {
            "virtual_network" => Ok(ResourceKind::VirtualNetwork),
            "classic_virtual_network" => Ok(ResourceKind::ClassicVirtualNetwork),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Lifecycle operations a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Update,
    Delete,
    Get,
    Find,
}

impl Action {
    /// Returns true if the action has to talk to the remote provider.
    pub fn needs_credentials(&self) -> bool {
        !matches!(self, Action::Find)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Get => "get",
            Action::Find => "find",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "get" => Ok(Action::Get),
            "find" => Ok(Action::Find),
            _ => Err(()),
        }
    }
}

/// The action segment of a subject.
///
/// Unrecognized actions are kept verbatim so the dispatcher can apply its
/// policy to them explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionToken {
    Known(Action),
    Unknown(String),
}

impl ActionToken {
    fn parse(segment: &str) -> Self {
        match segment.parse() {
            Ok(action) => ActionToken::Known(action),
            Err(()) => ActionToken::Unknown(segment.to_string()),
        }
    }
}

// =============================================================================
// Subject
// =============================================================================

/// A decoded routing subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    raw: String,
    kind: ResourceKind,
    action: ActionToken,
}

impl Subject {
    /// Decode a subject of the form `<kind>.<action>[.<suffix>]`.
    pub fn parse(raw: &str) -> Result<Self, EventError> {
        if raw.is_empty() {
            return Err(EventError::EmptySubject);
        }

        let mut parts = raw.split('.');
        let kind_segment = parts.next().unwrap_or_default();
        let kind = kind_segment
            .parse()
            .map_err(|()| EventError::UnknownResourceKind {
                kind: kind_segment.to_string(),
                subject: raw.to_string(),
            })?;
        let action = ActionToken::parse(parts.next().unwrap_or_default());

        Ok(Self {
            raw: raw.to_string(),
            kind,
            action,
        })
    }

    /// The subject exactly as received.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn action(&self) -> &ActionToken {
        &self.action
    }

    /// Subject for a successful response.
    pub fn done(&self) -> String {
        done_subject(&self.raw)
    }

    /// Subject for a failed response.
    pub fn error(&self) -> String {
        error_subject(&self.raw)
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Success subject for a raw inbound subject.
pub fn done_subject(raw: &str) -> String {
    format!("{}{}", raw, subjects::DONE_SUFFIX)
}

/// Failure subject for a raw inbound subject.
///
/// Usable before the subject has been decoded, so that decode failures can
/// still be answered.
pub fn error_subject(raw: &str) -> String {
    format!("{}{}", raw, subjects::ERROR_SUFFIX)
}

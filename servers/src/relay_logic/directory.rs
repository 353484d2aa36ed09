//! # Resource Directory Seam
//!
//! The relay does not own the domain/resource directory; it only consumes the
//! interface defined here: resolve a kind tag plus identifier tuple to an
//! object exposing named, directional, typed ports, then pick the streaming
//! port the viewer asked for. Resolution failures are the only errors that
//! terminate a session at connect time.

use crate::relay_logic::adapter::StreamSource;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Namespace a port must advertise to be relayed as a sample stream.
pub const STREAM_NAMESPACE: &str = "BULKIO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Application,
    Component,
    Device,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Application => "application",
            ResourceKind::Component => "component",
            ResourceKind::Device => "device",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, ResolveError> {
        match s {
            "application" => Ok(ResourceKind::Application),
            "component" => Ok(ResourceKind::Component),
            "device" => Ok(ResourceKind::Device),
            other => Err(ResolveError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Uses,
    Provides,
}

/// One port of a resolved resource.
#[derive(Clone)]
pub struct PortEntry {
    pub name: String,
    pub direction: PortDirection,
    /// Interface namespace, e.g. `BULKIO` or `FRONTEND`.
    pub namespace: String,
    /// Element type name within the namespace, e.g. `dataFloat`.
    pub element_type: String,
    pub source: Arc<dyn StreamSource>,
}

impl std::fmt::Debug for PortEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortEntry")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("namespace", &self.namespace)
            .field("element_type", &self.element_type)
            .finish_non_exhaustive()
    }
}

/// A resolved resource: just the ports it exposes.
#[derive(Clone)]
pub struct Resource {
    pub name: String,
    pub ports: Vec<PortEntry>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),
    #[error("could not resolve {kind} '{path}'")]
    ResourceNotFound { kind: &'static str, path: String },
    #[error("could not find port of name '{0}'")]
    PortNotFound(String),
    #[error("port '{0}' is not a uses port")]
    WrongDirection(String),
    #[error("port '{0}' is not a {STREAM_NAMESPACE} port")]
    WrongNamespace(String),
}

impl ResolveError {
    /// Wire error tag delivered to the viewer before the connection closes.
    pub fn wire_kind(&self) -> &'static str {
        match self {
            ResolveError::ResourceNotFound { .. } => "ResourceNotFound",
            _ => "SystemError",
        }
    }
}

/// Directory collaborator contract.
pub trait ResourceDirectory: Send + Sync {
    fn resolve(&self, kind: ResourceKind, path: &[String]) -> Result<Resource, ResolveError>;
}

/// Picks the stream port a viewer requested: the name must match, the port
/// must be output-direction, and it must live in the streaming namespace.
pub fn select_stream_port<'a>(
    resource: &'a Resource,
    port_name: &str,
) -> Result<&'a PortEntry, ResolveError> {
    let port = resource
        .ports
        .iter()
        .find(|p| p.name == port_name)
        .ok_or_else(|| ResolveError::PortNotFound(port_name.to_string()))?;

    if port.direction != PortDirection::Uses {
        return Err(ResolveError::WrongDirection(port_name.to_string()));
    }
    if port.namespace != STREAM_NAMESPACE {
        return Err(ResolveError::WrongNamespace(port_name.to_string()));
    }
    Ok(port)
}

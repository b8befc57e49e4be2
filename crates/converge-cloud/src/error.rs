//! Reconciliation error types

use crate::model::ResourceKind;
use thiserror::Error;

/// Errors raised while discovering, resolving or mutating cloud resources
#[derive(Error, Debug)]
pub enum CloudError {
    /// A reference resolved to zero candidates
    #[error("No {what} found called {name} in region {region}")]
    NotFound {
        what: &'static str,
        name: String,
        region: String,
    },

    /// A reference resolved to more than one candidate where exactly one was expected
    #[error(
        "Ambiguous {what} name {name} in region {region}: {} candidates ({})",
        .candidates.len(),
        .candidates.join(", ")
    )]
    Ambiguous {
        what: &'static str,
        name: String,
        region: String,
        candidates: Vec<String>,
    },

    /// Explicitly requested security groups that resolve to nothing
    #[error("Security groups not found in region {region}: {}", .missing.join(", "))]
    UnresolvedGroups {
        region: String,
        missing: Vec<String>,
    },

    #[error("Authentication failed in region {region}: {message}")]
    AuthenticationFailed { region: String, message: String },

    /// Network, throttling or service error reported by the remote API
    #[error("API error in region {region}: {message}")]
    Api { region: String, message: String },

    /// The remote API reports that the target object does not exist
    #[error("Remote object not found in region {region}: {id}")]
    RemoteNotFound { region: String, id: String },

    #[error("Discovery failed in region {region}; mutations there are skipped")]
    DiscoveryFailed { region: String },

    #[error("Region {0} is not configured")]
    RegionNotConfigured(String),

    #[error("Missing attribute {attribute} for {kind}")]
    MissingAttribute {
        kind: ResourceKind,
        attribute: &'static str,
    },

    #[error("Invalid attribute {attribute}: {message}")]
    InvalidAttribute {
        attribute: &'static str,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure of a single resource operation, tagged with the resource identity
    #[error("{kind} {name} in region {region}: {source}")]
    Resource {
        kind: ResourceKind,
        name: String,
        region: String,
        #[source]
        source: Box<CloudError>,
    },
}

impl CloudError {
    pub fn api(region: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CloudError::Api {
            region: region.into(),
            message: message.to_string(),
        }
    }

    /// Wrap this error with the identity of the resource being processed
    pub fn for_resource(
        self,
        kind: ResourceKind,
        name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        CloudError::Resource {
            kind,
            name: name.into(),
            region: region.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping resource context wrappers
    pub fn root(&self) -> &CloudError {
        match self {
            CloudError::Resource { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_remote_not_found(&self) -> bool {
        matches!(self.root(), CloudError::RemoteNotFound { .. })
    }

    /// Errors that make the whole cycle unsafe to continue
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), CloudError::AuthenticationFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

use std::{fmt::Write, str::FromStr};

use indenter::indented;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use super::{Fields, Metadata, Object};

/// Application groups a set of existing cluster resources under one name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Application {
    pub metadata: Metadata,
    /// Defines the resources this Application is made of.
    pub spec: ApplicationSpec,
    /// Most recently observed status of the Application.
    /// Populated by the system.
    #[serde(default)]
    pub status: ApplicationStatus,
}

impl Object for Application {
    const KIND: &'static str = "Application";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn selectable_fields(&self) -> Fields {
        let mut fields = self.metadata.default_fields();
        fields.insert("status.phase".to_string(), self.status.phase.to_string());
        fields
    }
}

impl std::fmt::Display for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<16} {}", "Name:", self.metadata.name)?;
        writeln!(f, "{:<16} {}", "Namespace:", self.metadata.namespace)?;
        writeln!(f, "{:<16} {}", "Labels:", self.metadata.labels)?;
        writeln!(f, "{:<16} {}", "Phase:", self.status.phase)?;
        writeln!(f, "Items:")?;
        if self.spec.items.is_empty() {
            return writeln!(indented(f), "<none>");
        }
        for item in self.spec.items.iter() {
            writeln!(indented(f), "{}", item)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// References to the resources that make up the application.
    /// Order is preserved and duplicates are allowed.
    #[serde(default)]
    pub items: Vec<Item>,
}

/// A typed reference to another resource in the cluster.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Item {
    /// Kind of the referent.
    /// Must be one of [`ItemKind`].
    pub kind: String,
    /// Name of the referent.
    pub name: String,
}

impl Item {
    pub fn new(kind: &str, name: &str) -> Self {
        Item {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }
    }

    /// Returns `None` when the kind is not a supported reference kind.
    pub fn item_kind(&self) -> Option<ItemKind> {
        ItemKind::from_str(&self.kind).ok()
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.kind, self.name)
    }
}

/// Kinds an [`Item`] may refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
pub enum ItemKind {
    ServiceBroker,
    BackingServiceInstance,
    Build,
    BuildConfig,
    DeploymentConfig,
    ImageStream,
    ReplicationController,
    Node,
    Pod,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

impl ItemKind {
    pub fn scope(&self) -> Scope {
        match self {
            ItemKind::ServiceBroker | ItemKind::Node => Scope::Cluster,
            ItemKind::BackingServiceInstance
            | ItemKind::Build
            | ItemKind::BuildConfig
            | ItemKind::DeploymentConfig
            | ItemKind::ImageStream
            | ItemKind::ReplicationController
            | ItemKind::Pod
            | ItemKind::Service => Scope::Namespaced,
        }
    }

    /// Lowercase plural resource name, as used in API paths and storage keys.
    pub fn plural(&self) -> &'static str {
        match self {
            ItemKind::ServiceBroker => "servicebrokers",
            ItemKind::BackingServiceInstance => "backingserviceinstances",
            ItemKind::Build => "builds",
            ItemKind::BuildConfig => "buildconfigs",
            ItemKind::DeploymentConfig => "deploymentconfigs",
            ItemKind::ImageStream => "imagestreams",
            ItemKind::ReplicationController => "replicationcontrollers",
            ItemKind::Node => "nodes",
            ItemKind::Pod => "pods",
            ItemKind::Service => "services",
        }
    }

    /// Path prefix the kind is served under by the cluster API.
    pub fn api_root(&self) -> &'static str {
        match self {
            ItemKind::ServiceBroker
            | ItemKind::BackingServiceInstance
            | ItemKind::Build
            | ItemKind::BuildConfig
            | ItemKind::DeploymentConfig
            | ItemKind::ImageStream => "/oapi/v1",
            ItemKind::ReplicationController
            | ItemKind::Node
            | ItemKind::Pod
            | ItemKind::Service => "/api/v1",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    pub phase: ApplicationPhase,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, Default)]
pub enum ApplicationPhase {
    /// Accepted by the registry, items not yet reconciled.
    #[default]
    New,
    /// All items are bound to the application.
    Active,
    /// The item list changed and is being reconciled again.
    Updating,
    /// The application is being removed.
    Terminating,
    /// Reconciliation of at least one item failed.
    Failed,
}

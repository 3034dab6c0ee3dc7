//! Clients used to check that the resources an Application points at exist.

use std::{sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use resources::objects::application::ItemKind;
use thiserror::Error;

use crate::{
    registry::KeyStrategy,
    storage::{Storage, StorageError},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Unavailable(String),
}

/// Fetches a namespaced resource of one kind.
#[async_trait]
pub trait NamespacedGetter: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<(), LookupError>;
}

/// Fetches a cluster-scoped resource of one kind.
#[async_trait]
pub trait ClusterGetter: Send + Sync {
    async fn get(&self, name: &str) -> Result<(), LookupError>;
}

pub enum Lookup<'a> {
    Namespaced(&'a dyn NamespacedGetter),
    Cluster(&'a dyn ClusterGetter),
}

/// One lookup client per supported item kind.
///
/// The field type fixes whether a kind is looked up with or without a
/// namespace, and [`ReferenceClients::lookup`] matches every [`ItemKind`].
#[derive(Clone)]
pub struct ReferenceClients {
    pub service_brokers: Arc<dyn ClusterGetter>,
    pub backing_service_instances: Arc<dyn NamespacedGetter>,
    pub builds: Arc<dyn NamespacedGetter>,
    pub build_configs: Arc<dyn NamespacedGetter>,
    pub deployment_configs: Arc<dyn NamespacedGetter>,
    pub image_streams: Arc<dyn NamespacedGetter>,
    pub replication_controllers: Arc<dyn NamespacedGetter>,
    pub nodes: Arc<dyn ClusterGetter>,
    pub pods: Arc<dyn NamespacedGetter>,
    pub services: Arc<dyn NamespacedGetter>,
}

impl ReferenceClients {
    pub fn lookup(&self, kind: ItemKind) -> Lookup<'_> {
        match kind {
            ItemKind::ServiceBroker => Lookup::Cluster(self.service_brokers.as_ref()),
            ItemKind::BackingServiceInstance => {
                Lookup::Namespaced(self.backing_service_instances.as_ref())
            },
            ItemKind::Build => Lookup::Namespaced(self.builds.as_ref()),
            ItemKind::BuildConfig => Lookup::Namespaced(self.build_configs.as_ref()),
            ItemKind::DeploymentConfig => Lookup::Namespaced(self.deployment_configs.as_ref()),
            ItemKind::ImageStream => Lookup::Namespaced(self.image_streams.as_ref()),
            ItemKind::ReplicationController => {
                Lookup::Namespaced(self.replication_controllers.as_ref())
            },
            ItemKind::Node => Lookup::Cluster(self.nodes.as_ref()),
            ItemKind::Pod => Lookup::Namespaced(self.pods.as_ref()),
            ItemKind::Service => Lookup::Namespaced(self.services.as_ref()),
        }
    }

    /// Builds the client set from one value implementing both getter traits
    /// per kind.
    pub fn uniform<G, F>(make: F) -> Self
    where
        G: NamespacedGetter + ClusterGetter + 'static,
        F: Fn(ItemKind) -> G,
    {
        ReferenceClients {
            service_brokers: Arc::new(make(ItemKind::ServiceBroker)),
            backing_service_instances: Arc::new(make(ItemKind::BackingServiceInstance)),
            builds: Arc::new(make(ItemKind::Build)),
            build_configs: Arc::new(make(ItemKind::BuildConfig)),
            deployment_configs: Arc::new(make(ItemKind::DeploymentConfig)),
            image_streams: Arc::new(make(ItemKind::ImageStream)),
            replication_controllers: Arc::new(make(ItemKind::ReplicationController)),
            nodes: Arc::new(make(ItemKind::Node)),
            pods: Arc::new(make(ItemKind::Pod)),
            services: Arc::new(make(ItemKind::Service)),
        }
    }

    /// Clients that query the cluster API server over HTTP.
    pub fn http(api_server_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "Failed to build lookup http client".to_string())?;
        Ok(Self::uniform(|kind| {
            HttpGetter::new(client.clone(), api_server_url, kind)
        }))
    }

    /// Clients that read referenced objects straight from `storage`,
    /// each kind under `<prefix>/<plural>`.
    pub fn storage(storage: Arc<dyn Storage>, prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/').to_owned();
        Self::uniform(|kind| StorageGetter::new(storage.clone(), &prefix, kind))
    }
}

pub struct HttpGetter {
    client: reqwest::Client,
    base_url: String,
    kind: ItemKind,
}

impl HttpGetter {
    pub fn new(client: reqwest::Client, base_url: &str, kind: ItemKind) -> Self {
        HttpGetter {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            kind,
        }
    }

    fn namespaced_path(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/namespaces/{}/{}/{}",
            self.kind.api_root(),
            namespace,
            self.kind.plural(),
            name
        )
    }

    fn cluster_path(&self, name: &str) -> String {
        format!("{}/{}/{}", self.kind.api_root(), self.kind.plural(), name)
    }

    async fn fetch(&self, path: String) -> Result<(), LookupError> {
        let url = format!("{}{}", self.base_url, path);
        let res = self.client.get(&url).send().await.map_err(|err| {
            tracing::debug!("GET {} failed: {}", url, err);
            LookupError::Unavailable(err.to_string())
        })?;
        match res.status() {
            StatusCode::NOT_FOUND => Err(LookupError::NotFound),
            status if status.is_success() => Ok(()),
            status => Err(LookupError::Unavailable(format!(
                "GET {} returned {}",
                url, status
            ))),
        }
    }
}

#[async_trait]
impl NamespacedGetter for HttpGetter {
    async fn get(&self, namespace: &str, name: &str) -> Result<(), LookupError> {
        self.fetch(self.namespaced_path(namespace, name)).await
    }
}

#[async_trait]
impl ClusterGetter for HttpGetter {
    async fn get(&self, name: &str) -> Result<(), LookupError> {
        self.fetch(self.cluster_path(name)).await
    }
}

pub struct StorageGetter {
    storage: Arc<dyn Storage>,
    keys: KeyStrategy,
}

impl StorageGetter {
    pub fn new(storage: Arc<dyn Storage>, prefix: &str, kind: ItemKind) -> Self {
        let prefix = format!("{}/{}", prefix, kind.plural());
        StorageGetter {
            storage,
            keys: KeyStrategy::namespaced(&prefix),
        }
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<(), LookupError> {
        // an illegal name cannot be stored, so it cannot exist either
        let key = match self.keys.item_key(namespace, name) {
            Ok(key) => key,
            Err(_) => return Err(LookupError::NotFound),
        };
        match self.storage.get(&key).await {
            Ok(_) => Ok(()),
            Err(StorageError::NotFound(_)) => Err(LookupError::NotFound),
            Err(err) => Err(LookupError::Unavailable(err.to_string())),
        }
    }
}

#[async_trait]
impl NamespacedGetter for StorageGetter {
    async fn get(&self, namespace: &str, name: &str) -> Result<(), LookupError> {
        self.fetch(namespace, name).await
    }
}

#[async_trait]
impl ClusterGetter for StorageGetter {
    async fn get(&self, name: &str) -> Result<(), LookupError> {
        // cluster-scoped root keys ignore the namespace
        let key = match KeyStrategy::cluster(self.keys.prefix()).item_key("", name) {
            Ok(key) => key,
            Err(_) => return Err(LookupError::NotFound),
        };
        match self.storage.get(&key).await {
            Ok(_) => Ok(()),
            Err(StorageError::NotFound(_)) => Err(LookupError::NotFound),
            Err(err) => Err(LookupError::Unavailable(err.to_string())),
        }
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    application::{self, ApplicationStorage, ReferenceClients},
    config::RegistryConfig,
    registry::Scheme,
    storage::{EtcdStorage, Storage},
};

/// Every store the registry serves, built once at startup.
pub struct Registry {
    pub scheme: Arc<Scheme>,
    pub applications: ApplicationStorage,
}

/// The resource types known to the registry, under `prefix`.
pub fn scheme(prefix: &str) -> Result<Arc<Scheme>> {
    application::register(Scheme::builder(prefix))
        .build()
        .with_context(|| "Failed to build scheme".to_string())
}

impl Registry {
    /// Connects to etcd and looks referenced resources up over HTTP.
    pub fn from_config(config: &RegistryConfig) -> Result<Registry> {
        let pool = config
            .etcd
            .create_pool()
            .with_context(|| "Failed to create etcd client pool".to_string())?;
        let clients = ReferenceClients::http(
            &config.lookup.api_server_url,
            config.lookup.timeout(),
        )?;
        tracing::info!(
            "Using etcd at {:?} under {}, looking up references at {}",
            config.etcd.endpoints,
            config.etcd.prefix,
            config.lookup.api_server_url
        );
        Self::new(config, Arc::new(EtcdStorage::new(pool)), clients)
    }

    pub fn new(
        config: &RegistryConfig,
        storage: Arc<dyn Storage>,
        clients: ReferenceClients,
    ) -> Result<Registry> {
        let scheme = scheme(&config.etcd.prefix)?;
        let applications = ApplicationStorage::new(
            &scheme,
            storage,
            Arc::new(clients),
            config.validation.backend_errors,
        )
        .with_context(|| "Failed to create application storage".to_string())?;
        Ok(Registry {
            scheme,
            applications,
        })
    }
}

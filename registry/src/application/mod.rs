//! The Application resource: strategies, reference validation and the
//! stores that serve it.

use std::sync::Arc;

use anyhow::Result;
use resources::objects::application::Application;

use crate::{
    registry::{scheme::SchemeBuilder, GenericStore, Scheme},
    storage::Storage,
};

pub mod references;
pub mod strategy;
pub mod validation;

pub use self::{
    references::{ClusterGetter, Lookup, LookupError, NamespacedGetter, ReferenceClients},
    strategy::{ApplicationStatusStrategy, ApplicationStrategy},
    validation::{ApplicationValidator, BackendErrorPolicy, ReferenceError},
};

pub const PLURAL: &str = "applications";
pub const GROUP: &str = "datafoundry.io";

pub fn register(builder: SchemeBuilder) -> SchemeBuilder {
    builder.register::<Application>(PLURAL, GROUP, true)
}

/// Main store plus the status subresource store, sharing one backend.
#[derive(Clone)]
pub struct ApplicationStorage {
    pub applications: GenericStore<Application>,
    pub status: GenericStore<Application>,
}

impl ApplicationStorage {
    pub fn new(
        scheme: &Scheme,
        storage: Arc<dyn Storage>,
        clients: Arc<ReferenceClients>,
        policy: BackendErrorPolicy,
    ) -> Result<Self> {
        let validator = ApplicationValidator::new(clients, policy);
        let applications =
            GenericStore::new(scheme, storage, Arc::new(ApplicationStrategy::new(validator)))?;
        let status = applications.with_update_strategy(Arc::new(ApplicationStatusStrategy));
        Ok(ApplicationStorage {
            applications,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use resources::objects::application::{ApplicationPhase, Item};

    use super::{
        validation::tests::{application, fake_clients, FakeGetter},
        *,
    };
    use crate::{
        registry::{Context, StoreError},
        storage::MemoryStorage,
    };

    fn storage_with(pods: &[&str]) -> ApplicationStorage {
        let found: Vec<(&str, Result<(), LookupError>)> =
            pods.iter().map(|key| (*key, Ok(()))).collect();
        let (clients, ..) = fake_clients(FakeGetter::with(&found), FakeGetter::default());
        let scheme = register(Scheme::builder("/registry")).build().unwrap();
        ApplicationStorage::new(
            &scheme,
            Arc::new(MemoryStorage::new()),
            Arc::new(clients),
            BackendErrorPolicy::FailOpen,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_checks_references() {
        let store = storage_with(&["dev/web-0"]).applications;
        let ctx = Context::with_namespace("dev");

        let created = store
            .create(&ctx, application("", vec![Item::new("Pod", "web-0")]))
            .await
            .unwrap();
        assert_eq!(created.status.phase, ApplicationPhase::New);

        let mut missing = application("", vec![Item::new("Pod", "xx")]);
        missing.metadata.name = format!("{}-2", created.metadata.name);
        match store.create(&ctx, missing).await.unwrap_err() {
            StoreError::Invalid { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert!(errors.to_string().contains("resource Pod=xx not found."));
            },
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_rejects_namespace_change() {
        let store = storage_with(&["dev/web-0"]).applications;
        let ctx = Context::with_namespace("dev");
        let mut app = store
            .create(&ctx, application("", vec![Item::new("Pod", "web-0")]))
            .await
            .unwrap();

        app.metadata.namespace = "prod".to_string();
        match store.update(&ctx, app.clone()).await.unwrap_err() {
            StoreError::Invalid { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert!(errors.to_string().contains("metadata.namespace"));
            },
            other => panic!("unexpected error {:?}", other),
        }

        // without a request namespace the key follows the object
        let err = store.update(&Context::new(), app).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn status_is_written_through_status_store() {
        let storage = storage_with(&["dev/web-0", "dev/web-1"]);
        let ctx = Context::with_namespace("dev");
        let created = storage
            .applications
            .create(&ctx, application("", vec![Item::new("Pod", "web-0")]))
            .await
            .unwrap();

        // the main store ignores status changes
        let mut activated = created.clone();
        activated.status.phase = ApplicationPhase::Active;
        let updated = storage.applications.update(&ctx, activated).await.unwrap();
        assert_eq!(updated.status.phase, ApplicationPhase::New);

        // the status store ignores spec changes
        let mut activated = updated.clone();
        activated.status.phase = ApplicationPhase::Active;
        activated.spec.items.clear();
        let updated = storage.status.update(&ctx, activated).await.unwrap();
        assert_eq!(updated.status.phase, ApplicationPhase::Active);
        assert_eq!(updated.spec, created.spec);

        let mut grown = updated.clone();
        grown.spec.items.push(Item::new("Pod", "web-1"));
        let grown = storage.applications.update(&ctx, grown).await.unwrap();
        assert_eq!(grown.status.phase, ApplicationPhase::Updating);
        assert_eq!(grown.spec.items.len(), 2);
    }

    #[tokio::test]
    async fn status_store_cannot_create() {
        let storage = storage_with(&[]);
        let ctx = Context::with_namespace("dev");
        let err = storage
            .status
            .update(&ctx, application("", vec![]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

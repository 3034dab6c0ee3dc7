use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Local;
use futures::{stream::BoxStream, StreamExt};
use resources::{
    models::watch::WatchEvent,
    objects::{Metadata, Object, ObjectList},
    validation::ErrorList,
};
use uuid::Uuid;

use super::{
    context::Context,
    key::KeyStrategy,
    predicate::SelectionPredicate,
    scheme::{ResourceDescriptor, Scheme},
    strategy::RestStrategy,
    StoreError, OPTIMISTIC_LOCK_ERROR_MSG,
};
use crate::storage::{RawEvent, RawEventType, RawObject, Revision, Storage, StorageError};

pub type WatchStream<T> = BoxStream<'static, Result<WatchEvent<T>, StoreError>>;

/// Everything the generic store needs to know about one resource type.
/// Fixed once the store is built.
pub struct StoreConfig<T: Object> {
    pub descriptor: ResourceDescriptor,
    pub keys: KeyStrategy,
    pub create_strategy: Arc<dyn RestStrategy<T>>,
    pub update_strategy: Arc<dyn RestStrategy<T>>,
    pub delete_strategy: Arc<dyn RestStrategy<T>>,
}

impl<T: Object> Clone for StoreConfig<T> {
    fn clone(&self) -> Self {
        StoreConfig {
            descriptor: self.descriptor.clone(),
            keys: self.keys.clone(),
            create_strategy: self.create_strategy.clone(),
            update_strategy: self.update_strategy.clone(),
            delete_strategy: self.delete_strategy.clone(),
        }
    }
}

/// CRUD, list and watch for one resource type over a [`Storage`].
///
/// Holds no object state. Objects are stored as JSON without their
/// resource version, which is filled in from the store revision on read.
pub struct GenericStore<T: Object> {
    config: Arc<StoreConfig<T>>,
    storage: Arc<dyn Storage>,
}

impl<T: Object> Clone for GenericStore<T> {
    fn clone(&self) -> Self {
        GenericStore {
            config: self.config.clone(),
            storage: self.storage.clone(),
        }
    }
}

fn parse_revision(resource_version: &str) -> Result<Revision, StoreError> {
    if resource_version.is_empty() {
        return Ok(0);
    }
    match resource_version.parse::<Revision>() {
        Ok(revision) if revision >= 0 => Ok(revision),
        _ => Err(StoreError::BadRequest(format!(
            "invalid resource version {:?}",
            resource_version
        ))),
    }
}

fn fill_system_fields(meta: &mut Metadata) {
    meta.uid = Some(Uuid::new_v4());
    meta.creation_timestamp = Some(Local::now().naive_utc());
    meta.resource_version.clear();
}

impl<T: Object> GenericStore<T> {
    /// Builds a store for `T`, which must be registered in `scheme`.
    /// The same strategy handles create, update and delete.
    pub fn new(
        scheme: &Scheme,
        storage: Arc<dyn Storage>,
        strategy: Arc<dyn RestStrategy<T>>,
    ) -> Result<Self> {
        let descriptor = scheme
            .descriptor::<T>()
            .cloned()
            .ok_or_else(|| anyhow!("Kind {} is not registered", T::KIND))?;
        if descriptor.namespaced != strategy.namespace_scoped() {
            return Err(anyhow!(
                "Kind {} is registered with namespaced={}, but its strategy disagrees",
                T::KIND,
                descriptor.namespaced
            ));
        }
        let config = StoreConfig {
            keys: descriptor.key_strategy(),
            descriptor,
            create_strategy: strategy.clone(),
            update_strategy: strategy.clone(),
            delete_strategy: strategy,
        };
        Ok(GenericStore {
            config: Arc::new(config),
            storage,
        })
    }

    /// Same store with a different update path, e.g. for a status subresource.
    pub fn with_update_strategy(&self, strategy: Arc<dyn RestStrategy<T>>) -> Self {
        let mut config = self.config.as_ref().clone();
        config.update_strategy = strategy;
        GenericStore {
            config: Arc::new(config),
            storage: self.storage.clone(),
        }
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.config.descriptor
    }

    pub fn keys(&self) -> &KeyStrategy {
        &self.config.keys
    }

    pub fn new_object(&self) -> T {
        T::default()
    }

    pub fn new_list(&self) -> ObjectList<T> {
        ObjectList::default()
    }

    fn qualified_resource(&self) -> String {
        self.config.descriptor.qualified_resource()
    }

    fn storage_error(&self, err: StorageError, name: &str) -> StoreError {
        StoreError::from_storage(err, &self.qualified_resource(), name)
    }

    fn invalid(&self, obj: &T, errors: ErrorList) -> StoreError {
        tracing::info!(
            "{} {}/{} rejected: {}",
            T::KIND,
            obj.namespace(),
            obj.name(),
            errors
        );
        StoreError::Invalid {
            kind: T::KIND.to_string(),
            name: obj.name().to_owned(),
            errors,
        }
    }

    fn request_namespace<'a>(&self, ctx: &'a Context) -> &'a str {
        ctx.namespace().unwrap_or_default()
    }

    fn encode(&self, obj: &mut T) -> Result<Vec<u8>, StoreError> {
        obj.metadata_mut().resource_version.clear();
        serde_json::to_vec(obj).map_err(|err| StoreError::Codec {
            key: obj.name().to_owned(),
            cause: err.to_string(),
        })
    }

    fn decode_value(&self, key: &str, value: &[u8], revision: Revision) -> Result<T, StoreError> {
        let mut obj: T = serde_json::from_slice(value).map_err(|err| {
            tracing::error!("Failed to decode {} at {}: {}", T::KIND, key, err);
            StoreError::Codec {
                key: key.to_owned(),
                cause: err.to_string(),
            }
        })?;
        obj.metadata_mut().resource_version = revision.to_string();
        Ok(obj)
    }

    fn decode(&self, raw: &RawObject) -> Result<T, StoreError> {
        self.decode_value(&raw.key, &raw.value, raw.revision)
    }

    /// Defaults the object namespace from the request and rejects mismatches.
    fn resolve_namespace(
        &self,
        strategy: &dyn RestStrategy<T>,
        ctx: &Context,
        obj: &mut T,
    ) -> Result<(), StoreError> {
        let meta = obj.metadata_mut();
        if !strategy.namespace_scoped() {
            meta.namespace.clear();
            return Ok(());
        }
        match ctx.namespace() {
            Some(namespace) if meta.namespace.is_empty() => {
                meta.namespace = namespace.to_owned();
            },
            Some(namespace) if meta.namespace != namespace => {
                return Err(StoreError::BadRequest(
                    "the namespace of the provided object does not match the namespace sent on \
                     the request"
                        .to_string(),
                ));
            },
            _ => {},
        }
        Ok(())
    }

    pub async fn create(&self, ctx: &Context, mut obj: T) -> Result<T, StoreError> {
        let strategy = self.config.create_strategy.as_ref();
        self.resolve_namespace(strategy, ctx, &mut obj)?;
        fill_system_fields(obj.metadata_mut());
        strategy.prepare_for_create(&mut obj);

        let errors = strategy.validate_create(ctx, &obj).await;
        if !errors.is_empty() {
            return Err(self.invalid(&obj, errors));
        }

        let key = self.config.keys.item_key(obj.namespace(), obj.name())?;
        let value = self.encode(&mut obj)?;
        let revision = ctx
            .run(self.storage.create(&key, value))
            .await?
            .map_err(|err| self.storage_error(err, obj.name()))?;
        obj.metadata_mut().resource_version = revision.to_string();

        strategy.after_create(&obj);
        tracing::info!("{} {} created at revision {}", T::KIND, key, revision);
        Ok(obj)
    }

    pub async fn get(&self, ctx: &Context, name: &str) -> Result<T, StoreError> {
        let key = self
            .config
            .keys
            .item_key(self.request_namespace(ctx), name)?;
        let raw = ctx
            .run(self.storage.get(&key))
            .await?
            .map_err(|err| self.storage_error(err, name))?;
        self.decode(&raw)
    }

    pub async fn list(
        &self,
        ctx: &Context,
        predicate: &SelectionPredicate,
    ) -> Result<ObjectList<T>, StoreError> {
        let prefix = format!("{}/", self.config.keys.root_key(self.request_namespace(ctx)));
        let (raws, revision) = ctx
            .run(self.storage.list(&prefix))
            .await?
            .map_err(|err| self.storage_error(err, ""))?;

        let mut list = self.new_list();
        list.resource_version = revision.to_string();
        for raw in raws.iter() {
            let obj = self.decode(raw)?;
            if predicate.matches(&obj) {
                list.items.push(obj);
            }
        }
        tracing::debug!(
            "Listed {} {} of {} under {}",
            list.items.len(),
            T::KIND,
            raws.len(),
            prefix
        );
        Ok(list)
    }

    /// Replaces the stored object with `obj`.
    ///
    /// `obj.metadata.resourceVersion` must match the stored version,
    /// otherwise the update fails with a conflict and the caller has to
    /// re-read the object and retry.
    pub async fn update(&self, ctx: &Context, mut obj: T) -> Result<T, StoreError> {
        let strategy = self.config.update_strategy.as_ref();
        let namespace = match ctx.namespace() {
            Some(namespace) if strategy.namespace_scoped() => {
                // a different namespace is left for validate_update to reject
                if obj.namespace().is_empty() {
                    obj.metadata_mut().namespace = namespace.to_owned();
                }
                namespace.to_owned()
            },
            _ => obj.namespace().to_owned(),
        };
        let name = obj.name().to_owned();
        let key = self.config.keys.item_key(&namespace, &name)?;

        let existing = match ctx.run(self.storage.get(&key)).await? {
            Ok(existing) => existing,
            Err(StorageError::NotFound(_)) if strategy.allow_create_on_update() => {
                tracing::debug!("{} {} not found, creating on update", T::KIND, key);
                return self.create(ctx, obj).await;
            },
            Err(err) => return Err(self.storage_error(err, &name)),
        };
        let old = self.decode(&existing)?;

        let expected = match parse_revision(&obj.metadata().resource_version)? {
            0 if strategy.allow_unconditional_update() => existing.revision,
            0 => {
                return Err(StoreError::Conflict {
                    resource: self.qualified_resource(),
                    name,
                    detail: "resourceVersion must be specified for an update".to_string(),
                })
            },
            revision if revision != existing.revision => {
                return Err(StoreError::Conflict {
                    resource: self.qualified_resource(),
                    name,
                    detail: OPTIMISTIC_LOCK_ERROR_MSG.to_string(),
                })
            },
            revision => revision,
        };

        {
            let meta = obj.metadata_mut();
            if meta.uid.is_none() {
                meta.uid = old.metadata().uid;
            }
            if meta.creation_timestamp.is_none() {
                meta.creation_timestamp = old.metadata().creation_timestamp;
            }
        }
        strategy.prepare_for_update(&mut obj, &old);

        let errors = strategy.validate_update(ctx, &obj, &old).await;
        if !errors.is_empty() {
            return Err(self.invalid(&obj, errors));
        }

        let value = self.encode(&mut obj)?;
        let revision = ctx
            .run(self.storage.update(&key, value, expected))
            .await?
            .map_err(|err| self.storage_error(err, &name))?;
        obj.metadata_mut().resource_version = revision.to_string();

        strategy.after_update(&obj);
        tracing::info!("{} {} updated at revision {}", T::KIND, key, revision);
        Ok(obj)
    }

    /// Removes the object and returns its last stored state.
    pub async fn delete(&self, ctx: &Context, name: &str) -> Result<T, StoreError> {
        let strategy = self.config.delete_strategy.as_ref();
        let key = self
            .config
            .keys
            .item_key(self.request_namespace(ctx), name)?;
        let existing = ctx
            .run(self.storage.get(&key))
            .await?
            .map_err(|err| self.storage_error(err, name))?;
        let obj = self.decode(&existing)?;

        strategy.before_delete(ctx, &obj).await?;
        ctx.run(self.storage.delete(&key, Some(existing.revision)))
            .await?
            .map_err(|err| self.storage_error(err, name))?;

        strategy.after_delete(&obj);
        tracing::info!("{} {} deleted", T::KIND, key);
        Ok(obj)
    }

    /// Streams changes of objects matching `predicate`.
    ///
    /// An empty `resource_version` starts from now; otherwise every change
    /// after that version is replayed first, so a consumer can resume from
    /// the revision of the last event it saw. The stream ends when the
    /// context is cancelled or the consumer drops it.
    pub async fn watch(
        &self,
        ctx: &Context,
        predicate: SelectionPredicate,
        resource_version: &str,
    ) -> Result<WatchStream<T>, StoreError> {
        let since = parse_revision(resource_version)?;
        let prefix = format!("{}/", self.config.keys.root_key(self.request_namespace(ctx)));
        let raw_stream = ctx
            .run(self.storage.watch(&prefix, since))
            .await?
            .map_err(|err| self.storage_error(err, ""))?;
        tracing::info!("Watching {} under {} since {}", T::KIND, prefix, since);

        let store = self.clone();
        let predicate = Arc::new(predicate);
        let token = ctx.token();
        let stream = raw_stream
            .take_until(async move { token.cancelled().await })
            .filter_map(move |event| {
                let store = store.clone();
                let predicate = predicate.clone();
                async move {
                    match event {
                        Ok(event) => store.convert_event(event, &predicate),
                        Err(err) => Some(Err(store.storage_error(err, ""))),
                    }
                }
            });
        Ok(stream.boxed())
    }

    fn convert_event(
        &self,
        event: RawEvent,
        predicate: &SelectionPredicate,
    ) -> Option<Result<WatchEvent<T>, StoreError>> {
        let decode = |value: &[u8]| self.decode_value(&event.key, value, event.revision);
        let prev = match event.prev_value.as_deref().map(decode).transpose() {
            Ok(prev) => prev,
            Err(err) => return Some(Err(err)),
        };
        let prev_matched = prev.as_ref().map_or(false, |o| predicate.matches(o));

        match event.event_type {
            RawEventType::Put => {
                let obj = match decode(event.value.as_deref()?) {
                    Ok(obj) => obj,
                    Err(err) => return Some(Err(err)),
                };
                if predicate.matches(&obj) {
                    Some(Ok(WatchEvent::new_put(event.key, obj, event.revision)))
                } else if prev_matched {
                    // the object no longer matches the selection
                    Some(Ok(WatchEvent::new_delete(event.key, obj, event.revision)))
                } else {
                    None
                }
            },
            RawEventType::Delete => match prev {
                Some(prev) if prev_matched => {
                    Some(Ok(WatchEvent::new_delete(event.key, prev, event.revision)))
                },
                Some(_) => None,
                None => {
                    tracing::warn!("Delete event for {} carries no previous value", event.key);
                    None
                },
            },
        }
    }
}

use async_trait::async_trait;
use resources::{objects::Object, validation::ErrorList};

use super::{context::Context, StoreError};

/// Type-specific behaviour the generic store calls around every write.
///
/// One implementation exists per resource type (or per subresource, such as
/// a status-only update path). `prepare_*` hooks only default and normalize;
/// they cannot fail. `validate_*` hooks return every problem found, an empty
/// list meaning the object may be persisted.
#[async_trait]
pub trait RestStrategy<T: Object>: Send + Sync {
    /// Whether objects of this type live inside a namespace.
    fn namespace_scoped(&self) -> bool {
        true
    }

    /// Clears or defaults fields before the first write.
    fn prepare_for_create(&self, obj: &mut T);

    /// Normalizes `obj` against the stored `old` before an update.
    fn prepare_for_update(&self, obj: &mut T, old: &T);

    async fn validate_create(&self, ctx: &Context, obj: &T) -> ErrorList;

    async fn validate_update(&self, ctx: &Context, obj: &T, old: &T) -> ErrorList;

    /// Whether an update of a missing object creates it.
    fn allow_create_on_update(&self) -> bool;

    /// Whether an update without a resource version overwrites unconditionally.
    /// When false such an update is rejected as a conflict.
    fn allow_unconditional_update(&self) -> bool {
        false
    }

    /// Runs before the object is removed; an error aborts the delete.
    async fn before_delete(&self, _ctx: &Context, _obj: &T) -> Result<(), StoreError> {
        Ok(())
    }

    fn after_create(&self, _obj: &T) {}

    fn after_update(&self, _obj: &T) {}

    fn after_delete(&self, _obj: &T) {}
}

//! Generic resource registry: key layout, lifecycle hooks and the store
//! adapter shared by every resource type.

pub mod context;
mod error;
pub mod key;
pub mod predicate;
pub mod scheme;
pub mod store;
pub mod strategy;

pub use self::{
    context::Context,
    error::{StoreError, OPTIMISTIC_LOCK_ERROR_MSG},
    key::KeyStrategy,
    predicate::SelectionPredicate,
    scheme::{ResourceDescriptor, Scheme},
    store::{GenericStore, StoreConfig},
    strategy::RestStrategy,
};

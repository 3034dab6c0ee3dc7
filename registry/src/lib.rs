//! Storage-backed registry for Application resources.
//!
//! [`registry`] holds the generic store every resource type is served
//! through, [`application`] the Application specific hooks and
//! [`storage`] the etcd and in-memory backends.

pub mod application;
pub mod bootstrap;
pub mod config;
pub mod registry;
pub mod storage;
pub mod telemetry;

pub use bootstrap::Registry;
pub use config::RegistryConfig;

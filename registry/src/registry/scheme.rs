use std::sync::Arc;

use anyhow::{bail, Result};
use resources::objects::Object;

use super::key::KeyStrategy;

/// Static description of a registered resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub kind: &'static str,
    /// Lowercase plural name, used in storage keys.
    pub plural: &'static str,
    pub group: &'static str,
    pub namespaced: bool,
    /// Storage prefix every object of this type is stored under.
    pub prefix: String,
}

impl ResourceDescriptor {
    /// `<plural>.<group>`, or just the plural for the core group.
    pub fn qualified_resource(&self) -> String {
        if self.group.is_empty() {
            self.plural.to_string()
        } else {
            format!("{}.{}", self.plural, self.group)
        }
    }

    pub fn key_strategy(&self) -> KeyStrategy {
        if self.namespaced {
            KeyStrategy::namespaced(&self.prefix)
        } else {
            KeyStrategy::cluster(&self.prefix)
        }
    }
}

/// Immutable table of resource types known to the registry.
///
/// Built once at startup with [`SchemeBuilder`] and shared by reference;
/// registration order is preserved.
#[derive(Debug)]
pub struct Scheme {
    descriptors: Vec<ResourceDescriptor>,
}

impl Scheme {
    pub fn builder(prefix: &str) -> SchemeBuilder {
        SchemeBuilder {
            prefix: prefix.trim_end_matches('/').to_owned(),
            descriptors: Vec::new(),
        }
    }

    pub fn get(&self, kind: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }

    pub fn descriptor<T: Object>(&self) -> Option<&ResourceDescriptor> {
        self.get(T::KIND)
    }

    pub fn descriptors(&self) -> &[ResourceDescriptor] {
        &self.descriptors
    }
}

pub struct SchemeBuilder {
    prefix: String,
    descriptors: Vec<ResourceDescriptor>,
}

impl SchemeBuilder {
    pub fn register<T: Object>(
        mut self,
        plural: &'static str,
        group: &'static str,
        namespaced: bool,
    ) -> Self {
        let descriptor = ResourceDescriptor {
            kind: T::KIND,
            plural,
            group,
            namespaced,
            prefix: format!("{}/{}", self.prefix, plural),
        };
        self.descriptors.push(descriptor);
        self
    }

    pub fn build(self) -> Result<Arc<Scheme>> {
        for (i, d) in self.descriptors.iter().enumerate() {
            let duplicate = self.descriptors[..i]
                .iter()
                .find(|other| other.kind == d.kind || other.plural == d.plural);
            if let Some(other) = duplicate {
                bail!(
                    "Resource {} ({}) registered twice, conflicts with {} ({})",
                    d.kind,
                    d.plural,
                    other.kind,
                    other.plural
                );
            }
        }
        for d in self.descriptors.iter() {
            tracing::debug!(
                "Registered {} as {} at {}",
                d.kind,
                d.qualified_resource(),
                d.prefix
            );
        }
        Ok(Arc::new(Scheme {
            descriptors: self.descriptors,
        }))
    }
}

#[cfg(test)]
mod tests {
    use resources::objects::application::Application;

    use super::*;

    #[test]
    fn register_and_lookup() {
        let scheme = Scheme::builder("/registry/")
            .register::<Application>("applications", "datafoundry.io", true)
            .build()
            .unwrap();
        let d = scheme.descriptor::<Application>().unwrap();
        assert_eq!(d.prefix, "/registry/applications");
        assert_eq!(d.qualified_resource(), "applications.datafoundry.io");
        assert_eq!(
            d.key_strategy().item_key("dev", "shop").unwrap(),
            "/registry/applications/dev/shop"
        );
        assert!(scheme.get("Pod").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let result = Scheme::builder("/registry")
            .register::<Application>("applications", "datafoundry.io", true)
            .register::<Application>("apps", "datafoundry.io", true)
            .build();
        assert!(result.is_err());
    }
}

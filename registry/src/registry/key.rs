use resources::validation::name_is_dns_label;

use super::StoreError;

/// Maps object identity onto storage keys.
///
/// Namespaced kinds live at `<prefix>/<namespace>/<name>`,
/// cluster-scoped kinds at `<prefix>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStrategy {
    prefix: String,
    namespaced: bool,
}

impl KeyStrategy {
    pub fn namespaced(prefix: &str) -> Self {
        KeyStrategy {
            prefix: prefix.trim_end_matches('/').to_owned(),
            namespaced: true,
        }
    }

    pub fn cluster(prefix: &str) -> Self {
        KeyStrategy {
            prefix: prefix.trim_end_matches('/').to_owned(),
            namespaced: false,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespaced
    }

    /// Key under which every object of `namespace` is stored.
    /// Cluster-scoped kinds ignore the namespace.
    pub fn root_key(&self, namespace: &str) -> String {
        if self.namespaced && !namespace.is_empty() {
            format!("{}/{}", self.prefix, namespace)
        } else {
            self.prefix.to_owned()
        }
    }

    pub fn item_key(&self, namespace: &str, name: &str) -> Result<String, StoreError> {
        if self.namespaced && namespace.is_empty() {
            return Err(StoreError::BadRequest(
                "namespace parameter required".to_string(),
            ));
        }
        let reasons = name_is_dns_label(name);
        if !reasons.is_empty() {
            return Err(StoreError::InvalidName {
                name: name.to_owned(),
                reasons,
            });
        }
        Ok(format!("{}/{}", self.root_key(namespace), name))
    }

    /// Inverse of [`KeyStrategy::item_key`]: returns `(namespace, name)`.
    pub fn parse_key(&self, key: &str) -> Option<(String, String)> {
        let rest = key.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        if self.namespaced {
            let (namespace, name) = rest.split_once('/')?;
            if namespace.is_empty() || name.is_empty() || name.contains('/') {
                return None;
            }
            Some((namespace.to_owned(), name.to_owned()))
        } else {
            if rest.is_empty() || rest.contains('/') {
                return None;
            }
            Some((String::new(), rest.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_keys() {
        let keys = KeyStrategy::namespaced("/registry/applications/");
        assert_eq!(keys.root_key("dev"), "/registry/applications/dev");
        assert_eq!(
            keys.item_key("dev", "shop").unwrap(),
            "/registry/applications/dev/shop"
        );
        assert!(matches!(
            keys.item_key("", "shop"),
            Err(StoreError::BadRequest(_))
        ));
    }

    #[test]
    fn cluster_keys() {
        let keys = KeyStrategy::cluster("/registry/nodes");
        assert_eq!(keys.root_key("dev"), "/registry/nodes");
        assert_eq!(keys.item_key("", "node-1").unwrap(), "/registry/nodes/node-1");
        assert_eq!(
            keys.parse_key("/registry/nodes/node-1"),
            Some((String::new(), "node-1".to_string()))
        );
    }

    #[test]
    fn illegal_names_are_rejected() {
        let keys = KeyStrategy::namespaced("/registry/applications");
        for name in ["", "Shop", "-shop", "shop/evil", "a b"] {
            assert!(
                matches!(keys.item_key("dev", name), Err(StoreError::InvalidName { .. })),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn key_round_trip() {
        let keys = KeyStrategy::namespaced("/registry/applications");
        for (namespace, name) in [("dev", "shop"), ("team-a", "a"), ("x1", "web-frontend-0")] {
            let key = keys.item_key(namespace, name).unwrap();
            assert_eq!(
                keys.parse_key(&key),
                Some((namespace.to_string(), name.to_string()))
            );
        }
        assert_eq!(keys.parse_key("/registry/applications/dev"), None);
        assert_eq!(keys.parse_key("/registry/other/dev/shop"), None);
    }
}

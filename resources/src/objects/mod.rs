use std::{collections::BTreeMap, fmt::Debug};

use chrono::NaiveDateTime;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

pub mod application;

/// Flat attribute set of an object, keyed by field path.
pub type Fields = BTreeMap<String, String>;

pub trait Object:
    Debug + Clone + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind name as it appears in manifests.
    const KIND: &'static str;

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn name(&self) -> &String {
        &self.metadata().name
    }

    fn namespace(&self) -> &String {
        &self.metadata().namespace
    }

    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;

    /// Fields usable in field selectors.
    /// Always contains `metadata.name` and `metadata.namespace`.
    fn selectable_fields(&self) -> Fields {
        self.metadata().default_fields()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Name must be unique within a namespace.
    /// Cannot be updated.
    pub name: String,
    /// Namespace defines the space within which each name must be unique.
    /// Empty for cluster-scoped objects.
    /// Cannot be updated.
    #[serde(default)]
    pub namespace: String,
    /// UID is the unique in time and space value for this object.
    /// Populated by the system. Read-only.
    pub uid: Option<Uuid>,
    /// An opaque value that represents the internal version of this object.
    /// Clients must pass it back unmodified on update.
    /// Populated by the system. Read-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    /// Time at which the object was first persisted.
    /// Populated by the system. Read-only.
    pub creation_timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(namespace: &str, name: &str) -> Self {
        Metadata {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            ..Default::default()
        }
    }

    pub fn default_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("metadata.name".to_string(), self.name.to_owned());
        fields.insert("metadata.namespace".to_string(), self.namespace.to_owned());
        fields
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Labels(pub BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Labels(BTreeMap::new())
    }

    pub fn insert(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<none>");
        }
        let labels = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}", labels)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList<T> {
    /// Store revision at which the list was read.
    /// Can be passed to watch as a resume token.
    pub resource_version: String,
    pub items: Vec<T>,
}

impl<T> Default for ObjectList<T> {
    fn default() -> Self {
        ObjectList {
            resource_version: String::new(),
            items: Vec::new(),
        }
    }
}

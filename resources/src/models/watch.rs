use serde::{Deserialize, Serialize};

use crate::objects::Object;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum WatchEvent<T> {
    Put(PutEvent<T>),
    Delete(DeleteEvent<T>),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PutEvent<T> {
    pub key: String,
    pub object: T,
    /// Store revision of this change, usable as a resume token.
    pub revision: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeleteEvent<T> {
    pub key: String,
    /// Last state of the object before it was removed.
    pub object: T,
    pub revision: i64,
}

impl<T: Object> WatchEvent<T> {
    pub fn new_put(key: String, object: T, revision: i64) -> Self {
        WatchEvent::Put(PutEvent {
            key,
            object,
            revision,
        })
    }

    pub fn new_delete(key: String, object: T, revision: i64) -> Self {
        WatchEvent::Delete(DeleteEvent {
            key,
            object,
            revision,
        })
    }

    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put(e) => &e.key,
            WatchEvent::Delete(e) => &e.key,
        }
    }

    pub fn revision(&self) -> i64 {
        match self {
            WatchEvent::Put(e) => e.revision,
            WatchEvent::Delete(e) => e.revision,
        }
    }

    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Put(e) => &e.object,
            WatchEvent::Delete(e) => &e.object,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::application::Application;

    #[test]
    fn tagged_serialization() {
        let event = WatchEvent::new_delete("/k".to_string(), Application::default(), 4);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "Delete");
        assert_eq!(value["revision"], 4);
        assert_eq!(event.key(), "/k");
    }
}

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{
    RawEvent, RawEventStream, RawEventType, RawObject, Revision, Storage, StorageError,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Number of past changes kept for resuming watchers.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// In-process storage with the same revision and watch semantics as etcd.
/// Keeps the last `history_limit` changes, so watchers can resume from any
/// revision after the compaction point. Older revisions are compacted
/// automatically.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    events: broadcast::Sender<RawEvent>,
}

struct State {
    items: BTreeMap<String, (Vec<u8>, Revision)>,
    revision: Revision,
    compacted: Revision,
    history: VecDeque<RawEvent>,
    history_limit: usize,
}

impl State {
    fn record(
        &mut self,
        events: &broadcast::Sender<RawEvent>,
        event_type: RawEventType,
        key: &str,
        value: Option<Vec<u8>>,
        prev_value: Option<Vec<u8>>,
    ) -> Revision {
        self.revision += 1;
        let event = RawEvent {
            event_type,
            key: key.to_owned(),
            value,
            prev_value,
            revision: self.revision,
        };
        self.history.push_back(event.clone());
        while self.history.len() > self.history_limit {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted = dropped.revision;
            }
        }
        // no subscriber is not an error
        let _ = events.send(event);
        self.revision
    }

    fn events_after(
        &self,
        prefix: &str,
        since: Revision,
    ) -> Result<VecDeque<RawEvent>, StorageError> {
        if since < self.compacted {
            return Err(StorageError::Compacted(since));
        }
        if since > self.revision {
            return Err(StorageError::FutureRevision {
                requested: since,
                current: self.revision,
            });
        }
        Ok(self
            .history
            .iter()
            .filter(|e| e.revision > since && e.key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = State {
            items: BTreeMap::new(),
            revision: 0,
            compacted: 0,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        };
        MemoryStorage {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                events,
            }),
        }
    }

    pub fn revision(&self) -> Revision {
        self.inner.state.lock().revision
    }

    /// Drops history up to and including `revision`.
    pub fn compact(&self, revision: Revision) {
        let mut state = self.inner.state.lock();
        state.history.retain(|e| e.revision > revision);
        state.compacted = state.compacted.max(revision);
        tracing::debug!("Memory storage compacted at revision {}", revision);
    }
}

struct WatchState {
    inner: Arc<Inner>,
    rx: broadcast::Receiver<RawEvent>,
    prefix: String,
    pending: VecDeque<RawEvent>,
    last: Revision,
    done: bool,
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<Revision, StorageError> {
        let mut state = self.inner.state.lock();
        if state.items.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_owned()));
        }
        let revision = state.record(
            &self.inner.events,
            RawEventType::Put,
            key,
            Some(value.clone()),
            None,
        );
        state.items.insert(key.to_owned(), (value, revision));
        Ok(revision)
    }

    async fn get(&self, key: &str) -> Result<RawObject, StorageError> {
        let state = self.inner.state.lock();
        state
            .items
            .get(key)
            .map(|(value, revision)| RawObject {
                key: key.to_owned(),
                value: value.clone(),
                revision: *revision,
            })
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))
    }

    async fn list(&self, prefix: &str) -> Result<(Vec<RawObject>, Revision), StorageError> {
        let state = self.inner.state.lock();
        let objects = state
            .items
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, revision))| RawObject {
                key: key.to_owned(),
                value: value.clone(),
                revision: *revision,
            })
            .collect();
        Ok((objects, state.revision))
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Revision,
    ) -> Result<Revision, StorageError> {
        let mut state = self.inner.state.lock();
        let (prev_value, actual) = state
            .items
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))?;
        if actual != expected {
            return Err(StorageError::Conflict {
                key: key.to_owned(),
                expected,
                actual,
            });
        }
        let revision = state.record(
            &self.inner.events,
            RawEventType::Put,
            key,
            Some(value.clone()),
            Some(prev_value),
        );
        state.items.insert(key.to_owned(), (value, revision));
        Ok(revision)
    }

    async fn delete(
        &self,
        key: &str,
        expected: Option<Revision>,
    ) -> Result<RawObject, StorageError> {
        let mut state = self.inner.state.lock();
        let (prev_value, actual) = state
            .items
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))?;
        if let Some(expected) = expected {
            if actual != expected {
                return Err(StorageError::Conflict {
                    key: key.to_owned(),
                    expected,
                    actual,
                });
            }
        }
        state.items.remove(key);
        state.record(
            &self.inner.events,
            RawEventType::Delete,
            key,
            None,
            Some(prev_value.clone()),
        );
        Ok(RawObject {
            key: key.to_owned(),
            value: prev_value,
            revision: actual,
        })
    }

    async fn watch(&self, prefix: &str, since: Revision) -> Result<RawEventStream, StorageError> {
        let (rx, pending, last) = {
            let state = self.inner.state.lock();
            // subscribe while holding the lock so no event falls in between
            let rx = self.inner.events.subscribe();
            let since = if since == 0 { state.revision } else { since };
            (rx, state.events_after(prefix, since)?, since)
        };

        let watch_state = WatchState {
            inner: self.inner.clone(),
            rx,
            prefix: prefix.to_owned(),
            pending,
            last,
            done: false,
        };

        let stream = futures::stream::unfold(watch_state, |mut s| async move {
            if s.done {
                return None;
            }
            loop {
                if let Some(event) = s.pending.pop_front() {
                    s.last = event.revision;
                    return Some((Ok(event), s));
                }
                match s.rx.recv().await {
                    Ok(event) => {
                        if event.revision <= s.last || !event.key.starts_with(&s.prefix) {
                            continue;
                        }
                        s.last = event.revision;
                        return Some((Ok(event), s));
                    },
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!("Watcher on {} lagged {} events, replaying", s.prefix, n);
                        let replay = {
                            let state = s.inner.state.lock();
                            state.events_after(&s.prefix, s.last)
                        };
                        match replay {
                            Ok(pending) => s.pending = pending,
                            Err(e) => {
                                s.done = true;
                                return Some((Err(e), s));
                            },
                        }
                    },
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn create_get_list() {
        let storage = MemoryStorage::new();
        let r1 = storage.create("/apps/dev/a", b"a".to_vec()).await.unwrap();
        let r2 = storage.create("/apps/dev/b", b"b".to_vec()).await.unwrap();
        storage.create("/apps/dev2/c", b"c".to_vec()).await.unwrap();
        assert!(r2 > r1);

        assert_eq!(
            storage.create("/apps/dev/a", b"x".to_vec()).await,
            Err(StorageError::AlreadyExists("/apps/dev/a".to_string()))
        );
        assert_eq!(storage.get("/apps/dev/a").await.unwrap().value, b"a");

        let (objects, revision) = storage.list("/apps/dev/").await.unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(revision, storage.revision());
    }

    #[tokio::test]
    async fn update_requires_matching_revision() {
        let storage = MemoryStorage::new();
        let r1 = storage.create("/k", b"1".to_vec()).await.unwrap();
        let r2 = storage.update("/k", b"2".to_vec(), r1).await.unwrap();
        assert!(r2 > r1);
        let err = storage.update("/k", b"3".to_vec(), r1).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { actual, .. } if actual == r2));
        assert!(matches!(
            storage.update("/missing", b"3".to_vec(), r1).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_returns_prior_state() {
        let storage = MemoryStorage::new();
        let r1 = storage.create("/k", b"1".to_vec()).await.unwrap();
        assert!(storage.delete("/k", Some(r1 + 10)).await.is_err());
        let prior = storage.delete("/k", Some(r1)).await.unwrap();
        assert_eq!(prior.value, b"1");
        assert!(matches!(storage.get("/k").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn watch_from_now_and_resume() {
        let storage = MemoryStorage::new();
        let r1 = storage.create("/apps/a", b"1".to_vec()).await.unwrap();

        let mut live = storage.watch("/apps/", 0).await.unwrap();
        storage.create("/other/x", b"x".to_vec()).await.unwrap();
        let r2 = storage.update("/apps/a", b"2".to_vec(), r1).await.unwrap();
        let event = live.next().await.unwrap().unwrap();
        assert_eq!(event.revision, r2);
        assert_eq!(event.prev_value.as_deref(), Some(&b"1"[..]));

        storage.delete("/apps/a", None).await.unwrap();
        let mut resumed = storage.watch("/apps/", r1).await.unwrap();
        let first = resumed.next().await.unwrap().unwrap();
        let second = resumed.next().await.unwrap().unwrap();
        assert_eq!(first.revision, r2);
        assert_eq!(second.event_type, RawEventType::Delete);
    }

    #[tokio::test]
    async fn watch_before_compaction_fails() {
        let storage = MemoryStorage::new();
        let r1 = storage.create("/k", b"1".to_vec()).await.unwrap();
        storage.update("/k", b"2".to_vec(), r1).await.unwrap();
        storage.compact(r1 + 1);
        assert!(matches!(
            storage.watch("/", r1).await,
            Err(StorageError::Compacted(_))
        ));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let storage = MemoryStorage::with_history_limit(3);
        let mut revision = storage.create("/k", b"0".to_vec()).await.unwrap();
        for i in 1..5 {
            revision = storage
                .update("/k", i.to_string().into_bytes(), revision)
                .await
                .unwrap();
        }
        assert_eq!(storage.inner.state.lock().history.len(), 3);

        // revisions 1 and 2 were dropped
        assert_eq!(
            storage.watch("/", 1).await.err(),
            Some(StorageError::Compacted(1))
        );
        let mut resumed = storage.watch("/", 2).await.unwrap();
        assert_eq!(resumed.next().await.unwrap().unwrap().revision, 3);
    }

    #[tokio::test]
    async fn watch_rejects_future_revision() {
        let storage = MemoryStorage::new();
        let r1 = storage.create("/k", b"1".to_vec()).await.unwrap();
        assert_eq!(
            storage.watch("/", r1 + 5).await.err(),
            Some(StorageError::FutureRevision {
                requested: r1 + 5,
                current: r1,
            })
        );
        assert!(storage.watch("/", r1).await.is_ok());
    }
}

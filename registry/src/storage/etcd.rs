use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deadpool::managed;
use etcd_client::{
    Client, Compare, CompareOp, DeleteOptions, Event, EventType, GetOptions, KeyValue, Txn,
    TxnOp, TxnOpResponse, TxnResponse, WatchOptions, WatchStream, Watcher,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{
    RawEvent, RawEventStream, RawEventType, RawObject, Revision, Storage, StorageError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Client endpoints of the etcd cluster.
    pub endpoints: Vec<String>,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// Key prefix every registered resource is stored under.
    pub prefix: String,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        EtcdConfig {
            endpoints: vec!["http://localhost:2379".to_string()],
            pool_size: 16,
            prefix: "/registry".to_string(),
        }
    }
}

impl EtcdConfig {
    pub fn create_pool(&self) -> Result<EtcdPool> {
        let manager = EtcdManager {
            endpoints: self.endpoints.to_owned(),
        };
        managed::Pool::builder(manager)
            .max_size(self.pool_size)
            .build()
            .map_err(|err| anyhow!("Failed to build etcd pool: {}", err))
    }
}

pub struct EtcdManager {
    endpoints: Vec<String>,
}

#[async_trait]
impl managed::Manager for EtcdManager {
    type Type = Client;
    type Error = etcd_client::Error;

    async fn create(&self) -> Result<Client, etcd_client::Error> {
        let client = Client::connect(self.endpoints.to_owned(), None).await?;
        tracing::debug!("Connected to etcd at {:?}", self.endpoints);
        Ok(client)
    }

    async fn recycle(&self, client: &mut Client) -> managed::RecycleResult<etcd_client::Error> {
        client.status().await?;
        Ok(())
    }
}

pub type EtcdPool = managed::Pool<EtcdManager>;
pub type EtcdClient = managed::Object<EtcdManager>;

impl From<etcd_client::Error> for StorageError {
    fn from(err: etcd_client::Error) -> Self {
        tracing::debug!("Etcd Error: {}", err);
        StorageError::Unavailable(err.to_string())
    }
}

pub struct EtcdStorage {
    pool: EtcdPool,
}

impl EtcdStorage {
    pub fn new(pool: EtcdPool) -> Self {
        EtcdStorage {
            pool,
        }
    }

    async fn client(&self) -> Result<EtcdClient, StorageError> {
        self.pool.get().await.map_err(|err| {
            tracing::error!("Failed to get etcd client: {}", err);
            StorageError::Unavailable(format!("failed to get etcd client: {}", err))
        })
    }
}

fn kv_to_raw(kv: &KeyValue) -> RawObject {
    RawObject {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        revision: kv.mod_revision(),
    }
}

fn txn_revision(resp: &TxnResponse) -> Revision {
    resp.header().map(|h| h.revision()).unwrap_or_default()
}

/// Explains a failed guarded transaction whose else-branch read the key.
fn guard_failure(key: &str, expected: Revision, resp: TxnResponse) -> StorageError {
    let current = resp.op_responses().into_iter().find_map(|op| match op {
        TxnOpResponse::Get(get) => Some(get.kvs().first().map(|kv| kv.mod_revision())),
        _ => None,
    });
    match current {
        Some(Some(actual)) => StorageError::Conflict {
            key: key.to_owned(),
            expected,
            actual,
        },
        _ => StorageError::NotFound(key.to_owned()),
    }
}

fn raw_event(event: &Event) -> Option<RawEvent> {
    let kv = event.kv()?;
    let prev_value = event.prev_kv().map(|prev| prev.value().to_vec());
    let (event_type, value) = match event.event_type() {
        EventType::Put => (RawEventType::Put, Some(kv.value().to_vec())),
        EventType::Delete => (RawEventType::Delete, None),
    };
    Some(RawEvent {
        event_type,
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value,
        prev_value,
        revision: kv.mod_revision(),
    })
}

struct WatchState {
    // dropping the watcher cancels the watch
    _watcher: Watcher,
    stream: WatchStream,
    pending: VecDeque<RawEvent>,
    done: bool,
}

#[async_trait]
impl Storage for EtcdStorage {
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<Revision, StorageError> {
        let mut client = self.client().await?;
        let txn = Txn::new()
            .when([Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then([TxnOp::put(key, value, None)]);
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            return Err(StorageError::AlreadyExists(key.to_owned()));
        }
        Ok(txn_revision(&resp))
    }

    async fn get(&self, key: &str) -> Result<RawObject, StorageError> {
        let mut client = self.client().await?;
        let resp = client.get(key, None).await?;
        resp.kvs()
            .first()
            .map(kv_to_raw)
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))
    }

    async fn list(&self, prefix: &str) -> Result<(Vec<RawObject>, Revision), StorageError> {
        let mut client = self.client().await?;
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();
        Ok((resp.kvs().iter().map(kv_to_raw).collect(), revision))
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Revision,
    ) -> Result<Revision, StorageError> {
        let mut client = self.client().await?;
        let txn = Txn::new()
            .when([Compare::mod_revision(key, CompareOp::Equal, expected)])
            .and_then([TxnOp::put(key, value, None)])
            .or_else([TxnOp::get(key, None)]);
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            return Err(guard_failure(key, expected, resp));
        }
        Ok(txn_revision(&resp))
    }

    async fn delete(
        &self,
        key: &str,
        expected: Option<Revision>,
    ) -> Result<RawObject, StorageError> {
        let mut client = self.client().await?;
        let compares = match expected {
            Some(revision) => vec![Compare::mod_revision(key, CompareOp::Equal, revision)],
            None => vec![],
        };
        let txn = Txn::new()
            .when(compares)
            .and_then([TxnOp::delete(
                key,
                Some(DeleteOptions::new().with_prev_key()),
            )])
            .or_else([TxnOp::get(key, None)]);
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            return Err(guard_failure(key, expected.unwrap_or_default(), resp));
        }
        resp.op_responses()
            .into_iter()
            .find_map(|op| match op {
                TxnOpResponse::Delete(del) => del.prev_kvs().first().map(kv_to_raw),
                _ => None,
            })
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))
    }

    async fn watch(&self, prefix: &str, since: Revision) -> Result<RawEventStream, StorageError> {
        let mut client = self.client().await?;
        let mut options = WatchOptions::new().with_prefix().with_prev_key();
        if since > 0 {
            let resp = client
                .get(prefix, Some(GetOptions::new().with_prefix().with_count_only()))
                .await?;
            let current = resp.header().map(|h| h.revision()).unwrap_or_default();
            if since > current {
                return Err(StorageError::FutureRevision {
                    requested: since,
                    current,
                });
            }
            options = options.with_start_revision(since + 1);
        }
        let (watcher, stream) = client.watch(prefix, Some(options)).await?;
        tracing::info!("Etcd watch created, watch id: {}", watcher.watch_id());

        let watch_state = WatchState {
            _watcher: watcher,
            stream,
            pending: VecDeque::new(),
            done: false,
        };
        let stream = futures::stream::unfold(watch_state, |mut s| async move {
            if s.done {
                return None;
            }
            loop {
                if let Some(event) = s.pending.pop_front() {
                    return Some((Ok(event), s));
                }
                match s.stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.compact_revision() > 0 {
                            s.done = true;
                            let err = StorageError::Compacted(resp.compact_revision());
                            return Some((Err(err), s));
                        }
                        if resp.canceled() {
                            s.done = true;
                            let err = StorageError::Unavailable(format!(
                                "watch canceled: {}",
                                resp.cancel_reason()
                            ));
                            return Some((Err(err), s));
                        }
                        s.pending.extend(resp.events().iter().filter_map(raw_event));
                    },
                    Ok(None) => return None,
                    Err(err) => {
                        s.done = true;
                        return Some((Err(StorageError::from(err)), s));
                    },
                }
            }
        });
        Ok(stream.boxed())
    }
}

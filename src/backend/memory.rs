//! In-memory ordered backend.
//!
//! Used by the test suites and by single-process deployments; production
//! clusters plug a distributed implementation into the same trait. Expired
//! items are reaped lazily on the read and write paths.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{Backend, Item};
use crate::errors::{Error, Result};

#[derive(Default)]
struct Inner {
    kv: BTreeMap<Vec<u8>, Item>,
    next_revision: u64,
}

impl Inner {
    fn live(&self, key: &[u8]) -> Option<&Item> {
        self.kv.get(key).filter(|item| !expired(item))
    }

    fn insert(&mut self, mut item: Item) {
        self.next_revision += 1;
        item.revision = Some(self.next_revision);
        self.kv.insert(item.key.clone(), item);
    }
}

fn expired(item: &Item) -> bool {
    item.expires.is_some_and(|expires| expires <= Utc::now())
}

fn key_str(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

/// Ordered in-memory key-value store with TTLs and revisions.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Item> {
        let mut inner = self.inner.lock().await;
        match inner.kv.get(key) {
            Some(item) if !expired(item) => Ok(item.clone()),
            Some(_) => {
                inner.kv.remove(key);
                Err(Error::not_found(format!("key {:?} not found", key_str(key))))
            }
            None => Err(Error::not_found(format!("key {:?} not found", key_str(key)))),
        }
    }

    async fn put(&self, item: Item) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.insert(item);
        Ok(())
    }

    async fn create(&self, item: Item) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.live(&item.key).is_some() {
            return Err(Error::already_exists(format!(
                "key {:?} already exists",
                key_str(&item.key)
            )));
        }
        inner.insert(item);
        Ok(())
    }

    async fn update(&self, item: Item) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.live(&item.key) else {
            return Err(Error::not_found(format!(
                "key {:?} not found",
                key_str(&item.key)
            )));
        };
        if item.revision.is_some() && item.revision != stored.revision {
            return Err(Error::compare_failed(format!(
                "key {:?} was concurrently modified",
                key_str(&item.key)
            )));
        }
        inner.insert(item);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.kv.remove(key) {
            Some(item) if !expired(&item) => Ok(()),
            _ => Err(Error::not_found(format!("key {:?} not found", key_str(key)))),
        }
    }

    async fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<()> {
        if start > end {
            return Err(Error::bad_parameter("inverted range"));
        }
        let mut inner = self.inner.lock().await;
        let doomed: Vec<Vec<u8>> = inner
            .kv
            .range(start.to_vec()..end.to_vec())
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            inner.kv.remove(&key);
        }
        Ok(())
    }

    async fn get_range(
        &self,
        start: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<Item>> {
        if start > end {
            return Err(Error::bad_parameter("inverted range"));
        }
        let inner = self.inner.lock().await;
        let mut out = Vec::new();
        for (_, item) in inner.kv.range(start.to_vec()..end.to_vec()) {
            if expired(item) {
                continue;
            }
            out.push(item.clone());
            if limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
        Ok(out)
    }
}

//! 签名结果缓存
//!
//! CRL与OCSP响应的签名代价高，缓存按键保存最近一次的签名结果，并区分三种
//! 新鲜度：
//!
//! - `Fresh`：直接返回
//! - `Stale`：一个生产者重建，其他读者继续拿到旧结果，不阻塞
//! - `Invalid`：没有可用结果，读者等待唯一的生产者
//!
//! 每个键有一把生产者锁；读者从不在持有生产者锁的情况下等待读写锁以外的东西。

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::Result;

/// 缓存结果的新鲜度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Invalid,
}

/// 生产者构建出的结果及其时间边界
#[derive(Debug)]
pub struct Artifact<V> {
    pub value: V,
    /// 此后视为`Stale`
    pub refresh_at: OffsetDateTime,
    /// 此后视为`Invalid`
    pub expires_at: OffsetDateTime,
}

#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    refresh_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    /// 构建开始时看到的标记值
    stale_seen: u64,
    invalid_seen: u64,
}

#[derive(Debug)]
struct Slot<V> {
    entry: RwLock<Option<Entry<V>>>,
    producer: Mutex<()>,
    stale_mark: AtomicU64,
    invalid_mark: AtomicU64,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            entry: RwLock::new(None),
            producer: Mutex::new(()),
            stale_mark: AtomicU64::new(0),
            invalid_mark: AtomicU64::new(0),
        }
    }

    fn classify(&self, now: OffsetDateTime) -> (Freshness, Option<Arc<V>>) {
        let entry = self.entry.read();
        let Some(entry) = entry.as_ref() else {
            return (Freshness::Invalid, None);
        };
        let freshness = if entry.invalid_seen != self.invalid_mark.load(Ordering::Acquire)
            || now >= entry.expires_at
        {
            Freshness::Invalid
        } else if entry.stale_seen != self.stale_mark.load(Ordering::Acquire)
            || now >= entry.refresh_at
        {
            Freshness::Stale
        } else {
            Freshness::Fresh
        };
        (freshness, Some(Arc::clone(&entry.value)))
    }

    /// 调用者必须持有生产者锁
    fn rebuild<F>(&self, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<Artifact<V>>,
    {
        let stale_seen = self.stale_mark.load(Ordering::Acquire);
        let invalid_seen = self.invalid_mark.load(Ordering::Acquire);
        let artifact = build()?;
        let value = Arc::new(artifact.value);
        *self.entry.write() = Some(Entry {
            value: Arc::clone(&value),
            refresh_at: artifact.refresh_at,
            expires_at: artifact.expires_at,
            stale_seen,
            invalid_seen,
        });
        Ok(value)
    }
}

/// 按键缓存签名结果
#[derive(Debug)]
pub struct ArtifactCache<K, V> {
    name: &'static str,
    slots: RwLock<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> ArtifactCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.slots
                .write()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    pub fn freshness(&self, key: &K, now: OffsetDateTime) -> Freshness {
        match self.slots.read().get(key) {
            Some(slot) => slot.classify(now).0,
            None => Freshness::Invalid,
        }
    }

    /// 取得缓存结果，必要时调用`build`重建
    ///
    /// `Stale`时若已有生产者在重建，直接返回旧结果；`Invalid`时等待生产者
    /// 完成后使用其结果，不重复签名。
    pub fn get_or_build<F>(&self, key: &K, now: OffsetDateTime, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<Artifact<V>>,
    {
        let slot = self.slot(key);
        match slot.classify(now) {
            (Freshness::Fresh, Some(value)) => Ok(value),
            (Freshness::Stale, Some(previous)) => match slot.producer.try_lock() {
                Some(_guard) => match slot.classify(now) {
                    (Freshness::Fresh, Some(value)) => Ok(value),
                    _ => {
                        debug!(cache = self.name, key = ?key, "Rebuilding stale artifact");
                        slot.rebuild(build)
                    }
                },
                None => {
                    debug!(
                        cache = self.name,
                        key = ?key,
                        "Rebuild in progress, serving previous artifact"
                    );
                    Ok(previous)
                }
            },
            _ => {
                let _guard = slot.producer.lock();
                match slot.classify(now) {
                    (Freshness::Fresh | Freshness::Stale, Some(value)) => Ok(value),
                    _ => {
                        debug!(cache = self.name, key = ?key, "Building artifact");
                        slot.rebuild(build)
                    }
                }
            }
        }
    }

    /// 当前缓存的结果（不论新鲜度）
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.read().get(key).cloned()?;
        let entry = slot.entry.read();
        entry.as_ref().map(|entry| Arc::clone(&entry.value))
    }

    pub fn mark_stale(&self, key: &K) {
        if let Some(slot) = self.slots.read().get(key) {
            slot.stale_mark.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn mark_all_stale(&self) {
        for slot in self.slots.read().values() {
            slot.stale_mark.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn invalidate(&self, key: &K) {
        if let Some(slot) = self.slots.read().get(key) {
            slot.invalid_mark.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn invalidate_all(&self) {
        for slot in self.slots.read().values() {
            slot.invalid_mark.fetch_add(1, Ordering::AcqRel);
        }
    }
}

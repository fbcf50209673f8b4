// Copyright 2025 rewarm Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::oneshot;

use crate::{
    cleaner::{self, Sweeper},
    code::CacheValue,
    crypto::EncryptionGateway,
    error::{Error, Result},
    expiry::{self, Verdict},
    inflight::{FillResult, InflightMap, Join},
    locks::KeyLocks,
    memory::MemoryStore,
    persist::{self, Encryption, PersistenceGateway},
    record::{ErasedRecord, Record, Source},
};

/// Per-call caching configuration.
///
/// The default policy is expirable, carries no lifetime of its own, persists
/// in plaintext, and does not force a refresh.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    lifetime: Option<Duration>,
    expirable: bool,
    encrypt: bool,
    refresh: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            lifetime: None,
            expirable: true,
            encrypt: false,
            refresh: false,
        }
    }
}

impl CachePolicy {
    /// Policy with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime to apply to records fetched under this policy.
    ///
    /// A zero lifetime means no time-based expiration at this level, the same
    /// as leaving the lifetime unset.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = (!lifetime.is_zero()).then_some(lifetime);
        self
    }

    /// Whether records fetched under this policy expire by time.
    ///
    /// A non-expirable record only leaves the cache through explicit
    /// invalidation.
    pub fn with_expirable(mut self, expirable: bool) -> Self {
        self.expirable = expirable;
        self
    }

    /// Encrypt the persisted payload for this provider.
    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Skip cached records and force a provider invocation.
    ///
    /// On provider failure the previously cached record is left untouched.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// The configured lifetime, if any.
    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    /// Whether records under this policy expire by time.
    pub fn expirable(&self) -> bool {
        self.expirable
    }

    /// Whether the persisted payload is encrypted.
    pub fn encrypt(&self) -> bool {
        self.encrypt
    }

    /// Whether a provider invocation is forced.
    pub fn refresh(&self) -> bool {
        self.refresh
    }
}

/// Builder for [`Cache`].
pub struct CacheBuilder {
    default_lifetime: Option<Duration>,
    quota: Option<u64>,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    encryption: Option<Encryption>,
    sweep_interval: Option<Duration>,
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBuilder {
    /// Builder with no persistence, no encryption, and no default lifetime.
    pub fn new() -> Self {
        Self {
            default_lifetime: None,
            quota: None,
            persistence: None,
            encryption: None,
            sweep_interval: None,
        }
    }

    /// Process-wide lifetime applied when neither the record nor the caller's
    /// policy carries one.
    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = Some(lifetime);
        self
    }

    /// Durable-store quota in bytes.
    ///
    /// The quota sweep shrinks the store back under it, oldest expirable
    /// records first; non-expirable records are never touched.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// Durable store records are mirrored to and recovered from.
    pub fn with_persistence(mut self, gateway: impl PersistenceGateway) -> Self {
        self.persistence = Some(Arc::new(gateway));
        self
    }

    /// Encryption gateway and the key material shared by this cache's
    /// providers; applied to records whose policy asks for encryption.
    pub fn with_encryption(mut self, gateway: impl EncryptionGateway, key_material: impl Into<String>) -> Self {
        self.encryption = Some(Encryption {
            gateway: Arc::new(gateway),
            key_material: key_material.into(),
        });
        self
    }

    /// Run expiration and quota sweeps on a timer.
    ///
    /// Requires a running tokio runtime at build time. The task stops once the
    /// last cache handle is dropped.
    pub fn with_sweep_interval(mut self, period: Duration) -> Self {
        self.sweep_interval = Some(period);
        self
    }

    /// Build the cache.
    pub fn build(self) -> Cache {
        let inner = Arc::new(Inner {
            memory: MemoryStore::default(),
            inflight: InflightMap::default(),
            locks: KeyLocks::default(),
            persistence: self.persistence,
            encryption: self.encryption,
            default_lifetime: self.default_lifetime,
            quota: self.quota,
        });
        if let Some(period) = self.sweep_interval {
            Sweeper::spawn(Arc::downgrade(&inner), period);
        }
        Cache { inner }
    }
}

pub(crate) struct Inner {
    pub memory: MemoryStore,
    pub inflight: InflightMap,
    pub locks: KeyLocks,
    pub persistence: Option<Arc<dyn PersistenceGateway>>,
    pub encryption: Option<Encryption>,
    pub default_lifetime: Option<Duration>,
    pub quota: Option<u64>,
}

impl Inner {
    fn encryption_for(&self, policy: &CachePolicy) -> Option<&Encryption> {
        if policy.encrypt {
            self.encryption.as_ref()
        } else {
            None
        }
    }
}

/// Memoizing dispatcher for async providers.
///
/// Cloning is cheap; clones share the same stores, in-flight table, and
/// gateways.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    /// Return the freshest record for `key`, refreshing through `f` when needed.
    ///
    /// Lookup order: the in-memory store, then durable storage, then the
    /// provider. Concurrent misses for the same key coalesce onto a single
    /// provider invocation, and every coalesced caller receives that
    /// invocation's result. Only provider failures surface here; persistence,
    /// serde, and crypto failures degrade to a miss or to a skipped
    /// best-effort write.
    ///
    /// The provider call and any pending durable write run to completion even
    /// if this future is dropped, so the cache still gets populated.
    pub async fn fetch<T, F, FU, E>(&self, key: impl Into<String>, policy: CachePolicy, f: F) -> Result<Record<T>>
    where
        T: CacheValue,
        F: FnOnce() -> FU,
        FU: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let key = key.into();

        if !policy.refresh {
            if let Some(slot) = self.inner.memory.get(&key) {
                match slot.downcast::<T>() {
                    Some(record) => {
                        if expiry::evaluate(record.meta(), policy.lifetime, self.inner.default_lifetime)
                            == Verdict::Fresh
                        {
                            if policy.lifetime.is_some() && record.lifetime().is_none() {
                                record.meta().set_lifetime(policy.lifetime);
                            }
                            record.meta().set_source(Source::Memory);
                            return Ok(record);
                        }
                        // Stale: leave it in place until a refresh succeeds.
                    }
                    None => {
                        tracing::debug!("dropping memory slot for key {} stored under another type", key);
                        self.inner.memory.remove(&key);
                    }
                }
            }
        }

        match self.inner.inflight.join(&key) {
            Join::Waiter(waiter) => {
                let result = waiter.await.map_err(|_| Error::Interrupted)?;
                let slot = result.map_err(Error::Shared)?;
                slot.downcast::<T>().ok_or(Error::TypeMismatch { key })
            }
            Join::Owner => {
                let fut = f();
                let (tx, rx) = oneshot::channel();
                let inner = self.inner.clone();
                let task_key = key.clone();
                tokio::spawn(async move {
                    let result = fill(&inner, &task_key, policy, fut).await;
                    for notifier in inner.inflight.finish(&task_key) {
                        let _ = notifier.send(result.clone());
                    }
                    let _ = tx.send(result);
                    if inner.quota.is_some() {
                        cleaner::sweep_quota(&inner).await;
                    }
                });
                let result = rx.await.map_err(|_| Error::Interrupted)?;
                let slot = result.map_err(|e| Arc::try_unwrap(e).unwrap_or_else(Error::Shared))?;
                slot.downcast::<T>().ok_or(Error::TypeMismatch { key })
            }
        }
    }

    /// Drop any cached record for `key`, from memory and durable storage.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.inner.memory.remove(key);
        if let Some(persistence) = self.inner.persistence.as_ref() {
            let _guard = self.inner.locks.lock(key).await;
            persistence.delete(key).await?;
        }
        Ok(())
    }

    /// Drop every cached record; durable delete failures are logged and
    /// skipped.
    pub async fn invalidate_all(&self) {
        self.inner.memory.clear();
        let Some(persistence) = self.inner.persistence.as_ref() else {
            return;
        };
        let keys = match persistence.list_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("cannot list durable keys for invalidation: {}", e);
                return;
            }
        };
        for key in keys {
            let _guard = self.inner.locks.lock(&key).await;
            if let Err(e) = persistence.delete(&key).await {
                tracing::warn!("cannot delete durable key {}: {}", key, e);
            }
        }
    }

    /// Run one expiration sweep; returns the number of records removed.
    pub async fn sweep_expired(&self) -> usize {
        cleaner::sweep_expired(&self.inner).await
    }

    /// Run one quota sweep; returns the number of durable records removed.
    pub async fn sweep_quota(&self) -> usize {
        cleaner::sweep_quota(&self.inner).await
    }
}

/// The miss path: durable lookup, then the provider, then write-back.
async fn fill<T, FU, E>(inner: &Arc<Inner>, key: &str, policy: CachePolicy, fut: FU) -> FillResult
where
    T: CacheValue,
    FU: Future<Output = std::result::Result<T, E>>,
    E: Into<anyhow::Error>,
{
    if !policy.refresh {
        if let Some(slot) = recover::<T>(inner, key, &policy).await {
            return Ok(slot);
        }
    }

    let value = match fut.await {
        Ok(value) => value,
        Err(e) => return Err(Arc::new(Error::provider(e))),
    };

    let record = Record::new(value, policy.expirable, policy.lifetime);
    record.meta().set_encrypted(policy.encrypt && inner.encryption.is_some());
    let slot = record.erase();
    inner.memory.insert(key.to_owned(), slot.clone());
    persist_record(inner, key, &policy, &record).await;
    Ok(slot)
}

/// Durable-store lookup; any failure degrades to a miss.
async fn recover<T>(inner: &Arc<Inner>, key: &str, policy: &CachePolicy) -> Option<ErasedRecord>
where
    T: CacheValue,
{
    let persistence = inner.persistence.as_ref()?;
    let blob = {
        let _guard = inner.locks.lock(key).await;
        match persistence.get(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("treating unreadable durable entry as miss, key {}: {}", key, e);
                return None;
            }
        }
    };
    let record = match persist::decode_record::<T>(&blob, inner.encryption_for(policy)) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!("treating undecodable durable entry as miss, key {}: {}", key, e);
            return None;
        }
    };
    if expiry::evaluate(record.meta(), policy.lifetime, inner.default_lifetime) == Verdict::Expired {
        return None;
    }
    if policy.lifetime.is_some() && record.lifetime().is_none() {
        record.meta().set_lifetime(policy.lifetime);
    }
    record.meta().set_source(Source::Persistence);
    record.meta().set_encrypted(policy.encrypt);
    let slot = record.erase();
    inner.memory.insert(key.to_owned(), slot.clone());
    Some(slot)
}

/// Best-effort durable write; failures are logged, the in-memory record stands.
async fn persist_record<T>(inner: &Arc<Inner>, key: &str, policy: &CachePolicy, record: &Record<T>)
where
    T: CacheValue,
{
    let Some(persistence) = inner.persistence.as_ref() else {
        return;
    };
    let encryption = inner.encryption_for(policy);
    if policy.encrypt && encryption.is_none() {
        tracing::warn!(
            "encryption requested for key {} but no gateway is configured, skipping durable write",
            key
        );
        return;
    }
    let blob = match persist::encode_record(record, encryption) {
        Ok(blob) => blob,
        Err(e) => {
            tracing::warn!("cannot serialize record for key {}: {}", key, e);
            return;
        }
    };
    record.meta().set_footprint(blob.len() as u64);
    let _guard = inner.locks.lock(key).await;
    if let Err(e) = persistence.put(key, &blob).await {
        tracing::warn!("best-effort durable write failed for key {}: {}", key, e);
    }
}

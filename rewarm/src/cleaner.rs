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

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use crate::{
    cache::Inner,
    expiry::{self, Verdict},
    persist,
};

/// Background task driving periodic expiration and quota sweeps.
///
/// Holds only a weak handle, so dropping the last cache handle stops the task
/// on its next tick.
pub(crate) struct Sweeper;

impl Sweeper {
    pub fn spawn(inner: Weak<Inner>, period: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                let expired = sweep_expired(&inner).await;
                let evicted = sweep_quota(&inner).await;
                if expired > 0 || evicted > 0 {
                    tracing::debug!("sweep removed {} expired and {} over-quota records", expired, evicted);
                }
                inner.locks.compact();
            }
            tracing::debug!("cache dropped, sweeper stopping");
        });
    }
}

/// Remove expired records from memory and durable storage.
///
/// Freshness is judged per record against the process default only; per-call
/// lifetimes already stamped onto records travel with them. Per-key failures
/// are logged and skipped so one bad entry cannot stall the sweep.
pub(crate) async fn sweep_expired(inner: &Arc<Inner>) -> usize {
    let mut removed = 0;

    for (key, meta) in inner.memory.snapshot() {
        if expiry::evaluate(&meta, None, inner.default_lifetime) == Verdict::Expired {
            inner.memory.remove(&key);
            removed += 1;
        }
    }

    let Some(persistence) = inner.persistence.as_ref() else {
        return removed;
    };
    let keys = match persistence.list_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("cannot list durable keys for expiration sweep: {}", e);
            return removed;
        }
    };
    for key in keys {
        let _guard = inner.locks.lock(&key).await;
        let blob = match persistence.get(&key).await {
            Ok(Some(blob)) => blob,
            // Deleted since listing; nothing to judge.
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("skipping unreadable durable entry in sweep, key {}: {}", key, e);
                continue;
            }
        };
        let envelope = match persist::decode_envelope(&blob) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("skipping undecodable durable entry in sweep, key {}: {}", key, e);
                continue;
            }
        };
        if expiry::evaluate(&envelope.head_meta(), None, inner.default_lifetime) == Verdict::Expired {
            match persistence.delete(&key).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("cannot delete expired durable entry, key {}: {}", key, e),
            }
        }
    }
    removed
}

struct Candidate {
    key: String,
    persisted_at: u64,
    len: u64,
    expirable: bool,
}

/// Shrink the durable store back under its quota, oldest expirable records
/// first. Non-expirable records are never size-evicted.
pub(crate) async fn sweep_quota(inner: &Arc<Inner>) -> usize {
    let (Some(persistence), Some(quota)) = (inner.persistence.as_ref(), inner.quota) else {
        return 0;
    };
    let keys = match persistence.list_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("cannot list durable keys for quota sweep: {}", e);
            return 0;
        }
    };

    let mut total = 0u64;
    let mut candidates = Vec::with_capacity(keys.len());
    for key in keys {
        let _guard = inner.locks.lock(&key).await;
        let blob = match persistence.get(&key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("skipping unreadable durable entry in quota sweep, key {}: {}", key, e);
                continue;
            }
        };
        let len = blob.len() as u64;
        total += len;
        match persist::decode_envelope(&blob) {
            Ok(envelope) => candidates.push(Candidate {
                key,
                persisted_at: envelope.persisted_at,
                len,
                expirable: envelope.expirable,
            }),
            Err(e) => {
                tracing::warn!("skipping undecodable durable entry in quota sweep, key {}: {}", key, e);
            }
        }
    }
    if total <= quota {
        return 0;
    }

    candidates.retain(|c| c.expirable);
    candidates.sort_by_key(|c| c.persisted_at);

    let mut removed = 0;
    for candidate in candidates {
        if total <= quota {
            break;
        }
        let _guard = inner.locks.lock(&candidate.key).await;
        // A dispatch may have rewritten the entry after it was measured;
        // re-read the head under the lock and only evict what was measured.
        let current = match persistence.get(&candidate.key).await {
            Ok(Some(blob)) => persist::decode_envelope(&blob).ok(),
            Ok(None) => {
                total = total.saturating_sub(candidate.len);
                continue;
            }
            Err(e) => {
                tracing::warn!("skipping unreadable durable entry in quota sweep, key {}: {}", candidate.key, e);
                continue;
            }
        };
        if current.is_none_or(|envelope| envelope.persisted_at != candidate.persisted_at) {
            tracing::debug!("skipping eviction of rewritten durable entry, key {}", candidate.key);
            continue;
        }
        match persistence.delete(&candidate.key).await {
            Ok(()) => {
                inner.memory.remove(&candidate.key);
                total -= candidate.len;
                removed += 1;
            }
            Err(e) => {
                tracing::warn!("cannot evict durable entry, key {}: {}", candidate.key, e);
            }
        }
    }
    if total > quota {
        tracing::warn!(
            "durable store still over quota after eviction, {} of {} bytes",
            total,
            quota
        );
    }
    removed
}

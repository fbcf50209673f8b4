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

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle locks are reaped after this many lock insertions, so the table stays
/// bounded by the working set even without a background sweeper.
const COMPACT_EVERY: usize = 256;

#[derive(Default)]
struct Table {
    locks: HashMap<String, Arc<AsyncMutex<()>>>,
    inserts: usize,
}

impl Table {
    fn compact(&mut self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.inserts = 0;
    }
}

/// Per-key async locks serializing durable-store access.
///
/// Dispatch fills and eviction sweeps take the same lock before touching a
/// key's durable entry, so a sweep cannot delete a record a concurrent
/// dispatch just wrote. Each operation touches exactly one key, so no lock
/// ordering across keys arises.
#[derive(Default)]
pub(crate) struct KeyLocks {
    table: Mutex<Table>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock();
            match table.locks.get(key) {
                Some(lock) => lock.clone(),
                None => {
                    table.inserts += 1;
                    if table.inserts >= COMPACT_EVERY {
                        table.compact();
                    }
                    let lock = Arc::new(AsyncMutex::new(()));
                    table.locks.insert(key.to_owned(), lock.clone());
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody is holding or waiting on.
    pub fn compact(&self) {
        self.table.lock().compact();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = KeyLocks::default();
        let guard = locks.lock("a").await;
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), locks.lock("a"))
            .await
            .is_err());
        drop(guard);
        let _guard = locks.lock("a").await;
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyLocks::default();
        let _a = locks.lock("a").await;
        let _b = locks.lock("b").await;
    }

    #[tokio::test]
    async fn compact_keeps_held_locks() {
        let locks = KeyLocks::default();
        let guard = locks.lock("held").await;
        drop(locks.lock("idle").await);

        locks.compact();
        assert_eq!(locks.table.lock().locks.len(), 1);
        drop(guard);
        locks.compact();
        assert!(locks.table.lock().locks.is_empty());
    }

    #[tokio::test]
    async fn idle_locks_are_reaped_without_explicit_compaction() {
        let locks = KeyLocks::default();
        let _held = locks.lock("held").await;
        for i in 0..4 * COMPACT_EVERY {
            drop(locks.lock(&format!("key-{i}")).await);
        }

        // The table tracks the working set, not every key ever seen.
        let len = locks.table.lock().locks.len();
        assert!(len <= COMPACT_EVERY + 1, "table kept {len} locks");
        assert!(locks.table.lock().locks.contains_key("held"));
    }
}

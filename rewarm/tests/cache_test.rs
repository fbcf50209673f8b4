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
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use rewarm::{
    test_utils::{BrokenStore, EphemeralStore},
    Cache, CacheBuilder, CachePolicy, ContainerKind, FsStore, Introspect, KeystreamGateway, Shape, Source,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Mock {
    message: String,
}

impl Mock {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Introspect for Mock {
    fn shape(&self) -> Shape {
        Shape::scalar::<Self>()
    }
}

fn mocks(n: usize) -> Vec<Mock> {
    (0..n).map(|i| Mock::new(format!("message {i}"))).collect()
}

async fn fetch_counted(
    cache: &Cache,
    key: &str,
    policy: CachePolicy,
    calls: &Arc<AtomicUsize>,
    value: Vec<Mock>,
) -> rewarm::Result<rewarm::Record<Vec<Mock>>> {
    let calls = calls.clone();
    cache
        .fetch(key, policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(value)
        })
        .await
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn concurrent_misses_coalesce_onto_one_provider_call() {
    let cache = CacheBuilder::new().build();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            cache
                .fetch("users", CachePolicy::new(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    anyhow::Ok(mocks(3))
                })
                .await
        }));
    }
    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.data(), &mocks(3));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn restart_recovers_encrypted_records_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let policy = CachePolicy::new()
        .with_encrypt(true)
        .with_lifetime(Duration::ZERO);
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let cache = CacheBuilder::new()
            .with_persistence(FsStore::open(dir.path()).await.unwrap())
            .with_encryption(KeystreamGateway, "myStrongKey-1234")
            .build();
        let record = fetch_counted(&cache, "users", policy, &calls, mocks(1000)).await.unwrap();
        assert_eq!(record.source(), Source::Memory);
        assert!(record.encrypted());
    }

    // A fresh process: empty memory, same directory and key material.
    let cache = CacheBuilder::new()
        .with_persistence(FsStore::open(dir.path()).await.unwrap())
        .with_encryption(KeystreamGateway, "myStrongKey-1234")
        .build();
    let record = fetch_counted(&cache, "users", policy, &calls, Vec::new()).await.unwrap();
    assert_eq!(record.source(), Source::Persistence);
    assert_eq!(record.data().len(), 1000);
    assert_eq!(record.data(), &mocks(1000));
    assert_eq!(record.shape().container(), Some(ContainerKind::Sequence));
    assert!(record.encrypted());
    assert!(record.footprint() > 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Now in memory as well.
    let record = fetch_counted(&cache, "users", policy, &calls, Vec::new()).await.unwrap();
    assert_eq!(record.source(), Source::Memory);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn wrong_key_material_degrades_to_provider_call() {
    let dir = tempfile::tempdir().unwrap();
    let policy = CachePolicy::new().with_encrypt(true);
    let calls = Arc::new(AtomicUsize::new(0));

    let cache = CacheBuilder::new()
        .with_persistence(FsStore::open(dir.path()).await.unwrap())
        .with_encryption(KeystreamGateway, "myStrongKey-1234")
        .build();
    fetch_counted(&cache, "users", policy, &calls, mocks(2)).await.unwrap();

    let cache = CacheBuilder::new()
        .with_persistence(FsStore::open(dir.path()).await.unwrap())
        .with_encryption(KeystreamGateway, "otherKey")
        .build();
    let record = fetch_counted(&cache, "users", policy, &calls, mocks(5)).await.unwrap();
    assert_eq!(record.source(), Source::Memory);
    assert_eq!(record.data().len(), 5);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn encrypted_and_plain_providers_keep_their_own_state() {
    let store = Arc::new(EphemeralStore::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = CacheBuilder::new()
        .with_persistence(store.clone())
        .with_encryption(KeystreamGateway, "myStrongKey-1234")
        .build();

    let sealed = fetch_counted(&cache, "users/sealed", CachePolicy::new().with_encrypt(true), &calls, mocks(3))
        .await
        .unwrap();
    let plain = fetch_counted(&cache, "users/plain", CachePolicy::new(), &calls, mocks(3))
        .await
        .unwrap();
    assert!(sealed.encrypted());
    assert!(!plain.encrypted());

    // Same payload, but the sealed blob is not a valid plaintext envelope and
    // reading it without the encrypt policy degrades to a provider call.
    assert_ne!(store.blob("users/sealed"), store.blob("users/plain"));
    let reader = CacheBuilder::new().with_persistence(store.clone()).build();
    let record = fetch_counted(&reader, "users/sealed", CachePolicy::new(), &calls, mocks(8))
        .await
        .unwrap();
    assert_eq!(record.data().len(), 8);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn provider_failure_reaches_the_caller() {
    let cache = CacheBuilder::new().build();
    let err = cache
        .fetch("users", CachePolicy::new(), || async {
            Err::<Vec<Mock>, _>(anyhow::anyhow!("upstream down"))
        })
        .await
        .unwrap_err();
    assert!(err.is_provider());
    assert!(err.to_string().contains("upstream down"));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn failed_refresh_leaves_the_cached_record_standing() {
    let cache = CacheBuilder::new().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let policy = CachePolicy::new().with_lifetime(Duration::from_secs(60));

    fetch_counted(&cache, "users", policy, &calls, mocks(3)).await.unwrap();

    let err = cache
        .fetch("users", policy.with_refresh(true), || async {
            Err::<Vec<Mock>, _>(anyhow::anyhow!("upstream down"))
        })
        .await
        .unwrap_err();
    assert!(err.is_provider());

    // The stale record survived the failed refresh.
    let record = fetch_counted(&cache, "users", policy, &calls, Vec::new()).await.unwrap();
    assert_eq!(record.data(), &mocks(3));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn refresh_replaces_the_cached_record() {
    let cache = CacheBuilder::new().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let policy = CachePolicy::new().with_lifetime(Duration::from_secs(60));

    fetch_counted(&cache, "users", policy, &calls, mocks(3)).await.unwrap();
    let record = fetch_counted(&cache, "users", policy.with_refresh(true), &calls, mocks(7))
        .await
        .unwrap();
    assert_eq!(record.data().len(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let record = fetch_counted(&cache, "users", policy, &calls, Vec::new()).await.unwrap();
    assert_eq!(record.data().len(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn expired_record_triggers_a_fresh_provider_call() {
    let cache = CacheBuilder::new().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let policy = CachePolicy::new().with_lifetime(Duration::from_millis(50));

    fetch_counted(&cache, "users", policy, &calls, mocks(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let record = fetch_counted(&cache, "users", policy, &calls, mocks(2)).await.unwrap();
    assert_eq!(record.data().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn non_expirable_record_outlives_its_lifetime() {
    let cache = CacheBuilder::new().build();
    let calls = Arc::new(AtomicUsize::new(0));
    let policy = CachePolicy::new()
        .with_lifetime(Duration::from_millis(10))
        .with_expirable(false);

    fetch_counted(&cache, "users", policy, &calls, mocks(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let record = fetch_counted(&cache, "users", policy, &calls, Vec::new()).await.unwrap();
    assert_eq!(record.data().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn dropped_fetch_still_populates_the_cache() {
    let cache = CacheBuilder::new().build();
    let calls = Arc::new(AtomicUsize::new(0));

    let slow = {
        let cache = cache.clone();
        let calls = calls.clone();
        async move {
            cache
                .fetch("users", CachePolicy::new(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    anyhow::Ok(mocks(4))
                })
                .await
        }
    };
    assert!(tokio::time::timeout(Duration::from_millis(5), slow).await.is_err());
    tokio::time::sleep(Duration::from_millis(120)).await;

    // The detached fill finished; this is a memory hit.
    let record = fetch_counted(&cache, "users", CachePolicy::new(), &calls, Vec::new())
        .await
        .unwrap();
    assert_eq!(record.data(), &mocks(4));
    assert_eq!(record.source(), Source::Memory);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn key_reused_under_another_type_is_refilled() {
    let cache = CacheBuilder::new().build();
    cache
        .fetch("users", CachePolicy::new(), || async { anyhow::Ok(mocks(2)) })
        .await
        .unwrap();

    let record = cache
        .fetch("users", CachePolicy::new(), || async { anyhow::Ok("plain".to_string()) })
        .await
        .unwrap();
    assert_eq!(record.data(), "plain");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn broken_durable_store_never_fails_a_fetch() {
    let cache = CacheBuilder::new().with_persistence(BrokenStore).build();
    let calls = Arc::new(AtomicUsize::new(0));

    let record = fetch_counted(&cache, "users", CachePolicy::new(), &calls, mocks(2))
        .await
        .unwrap();
    assert_eq!(record.data().len(), 2);

    let record = fetch_counted(&cache, "users", CachePolicy::new(), &calls, Vec::new())
        .await
        .unwrap();
    assert_eq!(record.data().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn invalidate_drops_one_key_everywhere() {
    let store = Arc::new(EphemeralStore::new());
    let cache = CacheBuilder::new().with_persistence(store.clone()).build();
    let calls = Arc::new(AtomicUsize::new(0));

    fetch_counted(&cache, "users/1", CachePolicy::new(), &calls, mocks(1)).await.unwrap();
    fetch_counted(&cache, "users/2", CachePolicy::new(), &calls, mocks(2)).await.unwrap();
    assert_eq!(store.len(), 2);

    cache.invalidate("users/1").await.unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.blob("users/2").is_some());

    let record = fetch_counted(&cache, "users/1", CachePolicy::new(), &calls, mocks(9)).await.unwrap();
    assert_eq!(record.data().len(), 9);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn invalidate_all_empties_both_stores() {
    let store = Arc::new(EphemeralStore::new());
    let cache = CacheBuilder::new().with_persistence(store.clone()).build();
    let calls = Arc::new(AtomicUsize::new(0));

    for key in ["a", "b", "c"] {
        fetch_counted(&cache, key, CachePolicy::new(), &calls, mocks(1)).await.unwrap();
    }
    assert_eq!(store.len(), 3);

    cache.invalidate_all().await;
    assert!(store.is_empty());

    fetch_counted(&cache, "a", CachePolicy::new(), &calls, mocks(1)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn plain_records_round_trip_without_encryption() {
    let store = Arc::new(EphemeralStore::new());
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let cache = CacheBuilder::new().with_persistence(store.clone()).build();
        fetch_counted(&cache, "users", CachePolicy::new(), &calls, mocks(4)).await.unwrap();
    }

    let cache = CacheBuilder::new().with_persistence(store.clone()).build();
    let record = fetch_counted(&cache, "users", CachePolicy::new(), &calls, Vec::new())
        .await
        .unwrap();
    assert_eq!(record.source(), Source::Persistence);
    assert_eq!(record.data(), &mocks(4));
    assert!(!record.encrypted());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

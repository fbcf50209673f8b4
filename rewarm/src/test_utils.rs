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

//! In-memory persistence gateways for tests and examples.

use std::io;

use futures_util::{future::BoxFuture, FutureExt};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::persist::PersistenceGateway;

/// [`PersistenceGateway`] holding blobs in process memory.
///
/// Durable in name only; useful wherever a test needs real persistence
/// semantics without touching the filesystem. Individual keys can be poisoned
/// so their deletion fails, to exercise the sweeps' skip-and-continue paths.
#[derive(Debug, Default)]
pub struct EphemeralStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    poisoned_deletes: Mutex<HashSet<String>>,
}

impl EphemeralStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `delete` of `key` fail with an I/O error.
    pub fn poison_delete(&self, key: impl Into<String>) {
        self.poisoned_deletes.lock().insert(key.into());
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }

    /// The raw blob stored under `key`, if any.
    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(key).cloned()
    }
}

impl PersistenceGateway for EphemeralStore {
    fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        async move {
            self.blobs.lock().insert(key.to_owned(), bytes.to_vec());
            Ok(())
        }
        .boxed()
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, io::Result<Option<Vec<u8>>>> {
        async move { Ok(self.blobs.lock().get(key).cloned()) }.boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, io::Result<()>> {
        async move {
            if self.poisoned_deletes.lock().contains(key) {
                return Err(io::Error::other(format!("poisoned delete for key {key}")));
            }
            self.blobs.lock().remove(key);
            Ok(())
        }
        .boxed()
    }

    fn list_keys(&self) -> BoxFuture<'_, io::Result<Vec<String>>> {
        async move { Ok(self.blobs.lock().keys().cloned().collect()) }.boxed()
    }
}

/// [`PersistenceGateway`] whose every operation fails.
///
/// Exercises the degradation rule that storage failures never surface through
/// a fetch.
#[derive(Debug, Default)]
pub struct BrokenStore;

impl BrokenStore {
    fn failure<T>() -> io::Result<T> {
        Err(io::Error::other("durable store is down"))
    }
}

impl PersistenceGateway for BrokenStore {
    fn put<'a>(&'a self, _key: &'a str, _bytes: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        async move { Self::failure() }.boxed()
    }

    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, io::Result<Option<Vec<u8>>>> {
        async move { Self::failure() }.boxed()
    }

    fn delete<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, io::Result<()>> {
        async move { Self::failure() }.boxed()
    }

    fn list_keys(&self) -> BoxFuture<'_, io::Result<Vec<String>>> {
        async move { Self::failure() }.boxed()
    }
}

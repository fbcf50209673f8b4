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
    any::Any,
    fmt::Debug,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

use crate::{code::CacheValue, shape::Shape};

/// Where a record handed to a caller was obtained in the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Served from the in-memory store or freshly computed by the provider.
    Memory,
    /// Recovered from durable storage during this operation.
    Persistence,
}

/// Milliseconds since the unix epoch.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
struct State {
    source: Source,
    expirable: bool,
    lifetime: Option<Duration>,
    footprint: u64,
    encrypted: bool,
}

/// Shared, mutable bookkeeping attached to one cached record.
///
/// The payload itself is immutable once wrapped; the store layers only ever
/// touch this metadata (provenance, expirability, lifetime, measured
/// footprint). `persisted_at` is assigned exactly once, at construction.
#[derive(Debug)]
pub struct RecordMeta {
    persisted_at: u64,
    shape: Shape,
    state: Mutex<State>,
}

impl RecordMeta {
    pub(crate) fn new(shape: Shape, expirable: bool, lifetime: Option<Duration>) -> Self {
        Self::with_persisted_at(unix_millis(), shape, expirable, lifetime)
    }

    pub(crate) fn with_persisted_at(
        persisted_at: u64,
        shape: Shape,
        expirable: bool,
        lifetime: Option<Duration>,
    ) -> Self {
        Self {
            persisted_at,
            shape,
            state: Mutex::new(State {
                source: Source::Memory,
                expirable,
                lifetime,
                footprint: 0,
                encrypted: false,
            }),
        }
    }

    /// Creation time of the record, unix-epoch milliseconds.
    pub fn persisted_at(&self) -> u64 {
        self.persisted_at
    }

    /// Shape metadata derived from the payload at construction.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Where the record was last supplied from.
    pub fn source(&self) -> Source {
        self.state.lock().source
    }

    pub(crate) fn set_source(&self, source: Source) {
        self.state.lock().source = source;
    }

    /// Whether the record is subject to time-based expiration.
    pub fn expirable(&self) -> bool {
        self.state.lock().expirable
    }

    /// Re-mark the record as expirable or permanent.
    pub fn set_expirable(&self, expirable: bool) {
        self.state.lock().expirable = expirable;
    }

    /// The lifetime stored on the record, if any.
    pub fn lifetime(&self) -> Option<Duration> {
        self.state.lock().lifetime
    }

    /// Store a lifetime on the record so eviction sweeps can evaluate it
    /// without a live policy source.
    pub fn set_lifetime(&self, lifetime: Option<Duration>) {
        self.state.lock().lifetime = lifetime;
    }

    /// Measured size of the persisted blob in bytes; zero until persisted.
    pub fn footprint(&self) -> u64 {
        self.state.lock().footprint
    }

    pub(crate) fn set_footprint(&self, bytes: u64) {
        self.state.lock().footprint = bytes;
    }

    /// Whether the persisted form of this record is encrypted.
    pub fn encrypted(&self) -> bool {
        self.state.lock().encrypted
    }

    pub(crate) fn set_encrypted(&self, encrypted: bool) {
        self.state.lock().encrypted = encrypted;
    }
}

/// One cached value together with the bookkeeping needed to judge its
/// freshness and rebuild its shape after an opaque round trip.
///
/// Cloning is cheap; clones share the payload and the metadata.
pub struct Record<T> {
    data: Arc<T>,
    meta: Arc<RecordMeta>,
}

impl<T> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            meta: self.meta.clone(),
        }
    }
}

impl<T: Debug> Debug for Record<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("data", &self.data)
            .field("meta", &self.meta)
            .finish()
    }
}

impl<T> Record<T>
where
    T: CacheValue,
{
    /// Wrap a freshly produced payload.
    ///
    /// Shape metadata is derived from the payload here; an empty container
    /// yields no metadata, and that is not an error.
    pub fn new(data: T, expirable: bool, lifetime: Option<Duration>) -> Self {
        let shape = data.shape();
        Self {
            data: Arc::new(data),
            meta: Arc::new(RecordMeta::new(shape, expirable, lifetime)),
        }
    }

    pub(crate) fn from_parts(data: Arc<T>, meta: Arc<RecordMeta>) -> Self {
        Self { data, meta }
    }

    /// The cached payload.
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Shared metadata handle.
    pub fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    /// Provenance of this record in the operation that returned it.
    pub fn source(&self) -> Source {
        self.meta.source()
    }

    /// Creation time of the record, unix-epoch milliseconds.
    pub fn persisted_at(&self) -> u64 {
        self.meta.persisted_at()
    }

    /// Whether the record expires by time.
    pub fn expirable(&self) -> bool {
        self.meta.expirable()
    }

    /// The record's own lifetime, if one was stored.
    pub fn lifetime(&self) -> Option<Duration> {
        self.meta.lifetime()
    }

    /// Shape metadata derived at construction.
    pub fn shape(&self) -> &Shape {
        self.meta.shape()
    }

    /// Whether the persisted form of this record is encrypted.
    pub fn encrypted(&self) -> bool {
        self.meta.encrypted()
    }

    /// Measured persisted size in bytes; zero until persisted.
    pub fn footprint(&self) -> u64 {
        self.meta.footprint()
    }

    pub(crate) fn erase(&self) -> ErasedRecord {
        ErasedRecord {
            data: self.data.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// Type-erased record as held by the in-memory store.
#[derive(Clone)]
pub(crate) struct ErasedRecord {
    data: Arc<dyn Any + Send + Sync>,
    meta: Arc<RecordMeta>,
}

impl ErasedRecord {
    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    /// Rebuild the typed record; fails if the slot was stored under another type.
    pub fn downcast<T: CacheValue>(&self) -> Option<Record<T>> {
        let data = self.data.clone().downcast::<T>().ok()?;
        Some(Record {
            data,
            meta: self.meta.clone(),
        })
    }
}

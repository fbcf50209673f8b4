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

use std::{io, sync::Arc, time::Duration};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{
    code::CacheValue,
    crypto::EncryptionGateway,
    error::{Error, Result},
    record::{Record, RecordMeta},
    shape::Shape,
};

/// Durable key → bytes store.
///
/// Implementations only move bytes; the engine owns the envelope layout and
/// any encryption. No ordering is guaranteed across keys.
pub trait PersistenceGateway: Send + Sync + 'static {
    /// Write the blob stored under `key`, replacing any previous one.
    fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Read the blob stored under `key`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, io::Result<Option<Vec<u8>>>>;

    /// Remove the blob stored under `key`. Removing a missing key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, io::Result<()>>;

    /// Enumerate every stored key.
    fn list_keys(&self) -> BoxFuture<'_, io::Result<Vec<String>>>;
}

impl<T: PersistenceGateway + ?Sized> PersistenceGateway for Arc<T> {
    fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        (**self).put(key, bytes)
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, io::Result<Option<Vec<u8>>>> {
        (**self).get(key)
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, io::Result<()>> {
        (**self).delete(key)
    }

    fn list_keys(&self) -> BoxFuture<'_, io::Result<Vec<String>>> {
        (**self).list_keys()
    }
}

/// Encryption gateway plus the key material shared by one cache instance.
pub(crate) struct Encryption {
    pub gateway: Arc<dyn EncryptionGateway>,
    pub key_material: String,
}

/// Persisted representation of a record.
///
/// Provenance and footprint are deliberately absent; both are recomputed when
/// the blob is loaded. The payload is serialized apart from the head so that
/// eviction sweeps can judge freshness without knowing the payload type, and
/// so that encryption touches the payload bytes only.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub persisted_at: u64,
    pub expirable: bool,
    pub lifetime: Option<Duration>,
    pub shape: Shape,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Freshness metadata of the envelope as a [`RecordMeta`], payload untouched.
    pub fn head_meta(&self) -> RecordMeta {
        RecordMeta::with_persisted_at(self.persisted_at, self.shape.clone(), self.expirable, self.lifetime)
    }
}

/// Serialize a record into a durable blob, encrypting the payload if asked.
pub(crate) fn encode_record<T>(record: &Record<T>, encryption: Option<&Encryption>) -> Result<Vec<u8>>
where
    T: CacheValue,
{
    let mut payload = bincode::serialize(record.data())?;
    if let Some(encryption) = encryption {
        payload = encryption.gateway.encrypt(&payload, &encryption.key_material);
    }
    let envelope = Envelope {
        persisted_at: record.persisted_at(),
        expirable: record.expirable(),
        lifetime: record.lifetime(),
        shape: record.shape().clone(),
        payload,
    };
    Ok(bincode::serialize(&envelope)?)
}

/// Deserialize a durable blob back into a typed record.
///
/// The decoded payload's shape must be compatible with the recorded one; a
/// mismatch is an error here and a cache miss upstream. Provenance is left at
/// its default; the store layer retags the record before handing it out.
pub(crate) fn decode_record<T>(blob: &[u8], encryption: Option<&Encryption>) -> Result<Record<T>>
where
    T: CacheValue,
{
    let envelope: Envelope = bincode::deserialize(blob)?;
    let mut payload = envelope.payload;
    if let Some(encryption) = encryption {
        payload = encryption.gateway.decrypt(&payload, &encryption.key_material)?;
    }
    let data: T = bincode::deserialize(&payload)?;
    let decoded = data.shape();
    if !envelope.shape.compatible_with(&decoded) {
        return Err(Error::ShapeMismatch {
            recorded: envelope.shape,
            decoded,
        });
    }
    let meta = RecordMeta::with_persisted_at(envelope.persisted_at, envelope.shape, envelope.expirable, envelope.lifetime);
    meta.set_footprint(blob.len() as u64);
    Ok(Record::from_parts(Arc::new(data), Arc::new(meta)))
}

/// Decode only the envelope, payload bytes untouched.
pub(crate) fn decode_envelope(blob: &[u8]) -> Result<Envelope> {
    Ok(bincode::deserialize(blob)?)
}

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

//! rewarm is a reactive caching layer for async providers.
//!
//! A [`Cache`] memoizes provider calls under string keys: lookups go to the
//! in-memory store first, then durable storage, and only then invoke the
//! provider. Concurrent misses for the same key coalesce onto one provider
//! call. Records carry enough metadata (provenance, expirability, lifetime,
//! shape) to survive an opaque durable round trip, optionally encrypted at
//! rest, and a sweeper removes records that have outlived their lifetime or
//! pushed the durable store over its size quota.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use rewarm::{test_utils::EphemeralStore, CacheBuilder, CachePolicy, Source};
//!
//! #[tokio::main]
//! async fn main() -> rewarm::Result<()> {
//!     let cache = CacheBuilder::new()
//!         .with_persistence(EphemeralStore::new())
//!         .with_default_lifetime(Duration::from_secs(600))
//!         .build();
//!
//!     let key = rewarm::derive_key("users", &42u32);
//!     let policy = CachePolicy::new().with_lifetime(Duration::from_secs(60));
//!     let record = cache
//!         .fetch(key.clone(), policy, || async { anyhow::Ok(vec!["alice".to_string()]) })
//!         .await?;
//!     assert_eq!(record.data()[0], "alice");
//!     assert_eq!(record.source(), Source::Memory);
//!
//!     // Same key, no provider call this time.
//!     let again = cache
//!         .fetch(key, policy, || async { anyhow::Ok(Vec::<String>::new()) })
//!         .await?;
//!     assert_eq!(again.data().len(), 1);
//!     Ok(())
//! }
//! ```

mod cache;
mod cleaner;
mod code;
mod crypto;
mod error;
mod fs;
mod inflight;
mod locks;
mod memory;
mod persist;
mod record;
mod shape;

pub mod expiry;
pub mod prelude;
pub mod test_utils;

pub use crate::{
    cache::{Cache, CacheBuilder, CachePolicy},
    code::{derive_key, CacheValue},
    crypto::{CryptoError, EncryptionGateway, KeystreamGateway},
    error::{Error, Result},
    fs::FsStore,
    persist::PersistenceGateway,
    record::{Record, RecordMeta, Source},
    shape::{ContainerKind, Introspect, Shape, TypeTag},
};

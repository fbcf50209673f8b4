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

use std::hash::Hasher;

use serde::{de::DeserializeOwned, Serialize};
use twox_hash::XxHash64;

use crate::shape::Introspect;

/// Payload types the cache can hold.
///
/// Automatically implemented for any type that is serializable, shareable
/// across tasks, and reports its runtime shape through [`Introspect`].
pub trait CacheValue: Send + Sync + 'static + Serialize + DeserializeOwned + Introspect {}
impl<T> CacheValue for T where T: Send + Sync + 'static + Serialize + DeserializeOwned + Introspect {}

/// Derive a deterministic cache key from a provider name and its call arguments.
///
/// The same provider and arguments always hash to the same key, so repeated
/// calls land on the same record. The engine itself never inspects the
/// arguments beyond this digest.
///
/// # Panics
///
/// Panics if the arguments cannot be serialized; key arguments are part of the
/// caller's contract with the cache.
pub fn derive_key<A>(provider: &str, args: &A) -> String
where
    A: Serialize + ?Sized,
{
    let bytes = bincode::serialize(args).expect("cache key arguments must be serializable");
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&bytes);
    format!("{}/{:016x}", provider, hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key("users", &("page", 1u32));
        let b = derive_key("users", &("page", 1u32));
        assert_eq!(a, b);
        assert!(a.starts_with("users/"));
    }

    #[test]
    fn derive_key_separates_providers_and_arguments() {
        let a = derive_key("users", &1u32);
        let b = derive_key("groups", &1u32);
        let c = derive_key("users", &2u32);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}

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

use crate::{crypto::CryptoError, shape::Shape};

/// Cache engine error.
///
/// Under normal operation only provider failures cross the fetch boundary;
/// persistence, serde, and crypto failures are absorbed as cache misses or
/// best-effort writes.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The upstream provider failed; surfaced to the caller verbatim.
    #[error("provider error: {0}")]
    Provider(anyhow::Error),
    /// Persisted bytes could not be decoded.
    #[error("serde error: {0}")]
    Serde(#[from] bincode::Error),
    /// Recorded shape metadata does not match the decoded payload.
    #[error("shape mismatch, recorded: {recorded:?}, decoded: {decoded:?}")]
    ShapeMismatch {
        /// Shape stored in the persisted envelope.
        recorded: Shape,
        /// Shape reported by the decoded payload.
        decoded: Shape,
    },
    /// Durable store failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Encryption gateway failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    /// A cached value was requested under a different type than it was stored with.
    #[error("value type mismatch for key: {key}")]
    TypeMismatch {
        /// The disputed cache key.
        key: String,
    },
    /// The owning cache fill task went away before delivering a result.
    #[error("cache fill interrupted")]
    Interrupted,
    /// Failure shared by every caller coalesced onto one in-flight fill.
    #[error("{0}")]
    Shared(Arc<Error>),
}

impl Error {
    /// Wrap an upstream provider failure.
    pub fn provider(e: impl Into<anyhow::Error>) -> Self {
        Self::Provider(e.into())
    }

    /// The underlying error, unwrapping the sharing layer added by coalescing.
    pub fn root(&self) -> &Error {
        match self {
            Self::Shared(e) => e.root(),
            _ => self,
        }
    }

    /// Whether this error originated in the upstream provider.
    pub fn is_provider(&self) -> bool {
        matches!(self.root(), Self::Provider(_))
    }
}

/// Cache engine result.
pub type Result<T> = std::result::Result<T, Error>;

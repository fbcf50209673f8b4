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

//! Pure freshness decisions over record metadata.

use std::time::Duration;

use crate::record::{unix_millis, RecordMeta};

/// Freshness verdict for a cached record; derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The record is still usable.
    Fresh,
    /// The record has outlived its effective lifetime.
    Expired,
}

/// Decide whether a record is still usable.
///
/// Non-expirable records are always fresh, regardless of elapsed time. The
/// effective lifetime is resolved record-first: the record's own lifetime,
/// then the caller's `configured` lifetime, then the process-wide `default`.
/// A record with no lifetime source at any level never expires by time; the
/// quota sweep is then the only path to its removal.
pub fn evaluate(meta: &RecordMeta, configured: Option<Duration>, default: Option<Duration>) -> Verdict {
    if !meta.expirable() {
        return Verdict::Fresh;
    }
    let Some(lifetime) = meta.lifetime().or(configured).or(default) else {
        return Verdict::Fresh;
    };
    let elapsed = unix_millis().saturating_sub(meta.persisted_at());
    if u128::from(elapsed) > lifetime.as_millis() {
        Verdict::Expired
    } else {
        Verdict::Fresh
    }
}

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
use tokio::sync::oneshot;

use crate::{error::Error, record::ErasedRecord};

pub(crate) type FillResult = std::result::Result<ErasedRecord, Arc<Error>>;
pub(crate) type Notifier = oneshot::Sender<FillResult>;
pub(crate) type Waiter = oneshot::Receiver<FillResult>;

/// Outcome of joining the in-flight table for a key.
pub(crate) enum Join {
    /// First miss for the key; the caller owns the provider invocation.
    Owner,
    /// A fill for the key is already running; await its result.
    Waiter(Waiter),
}

/// Per-key markers coalescing concurrent misses onto one provider call.
#[derive(Default)]
pub(crate) struct InflightMap {
    inflights: Mutex<HashMap<String, Vec<Notifier>>>,
}

impl InflightMap {
    /// Install the marker for `key`, or attach to the fill that owns it.
    pub fn join(&self, key: &str) -> Join {
        let mut inflights = self.inflights.lock();
        if let Some(notifiers) = inflights.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            notifiers.push(tx);
            Join::Waiter(rx)
        } else {
            inflights.insert(key.to_owned(), Vec::new());
            Join::Owner
        }
    }

    /// Clear the marker for `key` and hand back the pending notifiers.
    ///
    /// Called on fill completion, success or failure, so later misses can
    /// trigger a fresh call.
    pub fn finish(&self, key: &str) -> Vec<Notifier> {
        self.inflights.lock().remove(key).unwrap_or_default()
    }
}

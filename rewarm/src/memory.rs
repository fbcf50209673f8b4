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

use crate::record::{ErasedRecord, RecordMeta};

/// Process-local record store.
///
/// One coarse lock guards the table; it is taken for table operations only
/// and is never held across a suspension point.
#[derive(Default)]
pub(crate) struct MemoryStore {
    slots: Mutex<HashMap<String, ErasedRecord>>,
}

impl MemoryStore {
    pub fn get(&self, key: &str) -> Option<ErasedRecord> {
        self.slots.lock().get(key).cloned()
    }

    pub fn insert(&self, key: String, record: ErasedRecord) {
        self.slots.lock().insert(key, record);
    }

    pub fn remove(&self, key: &str) -> Option<ErasedRecord> {
        self.slots.lock().remove(key)
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Snapshot of key → metadata pairs, for eviction sweeps.
    pub fn snapshot(&self) -> Vec<(String, Arc<RecordMeta>)> {
        self.slots
            .lock()
            .iter()
            .map(|(key, record)| (key.clone(), record.meta().clone()))
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License. You may obtain a copy of
// the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
// License for the specific language governing permissions and limitations under
// the License.

//! The explicit per-process context threaded through capability calls.
//!
//! `process_fd` in `cosix` reaches its capability table through a
//! global/thread-local `current_process()`. That does not generalize
//! well once this core runs as an ordinary hosted library with several
//! simulated processes alive in one address space at once (spec §9:
//! "no ambient `current_process()`; every operation that needs caller
//! identity takes it as an explicit parameter"), so `ProcessContext` is
//! passed by reference into every `Capability` method that needs to
//! install or resolve capability-table slots.

use std::sync::{Arc, Mutex};

use crate::captable::CapTable;

/// Identifies one simulated process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ProcessId(pub u64);

/// Everything a capability operation needs to know about its caller.
///
/// Cheap to clone: the table itself is behind an `Arc<Mutex<_>>`, so a
/// `ProcessContext` is a handle, not a copy of the table.
#[derive(Clone)]
pub struct ProcessContext {
    pid: ProcessId,
    captable: Arc<Mutex<CapTable>>,
}

impl ProcessContext {
    #[must_use]
    pub fn new(pid: ProcessId) -> Self {
        Self {
            pid,
            captable: Arc::new(Mutex::new(CapTable::new())),
        }
    }

    #[must_use]
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    #[must_use]
    pub fn captable(&self) -> &Arc<Mutex<CapTable>> {
        &self.captable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_an_empty_captable() {
        let ctx = ProcessContext::new(ProcessId(1));
        assert_eq!(ctx.captable().lock().unwrap().len(), 0);
    }
}

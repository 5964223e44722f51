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

//! The per-process capability table.
//!
//! Grounded on `process_fd`'s `add_fd` / `replace_fd` / `get_fd` /
//! `close_fd` in `cosix` (see `fd/process_fd.hpp`): a table of slots
//! indexed by small integers, allocated at the lowest free index, each
//! holding a capability plus the rights that slot was derived with.

use std::sync::Arc;

use kstatus::{Errno, Result};

use crate::object::Capability;
use crate::rights::Rights;

/// One occupied entry in a [`CapTable`].
#[derive(Clone)]
pub struct Slot {
    pub cap: Arc<dyn Capability>,
    /// Rights this slot itself grants its holder.
    pub base: Rights,
    /// Rights a capability derived from this slot (e.g. an FD received
    /// alongside a message whose sender copied this slot) may inherit.
    /// Always a subset of `base`; see spec §8's rights-monotonicity
    /// property.
    pub inheriting: Rights,
}

/// A process's capability table: `Vec<Option<Slot>>` indexed by FD
/// number, holes reused before growing.
#[derive(Default)]
pub struct CapTable {
    slots: Vec<Option<Slot>>,
}

impl CapTable {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install `cap` at the lowest free index and return it.
    pub fn add(&mut self, cap: Arc<dyn Capability>, base: Rights, inheriting: Rights) -> u32 {
        let inheriting = inheriting & base;
        let slot = Slot {
            cap,
            base,
            inheriting,
        };
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            self.slots[index] = Some(slot);
            index as u32
        } else {
            self.slots.push(Some(slot));
            (self.slots.len() - 1) as u32
        }
    }

    /// Atomically replace the occupant of an already-occupied slot,
    /// decrementing the prior occupant's reference count in the
    /// process. Fails `BadF` if `index` names an empty (or
    /// out-of-bounds) slot -- spec §4.2: "atomic slot replacement" of
    /// "the prior occupant" presumes one exists; an empty slot has none
    /// to replace, matching `get`/`close`'s own `BadF` on an empty slot.
    pub fn replace(&mut self, index: u32, cap: Arc<dyn Capability>, base: Rights, inheriting: Rights) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .filter(|s| s.is_some())
            .ok_or(Errno::BadF)?;
        let inheriting = inheriting & base;
        *slot = Some(Slot {
            cap,
            base,
            inheriting,
        });
        Ok(())
    }

    /// Look up a slot, failing with `BadF` if empty.
    pub fn get(&self, index: u32) -> Result<&Slot> {
        self.slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(Errno::BadF)
    }

    /// Look up a slot and check it carries every right in `required`,
    /// failing with `NotCapable` if not.
    pub fn get_with_rights(&self, index: u32, required: Rights) -> Result<&Slot> {
        let slot = self.get(index)?;
        if slot.base.contains(required) {
            Ok(slot)
        } else {
            Err(Errno::NotCapable)
        }
    }

    /// Remove and return a slot, failing with `BadF` if already empty.
    pub fn close(&mut self, index: u32) -> Result<Slot> {
        self.slots
            .get_mut(index as usize)
            .and_then(Option::take)
            .ok_or(Errno::BadF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Flags, Kind};
    use std::cell::Cell;

    struct Dummy {
        error: Cell<Option<Errno>>,
    }

    impl Capability for Dummy {
        fn kind(&self) -> Kind {
            Kind::Pipe
        }
        fn name(&self) -> &str {
            "dummy"
        }
        fn flags(&self) -> Flags {
            Flags::empty()
        }
        fn error(&self) -> Option<Errno> {
            self.error.get()
        }
    }

    fn dummy() -> Arc<dyn Capability> {
        Arc::new(Dummy {
            error: Cell::new(None),
        })
    }

    #[test]
    fn add_reuses_lowest_free_index() {
        let mut table = CapTable::new();
        let a = table.add(dummy(), Rights::READ, Rights::READ);
        let b = table.add(dummy(), Rights::READ, Rights::READ);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        table.close(a).unwrap();
        let c = table.add(dummy(), Rights::READ, Rights::READ);
        assert_eq!(c, 0);
    }

    #[test]
    fn get_on_empty_slot_is_badf() {
        let table = CapTable::new();
        assert_eq!(table.get(0).unwrap_err(), Errno::BadF);
    }

    #[test]
    fn get_with_rights_enforces_missing_rights_as_notcapable() {
        let mut table = CapTable::new();
        let idx = table.add(dummy(), Rights::READ, Rights::READ);
        assert_eq!(
            table.get_with_rights(idx, Rights::WRITE).unwrap_err(),
            Errno::NotCapable
        );
        assert!(table.get_with_rights(idx, Rights::READ).is_ok());
    }

    #[test]
    fn inheriting_rights_are_capped_by_base() {
        let mut table = CapTable::new();
        let idx = table.add(dummy(), Rights::READ, Rights::all_rights());
        let slot = table.get(idx).unwrap();
        assert_eq!(slot.inheriting, Rights::READ);
    }

    #[test]
    fn close_is_idempotent_failure_on_double_close() {
        let mut table = CapTable::new();
        let idx = table.add(dummy(), Rights::READ, Rights::READ);
        assert!(table.close(idx).is_ok());
        assert_eq!(table.close(idx).unwrap_err(), Errno::BadF);
    }

    #[test]
    fn replace_swaps_an_occupied_slots_capability() {
        let mut table = CapTable::new();
        let idx = table.add(dummy(), Rights::all_rights(), Rights::all_rights());
        table
            .replace(idx, dummy(), Rights::READ, Rights::READ)
            .unwrap();
        let slot = table.get(idx).unwrap();
        assert_eq!(slot.base, Rights::READ);
    }

    #[test]
    fn replace_on_empty_slot_is_badf() {
        let mut table = CapTable::new();
        assert_eq!(
            table
                .replace(0, dummy(), Rights::READ, Rights::READ)
                .unwrap_err(),
            Errno::BadF
        );
    }

    #[test]
    fn replace_caps_inheriting_by_base_like_add() {
        let mut table = CapTable::new();
        let idx = table.add(dummy(), Rights::all_rights(), Rights::all_rights());
        table
            .replace(idx, dummy(), Rights::READ, Rights::all_rights())
            .unwrap();
        assert_eq!(table.get(idx).unwrap().inheriting, Rights::READ);
    }
}

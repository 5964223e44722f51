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

//! The rights mask attached to every capability-table slot.
//!
//! Mirrors `kernel::object::Signals` in pw_kernel in shape (a
//! `bitflags!`-wrapped `u32`) but a different axis: `Signals` describes
//! what *happened* to an object, `Rights` describes what a slot's
//! holder is *allowed to do* to it.

use bitflags::bitflags;

bitflags! {
    /// Operations a capability-table slot permits its holder to perform.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct Rights: u32 {
        const READ          = 1 << 0;
        const WRITE         = 1 << 1;
        const STAT          = 1 << 2;
        const SOCK_SHUTDOWN = 1 << 3;
        const SOCK_RECV     = 1 << 4;
        const SOCK_SEND     = 1 << 5;
        /// Permits `get_read_signaler` / `get_write_signaler`.
        const POLL          = 1 << 6;
    }
}

impl Rights {
    /// The rights a freshly kernel-minted capability (e.g. a control
    /// socket reply FD) is installed with.
    #[must_use]
    pub fn all_rights() -> Self {
        Self::all()
    }
}

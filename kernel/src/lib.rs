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

//! The kernel-resident object and IPC substrate of a capability-oriented
//! micro-kernel: the polymorphic capability object hierarchy and
//! per-process capability table, the in-memory pair-socket IPC
//! primitive, the control-plane socket that brokers new objects, and
//! the signaler mechanism that ties them together.
//!
//! Hosted (`std`), not `no_std`: unlike `pw_kernel` this core does not
//! run on bare metal -- the scheduler, MMU, and device drivers it sits
//! on top of are external collaborators (see the crate-level spec),
//! and a hosted simulation can use `Arc`/`Mutex`/`Condvar` freely
//! instead of the intrusive, allocator-free machinery a `no_std` kernel
//! needs.

pub mod captable;
pub mod control;
pub mod iface;
pub mod object;
pub mod pairsock;
pub mod process;
pub mod reverse;
pub mod rights;
pub mod signaler;

pub use captable::{CapTable, Slot};
pub use control::ControlSocket;
pub use iface::{HwType, Interface, InterfaceStore};
pub use object::{Capability, Flags, Kind};
pub use pairsock::{PairSocket, SockType};
pub use process::{ProcessContext, ProcessId};
pub use rights::Rights;
pub use signaler::Signaler;

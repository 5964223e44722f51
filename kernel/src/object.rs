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

//! The polymorphic capability object.
//!
//! Mirrors `kernel::object::KernelObject` in pw_kernel: a single trait
//! implemented by every kind of kernel object, dispatched dynamically
//! rather than through deep inheritance (spec §9's "prefer a tagged
//! variant with per-kind operation dispatch over deep inheritance").
//! Operations a kind doesn't implement return [`Errno::NotSup`]
//! uniformly via the trait's default methods, exactly as the design
//! notes ask for.

use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use kstatus::{Errno, Result};

use crate::process::ProcessContext;
use crate::signaler::Signaler;

/// The fixed set of capability kinds this core knows about.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Kind {
    RegularFile,
    Directory,
    CharacterDevice,
    BlockDevice,
    DgramSocket,
    StreamSocket,
    SharedMemory,
    Process,
    Poll,
    Pipe,
    Control,
    /// `pseudo_fd`'s `filetype` argument outside the ordinals this core
    /// otherwise distinguishes (CloudABI/WASI filetype 0).
    Unknown,
    SymbolicLink,
}

impl Kind {
    /// Map a CloudABI/WASI-style numeric filetype ordinal (as carried by
    /// the `PSEUDOPAIR` command's argument) to the `Kind` a `pseudo_fd`
    /// built from it should report.
    ///
    /// Ordinals per the WASI filetype table (see
    /// `examples/other_examples/97f1097f_oasislabs-wasi-types__src-lib.rs.rs`):
    /// 0=Unknown, 1=BlockDevice, 2=CharacterDevice, 3=Directory,
    /// 4=RegularFile, 5=DgramSocket, 6=StreamSocket, 7=SymbolicLink.
    /// Anything past 7 has no corresponding kind and also maps to
    /// `Unknown`.
    #[must_use]
    pub fn from_filetype(filetype: u8) -> Self {
        match filetype {
            1 => Kind::BlockDevice,
            2 => Kind::CharacterDevice,
            3 => Kind::Directory,
            4 => Kind::RegularFile,
            5 => Kind::DgramSocket,
            6 => Kind::StreamSocket,
            7 => Kind::SymbolicLink,
            _ => Kind::Unknown,
        }
    }
}

bitflags! {
    /// Per-capability flags (spec §3: "a bitmask including NONBLOCK").
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
    pub struct Flags: u32 {
        const NONBLOCK = 1 << 0;
    }
}

/// Mask requested on `sock_shutdown`.
bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct ShutdownHow: u32 {
        const SHUT_RD = 1 << 0;
        const SHUT_WR = 1 << 1;
    }
}

/// Flags accepted by `sock_recv`.
bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
    pub struct RecvFlags: u32 {
        /// Do not consume the message(s) read.
        const PEEK = 1 << 0;
        /// Stream sockets only: wait until all requested bytes are available.
        const WAITALL = 1 << 1;
    }
}

/// Out-flags returned by `sock_recv`.
bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
    pub struct RecvOutFlags: u32 {
        const DATA_TRUNCATED = 1 << 0;
        const FDS_TRUNCATED  = 1 << 1;
    }
}

/// A capability table slot number referenced by a send or recv call.
///
/// Carries the rights a transferred capability should be installed
/// with in the receiver's table; `(cap_slot, base, inheriting)` mirrors
/// spec §3's `(Capability, base, inheriting)` message FD triple, except
/// that the `Capability` itself is resolved from the sender's table by
/// [`super::pairsock::PairSocket::sock_send`] -- the caller only
/// supplies the slot number, matching how a syscall argument would
/// look.
#[derive(Clone, Copy, Debug)]
pub struct FdNumber(pub u32);

/// A send request: the bytes to send and the FD slots (in the
/// sender's table) to transfer alongside them.
pub struct SendRequest<'a> {
    pub iovecs: Vec<&'a [u8]>,
    pub fds: Vec<FdNumber>,
}

impl<'a> SendRequest<'a> {
    #[must_use]
    pub fn bytes(buf: &'a [u8]) -> Self {
        Self {
            iovecs: vec![buf],
            fds: Vec::new(),
        }
    }

    #[must_use]
    pub fn total_len(&self) -> usize {
        self.iovecs.iter().map(|b| b.len()).sum()
    }
}

/// A recv request: the buffers to fill and how many FD slots the
/// caller has room for.
pub struct RecvRequest<'a> {
    pub iovecs: Vec<&'a mut [u8]>,
    pub max_fds: usize,
    pub flags: RecvFlags,
}

impl<'a> RecvRequest<'a> {
    #[must_use]
    pub fn bytes(buf: &'a mut [u8]) -> Self {
        Self {
            iovecs: vec![buf],
            max_fds: 0,
            flags: RecvFlags::empty(),
        }
    }

    #[must_use]
    pub fn total_capacity(&self) -> usize {
        self.iovecs.iter().map(|b| b.len()).sum()
    }
}

/// Outcome of a recv call.
#[derive(Debug, Default)]
pub struct RecvOutcome {
    pub datalen: usize,
    /// Newly installed slot numbers in the caller's capability table,
    /// in delivery order.
    pub fds: Vec<u32>,
    pub out_flags: RecvOutFlags,
}

/// Snapshot handed to poll-multiplexer waiters at broadcast time.
///
/// Mirrors `thread_condition_data_fd_readwrite` in `cosix`'s
/// `unixsock.cpp`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadWriteSignal {
    pub bytes_readable: usize,
    pub hangup: bool,
}

/// Trait every capability object implements.
///
/// The default method bodies all return [`Errno::NotSup`], matching
/// spec §3: "Not every kind supports every operation; unsupported
/// operations set the error slot to NOTSUP." Concrete kinds override
/// only the operations they support.
pub trait Capability: Send + Sync {
    fn kind(&self) -> Kind;
    fn name(&self) -> &str;
    fn flags(&self) -> Flags;

    /// The error left by the most recently completed operation. `None`
    /// means success -- this is the explicit error slot of spec §3,
    /// modeled as `Option` instead of a raw integer so "no error" is
    /// unrepresentable as anything but `None`.
    fn error(&self) -> Option<Errno>;

    fn read(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
        Err(Errno::NotSup)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Errno::NotSup)
    }

    fn sock_shutdown(&self, _how: ShutdownHow) -> Result<()> {
        Err(Errno::NotSup)
    }

    fn sock_recv(&self, _ctx: &ProcessContext, _req: RecvRequest<'_>) -> Result<RecvOutcome> {
        Err(Errno::NotSup)
    }

    fn sock_send(&self, _ctx: &ProcessContext, _req: SendRequest<'_>) -> Result<usize> {
        Err(Errno::NotSup)
    }

    fn get_read_signaler(&self) -> Result<Arc<Signaler<ReadWriteSignal>>> {
        Err(Errno::NotSup)
    }

    fn get_write_signaler(&self) -> Result<Arc<Signaler<ReadWriteSignal>>> {
        Err(Errno::NotSup)
    }
}

/// Fields common to nearly every capability: its kind, diagnostic
/// name, flags, and error slot.
///
/// Grounded on `fd_t` in `cosix` (kind/flags/name/error are exactly its
/// fields) and on the plain-data half of pw_kernel's `ObjectBase`
/// (everything except the waiter list, which lives in [`Signaler`]
/// instead here).
///
/// `flags` is set once at construction and never mutated afterwards,
/// so it is a plain field. `error` *is* mutated from `sock_send`/
/// `sock_recv`/`sock_shutdown`, which spec §5 requires to be safely
/// callable from multiple threads on the same capability -- it lives
/// behind its own `Mutex` rather than a `Cell` so every read/write is
/// actually synchronized instead of relying on an unchecked `unsafe
/// impl Sync`.
pub struct ObjectBase {
    kind: Kind,
    name: String,
    flags: Flags,
    error: Mutex<Option<Errno>>,
}

impl ObjectBase {
    #[must_use]
    pub fn new(kind: Kind, name: impl Into<String>, flags: Flags) -> Self {
        Self {
            kind,
            name: name.into(),
            flags,
            error: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    #[must_use]
    pub fn error(&self) -> Option<Errno> {
        *self.error.lock().unwrap()
    }

    pub fn set_error(&self, error: Option<Errno>) {
        *self.error.lock().unwrap() = error;
    }

    #[must_use]
    pub fn is_nonblocking(&self) -> bool {
        self.flags.contains(Flags::NONBLOCK)
    }
}

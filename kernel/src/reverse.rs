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

//! Reverse / Pseudo objects (interface only, per spec §4.5).
//!
//! The spec deliberately leaves the userspace filesystem-driver
//! protocol unspecified -- only the construction contract is core:
//! `PSEUDOPAIR` must produce a joined pair where the caller-visible
//! "reverse" capability is an ordinary stream socket (the driver's end
//! of the conversation) and the caller-visible "pseudo" capability
//! forwards its operations across that stream to whatever is listening
//! on the other end.
//!
//! Grounded on `pseudo_fd`/`reversefd_t` construction in
//! `original_source/fd/ifstoresock.cpp`'s `PSEUDOPAIR` handler: it
//! builds `my_reverse` (kept internally by the pseudo object) and
//! `their_reverse` (handed to the caller as the driver-facing socket),
//! pairs them, then wraps `my_reverse` in a `pseudo_fd` carrying the
//! requested filetype. Only that shape is reproduced here; the wire
//! format forwarded across the pair is this crate's own (the original
//! driver protocol is out of scope, see spec §4.5).

use std::sync::Arc;

use kstatus::{Errno, Result};

use crate::object::{Capability, Flags, Kind, ObjectBase, RecvOutcome, RecvRequest, SendRequest};
use crate::pairsock::{PairSocket, SockType};
use crate::process::ProcessContext;

/// A capability-like filesystem object whose `read`/`write` are
/// forwarded, as plain request/response frames, across an internally
/// held [`PairSocket`] to whatever driver holds the other end.
pub struct Pseudo {
    base: ObjectBase,
    /// The filetype given in the `PSEUDOPAIR` argument (spec §4.4: a
    /// decimal value 0-255).
    filetype: u8,
    /// This process's end of the reverse pair; the driver (holding the
    /// `reverse` capability returned alongside this one) answers on the
    /// other end.
    channel: Arc<PairSocket>,
}

impl Pseudo {
    #[must_use]
    pub fn filetype(&self) -> u8 {
        self.filetype
    }
}

impl Capability for Pseudo {
    fn kind(&self) -> Kind {
        self.base.kind()
    }
    fn name(&self) -> &str {
        self.base.name()
    }
    fn flags(&self) -> Flags {
        self.base.flags()
    }
    fn error(&self) -> Option<Errno> {
        self.base.error()
    }

    fn read(&self, _offset: u64, buf: &mut [u8]) -> Result<usize> {
        let ctx = ProcessContext::new(crate::process::ProcessId(0));
        self.channel
            .sock_send(&ctx, SendRequest::bytes(b"READ"))?;
        let outcome: RecvOutcome = self.channel.sock_recv(&ctx, RecvRequest::bytes(buf))?;
        self.base.set_error(None);
        Ok(outcome.datalen)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let ctx = ProcessContext::new(crate::process::ProcessId(0));
        let n = self.channel.sock_send(&ctx, SendRequest::bytes(buf))?;
        let mut ack = [0u8; 4];
        let _ = self.channel.sock_recv(&ctx, RecvRequest::bytes(&mut ack));
        self.base.set_error(None);
        Ok(n)
    }
}

/// The two capabilities installed into the caller's table by a
/// `PSEUDOPAIR` command, in delivery order.
pub struct ReversePair {
    /// The driver-facing stream socket (spec §4.4: "reverse" FD).
    pub reverse: Arc<PairSocket>,
    /// The filesystem-like object forwarding over the paired channel.
    pub pseudo: Arc<Pseudo>,
}

/// Build a fresh reverse/pseudo pair for the given filetype.
///
/// Mirrors `ifstoresock.cpp`'s `PSEUDOPAIR` handler: two stream
/// sockets are joined (`my_reverse`/`their_reverse`), `their_reverse`
/// becomes the caller-visible `reverse` FD, and `my_reverse` is wrapped
/// into the `pseudo` object.
#[must_use]
pub fn make_pseudo_pair(filetype: u8) -> ReversePair {
    let my_reverse = PairSocket::new_unpaired(SockType::Stream, "reverse_internal", Flags::empty());
    let their_reverse = PairSocket::new_unpaired(SockType::Stream, "reverse", Flags::empty());
    PairSocket::make_pair(&my_reverse, &their_reverse);

    let pseudo = Arc::new(Pseudo {
        base: ObjectBase::new(Kind::from_filetype(filetype), "pseudo", Flags::empty()),
        filetype,
        channel: my_reverse,
    });

    ReversePair {
        reverse: their_reverse,
        pseudo,
    }
}

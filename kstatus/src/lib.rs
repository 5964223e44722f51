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

//! Error codes shared by every crate in this workspace.
//!
//! `Errno` intentionally has no "success" variant: success is
//! represented by `Ok(_)` (or, on a capability's error slot, `None`).
//! This keeps the error type itself a pure enumeration of failure
//! kinds rather than an "error or OK" union, and composes with `?`
//! the way any other Rust error enum does.

use std::fmt;

/// A kernel-level failure kind.
///
/// These map to the CloudABI-flavored taxonomy that capability
/// operations in this workspace report through their error slot: see
/// the capability object's `error()` accessor in the `kernel` crate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Errno {
    /// Operation would block and the capability is in non-blocking mode.
    Again,
    /// Write attempted after a local shutdown-for-write, or on an
    /// already-shut-down capability.
    Pipe,
    /// Operation requires an established peer and none exists.
    NotConn,
    /// Peer vanished while data was still in flight.
    ConnReset,
    /// A message (most commonly a `ControlSocket` command or reply) did
    /// not fit in its buffer.
    MsgSize,
    /// A capability-table slot was empty.
    BadF,
    /// A capability-table slot exists but lacks the rights the
    /// operation requires.
    NotCapable,
    /// The operation is not implemented for this capability's kind.
    NotSup,
    /// A syscall-level argument was malformed (e.g. an unparsable
    /// `PSEUDOPAIR` filetype argument).
    InvalidArgument,
    /// An offset or length argument fell outside a buffer's bounds.
    OutOfRange,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Errno::Again => "resource temporarily unavailable",
            Errno::Pipe => "broken pipe",
            Errno::NotConn => "socket is not connected",
            Errno::ConnReset => "connection reset by peer",
            Errno::MsgSize => "message too long",
            Errno::BadF => "bad capability number",
            Errno::NotCapable => "insufficient rights",
            Errno::NotSup => "operation not supported on this kind",
            Errno::InvalidArgument => "invalid argument",
            Errno::OutOfRange => "value out of range",
        };
        f.write_str(s)
    }
}

impl std::error::Error for Errno {}

/// The result type used throughout this workspace's kernel-facing APIs.
pub type Result<T> = std::result::Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_non_empty_for_every_variant() {
        let variants = [
            Errno::Again,
            Errno::Pipe,
            Errno::NotConn,
            Errno::ConnReset,
            Errno::MsgSize,
            Errno::BadF,
            Errno::NotCapable,
            Errno::NotSup,
            Errno::InvalidArgument,
            Errno::OutOfRange,
        ];
        for v in variants {
            assert!(!v.to_string().is_empty());
        }
    }
}

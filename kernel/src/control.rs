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

//! The control-plane socket: a one-slot datagram mailbox whose peer is
//! the kernel itself.
//!
//! Grounded directly on `ifstoresock` in `cosix`
//! (`original_source/fd/ifstoresock.cpp`): the command set, the 79
//! bytes of payload + 1 terminator send-buffer split, the 160-byte
//! reply buffer, and the `EMSGSIZE\n` overflow fallback all follow that
//! file's behavior, not just the distilled prose of spec §4.4. Unlike
//! [`crate::pairsock::PairSocket`], the "peer" here never leaves this
//! process -- `sock_send` interprets the command and installs any new
//! capabilities directly into the caller's own table, so `sock_recv`
//! only needs to report the slot numbers already sitting there.

use std::sync::{Arc, Condvar, Mutex};

use kstatus::{Errno, Result};
use log::debug;

use crate::iface::InterfaceStore;
use crate::object::{
    Capability, Flags, Kind, ObjectBase, RecvFlags, RecvOutFlags, RecvOutcome, RecvRequest,
    SendRequest, ShutdownHow,
};
use crate::process::ProcessContext;
use crate::reverse::make_pseudo_pair;
use crate::rights::Rights;

/// Payload bytes a command may carry, not counting the null terminator
/// (spec §4.4: "max 79 bytes of payload + 1 terminator").
const SEND_PAYLOAD_MAX: usize = 79;
/// Size of the assembled reply buffer (spec §4.4: "160 bytes").
const REPLY_MAX: usize = 160;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Status {
    Connected,
    Shutdown,
}

struct State {
    status: Status,
    has_message: bool,
    reply: Vec<u8>,
    pending_fds: Vec<u32>,
}

/// A capability bound to one network interface, returned by `RAWSOCK`.
///
/// Its own read/write semantics are out of scope (spec §1 treats PCI
/// bus enumeration and device drivers as external collaborators); this
/// core only needs to be able to mint the capability and remember which
/// interface it is bound to.
pub struct RawSocket {
    base: ObjectBase,
}

impl RawSocket {
    fn bound_to(iface_name: &str) -> Arc<Self> {
        Arc::new(Self {
            base: ObjectBase::new(Kind::CharacterDevice, format!("rawsock:{iface_name}"), Flags::empty()),
        })
    }
}

impl Capability for RawSocket {
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
}

/// The control-plane capability.
pub struct ControlSocket {
    base: ObjectBase,
    interfaces: Arc<InterfaceStore>,
    state: Mutex<State>,
    read_cv: Condvar,
    write_cv: Condvar,
}

impl ControlSocket {
    #[must_use]
    pub fn new(interfaces: Arc<InterfaceStore>) -> Arc<Self> {
        Arc::new(Self {
            base: ObjectBase::new(Kind::Control, "control", Flags::empty()),
            interfaces,
            state: Mutex::new(State {
                status: Status::Connected,
                has_message: false,
                reply: Vec::new(),
                pending_fds: Vec::new(),
            }),
            read_cv: Condvar::new(),
            write_cv: Condvar::new(),
        })
    }

    /// Concatenate the iovecs into a single command buffer, failing
    /// `MSGSIZE` if it does not fit in `SEND_PAYLOAD_MAX` bytes.
    fn assemble_command(req: &SendRequest<'_>) -> Result<String> {
        let mut buf = Vec::with_capacity(req.total_len());
        for iov in &req.iovecs {
            buf.extend_from_slice(iov);
        }
        if buf.len() > SEND_PAYLOAD_MAX {
            return Err(Errno::MsgSize);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn run_command(&self, ctx: &ProcessContext, command: &str) -> (String, Vec<u32>) {
        let mut parts = command.splitn(2, ' ');
        let verb = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim();
        debug!("control command {verb:?} arg {arg:?}");

        match verb {
            "LIST" => {
                let mut body = String::new();
                for iface in self.interfaces.iter() {
                    body.push_str(iface.name());
                    body.push('\n');
                }
                (body, Vec::new())
            }
            "PSEUDOPAIR" => match arg.parse::<u16>() {
                Ok(filetype) if filetype <= 0xff => {
                    let pair = make_pseudo_pair(filetype as u8);
                    let mut table = ctx.captable().lock().unwrap();
                    let reverse_fd = table.add(pair.reverse, Rights::all_rights(), Rights::all_rights());
                    let pseudo_fd = table.add(pair.pseudo, Rights::all_rights(), Rights::all_rights());
                    ("OK".to_string(), vec![reverse_fd, pseudo_fd])
                }
                _ => ("ERROR".to_string(), Vec::new()),
            },
            "COPY" => {
                let copy = ControlSocket::new(self.interfaces.clone());
                let mut table = ctx.captable().lock().unwrap();
                let fd = table.add(copy, Rights::all_rights(), Rights::all_rights());
                ("OK".to_string(), vec![fd])
            }
            "MAC" | "HWTYPE" | "RAWSOCK" => {
                if arg.is_empty() {
                    return ("ERROR".to_string(), Vec::new());
                }
                let Some(iface) = self.interfaces.get(arg) else {
                    return ("NOIFACE".to_string(), Vec::new());
                };
                match verb {
                    "MAC" => (iface.mac_string(), Vec::new()),
                    "HWTYPE" => (iface.hwtype().as_str().to_string(), Vec::new()),
                    "RAWSOCK" => {
                        let sock = RawSocket::bound_to(iface.name());
                        let mut table = ctx.captable().lock().unwrap();
                        let fd = table.add(sock, Rights::all_rights(), Rights::all_rights());
                        ("OK".to_string(), vec![fd])
                    }
                    _ => unreachable!(),
                }
            }
            _ => ("ERROR".to_string(), Vec::new()),
        }
    }

    pub fn sock_send(&self, ctx: &ProcessContext, req: SendRequest<'_>) -> Result<usize> {
        let command = Self::assemble_command(&req)?;
        let datalen = req.total_len();

        let mut state = self.state.lock().unwrap();
        loop {
            if state.status == Status::Shutdown {
                return Err(Errno::Pipe);
            }
            if !state.has_message {
                break;
            }
            if self.base.is_nonblocking() {
                return Err(Errno::Again);
            }
            state = self.write_cv.wait(state).unwrap();
        }
        drop(state);

        let (mut body, fds) = self.run_command(ctx, &command);
        if body.len() > REPLY_MAX {
            body = "EMSGSIZE\n".to_string();
        }

        let mut state = self.state.lock().unwrap();
        state.reply = body.into_bytes();
        state.pending_fds = fds;
        state.has_message = true;
        drop(state);
        self.read_cv.notify_all();

        self.base.set_error(None);
        Ok(datalen)
    }

    pub fn sock_recv(&self, _ctx: &ProcessContext, req: RecvRequest<'_>) -> Result<RecvOutcome> {
        let peek = req.flags.contains(RecvFlags::PEEK);
        let max_fds = req.max_fds;

        let mut state = self.state.lock().unwrap();
        loop {
            if state.status == Status::Shutdown && !state.has_message {
                self.base.set_error(None);
                return Ok(RecvOutcome::default());
            }
            if state.has_message {
                break;
            }
            if self.base.is_nonblocking() {
                return Err(Errno::Again);
            }
            state = self.read_cv.wait(state).unwrap();
        }

        let mut copied = 0usize;
        {
            let mut remaining = &state.reply[..];
            for iov in req.iovecs {
                if remaining.is_empty() {
                    break;
                }
                let n = remaining.len().min(iov.len());
                iov[..n].copy_from_slice(&remaining[..n]);
                copied += n;
                remaining = &remaining[n..];
            }
        }
        let data_truncated = copied < state.reply.len();

        let available = state.pending_fds.len();
        let delivered: Vec<u32> = state.pending_fds.iter().take(max_fds).copied().collect();
        let fds_truncated = max_fds > 0 && delivered.len() < available;

        if !peek {
            state.has_message = false;
            state.reply.clear();
            state.pending_fds.clear();
        }
        drop(state);
        self.write_cv.notify_all();

        let mut out_flags = RecvOutFlags::empty();
        if data_truncated {
            out_flags |= RecvOutFlags::DATA_TRUNCATED;
        }
        if fds_truncated {
            out_flags |= RecvOutFlags::FDS_TRUNCATED;
        }

        self.base.set_error(None);
        Ok(RecvOutcome {
            datalen: copied,
            fds: delivered,
            out_flags,
        })
    }

    pub fn sock_shutdown(&self, how: ShutdownHow) -> Result<()> {
        if how.intersects(ShutdownHow::SHUT_RD | ShutdownHow::SHUT_WR) {
            let mut state = self.state.lock().unwrap();
            state.status = Status::Shutdown;
            drop(state);
            self.read_cv.notify_all();
            self.write_cv.notify_all();
        }
        self.base.set_error(None);
        Ok(())
    }
}

impl Capability for ControlSocket {
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

    fn sock_shutdown(&self, how: ShutdownHow) -> Result<()> {
        ControlSocket::sock_shutdown(self, how)
    }

    fn sock_recv(&self, ctx: &ProcessContext, req: RecvRequest<'_>) -> Result<RecvOutcome> {
        ControlSocket::sock_recv(self, ctx, req)
    }

    fn sock_send(&self, ctx: &ProcessContext, req: SendRequest<'_>) -> Result<usize> {
        ControlSocket::sock_send(self, ctx, req)
    }
}

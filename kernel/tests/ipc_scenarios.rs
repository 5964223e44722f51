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

//! Cross-object boundary scenarios from the capability-kernel spec's
//! testable-properties section, run as ordinary integration tests
//! against the public `kernel` crate surface.

use kernel::object::{FdNumber, RecvFlags, RecvOutFlags, RecvRequest, SendRequest};
use kernel::{Flags, PairSocket, ProcessContext, ProcessId, Rights, SockType};

fn ctx() -> ProcessContext {
    ProcessContext::new(ProcessId(1))
}

/// Backpressure & shutdown: fill a dgram pair, observe `AGAIN` from a
/// non-blocking sender, then observe `PIPE` once the receiver shuts
/// down for read.
#[test]
fn backpressure_then_shutdown_returns_again_then_pipe() {
    let a = PairSocket::new_unpaired(SockType::Dgram, "a", Flags::NONBLOCK);
    let b = PairSocket::new_unpaired(SockType::Dgram, "b", Flags::empty());
    PairSocket::make_pair(&a, &b);
    let ctx = ctx();

    a.sock_send(&ctx, SendRequest::bytes(&vec![0u8; kernel::pairsock::MAX_BUFFERED]))
        .unwrap();
    assert_eq!(
        a.sock_send(&ctx, SendRequest::bytes(b"more")).unwrap_err(),
        kstatus::Errno::Again
    );

    b.sock_shutdown(kernel::object::ShutdownHow::SHUT_RD).unwrap();
    assert_eq!(
        a.sock_send(&ctx, SendRequest::bytes(b"more")).unwrap_err(),
        kstatus::Errno::Pipe
    );
}

/// Capability passing across a stream pair preserves identity: the
/// receiver's installed capability resolves to an object of the same
/// kind the sender handed over, with rights capped by what the sender
/// offered.
#[test]
fn fd_passed_over_stream_keeps_kind_and_attenuates_rights() {
    let stream_a = PairSocket::new_unpaired(SockType::Stream, "a", Flags::empty());
    let stream_b = PairSocket::new_unpaired(SockType::Stream, "b", Flags::empty());
    PairSocket::make_pair(&stream_a, &stream_b);
    let ctx = ctx();

    let passenger = PairSocket::new_unpaired(SockType::Dgram, "passenger", Flags::empty());
    let passenger_slot = {
        let mut table = ctx.captable().lock().unwrap();
        table.add(passenger, Rights::READ, Rights::READ)
    };

    stream_a
        .sock_send(
            &ctx,
            SendRequest {
                iovecs: vec![b"payload"],
                fds: vec![FdNumber(passenger_slot)],
            },
        )
        .unwrap();

    let mut buf = [0u8; 32];
    let mut req = RecvRequest::bytes(&mut buf);
    req.max_fds = 4;
    let outcome = stream_b.sock_recv(&ctx, req).unwrap();

    assert_eq!(outcome.fds.len(), 1);
    let table = ctx.captable().lock().unwrap();
    let slot = table.get(outcome.fds[0]).unwrap();
    assert_eq!(slot.cap.kind(), kernel::Kind::DgramSocket);
    assert!(slot.base.contains(Rights::READ));
    assert!(!slot.base.contains(Rights::WRITE));
}

/// A sent FD is an "identical rights" copy of the sender's slot (spec
/// §4.3 step 7), not collapsed to the sender slot's inheriting mask:
/// when the sender's slot has a base broader than its inheriting mask,
/// the receiver's installed copy must keep that same broader base.
#[test]
fn fd_passed_over_stream_copies_base_rights_verbatim_not_collapsed_to_inheriting() {
    let stream_a = PairSocket::new_unpaired(SockType::Stream, "a", Flags::empty());
    let stream_b = PairSocket::new_unpaired(SockType::Stream, "b", Flags::empty());
    PairSocket::make_pair(&stream_a, &stream_b);
    let ctx = ctx();

    let passenger = PairSocket::new_unpaired(SockType::Dgram, "passenger", Flags::empty());
    let passenger_slot = {
        let mut table = ctx.captable().lock().unwrap();
        // base is strictly broader than inheriting: WRITE is held by
        // this slot but would not be handed down to a capability
        // *derived* from it.
        table.add(
            passenger,
            Rights::READ | Rights::WRITE,
            Rights::READ,
        )
    };

    stream_a
        .sock_send(
            &ctx,
            SendRequest {
                iovecs: vec![b"payload"],
                fds: vec![FdNumber(passenger_slot)],
            },
        )
        .unwrap();

    let mut buf = [0u8; 32];
    let mut req = RecvRequest::bytes(&mut buf);
    req.max_fds = 4;
    let outcome = stream_b.sock_recv(&ctx, req).unwrap();

    assert_eq!(outcome.fds.len(), 1);
    let table = ctx.captable().lock().unwrap();
    let slot = table.get(outcome.fds[0]).unwrap();
    // The copy's base must still carry WRITE: a send is a capability
    // copy with identical rights, not a derivation capped by inheriting.
    assert!(slot.base.contains(Rights::WRITE));
    assert!(slot.base.contains(Rights::READ));
    assert_eq!(slot.inheriting, Rights::READ);
}

/// Undelivered FDs on a datagram recv with zero FD slots are silently
/// lost (spec's documented policy), and no `FDS_TRUNCATED` is raised
/// because the caller asked for zero.
#[test]
fn dgram_recv_with_zero_fd_slots_silently_drops_fds_without_flag() {
    let a = PairSocket::new_unpaired(SockType::Dgram, "a", Flags::empty());
    let b = PairSocket::new_unpaired(SockType::Dgram, "b", Flags::empty());
    PairSocket::make_pair(&a, &b);
    let ctx = ctx();

    let passenger = PairSocket::new_unpaired(SockType::Dgram, "passenger", Flags::empty());
    let passenger_slot = {
        let mut table = ctx.captable().lock().unwrap();
        table.add(passenger, Rights::all_rights(), Rights::all_rights())
    };

    a.sock_send(
        &ctx,
        SendRequest {
            iovecs: vec![b"msg"],
            fds: vec![FdNumber(passenger_slot)],
        },
    )
    .unwrap();

    let mut buf = [0u8; 16];
    let mut req = RecvRequest::bytes(&mut buf);
    req.max_fds = 0;
    let outcome = b.sock_recv(&ctx, req).unwrap();
    assert!(outcome.fds.is_empty());
    assert!(!outcome.out_flags.contains(RecvOutFlags::FDS_TRUNCATED));
}

/// Peek followed by a non-peek recv with identical capacity returns
/// the same payload bytes and an FD list referencing the same
/// underlying capability identity (by kind, since this surface does
/// not expose raw pointers).
#[test]
fn peek_then_recv_observe_identical_payload_and_fd_count() {
    let a = PairSocket::new_unpaired(SockType::Dgram, "a", Flags::empty());
    let b = PairSocket::new_unpaired(SockType::Dgram, "b", Flags::empty());
    PairSocket::make_pair(&a, &b);
    let ctx = ctx();

    let passenger = PairSocket::new_unpaired(SockType::Dgram, "passenger", Flags::empty());
    let passenger_slot = {
        let mut table = ctx.captable().lock().unwrap();
        table.add(passenger, Rights::all_rights(), Rights::all_rights())
    };
    a.sock_send(
        &ctx,
        SendRequest {
            iovecs: vec![b"peekable"],
            fds: vec![FdNumber(passenger_slot)],
        },
    )
    .unwrap();

    let mut peek_buf = [0u8; 16];
    let mut peek_req = RecvRequest::bytes(&mut peek_buf);
    peek_req.flags = RecvFlags::PEEK;
    peek_req.max_fds = 4;
    let peeked = b.sock_recv(&ctx, peek_req).unwrap();

    let mut real_buf = [0u8; 16];
    let mut real_req = RecvRequest::bytes(&mut real_buf);
    real_req.max_fds = 4;
    let delivered = b.sock_recv(&ctx, real_req).unwrap();

    assert_eq!(peeked.datalen, delivered.datalen);
    assert_eq!(peek_buf[..peeked.datalen], real_buf[..delivered.datalen]);
    assert_eq!(peeked.fds.len(), delivered.fds.len());
}

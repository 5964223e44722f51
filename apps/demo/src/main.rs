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

//! A small harness binary exercising the kernel core from "user" code,
//! in the spirit of `pw_kernel`'s `apps/{ticker,one,two}` demos: it
//! never touches kernel internals directly, only the `Capability`
//! surface a syscall layer above this core would expose.

use std::sync::Arc;

use kernel::object::{FdNumber, RecvFlags, RecvRequest, SendRequest};
use kernel::{
    ControlSocket, Flags, InterfaceStore, Kind, PairSocket, ProcessContext, ProcessId, Rights, SockType,
};

fn main() {
    env_logger::init();

    let ctx = ProcessContext::new(ProcessId(1));

    let control = ControlSocket::new(Arc::new(InterfaceStore::with_defaults()));
    log::info!("control socket ready, demoing LIST");

    control
        .sock_send(&ctx, SendRequest::bytes(b"LIST"))
        .expect("LIST send");
    let mut list_buf = [0u8; 160];
    let mut list_req = RecvRequest::bytes(&mut list_buf);
    list_req.max_fds = 0;
    let list_outcome = control.sock_recv(&ctx, list_req).expect("LIST recv");
    let interfaces = String::from_utf8_lossy(&list_buf[..list_outcome.datalen]);
    log::info!("interfaces: {interfaces:?}");

    log::info!("demoing PSEUDOPAIR 4");
    control
        .sock_send(&ctx, SendRequest::bytes(b"PSEUDOPAIR 4"))
        .expect("PSEUDOPAIR send");
    let mut pp_buf = [0u8; 160];
    let mut pp_req = RecvRequest::bytes(&mut pp_buf);
    pp_req.max_fds = 8;
    let pp_outcome = control.sock_recv(&ctx, pp_req).expect("PSEUDOPAIR recv");
    log::info!(
        "PSEUDOPAIR reply {:?}, installed fds {:?}",
        String::from_utf8_lossy(&pp_buf[..pp_outcome.datalen]),
        pp_outcome.fds
    );
    {
        let table = ctx.captable().lock().unwrap();
        for fd in &pp_outcome.fds {
            let slot = table.get(*fd).expect("installed fd must resolve");
            log::info!("  fd {fd}: kind {:?}", slot.cap.kind());
        }
    }

    log::info!("demoing a datagram pair socket round-trip");
    let a = PairSocket::new_unpaired(SockType::Dgram, "a", Flags::empty());
    let b = PairSocket::new_unpaired(SockType::Dgram, "b", Flags::empty());
    PairSocket::make_pair(&a, &b);

    a.sock_send(&ctx, SendRequest::bytes(b"hello from a"))
        .expect("dgram send");
    let mut recv_buf = [0u8; 64];
    let mut recv_req = RecvRequest::bytes(&mut recv_buf);
    recv_req.flags = RecvFlags::empty();
    let outcome = b.sock_recv(&ctx, recv_req).expect("dgram recv");
    log::info!(
        "b received: {:?}",
        String::from_utf8_lossy(&recv_buf[..outcome.datalen])
    );

    log::info!("demoing capability-passing over a stream pair");
    let stream_a = PairSocket::new_unpaired(SockType::Stream, "stream-a", Flags::empty());
    let stream_b = PairSocket::new_unpaired(SockType::Stream, "stream-b", Flags::empty());
    PairSocket::make_pair(&stream_a, &stream_b);

    let passenger = PairSocket::new_unpaired(SockType::Dgram, "passenger", Flags::empty());
    let passenger_slot = {
        let mut table = ctx.captable().lock().unwrap();
        table.add(passenger, Rights::all_rights(), Rights::all_rights())
    };

    stream_a
        .sock_send(
            &ctx,
            SendRequest {
                iovecs: vec![b"take this"],
                fds: vec![FdNumber(passenger_slot)],
            },
        )
        .expect("stream send with fd");
    let mut stream_buf = [0u8; 32];
    let mut stream_req = RecvRequest::bytes(&mut stream_buf);
    stream_req.max_fds = 4;
    let stream_outcome = stream_b.sock_recv(&ctx, stream_req).expect("stream recv");
    log::info!(
        "stream-b received {:?} with {} capability(ies)",
        String::from_utf8_lossy(&stream_buf[..stream_outcome.datalen]),
        stream_outcome.fds.len()
    );
    assert_eq!(stream_outcome.fds.len(), 1, "passenger fd must survive the crossing");
    {
        let table = ctx.captable().lock().unwrap();
        let kind = table.get(stream_outcome.fds[0]).unwrap().cap.kind();
        assert_eq!(kind, Kind::DgramSocket);
    }

    log::info!("demo complete");
}

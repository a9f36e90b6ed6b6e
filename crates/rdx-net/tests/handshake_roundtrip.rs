use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

use rdx_net::{startup_request, startup_response, validate_request, validate_response, EventLoop, LoopEvent, PortToken};
use rdx_wire::{decode_message, DecodeOutcome, EofDirection, Message, PortKind};

const MAX_TICKS: usize = 2000;

/// End-to-end handshake between two reducers: one listens, the other
/// dials, both exchange `StartupRequest`/`StartupResponse` and land in
/// steady state with each other's identity recorded.
#[test]
fn handshake_completes_over_real_sockets() {
    let bind_addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 0));

    let mut server_loop = EventLoop::new(16).unwrap();
    let listener = server_loop.listen(bind_addr).unwrap();
    let real_addr = server_loop.local_addr(listener).unwrap();

    let server = thread::spawn(move || {
        let mut peer_token: Option<PortToken> = None;
        let mut responded = false;

        for _ in 0..MAX_TICKS {
            let events = server_loop.poll(Some(Duration::from_millis(10))).unwrap();
            for ev in events {
                match ev {
                    LoopEvent::ListenerReadable { listener } => {
                        if let Ok(Some(tok)) = server_loop.accept_on(listener, PortKind::Reduce) {
                            peer_token = Some(tok);
                        }
                    }
                    LoopEvent::Readable { port } if Some(port) == peer_token && !responded => {
                        let p = server_loop.port_mut(port).unwrap();
                        p.fill_read_buf();
                        if let DecodeOutcome::Complete { tag, payload } = p.try_decode_frame() {
                            let msg = decode_message(tag, &payload, EofDirection::FromPlan).unwrap();
                            let (_, peer_id) = validate_request(&msg, None).unwrap();
                            p.enqueue(&startup_response(PortKind::Reduce, peer_id));
                            responded = true;
                        }
                    }
                    LoopEvent::Writable { port } if Some(port) == peer_token && responded => {
                        server_loop.port_mut(port).unwrap().flush();
                    }
                    _ => {}
                }
            }
            if let Some(port) = peer_token {
                if responded && !server_loop.port_mut(port).unwrap().has_pending_writes() {
                    break;
                }
            }
        }
        assert!(responded, "server never saw a StartupRequest");
    });

    thread::sleep(Duration::from_millis(20));

    let client = thread::spawn(move || {
        let mut client_loop = EventLoop::new(16).unwrap();
        let token = client_loop.connect(real_addr, PortKind::Reduce).unwrap();

        let mut sent = false;
        let mut got_response: Option<Message> = None;

        for _ in 0..MAX_TICKS {
            let events = client_loop.poll(Some(Duration::from_millis(10))).unwrap();
            for ev in events {
                match ev {
                    LoopEvent::Writable { port } if port == token && !sent => {
                        let p = client_loop.port_mut(token).unwrap();
                        p.enqueue(&startup_request(PortKind::Reduce, 42));
                        p.flush();
                        sent = true;
                    }
                    LoopEvent::Readable { port } if port == token => {
                        let p = client_loop.port_mut(token).unwrap();
                        p.fill_read_buf();
                        if let DecodeOutcome::Complete { tag, payload } = p.try_decode_frame() {
                            let msg = decode_message(tag, &payload, EofDirection::FromReducer).unwrap();
                            validate_response(&msg, 42).unwrap();
                            got_response = Some(msg);
                        }
                    }
                    _ => {}
                }
            }
            if got_response.is_some() {
                break;
            }
        }
        assert!(got_response.is_some(), "client never got a StartupResponse");
    });

    server.join().unwrap();
    client.join().unwrap();
}

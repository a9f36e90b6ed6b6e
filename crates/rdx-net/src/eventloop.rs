//! The mio-backed event loop and the Port arena it drives.
//!
//! Ports are stored in a `Vec<Option<Slot>>` indexed by [`PortToken`]
//! rather than referencing each other directly: the router needs to look
//! up a peer Port from a `PlanPort` and vice versa, and a mesh of owning
//! references pointing at each other would be cyclic. Indices sidestep
//! that entirely and make a torn-down Port's slot simply `None` until a
//! later allocation reuses it.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use rdx_wire::PortKind;
use tracing::warn;

use crate::error::MeshError;
use crate::port::Port;
use crate::sockopt;

/// Index into the event loop's Port arena. Stable for the lifetime of the
/// Port; never reused until the slot has actually been freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortToken(pub usize);

impl From<PortToken> for Token {
    fn from(t: PortToken) -> Self {
        Token(t.0)
    }
}

impl From<Token> for PortToken {
    fn from(t: Token) -> Self {
        PortToken(t.0)
    }
}

/// One notable occurrence the event loop surfaces to its caller each tick.
pub enum LoopEvent {
    /// A listener has a pending connection; call [`EventLoop::accept_on`].
    ListenerReadable { listener: PortToken },
    Readable { port: PortToken },
    Writable { port: PortToken },
    Disconnected { port: PortToken },
}

enum Slot {
    Listener(TcpListener),
    Port(Port),
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    slots: Vec<Option<Slot>>,
    free_list: Vec<usize>,
}

impl EventLoop {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity),
            slots: Vec::new(),
            free_list: Vec::new(),
        })
    }

    fn reserve(&mut self) -> PortToken {
        if let Some(i) = self.free_list.pop() {
            PortToken(i)
        } else {
            self.slots.push(None);
            PortToken(self.slots.len() - 1)
        }
    }

    pub fn listen(&mut self, addr: SocketAddr) -> io::Result<PortToken> {
        let mut listener = TcpListener::bind(addr)?;
        let token = self.reserve();
        self.poll.registry().register(&mut listener, token.into(), Interest::READABLE)?;
        self.slots[token.0] = Some(Slot::Listener(listener));
        Ok(token)
    }

    /// Begin a nonblocking outbound connection. The Port starts in
    /// `ConnectState::Started`; the caller advances it to `Made` once a
    /// writable event fires for its token.
    pub fn connect(&mut self, addr: SocketAddr, kind: PortKind) -> Result<PortToken, MeshError> {
        let stream = TcpStream::connect(addr).map_err(|e| MeshError::Connect { addr, source: e })?;
        let mut port = Port::new(stream, addr, kind);
        port.state = crate::connect::ConnectState::Started;
        let token = self.reserve();
        self.poll
            .registry()
            .register(&mut port.stream, token.into(), Interest::READABLE | Interest::WRITABLE)
            .map_err(MeshError::LocalResource)?;
        self.slots[token.0] = Some(Slot::Port(port));
        Ok(token)
    }

    pub fn local_addr(&self, listener_token: PortToken) -> io::Result<SocketAddr> {
        match self.slots.get(listener_token.0).and_then(Option::as_ref) {
            Some(Slot::Listener(l)) => l.local_addr(),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "not a listener token")),
        }
    }

    pub fn accept_on(&mut self, listener_token: PortToken, kind: PortKind) -> io::Result<Option<PortToken>> {
        let Some(Slot::Listener(listener)) = self.slots[listener_token.0].as_ref() else {
            return Ok(None);
        };
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                sockopt::configure(&stream);
                let mut port = Port::new(stream, peer_addr, kind);
                port.state = crate::connect::ConnectState::Accept;
                let token = self.reserve();
                self.poll.registry().register(
                    &mut port.stream,
                    token.into(),
                    Interest::READABLE | Interest::WRITABLE,
                )?;
                self.slots[token.0] = Some(Slot::Port(port));
                Ok(Some(token))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn port(&self, token: PortToken) -> Option<&Port> {
        match self.slots.get(token.0)?.as_ref()? {
            Slot::Port(p) => Some(p),
            Slot::Listener(_) => None,
        }
    }

    pub fn port_mut(&mut self, token: PortToken) -> Option<&mut Port> {
        match self.slots.get_mut(token.0)?.as_mut()? {
            Slot::Port(p) => Some(p),
            Slot::Listener(_) => None,
        }
    }

    /// Tear down a Port or listener: deregister from the poller and drop
    /// its slot onto the free list so a later allocation can reuse the
    /// index.
    pub fn remove(&mut self, token: PortToken) {
        if let Some(slot) = self.slots.get_mut(token.0).and_then(Option::take) {
            match slot {
                Slot::Port(mut p) => {
                    let _ = self.poll.registry().deregister(&mut p.stream);
                }
                Slot::Listener(mut l) => {
                    let _ = self.poll.registry().deregister(&mut l);
                }
            }
            self.free_list.push(token.0);
        }
    }

    /// Block for up to `timeout`, then translate raw mio readiness into
    /// [`LoopEvent`]s.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<LoopEvent>> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut out = Vec::new();
        for event in self.events.iter() {
            let token = PortToken::from(event.token());
            match self.slots.get(token.0).and_then(Option::as_ref) {
                Some(Slot::Listener(_)) => out.push(LoopEvent::ListenerReadable { listener: token }),
                Some(Slot::Port(_)) => {
                    if event.is_read_closed() || event.is_write_closed() || event.is_error() {
                        out.push(LoopEvent::Disconnected { port: token });
                        continue;
                    }
                    if event.is_readable() {
                        out.push(LoopEvent::Readable { port: token });
                    }
                    if event.is_writable() {
                        out.push(LoopEvent::Writable { port: token });
                    }
                }
                None => warn!(?token, "event for a slot that no longer exists"),
            }
        }
        Ok(out)
    }
}

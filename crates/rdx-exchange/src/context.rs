//! `ReducerContext`: the single owning struct tying the mesh event loop,
//! the plan-port arena, and the reducer group membership together. One
//! instance per process; everything else borrows from it rather than
//! holding its own handle, which is what keeps the Port/PlanPort graph
//! acyclic (see `rdx_net::eventloop` and `planport` for the arena halves).

use std::collections::HashMap;
use std::time::Duration;

use rdx_net::{
    build_mesh, startup_request, validate_request, validate_response, ConnectState, EventLoop, GroupMembership,
    LoopEvent, PortToken,
};
use rdx_wire::{decode_message, DecodeOutcome, EofDirection, Message, PortId, PortKind};
use tracing::{debug, warn};

use crate::dispatch::{drain_plan_work, handle_plan_message, handle_reducer_message, RouteAction, DEFAULT_SPILL_BUDGET};
use crate::error::DispatchError;
use crate::planport::PlanArena;

const TICK_WRITE_BUDGET: usize = 64 * 1024;

/// Everything the reduce-exchange subsystem needs for one process: the
/// mesh it's part of, the Ports that make it up, and the plan queues those
/// Ports feed.
pub struct ReducerContext {
    pub self_id: PortId,
    pub group: GroupMembership,
    pub events: EventLoop,
    pub plans: PlanArena,
    /// Reducer-facing Ports, keyed by the peer's reducer id once the
    /// handshake completes.
    reducer_ports: HashMap<PortId, PortToken>,
    /// Plan-facing Ports, keyed by the plan id carried in their startup
    /// handshake.
    plan_ports: HashMap<PortId, PortToken>,
    listener: PortToken,
}

impl ReducerContext {
    pub fn new(group: GroupMembership, events: EventLoop, listener: PortToken) -> Self {
        let self_id = group.self_node().id;
        Self {
            self_id,
            group,
            events,
            plans: PlanArena::new(),
            reducer_ports: HashMap::new(),
            plan_ports: HashMap::new(),
            listener,
        }
    }

    /// Dial every peer this node is responsible for initiating, per the
    /// even/odd mesh tie-break.
    pub fn dial_mesh(&mut self) {
        for intent in build_mesh(&self.group) {
            match self.events.connect(intent.addr, PortKind::Reduce) {
                Ok(token) => {
                    debug!(peer = intent.peer_id, addr = %intent.addr, "dialing mesh peer");
                    self.reducer_ports.insert(intent.peer_id, token);
                }
                Err(e) => warn!(peer = intent.peer_id, error = %e, "failed to start dialing mesh peer"),
            }
        }
    }

    /// Run one iteration: block on the poller for up to `timeout`, handle
    /// every resulting readiness event, then drain queued plan work for
    /// every plan-facing Port that isn't backlogged.
    pub fn tick(&mut self, timeout: Option<Duration>) -> Result<(), DispatchError> {
        let events = self.events.poll(timeout).map_err(DispatchError::SpillIo)?;
        for event in events {
            self.handle_event(event)?;
        }
        self.drain_plan_writes();
        self.plans.reap_tombstones();
        Ok(())
    }

    fn handle_event(&mut self, event: LoopEvent) -> Result<(), DispatchError> {
        match event {
            LoopEvent::ListenerReadable { listener } if listener == self.listener => {
                while let Ok(Some(token)) = self.events.accept_on(listener, PortKind::Local) {
                    if let Some(port) = self.events.port_mut(token) {
                        port.state = ConnectState::Accept;
                    }
                }
            }
            LoopEvent::ListenerReadable { .. } => {}
            LoopEvent::Writable { port } => self.handle_writable(port),
            LoopEvent::Readable { port } => self.handle_readable(port)?,
            LoopEvent::Disconnected { port } => self.teardown_port(port),
        }
        Ok(())
    }

    fn handle_writable(&mut self, token: PortToken) {
        let Some(port) = self.events.port_mut(token) else { return };
        match port.state {
            ConnectState::Started => {
                port.state = ConnectState::Made;
                port.enqueue(&startup_request(PortKind::Reduce, self.self_id));
                port.state = ConnectState::AwaitingResponse;
            }
            _ => {}
        }
        if matches!(port.flush(), rdx_net::IoOutcome::Disconnected) {
            self.teardown_port(token);
        }
    }

    fn handle_readable(&mut self, token: PortToken) -> Result<(), DispatchError> {
        let Some(port) = self.events.port_mut(token) else { return Ok(()) };
        if matches!(port.fill_read_buf(), rdx_net::IoOutcome::Disconnected) {
            self.teardown_port(token);
            return Ok(());
        }
        loop {
            let Some(port) = self.events.port_mut(token) else { return Ok(()) };
            let outcome = port.try_decode_frame();
            let (tag, payload) = match outcome {
                DecodeOutcome::Complete { tag, payload } => (tag, payload),
                DecodeOutcome::Partial => break,
                DecodeOutcome::Invalid(e) => {
                    warn!(?token, error = %e, "protocol violation, tearing down port");
                    self.teardown_port(token);
                    return Ok(());
                }
            };
            self.handle_frame(token, tag, &payload)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, token: PortToken, tag: rdx_wire::MessageType, payload: &[u8]) -> Result<(), DispatchError> {
        let state = self.events.port(token).map(|p| p.state);
        let Some(state) = state else { return Ok(()) };

        match state {
            ConnectState::Accept => {
                let direction = EofDirection::FromPlan;
                let msg = decode_message(tag, payload, direction).map_err(|_| {
                    DispatchError::UnexpectedMessage(tag)
                })?;
                let (kind, peer_id) = validate_request(&msg, None)
                    .map_err(|_| DispatchError::UnexpectedMessage(tag))?;
                let port = self.events.port_mut(token).unwrap();
                port.peer_id = Some(peer_id);
                port.kind = kind;
                port.enqueue(&rdx_net::startup_response(kind, peer_id));
                port.state = ConnectState::AuthOk;
                match kind {
                    PortKind::Reduce => {
                        self.reducer_ports.insert(peer_id, token);
                    }
                    PortKind::Plan => {
                        self.plan_ports.insert(peer_id, token);
                        let plan_token = self.plans.get_or_create(peer_id, DEFAULT_SPILL_BUDGET);
                        self.plans.get_mut(plan_token).expect("just created").note_worker_open();
                    }
                    _ => {}
                }
                let port = self.events.port_mut(token).unwrap();
                port.state = ConnectState::Ok;
            }
            ConnectState::AwaitingResponse => {
                let direction = EofDirection::FromReducer;
                let msg = decode_message(tag, payload, direction).map_err(|_| DispatchError::UnexpectedMessage(tag))?;
                let peer_id = self.events.port(token).and_then(|p| p.peer_id);
                let expected = peer_id.unwrap_or_default();
                let (kind, confirmed_id) =
                    validate_response(&msg, expected).map_err(|_| DispatchError::UnexpectedMessage(tag))?;
                let port = self.events.port_mut(token).unwrap();
                port.kind = kind;
                port.peer_id = Some(confirmed_id);
                port.state = ConnectState::Ok;
            }
            ConnectState::Ok => self.route_steady_state_frame(token, tag, payload)?,
            _ => warn!(?token, ?state, "frame received in unexpected connect state"),
        }
        Ok(())
    }

    fn route_steady_state_frame(
        &mut self,
        token: PortToken,
        tag: rdx_wire::MessageType,
        payload: &[u8],
    ) -> Result<(), DispatchError> {
        let Some(port) = self.events.port(token) else { return Ok(()) };
        let kind = port.kind;
        let peer_id = port.peer_id.unwrap_or_default();

        match kind {
            PortKind::Plan => {
                let msg = decode_message(tag, payload, EofDirection::FromPlan)
                    .map_err(|_| DispatchError::UnexpectedMessage(tag))?;
                let plan_token = self.plans.get_or_create(peer_id, DEFAULT_SPILL_BUDGET);
                self.plans.get_mut(plan_token).expect("just created").recv_from_pln += 1;
                let is_close = matches!(msg, Message::PlanClose(_));
                let actions = handle_plan_message(peer_id, self.self_id, msg, &mut self.plans)?;
                for action in actions {
                    self.apply_route_action(action);
                }
                if is_close {
                    self.teardown_port(token);
                }
            }
            PortKind::Reduce => {
                let msg = decode_message(tag, payload, EofDirection::FromReducer)
                    .map_err(|_| DispatchError::UnexpectedMessage(tag))?;
                handle_reducer_message(peer_id, msg, &mut self.plans)?;
            }
            _ => warn!(?token, ?kind, "frame from a port of unexpected kind"),
        }
        Ok(())
    }

    fn apply_route_action(&mut self, action: RouteAction) {
        match action {
            RouteAction::SendToReducer { reducer_id, msg } => {
                if let Some(&token) = self.reducer_ports.get(&reducer_id) {
                    if let Some(port) = self.events.port_mut(token) {
                        port.enqueue(&msg);
                    }
                } else {
                    warn!(reducer_id, "no port for reducer, dropping outbound frame");
                }
            }
        }
    }

    /// Write-back half of the tick: every plan-facing Port that isn't
    /// already backlogged gets topped up from its plan's queue.
    fn drain_plan_writes(&mut self) {
        let plan_ids: Vec<PortId> = self.plan_ports.keys().copied().collect();
        for plan_id in plan_ids {
            let Some(&token) = self.plan_ports.get(&plan_id) else { continue };
            let backlogged = self.events.port(token).is_some_and(rdx_net::Port::is_backlogged);
            if backlogged {
                continue;
            }
            for msg in drain_plan_work(&mut self.plans, plan_id, TICK_WRITE_BUDGET) {
                if let Some(port) = self.events.port_mut(token) {
                    port.enqueue(&msg);
                }
            }
            if let Some(port) = self.events.port_mut(token) {
                port.flush();
            }
        }
    }

    fn teardown_port(&mut self, token: PortToken) {
        if let Some(port) = self.events.port_mut(token) {
            port.close();
        }
        self.reducer_ports.retain(|_, t| *t != token);
        self.plan_ports.retain(|_, t| *t != token);
        self.events.remove(token);
    }
}

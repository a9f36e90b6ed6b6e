//! Routing logic: turns one decoded [`Message`] arriving on a plan-facing
//! or reducer-facing Port into the set of actions the caller (the tick
//! driver in `context.rs`) needs to carry out. Kept free of any socket or
//! event-loop concerns so it can be unit tested directly against a
//! [`PlanArena`], mirroring the way the original dispatcher's message
//! handlers were separable from its IO driver loop.

use rdx_wire::{EofBody, Message, MessageType, PortId};

use crate::error::DispatchError;
use crate::planport::PlanArena;
use crate::queue::PlanQueue;

pub(crate) const DEFAULT_SPILL_BUDGET: usize = 4 * 1024 * 1024;

/// Something the dispatcher needs to do as a result of handling one
/// message. The caller owns the actual sockets, so these are descriptions
/// rather than direct socket writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Forward a message to a named peer reducer (looked up by id in the
    /// caller's reducer Port table).
    SendToReducer { reducer_id: PortId, msg: Message },
}

/// Handle a message read from a plan worker's Port. `plan_id` is that
/// Port's peer id (every plan-facing Port belongs to exactly one plan).
/// The caller counts `recv_from_pln` itself, once per whole frame read
/// regardless of type, and is responsible for tearing the originating
/// Port down once a `PLAN_CLOSE` has been handled.
pub fn handle_plan_message(
    plan_id: PortId,
    self_id: PortId,
    msg: Message,
    plans: &mut PlanArena,
) -> Result<Vec<RouteAction>, DispatchError> {
    match msg {
        Message::PlanToReducerData { data, targets } => {
            let mut actions = Vec::with_capacity(targets.len());
            for target in targets {
                if target == self_id {
                    // A plan never broadcasts to its own local worker.
                    continue;
                }
                actions.push(RouteAction::SendToReducer {
                    reducer_id: target,
                    msg: Message::ReducerToReducerData { plan_id, data: data.clone() },
                });
            }
            Ok(actions)
        }
        Message::Eof(EofBody::ToTargets { targets }) => Ok(broadcast_targets(plan_id, self_id, targets, false)),
        Message::PlanClose(EofBody::ToTargets { targets }) => {
            let actions = broadcast_targets(plan_id, self_id, targets, true);
            let token = plans.get_or_create(plan_id, DEFAULT_SPILL_BUDGET);
            plans.get_mut(token).expect("just created").note_worker_close();
            Ok(actions)
        }
        other => Err(DispatchError::UnexpectedMessage(tag_of(&other))),
    }
}

/// Broadcast an EOF/PLAN_CLOSE to every listed peer other than ourselves —
/// the same target-set-minus-self rule `PlanToReducerData` uses.
fn broadcast_targets(plan_id: PortId, self_id: PortId, targets: Vec<PortId>, is_close: bool) -> Vec<RouteAction> {
    let mut actions = Vec::with_capacity(targets.len());
    for target in targets {
        if target == self_id {
            continue;
        }
        let body = EofBody::ForPlan { plan_id };
        let wire_msg = if is_close { Message::PlanClose(body) } else { Message::Eof(body) };
        actions.push(RouteAction::SendToReducer { reducer_id: target, msg: wire_msg });
    }
    actions
}

/// Handle a message read from a peer reducer's Port. Increments
/// `recv_from_rdc` once per whole frame, per the original's handlers for
/// data, EOF and close — even when the frame is ultimately discarded into
/// a tombstoned plan.
pub fn handle_reducer_message(from_rdc_id: PortId, msg: Message, plans: &mut PlanArena) -> Result<(), DispatchError> {
    match msg {
        Message::ReducerToReducerData { plan_id, data } => {
            let token = plans.get_or_create(plan_id, DEFAULT_SPILL_BUDGET);
            let plan = plans.get_mut(token).expect("just created");
            plan.recv_from_rdc += 1;
            if plan.is_tombstoned() {
                plan.note_discard();
            } else {
                plan.queue.put_tuple(from_rdc_id, data);
            }
            Ok(())
        }
        Message::Eof(EofBody::ForPlan { plan_id }) => {
            let token = plans.get_or_create(plan_id, DEFAULT_SPILL_BUDGET);
            let plan = plans.get_mut(token).expect("just created");
            plan.recv_from_rdc += 1;
            if plan.is_tombstoned() {
                plan.note_discard();
            } else {
                plan.mark_rdc_eof(from_rdc_id).map_err(|e| DispatchError::DuplicateEof { plan_id, rdc_id: e.0 })?;
                plan.push_eof_notice(from_rdc_id);
            }
            Ok(())
        }
        Message::PlanClose(EofBody::ForPlan { plan_id }) => {
            // A PLAN_CLOSE from a peer reducer proceeds exactly as EOF for
            // accounting purposes, but pushes a distinct PLAN_CLOSE frame
            // rather than an EOF frame to the plan worker.
            let token = plans.get_or_create(plan_id, DEFAULT_SPILL_BUDGET);
            let plan = plans.get_mut(token).expect("just created");
            plan.recv_from_rdc += 1;
            if plan.is_tombstoned() {
                plan.note_discard();
            } else {
                plan.mark_rdc_eof(from_rdc_id).map_err(|e| DispatchError::DuplicateEof { plan_id, rdc_id: e.0 })?;
                plan.push_close_notice(from_rdc_id);
            }
            Ok(())
        }
        other => Err(DispatchError::UnexpectedMessage(tag_of(&other))),
    }
}

/// Pull up to `max_bytes` of queued work for `plan_id` into wire messages
/// ready to hand the plan worker's Port: data tuples first, then any
/// pending EOF/PLAN_CLOSE notices once the queue itself is drained
/// (preserving the order a single producer's data-then-notice pair was
/// sent in).
pub fn drain_plan_work(plans: &mut PlanArena, plan_id: PortId, max_bytes: usize) -> Vec<Message> {
    let Some(token) = plans.lookup(plan_id) else { return Vec::new() };
    let plan = plans.get_mut(token).expect("token from lookup is always valid");

    let mut out = Vec::new();
    for (from_rdc_id, data) in plan.queue.get_tuple_multi(max_bytes) {
        plan.send_to_pln += 1;
        out.push(Message::ReducerToPlanData { from_rdc_id, data });
    }
    if plan.queue.is_empty() {
        while let Some((rdc_id, is_close)) = plan.pop_notice() {
            plan.send_to_pln += 1;
            let body = EofBody::FromReducer { rdc_id };
            out.push(if is_close { Message::PlanClose(body) } else { Message::Eof(body) });
        }
    }
    out
}

fn tag_of(msg: &Message) -> MessageType {
    match msg {
        Message::StartupRequest { .. } => MessageType::StartupRequest,
        Message::StartupResponse { .. } => MessageType::StartupResponse,
        Message::Error { .. } => MessageType::Error,
        Message::PlanToReducerData { .. } => MessageType::PlanToReducerData,
        Message::ReducerToReducerData { .. } => MessageType::ReducerToReducerData,
        Message::ReducerToPlanData { .. } => MessageType::ReducerToPlanData,
        Message::Eof(_) => MessageType::Eof,
        Message::PlanClose(_) => MessageType::PlanClose,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_broadcast_excludes_self_entirely() {
        let mut plans = PlanArena::new();
        let actions =
            handle_plan_message(1, 100, Message::PlanToReducerData { data: vec![9], targets: vec![100, 200, 300] }, &mut plans)
                .unwrap();
        assert_eq!(
            actions,
            vec![
                RouteAction::SendToReducer { reducer_id: 200, msg: Message::ReducerToReducerData { plan_id: 1, data: vec![9] } },
                RouteAction::SendToReducer { reducer_id: 300, msg: Message::ReducerToReducerData { plan_id: 1, data: vec![9] } },
            ]
        );
    }

    #[test]
    fn reducer_data_queues_into_plan() {
        let mut plans = PlanArena::new();
        handle_reducer_message(200, Message::ReducerToReducerData { plan_id: 1, data: vec![1, 2] }, &mut plans).unwrap();
        let drained = drain_plan_work(&mut plans, 1, 1024);
        assert_eq!(drained, vec![Message::ReducerToPlanData { from_rdc_id: 200, data: vec![1, 2] }]);
        let token = plans.lookup(1).unwrap();
        assert_eq!(plans.get(token).unwrap().recv_from_rdc, 1);
    }

    #[test]
    fn eof_from_reducer_forwards_as_notice_after_queue_drains() {
        let mut plans = PlanArena::new();
        handle_reducer_message(200, Message::ReducerToReducerData { plan_id: 1, data: vec![1] }, &mut plans).unwrap();
        handle_reducer_message(200, Message::Eof(EofBody::ForPlan { plan_id: 1 }), &mut plans).unwrap();

        let first = drain_plan_work(&mut plans, 1, 1024);
        assert_eq!(first, vec![Message::ReducerToPlanData { from_rdc_id: 200, data: vec![1] }]);

        let second = drain_plan_work(&mut plans, 1, 1024);
        assert_eq!(second, vec![Message::Eof(EofBody::FromReducer { rdc_id: 200 })]);
    }

    #[test]
    fn plan_close_from_reducer_forwards_as_a_distinct_close_notice() {
        let mut plans = PlanArena::new();
        handle_reducer_message(200, Message::PlanClose(EofBody::ForPlan { plan_id: 1 }), &mut plans).unwrap();
        let drained = drain_plan_work(&mut plans, 1, 1024);
        assert_eq!(drained, vec![Message::PlanClose(EofBody::FromReducer { rdc_id: 200 })]);
        let token = plans.lookup(1).unwrap();
        assert_eq!(plans.get(token).unwrap().eof_num(), 1);
    }

    #[test]
    fn duplicate_eof_from_same_reducer_is_rejected() {
        let mut plans = PlanArena::new();
        handle_reducer_message(200, Message::Eof(EofBody::ForPlan { plan_id: 1 }), &mut plans).unwrap();
        let err = handle_reducer_message(200, Message::Eof(EofBody::ForPlan { plan_id: 1 }), &mut plans);
        assert!(matches!(err, Err(DispatchError::DuplicateEof { plan_id: 1, rdc_id: 200 })));
    }

    #[test]
    fn data_for_a_tombstoned_plan_is_discarded_not_queued() {
        let mut plans = PlanArena::new();
        let token = plans.get_or_create(1, 4096);
        plans.get_mut(token).unwrap().note_worker_close();

        handle_reducer_message(200, Message::ReducerToReducerData { plan_id: 1, data: vec![1] }, &mut plans).unwrap();

        let plan = plans.get(token).unwrap();
        assert_eq!(plan.dscd_from_rdc, 1);
        assert!(plan.queue.is_empty());
    }

    #[test]
    fn plan_close_decrements_work_num_independent_of_peer_eof_accounting() {
        let mut plans = PlanArena::new();
        let token = plans.get_or_create(1, 4096);
        plans.get_mut(token).unwrap().note_worker_open();

        // Three peer EOFs must not tombstone a plan whose worker is still open.
        for peer in [200u64, 300, 400] {
            handle_reducer_message(peer, Message::Eof(EofBody::ForPlan { plan_id: 1 }), &mut plans).unwrap();
        }
        assert!(!plans.get(token).unwrap().is_tombstoned());
        assert_eq!(plans.get(token).unwrap().eof_num(), 3);

        // Only the worker's own PLAN_CLOSE tombstones it.
        handle_plan_message(1, 100, Message::PlanClose(EofBody::ToTargets { targets: vec![] }), &mut plans).unwrap();
        assert!(plans.get(token).unwrap().is_tombstoned());
    }
}

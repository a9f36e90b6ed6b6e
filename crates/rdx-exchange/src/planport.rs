//! `PlanPort`: per-plan bookkeeping the dispatcher needs that isn't tied
//! to any single socket — the queue feeding that plan, the count of local
//! workers still open, and peer-reducer EOF accounting.

use std::collections::{HashMap, HashSet, VecDeque};

use rdx_wire::PortId;

use crate::queue::{PlanQueue, SpillQueue};

/// `work_num` past this point is a tombstone, not a live count: the plan
/// is kept around for discard accounting until the next tick reaps it.
pub const TOMBSTONE: i64 = -1;

/// A peer reducer reported EOF twice for the same plan. Carries only the
/// offending reducer id; the caller knows which plan this belongs to and
/// attaches that when building a [`crate::error::DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateEof(pub PortId);

/// State the dispatcher keeps for one plan (its local workers plus the
/// set of peer reducers feeding it tuples).
pub struct PlanPort {
    pub plan_id: PortId,
    pub queue: SpillQueue,
    /// Number of local plan workers still open for this plan. Incremented
    /// when a worker's Port completes its handshake, decremented only when
    /// that worker sends `PLAN_CLOSE` — unrelated to peer-reducer EOF
    /// accounting. Reaching zero tombstones the plan (set to
    /// [`TOMBSTONE`]) rather than removing it outright, so further inbound
    /// frames can still be counted as discards instead of silently
    /// vanishing.
    pub work_num: i64,
    pub recv_from_pln: u64,
    pub send_to_pln: u64,
    pub recv_from_rdc: u64,
    pub dscd_from_rdc: u64,
    /// Peer reducers that have already reported EOF (or PLAN_CLOSE, which
    /// counts the same way) for this plan.
    rdc_eofs: HashSet<PortId>,
    /// EOF/PLAN_CLOSE notices from peer reducers waiting to be forwarded
    /// to the plan worker, paired with whether each was a close. Kept
    /// separate from `queue` because they're notices, not tuple data, and
    /// small enough that spilling them to disk would be pure overhead.
    pending_notices: VecDeque<(PortId, bool)>,
}

impl PlanPort {
    pub fn new(plan_id: PortId, spill_budget: usize) -> Self {
        Self {
            plan_id,
            queue: SpillQueue::new(spill_budget),
            work_num: 0,
            recv_from_pln: 0,
            send_to_pln: 0,
            recv_from_rdc: 0,
            dscd_from_rdc: 0,
            rdc_eofs: HashSet::new(),
            pending_notices: VecDeque::new(),
        }
    }

    pub fn eof_num(&self) -> usize {
        self.rdc_eofs.len()
    }

    /// Record that `rdc_id` has reported EOF (or PLAN_CLOSE) for this
    /// plan. Errs if this peer already reported one.
    pub fn mark_rdc_eof(&mut self, rdc_id: PortId) -> Result<(), DuplicateEof> {
        if !self.rdc_eofs.insert(rdc_id) {
            return Err(DuplicateEof(rdc_id));
        }
        Ok(())
    }

    pub fn push_eof_notice(&mut self, rdc_id: PortId) {
        self.pending_notices.push_back((rdc_id, false));
    }

    pub fn push_close_notice(&mut self, rdc_id: PortId) {
        self.pending_notices.push_back((rdc_id, true));
    }

    /// Pop the next pending notice as `(rdc_id, is_close)`.
    pub fn pop_notice(&mut self) -> Option<(PortId, bool)> {
        self.pending_notices.pop_front()
    }

    pub fn has_pending_notices(&self) -> bool {
        !self.pending_notices.is_empty()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.work_num == TOMBSTONE
    }

    /// A local worker has attached to this plan.
    pub fn note_worker_open(&mut self) {
        if !self.is_tombstoned() {
            self.work_num += 1;
        }
    }

    /// A local worker sent `PLAN_CLOSE`: one fewer worker open. Tombstones
    /// the plan once the count reaches zero.
    pub fn note_worker_close(&mut self) {
        if self.is_tombstoned() {
            return;
        }
        self.work_num -= 1;
        if self.work_num <= 0 {
            self.work_num = TOMBSTONE;
        }
    }

    /// A frame arrived for a plan that is tombstoned or otherwise no
    /// longer accepting work; count it rather than silently dropping it.
    pub fn note_discard(&mut self) {
        self.dscd_from_rdc += 1;
    }
}

/// Stable index into the dispatcher's `PlanPort` arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlanToken(pub usize);

/// Arena of `PlanPort`s, looked up by the 64-bit plan id carried on the
/// wire. Slots are reused via a free list exactly like the net crate's
/// Port arena, for the same cyclic-reference reason.
#[derive(Default)]
pub struct PlanArena {
    slots: Vec<Option<PlanPort>>,
    free_list: Vec<usize>,
    by_id: HashMap<PortId, PlanToken>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, plan_id: PortId, spill_budget: usize) -> PlanToken {
        if let Some(&tok) = self.by_id.get(&plan_id) {
            return tok;
        }
        let token = if let Some(i) = self.free_list.pop() {
            PlanToken(i)
        } else {
            self.slots.push(None);
            PlanToken(self.slots.len() - 1)
        };
        self.slots[token.0] = Some(PlanPort::new(plan_id, spill_budget));
        self.by_id.insert(plan_id, token);
        token
    }

    pub fn lookup(&self, plan_id: PortId) -> Option<PlanToken> {
        self.by_id.get(&plan_id).copied()
    }

    pub fn get(&self, token: PlanToken) -> Option<&PlanPort> {
        self.slots.get(token.0)?.as_ref()
    }

    pub fn get_mut(&mut self, token: PlanToken) -> Option<&mut PlanPort> {
        self.slots.get_mut(token.0)?.as_mut()
    }

    /// Reap every tombstoned plan whose queue has fully drained. Called at
    /// tick boundaries, never mid-tick, so in-flight lookups by token
    /// never observe a slot disappearing out from under them.
    pub fn reap_tombstones(&mut self) {
        for i in 0..self.slots.len() {
            let reap = matches!(&self.slots[i], Some(p) if p.is_tombstoned() && p.queue.is_empty() && !p.has_pending_notices());
            if reap {
                if let Some(p) = self.slots[i].take() {
                    self.by_id.remove(&p.plan_id);
                }
                self.free_list.push(i);
            }
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PlanToken, &mut PlanPort)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| s.as_mut().map(|p| (PlanToken(i), p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_close_tombstones_at_zero_open_workers() {
        let mut p = PlanPort::new(1, 1024);
        p.note_worker_open();
        p.note_worker_open();
        p.note_worker_close();
        assert!(!p.is_tombstoned());
        p.note_worker_close();
        assert!(p.is_tombstoned());
    }

    #[test]
    fn peer_eof_accounting_is_independent_of_worker_count() {
        let mut p = PlanPort::new(1, 1024);
        p.note_worker_open();
        p.mark_rdc_eof(200).unwrap();
        p.mark_rdc_eof(300).unwrap();
        assert_eq!(p.eof_num(), 2);
        // Two peers reporting EOF must not tombstone a plan with an open worker.
        assert!(!p.is_tombstoned());
    }

    #[test]
    fn duplicate_rdc_eof_is_rejected() {
        let mut p = PlanPort::new(1, 1024);
        p.mark_rdc_eof(200).unwrap();
        assert!(matches!(p.mark_rdc_eof(200), Err(DuplicateEof(200))));
    }

    #[test]
    fn tombstone_is_retained_until_queue_drains() {
        let mut arena = PlanArena::new();
        let token = arena.get_or_create(7, 1024);
        let p = arena.get_mut(token).unwrap();
        p.note_worker_open();
        p.queue.put_tuple(1, vec![1, 2, 3]);
        p.note_worker_close();
        assert!(p.is_tombstoned());

        arena.reap_tombstones();
        assert!(arena.lookup(7).is_some(), "queue still has data, must not be reaped yet");

        arena.get_mut(token).unwrap().queue.get_tuple_multi(usize::MAX);
        arena.reap_tombstones();
        assert!(arena.lookup(7).is_none(), "drained tombstone should be reaped");
    }

    #[test]
    fn discard_accounting_survives_tombstone() {
        let mut p = PlanPort::new(1, 1024);
        p.note_worker_close();
        assert!(p.is_tombstoned());
        p.note_discard();
        p.note_discard();
        assert_eq!(p.dscd_from_rdc, 2);
    }
}

//! Per-plan tuple queues.
//!
//! Data arriving from peer reducers for a plan worker that isn't currently
//! draining (because the worker is slow, or the reducer hasn't forked it
//! yet) has to go somewhere. `MemoryQueue` holds it in a `VecDeque`;
//! `SpillQueue` wraps one with a byte budget and spills anything beyond it
//! to a temp file, replaying in the same FIFO order once memory drains.

use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom, Write};

use rdx_wire::PortId;
use tempfile::NamedTempFile;

use crate::error::DispatchError;

/// One buffered item: the reducer it came from, and its payload bytes
/// (already encoded, forwarded to the plan worker verbatim).
type Item = (PortId, Vec<u8>);

/// Queue of tuples destined for one plan worker, fed by zero or more peer
/// reducers and drained by the dispatcher's write-to-plan path. EOF/CLOSE
/// bookkeeping (which peers have finished, duplicate detection) lives on
/// `PlanPort` itself, not here — this trait is purely "hold bytes, yield
/// them back in order".
pub trait PlanQueue {
    fn put_tuple(&mut self, rdc_id: PortId, data: Vec<u8>);
    /// Drain up to `max_bytes` worth of queued tuples, oldest first.
    fn get_tuple_multi(&mut self, max_bytes: usize) -> Vec<Item>;
    fn is_empty(&self) -> bool;
    fn buffered_bytes(&self) -> usize;
    /// True iff the store currently has no more frames to yield.
    fn at_eof(&self) -> bool {
        self.is_empty()
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    items: VecDeque<Item>,
    bytes: usize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanQueue for MemoryQueue {
    fn put_tuple(&mut self, rdc_id: PortId, data: Vec<u8>) {
        self.bytes += data.len();
        self.items.push_back((rdc_id, data));
    }

    fn get_tuple_multi(&mut self, max_bytes: usize) -> Vec<Item> {
        let mut out = Vec::new();
        let mut taken = 0;
        while taken < max_bytes {
            let Some((_, data)) = self.items.front() else { break };
            if taken > 0 && taken + data.len() > max_bytes {
                break;
            }
            let (rdc_id, data) = self.items.pop_front().unwrap();
            taken += data.len();
            self.bytes -= data.len();
            out.push((rdc_id, data));
        }
        out
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn buffered_bytes(&self) -> usize {
        self.bytes
    }
}

/// `MemoryQueue` up to `budget` bytes, spilling the overflow to a temp
/// file. Reads always drain memory first; once memory is empty and the
/// spill file has unread bytes, one chunk is paged back in.
///
/// Once spilling has started, every subsequent `put_tuple` goes to the
/// spill file too, even if it alone would fit the remaining memory budget
/// — otherwise a later small tuple could land in memory and drain ahead of
/// older tuples still waiting on disk, breaking the produced-order
/// guarantee. Only once the spill file is fully drained does memory
/// become the target again.
pub struct SpillQueue {
    mem: MemoryQueue,
    budget: usize,
    spill: Option<NamedTempFile>,
    write_pos: u64,
    read_pos: u64,
    spilled_bytes: u64,
}

const REFILL_CHUNK: usize = 256 * 1024;

impl SpillQueue {
    pub fn new(budget: usize) -> Self {
        Self { mem: MemoryQueue::new(), budget, spill: None, write_pos: 0, read_pos: 0, spilled_bytes: 0 }
    }

    fn spill_record(&mut self, rdc_id: PortId, data: &[u8]) -> Result<(), DispatchError> {
        let file = match &mut self.spill {
            Some(f) => f,
            None => {
                self.spill = Some(NamedTempFile::new()?);
                self.spill.as_mut().unwrap()
            }
        };
        file.as_file_mut().seek(SeekFrom::Start(self.write_pos))?;
        file.write_all(&rdc_id.to_be_bytes())?;
        file.write_all(&(data.len() as u32).to_be_bytes())?;
        file.write_all(data)?;
        self.write_pos += 8 + 4 + data.len() as u64;
        self.spilled_bytes += (8 + 4 + data.len()) as u64;
        Ok(())
    }

    fn refill_from_spill(&mut self) -> Result<(), DispatchError> {
        let Some(file) = &mut self.spill else { return Ok(()) };
        if self.read_pos >= self.write_pos {
            return Ok(());
        }
        file.as_file_mut().seek(SeekFrom::Start(self.read_pos))?;
        let mut pulled = 0usize;
        while self.read_pos < self.write_pos && pulled < REFILL_CHUNK {
            let mut id_buf = [0u8; 8];
            let mut len_buf = [0u8; 4];
            file.read_exact(&mut id_buf)?;
            file.read_exact(&mut len_buf)?;
            let rdc_id = u64::from_be_bytes(id_buf);
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            file.read_exact(&mut data)?;
            self.read_pos += 8 + 4 + len as u64;
            pulled += len;
            self.mem.put_tuple(rdc_id, data);
        }
        if self.read_pos >= self.write_pos {
            self.spill = None;
            self.write_pos = 0;
            self.read_pos = 0;
            self.spilled_bytes = 0;
        }
        Ok(())
    }

    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }
}

impl PlanQueue for SpillQueue {
    fn put_tuple(&mut self, rdc_id: PortId, data: Vec<u8>) {
        if self.is_spilled() || self.mem.buffered_bytes() + data.len() > self.budget {
            if let Err(e) = self.spill_record(rdc_id, &data) {
                tracing::error!(error = %e, "spill write failed, dropping tuple");
            }
        } else {
            self.mem.put_tuple(rdc_id, data);
        }
    }

    fn get_tuple_multi(&mut self, max_bytes: usize) -> Vec<Item> {
        if self.mem.is_empty() {
            if let Err(e) = self.refill_from_spill() {
                tracing::error!(error = %e, "spill refill failed");
            }
        }
        self.mem.get_tuple_multi(max_bytes)
    }

    fn is_empty(&self) -> bool {
        self.spill.is_none() && self.mem.is_empty()
    }

    fn buffered_bytes(&self) -> usize {
        self.mem.buffered_bytes() + self.spilled_bytes as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_queue_fifo_order() {
        let mut q = MemoryQueue::new();
        q.put_tuple(1, vec![1, 2, 3]);
        q.put_tuple(2, vec![4, 5]);
        let got = q.get_tuple_multi(usize::MAX);
        assert_eq!(got, vec![(1, vec![1, 2, 3]), (2, vec![4, 5])]);
    }

    #[test]
    fn spill_queue_round_trips_past_budget() {
        let mut q = SpillQueue::new(16);
        for i in 0..20u64 {
            q.put_tuple(i, vec![i as u8; 4]);
        }
        assert!(q.is_spilled());
        let mut seen = Vec::new();
        loop {
            let batch = q.get_tuple_multi(8);
            if batch.is_empty() {
                break;
            }
            seen.extend(batch);
        }
        assert_eq!(seen.len(), 20);
        for (i, (rdc_id, data)) in seen.into_iter().enumerate() {
            assert_eq!(rdc_id, i as u64);
            assert_eq!(data, vec![i as u8; 4]);
        }
    }

    #[test]
    fn spill_queue_drains_back_to_unspilled() {
        let mut q = SpillQueue::new(8);
        q.put_tuple(1, vec![0; 32]);
        assert!(q.is_spilled());
        while !q.get_tuple_multi(1024).is_empty() {}
        assert!(!q.is_spilled());
    }

    #[test]
    fn fifo_order_survives_once_spilling_has_started() {
        // Budget fits exactly one small tuple; the second forces a spill.
        // A third, smaller tuple that would fit in memory on its own must
        // still go to the spill file so it doesn't drain ahead of the
        // second tuple.
        let mut q = SpillQueue::new(4);
        q.put_tuple(1, vec![1, 2, 3, 4]);
        q.put_tuple(2, vec![5, 6, 7, 8]);
        assert!(q.is_spilled());
        q.put_tuple(3, vec![9]);

        let mut all = Vec::new();
        loop {
            let batch = q.get_tuple_multi(1024);
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
        }
        assert_eq!(all, vec![(1, vec![1, 2, 3, 4]), (2, vec![5, 6, 7, 8]), (3, vec![9])]);
    }
}

/*++

Licensed under the Apache-2.0 license.

File Name:

    queue.rs

Abstract:

    File contains the per-engine program queue: a fixed pool of program
    slots used as a circular buffer, and the guard that holds a slot while
    its program is built.

--*/

use crate::dma::{DmaBuffer, DmaDirection, DmaMappingList, DmaOps};
use crate::driver::DriverStats;
use crate::program::{CompletionStatus, Delivery, Program, SlotState};
use crate::regs::C3Regs;
use c3_error::{C3Error, C3Result};
use log::{debug, error, trace, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct ProgramSlot {
    state: SlotState,

    /// Device address of the slot's instruction buffer
    dev_addr: u32,

    program: Program,

    /// Raw engine status recorded at completion
    status: u32,

    delivery: Option<Delivery>,

    mappings: DmaMappingList,
}

struct ProgramQueue {
    slots: Vec<ProgramSlot>,

    /// Oldest slot not yet drained
    start: usize,

    /// Slot running on the engine, or `end` when idle
    current: usize,

    /// Next slot to fill
    end: usize,

    busy: bool,
}

impl ProgramQueue {
    fn next(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }

    fn distance(&self, from: usize, to: usize) -> usize {
        let n = self.slots.len();
        (to + n - from) % n
    }

    fn len(&self) -> usize {
        self.distance(self.start, self.end)
    }

    fn is_full(&self) -> bool {
        self.len() >= self.slots.len() - 1
    }
}

/// A completed program taken off the queue by the drain.
struct Completed {
    index: usize,
    status: CompletionStatus,
    delivery: Option<Delivery>,
}

/// One IDS execution engine and its program queue.
pub struct Engine {
    index: usize,
    regs: C3Regs,
    dma: Arc<dyn DmaOps>,
    stats: Arc<DriverStats>,
    slot_size: usize,
    queue: Mutex<ProgramQueue>,

    /// Serializes drains so completions are delivered in queue order
    drain: Mutex<()>,
}

impl Engine {
    pub(crate) fn new(
        index: usize,
        regs: C3Regs,
        dma: Arc<dyn DmaOps>,
        stats: Arc<DriverStats>,
        slot_addrs: &[u32],
        slot_size: usize,
    ) -> Self {
        let slots = slot_addrs
            .iter()
            .map(|&dev_addr| ProgramSlot {
                state: SlotState::Free,
                dev_addr,
                program: Program::default(),
                status: 0,
                delivery: None,
                mappings: DmaMappingList::default(),
            })
            .collect();
        Self {
            index,
            regs,
            dma,
            stats,
            slot_size,
            queue: Mutex::new(ProgramQueue {
                slots,
                start: 0,
                current: 0,
                end: 0,
                busy: false,
            }),
            drain: Mutex::new(()),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, ProgramQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.lock_queue().slots.len()
    }

    /// Slots filled and not yet drained, running and completed included.
    pub fn queue_len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Programs queued or running.
    pub fn outstanding(&self) -> usize {
        let queue = self.lock_queue();
        queue.distance(queue.current, queue.end)
    }

    pub fn is_busy(&self) -> bool {
        self.lock_queue().busy
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.lock_queue().slots.get(index).map(|slot| slot.state)
    }

    pub(crate) fn slot_addrs(&self) -> Vec<u32> {
        self.lock_queue()
            .slots
            .iter()
            .map(|slot| slot.dev_addr)
            .collect()
    }

    /// Reserves the slot at the end of the queue.
    ///
    /// The engine lock is held by the returned guard until the program is
    /// enqueued or the guard is dropped.
    pub fn acquire_slot(&self) -> C3Result<SlotGuard<'_>> {
        let mut queue = self.lock_queue();
        if queue.is_full() {
            self.stats.queue_full.fetch_add(1, Ordering::Relaxed);
            debug!("c3: engine {} queue full", self.index);
            Err(C3Error::DRIVER_QUEUE_FULL)?
        }
        let index = queue.end;
        let slot = &mut queue.slots[index];
        if slot.state != SlotState::Free {
            error!(
                "c3: engine {} slot {index} at queue end is {:?}",
                self.index, slot.state
            );
            Err(C3Error::DRIVER_QUEUE_CORRUPTED)?
        }
        slot.state = SlotState::Filled;
        Ok(SlotGuard {
            engine: self,
            queue,
            index,
            enqueued: false,
        })
    }

    /// Builds a program with `fill` and enqueues it. Any error from `fill`
    /// or the enqueue aborts the slot.
    ///
    /// # Returns
    ///
    /// * `usize` - Index of the slot the program was queued in
    pub fn submit<F>(&self, delivery: Delivery, fill: F) -> C3Result<usize>
    where
        F: FnOnce(&mut SlotGuard<'_>) -> C3Result<()>,
    {
        let mut slot = self.acquire_slot()?;
        fill(&mut slot)?;
        let index = slot.index();
        slot.enqueue(delivery)?;
        Ok(index)
    }

    /// Records the completion of the running program and starts the next
    /// queued one.
    ///
    /// # Returns
    ///
    /// * `bool` - True when a completed program awaits the drain
    pub(crate) fn complete_running(&self, raw_status: u32) -> bool {
        let mut queue = self.lock_queue();
        if !queue.busy {
            warn!(
                "c3: engine {} signalled completion while idle, status {raw_status:#010x}",
                self.index
            );
            return false;
        }
        let current = queue.current;
        let slot = &mut queue.slots[current];
        slot.status = raw_status;
        slot.state = SlotState::Done;

        let next = queue.next(current);
        queue.current = next;
        if next != queue.end {
            let slot = &mut queue.slots[next];
            slot.state = SlotState::Running;
            let dev_addr = slot.dev_addr;
            self.regs.write_ip(self.index, dev_addr);
            trace!("c3: engine {} slot {next} started", self.index);
        } else {
            queue.busy = false;
            trace!("c3: engine {} idle", self.index);
        }
        true
    }

    /// Releases and delivers every completed program, oldest first.
    ///
    /// Programs are retired one at a time, so a delivery that unwinds leaves
    /// the later completions queued for the next drain.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of programs delivered
    pub fn drain_completions(&self) -> usize {
        let _drain = self.drain.lock().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        while let Some(done) = self.retire_oldest() {
            self.deliver(done);
            count += 1;
        }
        count
    }

    /// Unmaps the oldest completed program and frees its slot.
    fn retire_oldest(&self) -> Option<Completed> {
        let mut queue = self.lock_queue();
        if queue.start == queue.current {
            return None;
        }
        let index = queue.start;
        let slot = &mut queue.slots[index];
        slot.mappings.release_all(&*self.dma);
        let done = Completed {
            index,
            status: CompletionStatus::from_raw(slot.status),
            delivery: slot.delivery.take(),
        };
        slot.program.clear();
        slot.state = SlotState::Free;
        queue.start = queue.next(index);
        Some(done)
    }

    fn deliver(&self, done: Completed) {
        if done.status.is_ok() {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                "c3: engine {} slot {} failed, status {:#010x} opcode {:#04x}",
                self.index,
                done.index,
                done.status.raw(),
                done.status.fault_opcode()
            );
        }
        match done.delivery {
            Some(Delivery::Callback(func, param)) => {
                let status = done.status;
                if panic::catch_unwind(AssertUnwindSafe(|| func(param, status))).is_err() {
                    error!(
                        "c3: engine {} slot {} callback panicked",
                        self.index, done.index
                    );
                }
            }
            Some(Delivery::Waiter(call)) => {
                if let Err(err) = call.complete(done.status) {
                    error!("c3: engine {} slot {}: {err}", self.index, done.index);
                }
            }
            None => error!(
                "c3: engine {} slot {} completed without a delivery",
                self.index, done.index
            ),
        }
    }
}

/// Exclusive hold on one free slot of an engine.
///
/// Dropping the guard without calling [`SlotGuard::enqueue`] aborts the
/// program: every attached mapping is released and the slot is freed.
pub struct SlotGuard<'a> {
    engine: &'a Engine,
    queue: MutexGuard<'a, ProgramQueue>,
    index: usize,
    enqueued: bool,
}

impl SlotGuard<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn engine(&self) -> usize {
        self.engine.index
    }

    fn slot(&mut self) -> &mut ProgramSlot {
        let index = self.index;
        &mut self.queue.slots[index]
    }

    pub fn program(&mut self) -> &mut Program {
        &mut self.slot().program
    }

    /// Maps `buf` and attaches the mapping to the slot. On failure every
    /// mapping attached so far is released.
    pub fn prepare_dma(
        &mut self,
        buf: Option<&DmaBuffer>,
        len: u32,
        dir: DmaDirection,
    ) -> C3Result<u32> {
        let engine = self.engine;
        self.slot()
            .mappings
            .prepare_dma(&*engine.dma, buf, len, dir)
    }

    pub fn mapping_count(&self) -> usize {
        self.queue.slots[self.index].mappings.len()
    }

    /// Publishes the program. Starts the engine if it is idle, otherwise the
    /// program waits behind the running one.
    pub fn enqueue(mut self, delivery: Delivery) -> C3Result<()> {
        let engine = self.engine;
        let index = self.index;
        let slot_size = engine.slot_size;

        let slot = self.slot();
        slot.program.seal(slot_size)?;
        engine
            .dma
            .write_coherent(slot.dev_addr, &slot.program.to_bytes())?;
        slot.delivery = Some(delivery);
        slot.state = SlotState::Queued;
        let dev_addr = slot.dev_addr;

        let queue = &mut *self.queue;
        queue.end = queue.next(queue.end);
        if queue.busy {
            debug!("c3: engine {} slot {index} queued", engine.index);
        } else {
            queue.busy = true;
            queue.current = index;
            queue.slots[index].state = SlotState::Running;
            engine.regs.write_ip(engine.index, dev_addr);
            debug!(
                "c3: engine {} slot {index} started at {dev_addr:#010x}",
                engine.index
            );
        }
        engine.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.enqueued = true;
        Ok(())
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.enqueued {
            return;
        }
        let engine = self.engine;
        let index = self.index;
        let slot = self.slot();
        let released = slot.mappings.release_all(&*engine.dma);
        slot.program.clear();
        slot.delivery = None;
        slot.state = SlotState::Free;
        debug!(
            "c3: engine {} slot {index} aborted, {released} mappings released",
            engine.index
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDma, FakeRegisters};
    use c3_api::Instr;
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        regs: Arc<FakeRegisters>,
        dma: Arc<FakeDma>,
        stats: Arc<DriverStats>,
        engine: Engine,
    }

    fn harness(slots: usize, slot_size: usize) -> Harness {
        let regs = FakeRegisters::new();
        let dma = Arc::new(FakeDma::new());
        let stats = Arc::new(DriverStats::default());
        let addrs: Vec<u32> = (0..slots)
            .map(|_| dma.alloc_coherent(slot_size as u32).unwrap())
            .collect();
        let engine = Engine::new(
            0,
            C3Regs::new(regs.clone(), 0),
            dma.clone(),
            stats.clone(),
            &addrs,
            slot_size,
        );
        Harness {
            regs,
            dma,
            stats,
            engine,
        }
    }

    fn counting_delivery(counter: &Arc<AtomicUsize>) -> Delivery {
        let counter = counter.clone();
        Delivery::Callback(
            Arc::new(move |_: usize, _: CompletionStatus| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            0,
        )
    }

    fn rng_program(slot: &mut SlotGuard<'_>) -> C3Result<()> {
        let buf = DmaBuffer::zeroed(16);
        let dst = slot.prepare_dma(Some(&buf), 16, DmaDirection::FromDevice)?;
        slot.program().push(Instr::Rng { dst, len: 16 })
    }

    /// Completes the running program as the interrupt path would.
    fn finish(h: &Harness) {
        assert!(h.engine.complete_running(0x0000_0102));
    }

    #[test]
    fn test_backpressure() {
        let h = harness(4, 256);
        let delivered = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            h.engine
                .submit(counting_delivery(&delivered), rng_program)
                .unwrap();
        }
        assert_eq!(
            h.engine.submit(counting_delivery(&delivered), rng_program),
            Err(C3Error::DRIVER_QUEUE_FULL)
        );
        assert_eq!(h.stats.queue_full.load(Ordering::Relaxed), 1);

        // Completion alone does not free the slot; the drain does.
        finish(&h);
        assert!(h.engine.acquire_slot().is_err());
        assert_eq!(h.engine.drain_completions(), 1);
        h.engine
            .submit(counting_delivery(&delivered), rng_program)
            .unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_ip_write_per_start() {
        let h = harness(8, 256);
        let delivered = Arc::new(AtomicUsize::new(0));
        assert!(!h.engine.is_busy());

        h.engine
            .submit(counting_delivery(&delivered), rng_program)
            .unwrap();
        assert_eq!(h.regs.ip_writes().len(), 1);
        assert!(h.engine.is_busy());

        // Appending to a busy engine does not touch the IP register.
        h.engine
            .submit(counting_delivery(&delivered), rng_program)
            .unwrap();
        assert_eq!(h.regs.ip_writes().len(), 1);
        assert_eq!(h.engine.outstanding(), 2);

        finish(&h);
        assert_eq!(h.regs.ip_writes().len(), 2);
        assert!(h.engine.is_busy());

        finish(&h);
        assert_eq!(h.regs.ip_writes().len(), 2);
        assert!(!h.engine.is_busy());
        assert_eq!(h.engine.outstanding(), 0);

        // Idle completion is ignored and starts nothing.
        assert!(!h.engine.complete_running(0x0000_0102));
        assert_eq!(h.regs.ip_writes().len(), 2);

        assert_eq!(h.engine.drain_completions(), 2);
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ip_write_targets_slot() {
        let h = harness(4, 256);
        let addrs = h.engine.slot_addrs();
        let delivered = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            h.engine
                .submit(counting_delivery(&delivered), rng_program)
                .unwrap();
        }
        finish(&h);
        assert_eq!(h.regs.ip_writes(), vec![(0, addrs[0]), (0, addrs[1])]);

        // The program was published into the slot's coherent buffer.
        let words = h.dma.coherent_bytes(addrs[0]);
        assert_eq!(words[3], 0x30);
    }

    #[test]
    fn test_drop_aborts() {
        let h = harness(4, 256);
        {
            let mut slot = h.engine.acquire_slot().unwrap();
            rng_program(&mut slot).unwrap();
            rng_program(&mut slot).unwrap();
            assert_eq!(slot.mapping_count(), 2);
        }
        assert_eq!(h.dma.live_mappings(), 0);
        assert_eq!(h.dma.unmap_count(), 2);
        assert_eq!(h.engine.slot_state(0), Some(SlotState::Free));
        assert_eq!(h.engine.queue_len(), 0);
        assert!(h.regs.ip_writes().is_empty());
    }

    #[test]
    fn test_fill_error_aborts() {
        let h = harness(4, 256);
        let delivered = Arc::new(AtomicUsize::new(0));
        let result = h.engine.submit(counting_delivery(&delivered), |slot| {
            rng_program(slot)?;
            slot.prepare_dma(None, 16, DmaDirection::ToDevice)?;
            Ok(())
        });
        assert_eq!(result, Err(C3Error::DRIVER_NULL_BUFFER));
        assert_eq!(h.dma.live_mappings(), 0);
        assert_eq!(h.engine.queue_len(), 0);
        assert_eq!(h.stats.submitted.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_program_too_large_aborts() {
        let h = harness(4, 16);
        let delivered = Arc::new(AtomicUsize::new(0));
        let result = h.engine.submit(counting_delivery(&delivered), |slot| {
            rng_program(slot)?;
            rng_program(slot)
        });
        assert_eq!(result, Err(C3Error::DRIVER_PROGRAM_TOO_LARGE));
        assert_eq!(h.dma.live_mappings(), 0);
        assert!(h.regs.ip_writes().is_empty());
        assert!(!h.engine.is_busy());
    }

    #[test]
    fn test_panicking_callback_does_not_stop_drain() {
        let h = harness(4, 256);
        let delivered = Arc::new(AtomicUsize::new(0));
        let panicking = Delivery::Callback(
            Arc::new(|_: usize, _: CompletionStatus| panic!("callback failed")),
            0,
        );
        h.engine.submit(panicking, rng_program).unwrap();
        h.engine
            .submit(counting_delivery(&delivered), rng_program)
            .unwrap();
        finish(&h);
        finish(&h);

        assert_eq!(h.engine.drain_completions(), 2);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(h.dma.live_mappings(), 0);
        assert_eq!(h.dma.unmap_count(), 2);
        assert_eq!(h.engine.queue_len(), 0);
        assert_eq!(h.stats.completed.load(Ordering::Relaxed), 2);
        assert_eq!(h.engine.drain_completions(), 0);
    }

    #[test]
    fn test_mappings_released_before_delivery() {
        let h = harness(2, 256);
        let seen = Arc::new(Mutex::new(None));
        let delivery = {
            let dma = h.dma.clone();
            let seen = seen.clone();
            Delivery::Callback(
                Arc::new(move |_: usize, _: CompletionStatus| {
                    *seen.lock().unwrap() = Some(dma.live_mappings());
                }),
                0,
            )
        };
        h.engine.submit(delivery, rng_program).unwrap();
        assert_eq!(h.dma.live_mappings(), 1);
        finish(&h);

        // Single usable slot: it is only reusable once the drain retired it.
        let delivered = Arc::new(AtomicUsize::new(0));
        assert_eq!(
            h.engine.submit(counting_delivery(&delivered), rng_program),
            Err(C3Error::DRIVER_QUEUE_FULL)
        );
        assert_eq!(h.engine.drain_completions(), 1);
        assert_eq!(*seen.lock().unwrap(), Some(0));
        h.engine
            .submit(counting_delivery(&delivered), rng_program)
            .unwrap();
    }

    #[test]
    fn test_wraparound() {
        let h = harness(3, 256);
        let delivered = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            h.engine
                .submit(counting_delivery(&delivered), rng_program)
                .unwrap();
            finish(&h);
            assert_eq!(h.engine.drain_completions(), 1);
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 10);
        assert_eq!(h.dma.live_mappings(), 0);
        assert_eq!(h.stats.completed.load(Ordering::Relaxed), 10);
    }
}

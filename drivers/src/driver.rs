/*++

Licensed under the Apache-2.0 license.

File Name:

    driver.rs

Abstract:

    File contains the driver context: the engine registry, the deferred
    completion worker and the driver statistics.

--*/

use crate::config::{DeferredMode, DriverConfig};
use crate::dma::DmaOps;
use crate::queue::{Engine, SlotGuard};
use crate::program::Delivery;
use crate::regs::{C3Regs, RegisterIo};
use c3_error::{C3Error, C3Result};
use c3_registers::{Id, C3_MAX_ENGINES};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};

/// Board or bus layer that locates the device.
pub trait BusDiscovery {
    /// Base address of the C3 register window.
    fn bus_discover(&self) -> C3Result<u32>;

    /// Interrupt line the device signals on.
    fn bus_interrupt_line(&self) -> u32;
}

/// Driver counters.
#[derive(Debug, Default)]
pub struct DriverStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub queue_full: AtomicU64,
    pub abandoned: AtomicU64,
}

impl DriverStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub queue_full: u64,
    pub abandoned: u64,
}

struct Tasklet {
    sender: Mutex<Option<Sender<usize>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

enum Deferred {
    Tasklet(Tasklet),
    Manual(Mutex<VecDeque<usize>>),
}

pub(crate) struct DriverShared {
    pub(crate) config: DriverConfig,
    pub(crate) regs: C3Regs,
    pub(crate) dma: Arc<dyn DmaOps>,
    pub(crate) engines: Vec<Engine>,
    pub(crate) stats: Arc<DriverStats>,
    pub(crate) next_engine: AtomicUsize,
    irq_line: Option<u32>,
    deferred: Deferred,
}

impl DriverShared {
    /// Hands `engine` to the deferred context.
    pub(crate) fn schedule_drain(&self, engine: usize) {
        match &self.deferred {
            Deferred::Tasklet(tasklet) => {
                let sender = tasklet.sender.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(sender) = sender.as_ref() {
                    if sender.send(engine).is_err() {
                        error!("c3: tasklet gone, engine {engine} not drained");
                    }
                }
            }
            Deferred::Manual(pending) => pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(engine),
        }
    }
}

impl Drop for DriverShared {
    fn drop(&mut self) {
        for engine in self.engines.iter() {
            // Completed programs still get their delivery.
            let drained = engine.drain_completions();
            if drained > 0 {
                debug!("c3: engine {} drained {drained} at teardown", engine.index());
            }
            // The device may still read these slots and write through the
            // mappings of queued programs, so they are left in place.
            if engine.outstanding() > 0 {
                warn!(
                    "c3: engine {} torn down with {} programs outstanding, slots not freed",
                    engine.index(),
                    engine.outstanding()
                );
                continue;
            }
            for addr in engine.slot_addrs() {
                self.dma.free_coherent(addr);
            }
        }
    }
}

fn tasklet_main(shared: Weak<DriverShared>, receiver: mpsc::Receiver<usize>) {
    while let Ok(engine) = receiver.recv() {
        let Some(driver) = shared.upgrade() else {
            break;
        };
        if let Some(engine) = driver.engines.get(engine) {
            engine.drain_completions();
        }
    }
}

/// The C3 driver.
pub struct C3Driver {
    pub(crate) shared: Arc<DriverShared>,
}

impl C3Driver {
    /// Creates the driver for a device whose registers are reached through
    /// `io` and whose memory is mapped through `dma`.
    ///
    /// # Arguments
    ///
    /// * `config` - Driver configuration
    /// * `io` - Register access
    /// * `dma` - DMA mapping services
    pub fn new(config: DriverConfig, io: Arc<dyn RegisterIo>, dma: Arc<dyn DmaOps>) -> C3Result<Self> {
        Self::build(config, io, dma, None)
    }

    /// Locates the device through `bus` and creates the driver for it.
    pub fn probe(
        mut config: DriverConfig,
        bus: &dyn BusDiscovery,
        io: Arc<dyn RegisterIo>,
        dma: Arc<dyn DmaOps>,
    ) -> C3Result<Self> {
        config.base = bus.bus_discover()?;
        let irq_line = bus.bus_interrupt_line();
        Self::build(config, io, dma, Some(irq_line))
    }

    fn build(
        config: DriverConfig,
        io: Arc<dyn RegisterIo>,
        dma: Arc<dyn DmaOps>,
        irq_line: Option<u32>,
    ) -> C3Result<Self> {
        if config.engines == 0 || config.engines > C3_MAX_ENGINES {
            Err(C3Error::DRIVER_INVALID_ENGINE)?
        }
        if config.slots_per_engine < 2 || config.slot_size < 4 || config.slot_size % 4 != 0 {
            Err(C3Error::DRIVER_SLOT_ALLOC_FAILED)?
        }

        let regs = C3Regs::new(io, config.base);
        let id = regs.id();
        if id.read(Id::HW_ID) != config.hw_id {
            error!(
                "c3: no device at {:#010x}, id register {:#010x}",
                config.base,
                id.get()
            );
            Err(C3Error::DRIVER_DEVICE_NOT_FOUND)?
        }

        let slot_addrs = Self::alloc_slots(&config, dma.as_ref())?;
        let stats = Arc::new(DriverStats::default());
        let engines = slot_addrs
            .iter()
            .enumerate()
            .map(|(index, addrs)| {
                Engine::new(
                    index,
                    regs.clone(),
                    dma.clone(),
                    stats.clone(),
                    addrs,
                    config.slot_size,
                )
            })
            .collect();

        let (deferred, receiver) = match config.deferred {
            DeferredMode::Tasklet => {
                let (sender, receiver) = mpsc::channel();
                let tasklet = Tasklet {
                    sender: Mutex::new(Some(sender)),
                    worker: Mutex::new(None),
                };
                (Deferred::Tasklet(tasklet), Some(receiver))
            }
            DeferredMode::Manual => (Deferred::Manual(Mutex::new(VecDeque::new())), None),
        };

        info!(
            "c3: revision {:#x} at {:#010x}, {} engines x {} slots of {} bytes",
            id.read(Id::REVISION),
            config.base,
            config.engines,
            config.slots_per_engine,
            config.slot_size
        );

        let shared = Arc::new(DriverShared {
            config,
            regs,
            dma,
            engines,
            stats,
            next_engine: AtomicUsize::new(0),
            irq_line,
            deferred,
        });

        if let (Deferred::Tasklet(tasklet), Some(receiver)) = (&shared.deferred, receiver) {
            let weak = Arc::downgrade(&shared);
            let worker = thread::Builder::new()
                .name("c3-tasklet".into())
                .spawn(move || tasklet_main(weak, receiver))
                .map_err(|_| C3Error::DRIVER_INTERNAL)?;
            *tasklet.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
        }

        Ok(Self { shared })
    }

    /// Allocates the coherent program buffers of every engine. Nothing stays
    /// allocated on failure.
    fn alloc_slots(config: &DriverConfig, dma: &dyn DmaOps) -> C3Result<Vec<Vec<u32>>> {
        let mut engines: Vec<Vec<u32>> = Vec::with_capacity(config.engines);
        for _ in 0..config.engines {
            let mut slots = Vec::with_capacity(config.slots_per_engine);
            for _ in 0..config.slots_per_engine {
                match dma.alloc_coherent(config.slot_size as u32) {
                    Ok(addr) => slots.push(addr),
                    Err(err) => {
                        error!("c3: program slot allocation failed: {err}");
                        engines
                            .iter()
                            .flatten()
                            .chain(slots.iter())
                            .for_each(|addr| dma.free_coherent(*addr));
                        Err(C3Error::DRIVER_SLOT_ALLOC_FAILED)?
                    }
                }
            }
            engines.push(slots);
        }
        Ok(engines)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    pub fn regs(&self) -> &C3Regs {
        &self.shared.regs
    }

    /// Interrupt line reported by the bus layer at probe time.
    pub fn irq_line(&self) -> Option<u32> {
        self.shared.irq_line
    }

    pub fn engine_count(&self) -> usize {
        self.shared.engines.len()
    }

    pub fn engine(&self, engine: usize) -> C3Result<&Engine> {
        self.shared
            .engines
            .get(engine)
            .ok_or(C3Error::DRIVER_INVALID_ENGINE)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// See [`Engine::acquire_slot`].
    pub fn acquire_slot(&self, engine: usize) -> C3Result<SlotGuard<'_>> {
        self.engine(engine)?.acquire_slot()
    }

    /// See [`Engine::submit`].
    pub fn submit<F>(&self, engine: usize, delivery: Delivery, fill: F) -> C3Result<usize>
    where
        F: FnOnce(&mut SlotGuard<'_>) -> C3Result<()>,
    {
        self.engine(engine)?.submit(delivery, fill)
    }

    /// See [`Engine::drain_completions`].
    pub fn drain_completions(&self, engine: usize) -> C3Result<usize> {
        Ok(self.engine(engine)?.drain_completions())
    }

    /// Drains every engine scheduled by the interrupt path. Only does work
    /// in [`DeferredMode::Manual`].
    ///
    /// # Returns
    ///
    /// * `usize` - Number of programs delivered
    pub fn run_deferred(&self) -> usize {
        let Deferred::Manual(pending) = &self.shared.deferred else {
            return 0;
        };
        let mut delivered = 0;
        loop {
            let next = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(engine) = next else {
                break;
            };
            if let Some(engine) = self.shared.engines.get(engine) {
                delivered += engine.drain_completions();
            }
        }
        delivered
    }
}

impl Drop for C3Driver {
    fn drop(&mut self) {
        if let Deferred::Tasklet(tasklet) = &self.shared.deferred {
            tasklet
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let worker = tasklet
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(worker) = worker {
                if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                    error!("c3: tasklet panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::{DmaBuffer, DmaDirection};
    use crate::irq::IrqReturn;
    use crate::program::{CompletionStatus, Delivery};
    use crate::testing::{FakeDma, FakeRegisters};
    use c3_api::Instr;

    struct FakeBus;

    impl BusDiscovery for FakeBus {
        fn bus_discover(&self) -> C3Result<u32> {
            Ok(0)
        }

        fn bus_interrupt_line(&self) -> u32 {
            42
        }
    }

    fn manual() -> DriverConfig {
        DriverConfig {
            slots_per_engine: 4,
            slot_size: 256,
            deferred: DeferredMode::Manual,
            ..Default::default()
        }
    }

    #[test]
    fn test_new_allocates_slots() {
        let dma = Arc::new(FakeDma::new());
        let driver = C3Driver::new(manual(), FakeRegisters::new(), dma.clone()).unwrap();
        assert_eq!(driver.engine_count(), 2);
        assert_eq!(driver.engine(1).unwrap().capacity(), 4);
        assert_eq!(driver.engine(2).err(), Some(C3Error::DRIVER_INVALID_ENGINE));
        assert_eq!(driver.irq_line(), None);
        drop(driver);
    }

    #[test]
    fn test_probe() {
        let driver = C3Driver::probe(
            manual(),
            &FakeBus,
            FakeRegisters::new(),
            Arc::new(FakeDma::new()),
        )
        .unwrap();
        assert_eq!(driver.irq_line(), Some(42));
    }

    #[test]
    fn test_wrong_device() {
        let result = C3Driver::new(
            manual(),
            FakeRegisters::with_hw_id(0x1234),
            Arc::new(FakeDma::new()),
        );
        assert_eq!(result.err(), Some(C3Error::DRIVER_DEVICE_NOT_FOUND));
    }

    #[test]
    fn test_bad_config() {
        let config = DriverConfig {
            engines: C3_MAX_ENGINES + 1,
            ..manual()
        };
        let result = C3Driver::new(config, FakeRegisters::new(), Arc::new(FakeDma::new()));
        assert_eq!(result.err(), Some(C3Error::DRIVER_INVALID_ENGINE));

        let config = DriverConfig {
            slots_per_engine: 1,
            ..manual()
        };
        let result = C3Driver::new(config, FakeRegisters::new(), Arc::new(FakeDma::new()));
        assert_eq!(result.err(), Some(C3Error::DRIVER_SLOT_ALLOC_FAILED));
    }

    #[test]
    fn test_slot_alloc_failure() {
        let dma = Arc::new(FakeDma::new());
        dma.fail_alloc();
        let result = C3Driver::new(manual(), FakeRegisters::new(), dma);
        assert_eq!(result.err(), Some(C3Error::DRIVER_SLOT_ALLOC_FAILED));
    }

    #[test]
    fn test_teardown_delivers_completed_programs() {
        let regs = FakeRegisters::new();
        let dma = Arc::new(FakeDma::new());
        let driver = C3Driver::new(manual(), regs.clone(), dma.clone()).unwrap();
        assert_eq!(dma.live_coherent(), 8);

        let delivered = Arc::new(AtomicU64::new(0));
        for engine in 0..2 {
            let counter = delivered.clone();
            let delivery = Delivery::Callback(
                Arc::new(move |_: usize, _: CompletionStatus| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                0,
            );
            driver
                .submit(engine, delivery, |slot| {
                    let buf = DmaBuffer::zeroed(16);
                    let dst = slot.prepare_dma(Some(&buf), 16, DmaDirection::FromDevice)?;
                    slot.program().push(Instr::Rng { dst, len: 16 })
                })
                .unwrap();
        }

        // Engine 0 finished but was never drained; engine 1 is still running.
        regs.finish(0, 0);
        assert_eq!(driver.on_completion_signal(), IrqReturn::Handled);
        drop(driver);

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(dma.live_mappings(), 1);
        assert_eq!(dma.live_coherent(), 4);
    }

    #[test]
    fn test_tasklet_shutdown() {
        let config = DriverConfig {
            deferred: DeferredMode::Tasklet,
            ..manual()
        };
        let driver = C3Driver::new(config, FakeRegisters::new(), Arc::new(FakeDma::new())).unwrap();
        assert_eq!(driver.run_deferred(), 0);
        // Dropping joins the worker.
        drop(driver);
    }
}

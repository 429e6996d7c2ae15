// Licensed under the Apache-2.0 license

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use c3_drivers::{BusDiscovery, C3Driver, DriverConfig, IrqReturn};
use c3_emu_bus::Clock;
use c3_emu_periph::{C3Accelerator, C3Args, SharedSystemMemory};
use c3_error::C3Result;
use c3_registers::C3_MAX_ENGINES;

mod dma;
pub mod mmio;

pub use dma::{DmaCounters, SystemMemoryDma};
use mmio::BusRegisterIo;

/// Handler attached to the model's interrupt line.
pub type IrqHandler = Box<dyn Fn() -> IrqReturn + Send + Sync>;

/// Register I/O of the model's device.
pub type ModelRegisterIo = BusRegisterIo<C3Accelerator>;

pub struct InitParams {
    // Size of the system memory the device and the DMA mapper share
    pub memory_size: u32,

    // Number of IDS engines
    pub engines: usize,

    // Clock cycles each instruction takes
    pub latency_per_instruction: u64,

    // Upper bound of the random cycles added to each program
    pub latency_jitter: u64,

    // Seed of the latency jitter and the RNG instruction
    pub seed: u64,

    // Address the register window is discovered at
    pub base: u32,

    // Interrupt line reported by bus discovery
    pub irq_line: u32,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            memory_size: 4 * 1024 * 1024,
            engines: 2,
            latency_per_instruction: 100,
            latency_jitter: 50,
            seed: 0,
            base: 0x4000_0000,
            irq_line: 11,
        }
    }
}

struct ModelInner {
    device: Arc<Mutex<C3Accelerator>>,
    clock: Clock,
    memory: SharedSystemMemory,
    io: Arc<ModelRegisterIo>,
    dma: Arc<SystemMemoryDma>,
    base: u32,
    irq_line: u32,
    irq_handlers: Mutex<Vec<IrqHandler>>,
}

/// An emulated C3 device, its system memory and its interrupt line.
///
/// Clones share the same device.
#[derive(Clone)]
pub struct C3Model {
    inner: Arc<ModelInner>,
}

impl C3Model {
    pub fn new(params: InitParams) -> Result<Self, Box<dyn Error>> {
        if !(1..=C3_MAX_ENGINES).contains(&params.engines) {
            return Err(format!(
                "engine count {} outside 1..={C3_MAX_ENGINES}",
                params.engines
            )
            .into());
        }
        let clock = Clock::new();
        let memory = SharedSystemMemory::new(params.memory_size);
        let device = Arc::new(Mutex::new(C3Accelerator::new(
            &clock,
            memory.clone(),
            C3Args {
                engines: params.engines,
                latency_per_instruction: params.latency_per_instruction,
                latency_jitter: params.latency_jitter,
                seed: params.seed,
            },
        )));
        let io = Arc::new(BusRegisterIo::new(device.clone(), params.base));
        let dma = Arc::new(SystemMemoryDma::new(memory.clone()));
        Ok(Self {
            inner: Arc::new(ModelInner {
                device,
                clock,
                memory,
                io,
                dma,
                base: params.base,
                irq_line: params.irq_line,
                irq_handlers: Mutex::new(Vec::new()),
            }),
        })
    }

    fn device(&self) -> MutexGuard<'_, C3Accelerator> {
        self.inner
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_io(&self) -> Arc<ModelRegisterIo> {
        self.inner.io.clone()
    }

    pub fn dma(&self) -> Arc<SystemMemoryDma> {
        self.inner.dma.clone()
    }

    pub fn memory(&self) -> &SharedSystemMemory {
        &self.inner.memory
    }

    /// Simulated cycles since the model was created.
    pub fn now(&self) -> u64 {
        self.inner.clock.now()
    }

    pub fn programs_started(&self, engine: usize) -> u64 {
        self.device().programs_started(engine)
    }

    /// IP writes the device refused because the engine was already running.
    pub fn rejected_starts(&self, engine: usize) -> u64 {
        self.device().rejected_starts(engine)
    }

    pub fn irq_asserted(&self) -> bool {
        self.device().irq_asserted()
    }

    /// True when no program is running and no interrupt is pending.
    pub fn is_idle(&self) -> bool {
        self.inner.clock.time_to_next_action().is_none() && !self.irq_asserted()
    }

    /// Attaches `handler` to the interrupt line. Every handler is called
    /// while the line is asserted.
    pub fn request_irq(&self, handler: IrqHandler) {
        self.inner
            .irq_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Attaches the interrupt handler of `driver` without keeping it alive.
    pub fn attach(&self, driver: &Arc<C3Driver>) {
        let driver = Arc::downgrade(driver);
        self.request_irq(Box::new(move || match driver.upgrade() {
            Some(driver) => driver.on_completion_signal(),
            None => IrqReturn::NotMine,
        }));
    }

    /// Probes a driver against this device and attaches its interrupt
    /// handler.
    pub fn probe(&self, config: DriverConfig) -> C3Result<Arc<C3Driver>> {
        let driver = Arc::new(C3Driver::probe(
            config,
            self,
            self.register_io(),
            self.dma(),
        )?);
        self.attach(&driver);
        Ok(driver)
    }

    /// Advances the clock by `cycles`, then services the interrupt line
    /// with the device unlocked.
    pub fn step(&self, cycles: u64) {
        {
            let mut device = self.device();
            self.inner
                .clock
                .increment_and_process_timer_actions(cycles, &mut *device);
        }
        self.service_irq();
    }

    /// Advances the clock to the next scheduled device event.
    ///
    /// Returns false when nothing is scheduled.
    pub fn step_to_next_event(&self) -> bool {
        match self.inner.clock.time_to_next_action() {
            Some(cycles) => {
                self.step(cycles.max(1));
                true
            }
            None => {
                self.service_irq();
                false
            }
        }
    }

    /// Runs until every started program has completed and been
    /// acknowledged.
    pub fn run_until_idle(&self) {
        while self.step_to_next_event() {}
    }

    fn service_irq(&self) {
        while self.irq_asserted() {
            let handled = {
                let handlers = self
                    .inner
                    .irq_handlers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                handlers
                    .iter()
                    .filter(|handler| handler() == IrqReturn::Handled)
                    .count()
            };
            if handled == 0 {
                log::warn!(
                    "c3-model: irq {} asserted and no handler claimed it",
                    self.inner.irq_line
                );
                return;
            }
        }
    }

    /// Steps the model on a background thread until the returned runner is
    /// dropped.
    pub fn run_in_background(&self) -> BackgroundRunner {
        let stop = Arc::new(AtomicBool::new(false));
        let model = self.clone();
        let flag = stop.clone();
        let thread = thread::Builder::new()
            .name("c3-model".into())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    if !model.step_to_next_event() {
                        thread::sleep(Duration::from_micros(50));
                    }
                }
            });
        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                log::error!("c3-model: failed to spawn background thread: {err}");
                None
            }
        };
        BackgroundRunner { stop, thread }
    }
}

impl BusDiscovery for C3Model {
    fn bus_discover(&self) -> C3Result<u32> {
        Ok(self.inner.base)
    }

    fn bus_interrupt_line(&self) -> u32 {
        self.inner.irq_line
    }
}

/// Background stepping of a [`C3Model`]; stops when dropped.
pub struct BackgroundRunner {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundRunner {
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for BackgroundRunner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

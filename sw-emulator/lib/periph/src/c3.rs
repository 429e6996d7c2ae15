/*++

Licensed under the Apache-2.0 license.

File Name:

    c3.rs

Abstract:

    File contains the C3 crypto accelerator peripheral: a set of IDS engines
    that each execute one program at a time from system memory and raise an
    interrupt when the program finishes.

--*/

use crate::executor::{self, Fault};
use crate::system_memory::SharedSystemMemory;
use c3_emu_bus::{
    ActionHandle, Bus, BusError, Clock, ReadOnlyRegister, ReadWriteRegister, Register, Timer,
};
use c3_emu_types::{RvAddr, RvData, RvSize};
use c3_registers::{
    offsets, GlobalStatus, Id, IdsStatus, C3_HW_ID, C3_HW_REVISION, C3_MAX_ENGINES,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use smlang::statemachine;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::LocalRegisterCopy;

statemachine! {
    derive_states: [Clone, Copy, Debug],
    transitions: {
        *Idle + Start = Running,
        Running + Finish = Idle,
    }
}

/// Engine state machine extended variables.
#[derive(Default)]
pub struct EngineContext {
    /// Programs started on this engine
    starts: u64,
}

impl StateMachineContext for EngineContext {}

/// Construction parameters of the accelerator.
#[derive(Debug, Clone)]
pub struct C3Args {
    /// Number of IDS engines
    pub engines: usize,

    /// Clock cycles each instruction takes
    pub latency_per_instruction: u64,

    /// Upper bound of the random cycles added to each program
    pub latency_jitter: u64,

    /// Seed of the jitter and RNG instruction generator
    pub seed: u64,
}

impl Default for C3Args {
    fn default() -> Self {
        Self {
            engines: 2,
            latency_per_instruction: 100,
            latency_jitter: 50,
            seed: 0,
        }
    }
}

/// One IDS engine
struct IdsEngine {
    /// Instruction pointer register
    ip: ReadWriteRegister,

    /// Status register
    status: ReadWriteRegister<IdsStatus::Register>,

    /// Current instruction pointer register
    current_ip: ReadOnlyRegister,

    /// Fault address register
    fault_addr: ReadOnlyRegister,

    state_machine: StateMachine<EngineContext>,

    completion_action: Option<ActionHandle>,

    /// IP writes refused because the engine was running
    rejected_starts: u64,
}

impl IdsEngine {
    fn new() -> Self {
        Self {
            ip: ReadWriteRegister::new(0),
            status: ReadWriteRegister::new(0),
            current_ip: ReadOnlyRegister::new(0),
            fault_addr: ReadOnlyRegister::new(0),
            state_machine: StateMachine::new(EngineContext::default()),
            completion_action: None,
            rejected_starts: 0,
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.state_machine.state(), States::Running)
    }
}

/// C3 accelerator peripheral
pub struct C3Accelerator {
    /// Identity register
    id: ReadOnlyRegister<Id::Register>,

    engines: Vec<IdsEngine>,

    memory: SharedSystemMemory,

    timer: Timer,

    rng: StdRng,

    latency_per_instruction: u64,

    latency_jitter: u64,
}

impl C3Accelerator {
    /// Create a new accelerator attached to `memory`
    ///
    /// # Panics
    ///
    /// Panics if `args.engines` is 0 or larger than [`C3_MAX_ENGINES`].
    pub fn new(clock: &Clock, memory: SharedSystemMemory, args: C3Args) -> Self {
        assert!(
            (1..=C3_MAX_ENGINES).contains(&args.engines),
            "C3 supports 1 to {C3_MAX_ENGINES} engines"
        );
        Self {
            id: ReadOnlyRegister::new(
                (Id::HW_ID.val(C3_HW_ID) + Id::REVISION.val(C3_HW_REVISION)).value,
            ),
            engines: (0..args.engines).map(|_| IdsEngine::new()).collect(),
            memory,
            timer: Timer::new(clock),
            rng: StdRng::seed_from_u64(args.seed),
            latency_per_instruction: args.latency_per_instruction,
            latency_jitter: args.latency_jitter,
        }
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    pub fn is_busy(&self, engine: usize) -> bool {
        self.engines[engine].is_running()
    }

    /// Number of programs started on `engine`.
    pub fn programs_started(&self, engine: usize) -> u64 {
        self.engines[engine].state_machine.context().starts
    }

    /// Number of IP writes `engine` refused because it was running.
    pub fn rejected_starts(&self, engine: usize) -> u64 {
        self.engines[engine].rejected_starts
    }

    /// True while any engine has an unacknowledged completion.
    pub fn irq_asserted(&self) -> bool {
        self.engines
            .iter()
            .any(|e| e.status.reg.is_set(IdsStatus::IRQ_PENDING))
    }

    fn global_status(&self) -> u32 {
        let pending = self
            .engines
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status.reg.is_set(IdsStatus::IRQ_PENDING))
            .fold(0, |acc, (i, _)| acc | 1 << i);
        (GlobalStatus::IRQ_PENDING.val(pending) + GlobalStatus::HW_ID.val(C3_HW_ID)).value
    }

    /// Splits an address into an engine index and a register offset.
    fn decode_ids(&self, addr: RvAddr) -> Option<(usize, RvAddr)> {
        let rel = addr.checked_sub(offsets::IDS_BASE)?;
        let engine = (rel / offsets::IDS_STRIDE) as usize;
        (engine < self.engines.len()).then_some((engine, rel % offsets::IDS_STRIDE))
    }

    /// On Write callback for the IP register: starts the program at `val`.
    fn on_write_ip(&mut self, engine: usize, size: RvSize, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        let ids = &mut self.engines[engine];
        if ids.state_machine.process_event(Events::Start).is_err() {
            ids.rejected_starts += 1;
            log::error!("c3: engine {engine} started while running; write ignored");
            return Ok(());
        }
        ids.state_machine.context_mut().starts += 1;
        ids.ip.reg.set(val);
        ids.status.reg.modify(
            IdsStatus::BUSY::SET
                + IdsStatus::DONE::CLEAR
                + IdsStatus::ERROR::CLEAR
                + IdsStatus::BUS_ERROR::CLEAR
                + IdsStatus::CHANNEL_ERROR::CLEAR
                + IdsStatus::FAULT_OPCODE::CLEAR,
        );

        let instructions = executor::count_instructions(&mut self.memory.lock(), val);
        let jitter = self.rng.gen_range(0..=self.latency_jitter);
        let latency = (self.latency_per_instruction * instructions as u64 + jitter).max(1);
        log::trace!(
            "c3: engine {engine} start ip={val:#x} instructions={instructions} latency={latency}"
        );
        self.engines[engine].completion_action = Some(self.timer.schedule_poll_in(latency));
        Ok(())
    }

    /// On Write callback for the STATUS register: IRQ_PENDING is
    /// write-one-to-clear, every other field is read only.
    fn on_write_status(
        &mut self,
        engine: usize,
        size: RvSize,
        val: RvData,
    ) -> Result<(), BusError> {
        if size != RvSize::Word {
            Err(BusError::StoreAccessFault)?
        }
        let written = LocalRegisterCopy::<u32, IdsStatus::Register>::new(val);
        if written.is_set(IdsStatus::IRQ_PENDING) {
            self.engines[engine]
                .status
                .reg
                .modify(IdsStatus::IRQ_PENDING::CLEAR);
        }
        Ok(())
    }

    /// Runs the program of `engine` and reports its completion.
    fn complete(&mut self, engine: usize) {
        let ip = self.engines[engine].ip.reg.get();
        let outcome = executor::execute(&mut self.memory.lock(), &mut self.rng, ip);

        let ids = &mut self.engines[engine];
        let mut status =
            IdsStatus::BUSY::CLEAR + IdsStatus::DONE::SET + IdsStatus::IRQ_PENDING::SET;
        match outcome.fault {
            None => {}
            Some((fault, opcode)) => {
                log::warn!(
                    "c3: engine {engine} program {ip:#x} faulted: {fault:?} opcode={opcode:#04x}"
                );
                status += IdsStatus::FAULT_OPCODE.val(opcode as u32);
                status += match fault {
                    Fault::Error => IdsStatus::ERROR::SET,
                    Fault::Bus(addr) => {
                        ids.fault_addr.reg.set(addr);
                        IdsStatus::BUS_ERROR::SET
                    }
                    Fault::Channel => IdsStatus::CHANNEL_ERROR::SET,
                };
            }
        }
        ids.current_ip.reg.set(outcome.current_ip);
        ids.status.reg.modify(status);
        if ids.state_machine.process_event(Events::Finish).is_err() {
            log::error!("c3: engine {engine} finished while idle");
        }
        log::trace!(
            "c3: engine {engine} done ip={ip:#x} executed={}",
            outcome.executed
        );
    }
}

impl Bus for C3Accelerator {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        if size != RvSize::Word {
            Err(BusError::LoadAccessFault)?
        }
        match addr {
            offsets::ID => self.id.read(size),
            offsets::GLOBAL_STATUS => Ok(self.global_status()),
            _ => {
                let (engine, reg) = self.decode_ids(addr).ok_or(BusError::LoadAccessFault)?;
                let ids = &self.engines[engine];
                match reg {
                    offsets::IDS_IP => ids.ip.read(size),
                    offsets::IDS_STATUS => ids.status.read(size),
                    offsets::IDS_CURRENT_IP => ids.current_ip.read(size),
                    offsets::IDS_FAULT_ADDR => ids.fault_addr.read(size),
                    _ => Err(BusError::LoadAccessFault),
                }
            }
        }
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        let (engine, reg) = self.decode_ids(addr).ok_or(BusError::StoreAccessFault)?;
        match reg {
            offsets::IDS_IP => self.on_write_ip(engine, size, val),
            offsets::IDS_STATUS => self.on_write_status(engine, size, val),
            _ => Err(BusError::StoreAccessFault),
        }
    }

    fn poll(&mut self) {
        for engine in 0..self.engines.len() {
            let fired = {
                let ids = &mut self.engines[engine];
                self.timer.fired(&mut ids.completion_action)
            };
            if fired {
                self.complete(engine);
            }
        }
    }

    fn reset(&mut self) {
        for ids in self.engines.iter_mut() {
            if let Some(action) = ids.completion_action.take() {
                self.timer.cancel(action);
            }
        }
        self.engines = (0..self.engines.len()).map(|_| IdsEngine::new()).collect();
    }
}

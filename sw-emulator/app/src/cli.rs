// Licensed under the Apache-2.0 license

use c3_drivers::DriverConfig;
use c3_hw_model::InitParams;
use clap::{Parser, ValueEnum};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of IDS engines in the model
    #[arg(long, default_value_t = 2)]
    pub engines: usize,

    /// Program slots per engine
    #[arg(long, default_value_t = 32)]
    pub slots: usize,

    /// Program slot size in bytes
    #[arg(long, default_value_t = 4096)]
    pub slot_size: usize,

    /// Emulated system memory in KiB
    #[arg(long, default_value_t = 4096)]
    pub memory_kib: u32,

    /// Clock cycles per instruction
    #[arg(long, default_value_t = 100)]
    pub latency: u64,

    /// Upper bound of random cycles added to each program
    #[arg(long, default_value_t = 50)]
    pub jitter: u64,

    /// Seed of the model's jitter and RNG output
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Submitting threads
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// Requests issued by each thread
    #[arg(long, default_value_t = 100)]
    pub requests: usize,

    /// Payload size in bytes
    #[arg(long, default_value_t = 256)]
    pub payload: usize,

    /// Request mix
    #[arg(long, value_enum, default_value_t = ArgsWorkload::Mixed)]
    pub workload: ArgsWorkload,

    /// Submit through callbacks instead of blocking calls
    #[arg(long = "async")]
    pub use_async: bool,

    /// Interrupt every n-th blocking call before it completes
    #[arg(long)]
    pub signal_every: Option<usize>,

    #[arg(long, value_enum, default_value_t = ArgsLogLevel::Info)]
    pub log_level: ArgsLogLevel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ArgsWorkload {
    Aes,
    Sha256,
    Hmac,
    Rng,
    Mixed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ArgsLogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<ArgsLogLevel> for LevelFilter {
    fn from(value: ArgsLogLevel) -> Self {
        match value {
            ArgsLogLevel::Off => LevelFilter::Off,
            ArgsLogLevel::Error => LevelFilter::Error,
            ArgsLogLevel::Warn => LevelFilter::Warn,
            ArgsLogLevel::Info => LevelFilter::Info,
            ArgsLogLevel::Debug => LevelFilter::Debug,
            ArgsLogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl Args {
    pub fn init_params(&self) -> InitParams {
        InitParams {
            memory_size: self.memory_kib.saturating_mul(1024),
            engines: self.engines,
            latency_per_instruction: self.latency,
            latency_jitter: self.jitter,
            seed: self.seed,
            ..Default::default()
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            engines: self.engines,
            slots_per_engine: self.slots,
            slot_size: self.slot_size,
            ..Default::default()
        }
    }
}

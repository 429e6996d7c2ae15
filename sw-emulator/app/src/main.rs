/*++

Licensed under the Apache-2.0 license.

File Name:

    main.rs

Abstract:

    File contains main entrypoint for the C3 Emulator. It runs a workload
    of crypto requests through the driver against the emulated device.

--*/

use anyhow::{anyhow, bail, Context};
use c3_drivers::{C3Driver, C3Error, CallbackFn, CompletionStatus, Signal};
use c3_hw_model::C3Model;
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use simple_logger::SimpleLogger;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

mod cli;
mod workload;

use cli::Args;
use workload::Job;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Totals {
    verified: AtomicU64,
    signalled: AtomicU64,
    retries: AtomicU64,
}

fn main() {
    let args = Args::parse();
    let _ = SimpleLogger::new().with_level(args.log_level.into()).init();
    if let Err(e) = run(&args) {
        log::error!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    if args.threads == 0 {
        bail!("at least one submitting thread is required");
    }
    let model = C3Model::new(args.init_params()).map_err(|e| anyhow!("model: {e}"))?;
    let driver = model.probe(args.driver_config()).context("probe")?;
    let runner = model.run_in_background();
    if !runner.is_running() {
        bail!("model thread did not start");
    }

    let totals = Totals::default();
    let started = Instant::now();
    thread::scope(|s| {
        let workers: Vec<_> = (0..args.threads)
            .map(|t| {
                let driver = &driver;
                let totals = &totals;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(t as u64 + 1));
                    if args.use_async {
                        run_async(driver, args, &mut rng, totals)
                    } else {
                        run_blocking(driver, args, &mut rng, totals)
                    }
                    .with_context(|| format!("thread {t}"))
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().map_err(|_| anyhow!("worker panicked"))?)
            .collect::<anyhow::Result<Vec<()>>>()
    })?;
    let elapsed = started.elapsed();
    drop(runner);

    let stats = driver.stats();
    let dma = model.dma().counters();
    log::info!(
        "{} requests in {:.2?}: {} verified, {} signalled, {} queue-full retries",
        args.threads * args.requests,
        elapsed,
        totals.verified.load(Ordering::Relaxed),
        totals.signalled.load(Ordering::Relaxed),
        totals.retries.load(Ordering::Relaxed),
    );
    log::info!(
        "driver: {} submitted, {} completed, {} failed, {} abandoned; {} cycles simulated",
        stats.submitted,
        stats.completed,
        stats.failed,
        stats.abandoned,
        model.now()
    );
    if dma.maps != dma.unmaps || dma.bad_unmaps != 0 {
        bail!(
            "dma mappings leaked: {} maps, {} unmaps, {} bad unmaps",
            dma.maps,
            dma.unmaps,
            dma.bad_unmaps
        );
    }
    Ok(())
}

fn run_blocking(
    driver: &C3Driver,
    args: &Args,
    rng: &mut StdRng,
    totals: &Totals,
) -> anyhow::Result<()> {
    for n in 1..=args.requests {
        let job = Job::build(args.workload, args.payload, rng)?;
        let call = loop {
            match driver.issue_blocking(&job.request) {
                Err(C3Error::DRIVER_QUEUE_FULL) => {
                    totals.retries.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                }
                result => break result?,
            }
        };

        let signal = Signal::new();
        if args.signal_every.is_some_and(|every| every > 0 && n % every == 0) {
            signal.raise();
        }
        match call.wait(&signal) {
            Ok(_) => {
                job.verify()?;
                totals.verified.fetch_add(1, Ordering::Relaxed);
            }
            Err(C3Error::DRIVER_CALL_SIGNALLED) => {
                totals.signalled.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => Err(err)?,
        }
    }
    Ok(())
}

fn run_async(
    driver: &C3Driver,
    args: &Args,
    rng: &mut StdRng,
    totals: &Totals,
) -> anyhow::Result<()> {
    let (sender, receiver) = mpsc::channel();
    let sender = Mutex::new(sender);
    let callback: CallbackFn = std::sync::Arc::new(move |param: usize, status: CompletionStatus| {
        if let Ok(sender) = sender.lock() {
            let _ = sender.send((param, status));
        }
    });

    let mut jobs = Vec::with_capacity(args.requests);
    for n in 0..args.requests {
        let job = Job::build(args.workload, args.payload, rng)?;
        loop {
            match driver.submit_async(&job.request, callback.clone(), n) {
                Err(C3Error::DRIVER_QUEUE_FULL) => {
                    totals.retries.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                }
                result => break result?,
            }
        }
        jobs.push(job);
    }

    for _ in 0..args.requests {
        let (n, status) = receiver
            .recv_timeout(COMPLETION_TIMEOUT)
            .context("waiting for completion")?;
        status.result()?;
        jobs.get(n).context("unknown completion")?.verify()?;
        totals.verified.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

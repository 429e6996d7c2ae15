// Licensed under the Apache-2.0 license

use c3_api::{InstrCode, WireRequest};
use c3_drivers::{
    C3Driver, C3Error, CallbackFn, CompletionStatus, DeferredMode, DriverConfig, Request,
    RequestParam, Signal, UserBuffer,
};
use c3_emu_crypto::{Aes, AesDirection, AesMode, HmacSha256, Sha256};
use c3_hw_model::{C3Model, InitParams};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(20);

fn setup(params: InitParams, config: DriverConfig) -> (C3Model, Arc<C3Driver>) {
    let model = C3Model::new(params).unwrap();
    let driver = model.probe(config).unwrap();
    (model, driver)
}

fn manual(engines: usize, slots_per_engine: usize) -> DriverConfig {
    DriverConfig {
        engines,
        slots_per_engine,
        deferred: DeferredMode::Manual,
        ..Default::default()
    }
}

fn rng(dst: &UserBuffer, len: u32) -> Request {
    Request::new(
        InstrCode::Rng,
        vec![RequestParam::buffer(dst), RequestParam::Word(len)],
    )
}

fn sha256(msg: &UserBuffer, digest: &UserBuffer) -> Request {
    Request::new(
        InstrCode::Sha256,
        vec![
            RequestParam::buffer(msg),
            RequestParam::buffer(digest),
            RequestParam::Word(msg.len() as u32),
        ],
    )
}

fn aes_cbc(
    code: InstrCode,
    src: &UserBuffer,
    dst: &UserBuffer,
    key: &UserBuffer,
    iv: &UserBuffer,
) -> Request {
    Request::new(
        code,
        vec![
            RequestParam::buffer(src),
            RequestParam::buffer(dst),
            RequestParam::buffer(key),
            RequestParam::buffer(iv),
            RequestParam::Word(src.len() as u32),
            RequestParam::Word(key.len() as u32),
        ],
    )
}

type Log = Arc<Mutex<Vec<(usize, CompletionStatus)>>>;

fn recorder() -> (CallbackFn, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: CallbackFn = Arc::new(move |param: usize, status: CompletionStatus| {
        sink.lock().unwrap().push((param, status));
    });
    (callback, log)
}

#[test]
fn test_sha256_end_to_end() {
    let (model, driver) = setup(InitParams::default(), DriverConfig::default());
    let _runner = model.run_in_background();

    let msg = UserBuffer::new(b"abc".to_vec());
    let digest = UserBuffer::zeroed(32);
    let response = driver
        .submit_blocking(&sha256(&msg, &digest), &Signal::new())
        .unwrap();
    assert!(response.status.is_ok());

    let mut expected = Sha256::new();
    expected.update(b"abc");
    assert_eq!(digest.to_vec(), expected.finalize().to_vec());
    assert_eq!(&digest.to_vec()[..4], &[0xba, 0x78, 0x16, 0xbf]);
}

#[test]
fn test_hmac_end_to_end() {
    let (model, driver) = setup(InitParams::default(), DriverConfig::default());
    let _runner = model.run_in_background();

    let key = UserBuffer::new(vec![0x0b; 20]);
    let msg = UserBuffer::scattered(vec![b"Hi ".to_vec(), b"There".to_vec()]);
    let digest = UserBuffer::zeroed(32);
    let req = Request::new(
        InstrCode::HmacSha256,
        vec![
            RequestParam::buffer(&msg),
            RequestParam::buffer(&digest),
            RequestParam::buffer(&key),
            RequestParam::Word(8),
            RequestParam::Word(20),
        ],
    );
    driver.submit_blocking(&req, &Signal::new()).unwrap();

    let mut expected = HmacSha256::new(&[0x0b; 20]);
    expected.update(b"Hi There");
    assert_eq!(digest.to_vec(), expected.finalize().to_vec());
}

#[test]
fn test_in_place_aes_cbc() {
    let (model, driver) = setup(InitParams::default(), manual(1, 8));
    let dma = model.dma();

    let plain: Vec<u8> = (0..64).collect();
    let data = UserBuffer::new(plain.clone());
    let key = UserBuffer::new(vec![0x2b; 32]);
    let iv = UserBuffer::new(vec![0x01; 16]);
    let (callback, log) = recorder();

    driver
        .submit_async(
            &aes_cbc(InstrCode::AesCbcEncrypt, &data, &data, &key, &iv),
            callback,
            1,
        )
        .unwrap();
    assert_eq!(dma.counters().maps, 3);
    assert_eq!(dma.counters().live_mappings, 3);

    model.run_until_idle();
    assert_eq!(driver.run_deferred(), 1);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, 1);
    assert!(log[0].1.is_ok());

    let mut expected = plain;
    Aes::new(&[0x2b; 32], &[0x01; 16], AesMode::Cbc, AesDirection::Encrypt)
        .unwrap()
        .process(&mut expected)
        .unwrap();
    assert_eq!(data.to_vec(), expected);
    assert_eq!(dma.counters().live_mappings, 0);
    assert_eq!(dma.counters().unmaps, 3);
}

#[test]
fn test_queue_backpressure_and_fifo() {
    let (model, driver) = setup(InitParams::default(), manual(1, 33));
    let (callback, log) = recorder();

    for param in 0..32 {
        driver
            .submit_async(&rng(&UserBuffer::zeroed(16), 16), callback.clone(), param)
            .unwrap();
    }
    assert_eq!(
        driver.submit_async(&rng(&UserBuffer::zeroed(16), 16), callback.clone(), 32),
        Err(C3Error::DRIVER_QUEUE_FULL)
    );
    assert_eq!(driver.stats().queue_full, 1);
    assert_eq!(driver.stats().submitted, 32);

    model.run_until_idle();
    assert_eq!(driver.run_deferred(), 32);
    let params: Vec<usize> = log.lock().unwrap().iter().map(|(p, _)| *p).collect();
    assert_eq!(params, (0..32).collect::<Vec<_>>());

    // Every start was accepted by the device; none were issued while busy.
    assert_eq!(model.programs_started(0), 32);
    assert_eq!(model.rejected_starts(0), 0);

    driver
        .submit_async(&rng(&UserBuffer::zeroed(16), 16), callback, 33)
        .unwrap();
}

#[test]
fn test_fifo_per_engine_under_jitter() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 50;

    let (model, driver) = setup(
        InitParams {
            latency_jitter: 400,
            seed: 3,
            ..Default::default()
        },
        DriverConfig {
            slots_per_engine: 8,
            ..Default::default()
        },
    );
    let _runner = model.run_in_background();

    let (sender, receiver) = mpsc::channel();
    let sender = Mutex::new(sender);
    let delivered: Arc<Mutex<Vec<Vec<usize>>>> = Arc::new(Mutex::new(vec![Vec::new(); 2]));
    let sink = delivered.clone();
    let callback: CallbackFn = Arc::new(move |param: usize, status: CompletionStatus| {
        assert!(status.is_ok());
        sink.lock().unwrap()[(param / 1000) % 2].push(param);
        sender.lock().unwrap().send(()).unwrap();
    });

    thread::scope(|s| {
        for t in 0..THREADS {
            let driver = &driver;
            let callback = callback.clone();
            s.spawn(move || {
                for seq in 0..PER_THREAD {
                    let req = rng(&UserBuffer::zeroed(16), 16).with_engine(t % 2);
                    loop {
                        match driver.submit_async(&req, callback.clone(), t * 1000 + seq) {
                            Ok(()) => break,
                            Err(C3Error::DRIVER_QUEUE_FULL) => thread::yield_now(),
                            Err(err) => panic!("submit failed: {err}"),
                        }
                    }
                }
            });
        }
    });

    for _ in 0..THREADS * PER_THREAD {
        receiver.recv_timeout(TIMEOUT).unwrap();
    }

    let delivered = delivered.lock().unwrap();
    for (engine, params) in delivered.iter().enumerate() {
        assert_eq!(params.len(), THREADS / 2 * PER_THREAD);
        for t in (engine..THREADS).step_by(2) {
            let seqs: Vec<usize> = params
                .iter()
                .filter(|p| *p / 1000 == t)
                .map(|p| p % 1000)
                .collect();
            assert_eq!(seqs, (0..PER_THREAD).collect::<Vec<_>>(), "thread {t}");
        }
        assert_eq!(model.programs_started(engine), (THREADS / 2 * PER_THREAD) as u64);
        assert_eq!(model.rejected_starts(engine), 0);
    }

    let counters = model.dma().counters();
    assert_eq!(counters.live_mappings, 0);
    assert_eq!(counters.bad_unmaps, 0);
    assert_eq!(counters.maps, counters.unmaps);
}

#[test]
fn test_signal_after_completion() {
    let (model, driver) = setup(InitParams::default(), manual(1, 4));
    let buf = UserBuffer::zeroed(32);
    let call = driver.issue_blocking(&rng(&buf, 32)).unwrap();
    model.run_until_idle();
    driver.run_deferred();

    let signal = Signal::new();
    signal.raise();
    assert!(call.wait(&signal).is_ok());
    assert_ne!(buf.to_vec(), vec![0; 32]);
    assert_eq!(model.dma().counters().live_mappings, 0);
    assert_eq!(driver.stats().abandoned, 0);
}

#[test]
fn test_signal_before_completion() {
    let (model, driver) = setup(InitParams::default(), manual(1, 4));
    let buf = UserBuffer::zeroed(32);
    let call = driver.issue_blocking(&rng(&buf, 32)).unwrap();
    let pending = call.pending_call();

    let signal = Signal::new();
    signal.raise();
    assert_eq!(call.wait(&signal), Err(C3Error::DRIVER_CALL_SIGNALLED));
    assert_eq!(model.dma().counters().live_mappings, 1);
    assert!(pending.upgrade().is_some());

    model.run_until_idle();
    assert_eq!(driver.run_deferred(), 1);
    assert_eq!(model.dma().counters().live_mappings, 0);
    assert!(pending.upgrade().is_none());
    assert_eq!(driver.stats().abandoned, 1);
    assert_eq!(driver.stats().completed, 1);
}

#[test]
fn test_signal_races_release_once() {
    let (model, driver) = setup(
        InitParams {
            seed: 9,
            ..Default::default()
        },
        manual(2, 8),
    );
    let mut rand = StdRng::seed_from_u64(42);
    let mut abandoned = 0;

    for _ in 0..200 {
        let buf = UserBuffer::zeroed(16);
        let call = loop {
            match driver.issue_blocking(&rng(&buf, 16)) {
                Ok(call) => break call,
                Err(C3Error::DRIVER_QUEUE_FULL) => {
                    model.run_until_idle();
                    driver.run_deferred();
                }
                Err(err) => panic!("issue failed: {err}"),
            }
        };

        match rand.gen_range(0..4) {
            0 => {}
            1 => model.step(rand.gen_range(0..300)),
            2 => model.run_until_idle(),
            _ => {
                model.run_until_idle();
                driver.run_deferred();
            }
        }
        let signal = Signal::new();
        signal.raise();
        match call.wait(&signal) {
            Ok(_) => {}
            Err(C3Error::DRIVER_CALL_SIGNALLED) => abandoned += 1,
            Err(err) => panic!("unexpected {err}"),
        }

        model.step(rand.gen_range(0..400));
        if rand.gen_bool(0.5) {
            driver.run_deferred();
        }
    }
    model.run_until_idle();
    driver.run_deferred();

    let stats = driver.stats();
    assert_eq!(stats.submitted, 200);
    assert_eq!(stats.completed + stats.failed, 200);
    assert_eq!(stats.abandoned, abandoned);
    assert!(abandoned > 0);

    let counters = model.dma().counters();
    assert_eq!(counters.maps, 200);
    assert_eq!(counters.unmaps, 200);
    assert_eq!(counters.bad_unmaps, 0);
    assert_eq!(counters.live_mappings, 0);
}

#[test]
fn test_unwind_on_kth_map_failure() {
    let (model, driver) = setup(InitParams::default(), manual(1, 4));
    let dma = model.dma();
    let src = UserBuffer::zeroed(32);
    let dst = UserBuffer::zeroed(32);
    let key = UserBuffer::zeroed(16);
    let iv = UserBuffer::zeroed(16);
    let allocations = model.memory().lock().live_allocations();

    for k in 1..=4u64 {
        let before = dma.counters();
        dma.inject_map_failure(k);
        let (callback, log) = recorder();
        assert_eq!(
            driver.submit_async(
                &aes_cbc(InstrCode::AesCbcEncrypt, &src, &dst, &key, &iv),
                callback,
                0
            ),
            Err(C3Error::DRIVER_DMA_MAP_FAILED)
        );
        let after = dma.counters();
        assert_eq!(after.maps - before.maps, k);
        assert_eq!(after.unmaps - before.unmaps, k - 1);
        assert_eq!(after.live_mappings, 0);
        assert!(log.lock().unwrap().is_empty());
    }
    assert_eq!(model.memory().lock().live_allocations(), allocations);
    assert_eq!(model.programs_started(0), 0);
    assert_eq!(driver.stats().submitted, 0);
}

#[test]
fn test_hardware_fault_delivered_once() {
    let (model, driver) = setup(InitParams::default(), DriverConfig::default());
    let _runner = model.run_in_background();

    let data = UserBuffer::zeroed(16);
    let key = UserBuffer::zeroed(8);
    let iv = UserBuffer::zeroed(8);
    let req = aes_cbc(InstrCode::DesCbcEncrypt, &data, &data, &key, &iv);
    assert_eq!(
        driver.submit_blocking(&req, &Signal::new()),
        Err(C3Error::DRIVER_HW_ERROR)
    );
    assert_eq!(driver.stats().failed, 1);
    assert_eq!(model.programs_started(0) + model.programs_started(1), 1);
}

#[test]
fn test_wire_request_end_to_end() {
    let (model, driver) = setup(InitParams::default(), DriverConfig::default());
    let _runner = model.run_in_background();

    let msg = UserBuffer::new(vec![0x61; 64]);
    let digest = UserBuffer::zeroed(32);
    let bytes = WireRequest::new(InstrCode::Sha256, &[1, 2, 64])
        .to_bytes()
        .unwrap();
    let wire = WireRequest::parse(&bytes).unwrap();
    let req = Request::from_wire(&wire, &[msg, digest.clone()]).unwrap();
    driver.submit_blocking(&req, &Signal::new()).unwrap();

    let mut expected = Sha256::new();
    expected.update(&[0x61; 64]);
    assert_eq!(digest.to_vec(), expected.finalize().to_vec());
}

#[test]
fn test_driver_drop_frees_slots() {
    let (model, driver) = setup(InitParams::default(), manual(2, 4));
    assert_eq!(model.dma().counters().live_coherent, 8);
    drop(driver);
    assert_eq!(model.dma().counters().live_coherent, 0);
    assert_eq!(model.memory().lock().live_allocations(), 0);
}

/*++

Licensed under the Apache-2.0 license.

File Name:

    facade.rs

Abstract:

    File contains the blocking and asynchronous request façade: request
    validation against the parameter table, caller buffer staging, and the
    hand-off between a waiting caller and the completion path.

--*/

use crate::call::{PendingCall, Signal, States, WaitOutcome};
use crate::dma::{DmaBuffer, DmaDirection, DmaStrategy, DMA_ALIGN};
use crate::driver::{C3Driver, DriverStats};
use crate::encoders;
use crate::instr_params::{BufferDir, BufferSize, InstrParams, ParamKind};
use crate::program::{CallbackFn, CompletionStatus, Delivery};
use c3_api::instr::MAX_DATA_LEN;
use c3_api::{InstrCode, WireRequest, MAX_REQUEST_PARAMS};
use c3_error::{C3Error, C3Result};
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

/// Caller memory passed as a buffer parameter. It may be made of several
/// fragments; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct UserBuffer {
    fragments: Vec<DmaBuffer>,
}

impl UserBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            fragments: vec![DmaBuffer::new(data)],
        }
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// Memory made of discontiguous pieces, in order.
    pub fn scattered(parts: Vec<Vec<u8>>) -> Self {
        Self {
            fragments: parts.into_iter().map(DmaBuffer::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.iter().map(DmaBuffer::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.fragments.iter().flat_map(|f| f.to_vec()).collect()
    }

    /// True when both handles refer to the same memory.
    pub fn ptr_eq(&self, other: &UserBuffer) -> bool {
        self.fragments.len() == other.fragments.len()
            && self
                .fragments
                .iter()
                .zip(other.fragments.iter())
                .all(|(a, b)| a.ptr_eq(b))
    }

    pub fn strategy(&self) -> DmaStrategy {
        let lens: Vec<usize> = self.fragments.iter().map(DmaBuffer::len).collect();
        DmaStrategy::select(&lens)
    }

    /// Copies the fragments into one fresh buffer of `padded_len` bytes.
    fn gather(&self, padded_len: usize) -> DmaBuffer {
        let mut data = Vec::with_capacity(padded_len);
        for fragment in self.fragments.iter() {
            data.extend_from_slice(&fragment.lock());
        }
        data.resize(padded_len, 0);
        DmaBuffer::new(data)
    }

    /// Copies the first `len` bytes of `from` back over the fragments.
    fn scatter(&self, from: &DmaBuffer, len: usize) {
        let src = from.lock();
        let len = len.min(src.len());
        let mut offset = 0;
        for fragment in self.fragments.iter() {
            if offset >= len {
                break;
            }
            let mut dst = fragment.lock();
            let count = dst.len().min(len - offset);
            dst[..count].copy_from_slice(&src[offset..offset + count]);
            offset += count;
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestParam {
    Word(u32),

    /// `None` is a null buffer
    Buffer(Option<UserBuffer>),
}

impl RequestParam {
    pub fn buffer(buf: &UserBuffer) -> Self {
        RequestParam::Buffer(Some(buf.clone()))
    }
}

/// A request to run one primitive on the accelerator.
#[derive(Debug, Clone)]
pub struct Request {
    pub instr_code: u32,
    pub params: Vec<RequestParam>,

    /// Engine to run on; picked round-robin when `None`
    pub engine: Option<usize>,
}

impl Request {
    pub fn new(code: InstrCode, params: Vec<RequestParam>) -> Self {
        Self {
            instr_code: code.into(),
            params,
            engine: None,
        }
    }

    pub fn with_engine(mut self, engine: usize) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Builds a request from its wire form. Buffer parameters carry 1-based
    /// handles into `buffers`; handle 0 is a null buffer.
    pub fn from_wire(wire: &WireRequest, buffers: &[UserBuffer]) -> C3Result<Self> {
        let entry = InstrParams::lookup(wire.instr_code)?;
        if wire.params.len() > MAX_REQUEST_PARAMS {
            Err(C3Error::API_REQUEST_TOO_MANY_PARAMS)?
        }
        if wire.params.len() != entry.params.len() {
            Err(C3Error::DRIVER_PARAM_COUNT_MISMATCH)?
        }
        let params = entry
            .params
            .iter()
            .zip(wire.params.iter())
            .map(|(kind, &word)| match kind {
                ParamKind::Word => Ok(RequestParam::Word(word)),
                ParamKind::Buffer { .. } if word == 0 => Ok(RequestParam::Buffer(None)),
                ParamKind::Buffer { .. } => buffers
                    .get(word as usize - 1)
                    .map(RequestParam::buffer)
                    .ok_or(C3Error::DRIVER_PARAM_NOT_A_BUFFER),
            })
            .collect::<C3Result<Vec<_>>>()?;
        Ok(Self {
            instr_code: wire.instr_code,
            params,
            engine: None,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Response {
    pub status: CompletionStatus,
}

/// A buffer the program maps once, however many parameters name it.
struct BufferPlan {
    user: Option<UserBuffer>,

    /// Memory actually mapped: the caller's own or a bounce copy
    device: Option<DmaBuffer>,

    bounced: bool,
    dir: DmaDirection,

    /// Bytes the parameters cover
    len: u32,

    /// Bytes mapped; a bounce copy is padded to the DMA alignment
    map_len: u32,

    params: Vec<usize>,
}

/// Bounce buffer to copy back into caller memory once the program is done.
#[derive(Clone)]
struct CopyOut {
    user: UserBuffer,
    bounce: DmaBuffer,
    len: usize,
}

impl CopyOut {
    fn run_all(list: &[CopyOut]) {
        for copy in list.iter() {
            copy.user.scatter(&copy.bounce, copy.len);
        }
    }
}

fn copy_outs(plans: &[BufferPlan]) -> Vec<CopyOut> {
    plans
        .iter()
        .filter(|plan| plan.bounced && plan.dir.from_device())
        .filter_map(|plan| {
            Some(CopyOut {
                user: plan.user.clone()?,
                bounce: plan.device.clone()?,
                len: plan.len as usize,
            })
        })
        .collect()
}

/// A validated request ready for dispatch.
struct Prepared {
    code: InstrCode,
    words: Vec<u32>,
    plans: Vec<BufferPlan>,
}

impl Prepared {
    fn new(req: &Request) -> C3Result<Self> {
        let entry = InstrParams::lookup(req.instr_code)?;
        if req.params.len() > MAX_REQUEST_PARAMS {
            Err(C3Error::API_REQUEST_TOO_MANY_PARAMS)?
        }
        if req.params.len() != entry.params.len() {
            Err(C3Error::DRIVER_PARAM_COUNT_MISMATCH)?
        }

        let mut words = vec![0u32; entry.params.len()];
        for (i, (kind, param)) in entry.params.iter().zip(req.params.iter()).enumerate() {
            match (kind, param) {
                (ParamKind::Word, RequestParam::Word(word)) => words[i] = *word,
                (ParamKind::Word, _) => Err(C3Error::DRIVER_PARAM_NOT_A_WORD)?,
                (ParamKind::Buffer { .. }, RequestParam::Buffer(_)) => {}
                (ParamKind::Buffer { .. }, _) => Err(C3Error::DRIVER_PARAM_NOT_A_BUFFER)?,
            }
        }

        let mut plans: Vec<BufferPlan> = Vec::new();
        for (i, (kind, param)) in entry.params.iter().zip(req.params.iter()).enumerate() {
            let (ParamKind::Buffer { dir, size }, RequestParam::Buffer(user)) = (kind, param)
            else {
                continue;
            };
            let len = match size {
                BufferSize::Fixed(len) => *len,
                BufferSize::Param(index) => words[*index],
            };
            if len > MAX_DATA_LEN {
                Err(C3Error::DRIVER_INVALID_SIZE_PARAM)?
            }
            if let Some(user) = user {
                if user.len() < len as usize {
                    Err(C3Error::DRIVER_BUFFER_SIZE_MISMATCH)?
                }
            }
            let dir = match dir {
                BufferDir::In => DmaDirection::ToDevice,
                BufferDir::Out => DmaDirection::FromDevice,
            };

            let alias = user.as_ref().and_then(|user| {
                plans
                    .iter()
                    .position(|plan| plan.user.as_ref().is_some_and(|u| u.ptr_eq(user)))
            });
            match alias {
                Some(index) => {
                    let plan = &mut plans[index];
                    plan.dir = plan.dir.merge(dir);
                    plan.len = plan.len.max(len);
                    plan.map_len = plan.len;
                    plan.params.push(i);
                }
                None => plans.push(BufferPlan {
                    user: user.clone(),
                    device: None,
                    bounced: false,
                    dir,
                    len,
                    map_len: len,
                    params: vec![i],
                }),
            }
        }

        for plan in plans.iter_mut() {
            let Some(user) = &plan.user else {
                continue;
            };
            match user.strategy() {
                DmaStrategy::DirectMap => plan.device = user.fragments.first().cloned(),
                DmaStrategy::CopyThenMap => {
                    let padded = (plan.len as usize).next_multiple_of(DMA_ALIGN);
                    plan.device = Some(user.gather(padded));
                    plan.map_len = padded as u32;
                    plan.bounced = true;
                }
            }
        }

        Ok(Self {
            code: entry.code,
            words,
            plans,
        })
    }
}

/// A blocking request that has been dispatched and not yet waited on.
pub struct BlockingCall {
    engine: usize,
    call: Arc<PendingCall>,
    copy_outs: Vec<CopyOut>,
    stats: Arc<DriverStats>,
}

impl BlockingCall {
    pub fn engine(&self) -> usize {
        self.engine
    }

    pub fn state(&self) -> States {
        self.call.state()
    }

    /// Handle that stays valid only while someone still owns the call.
    pub fn pending_call(&self) -> Weak<PendingCall> {
        Arc::downgrade(&self.call)
    }

    /// Blocks until the program completes or `signal` is raised.
    ///
    /// When the signal wins, returns `DRIVER_CALL_SIGNALLED` and leaves the
    /// mappings and the call to the completion path. A hardware fault is
    /// returned as its driver error.
    pub fn wait(self, signal: &Signal) -> C3Result<Response> {
        match self.call.wait(signal)? {
            WaitOutcome::Delivered(status) => {
                CopyOut::run_all(&self.copy_outs);
                status.result()?;
                Ok(Response { status })
            }
            WaitOutcome::Abandoned => {
                self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "c3: call on engine {} interrupted, cleanup left to the completion path",
                    self.engine
                );
                Err(C3Error::DRIVER_CALL_SIGNALLED)
            }
        }
    }
}

impl C3Driver {
    fn select_engine(&self, req: &Request) -> C3Result<usize> {
        let count = self.engine_count();
        match req.engine {
            Some(engine) if engine < count => Ok(engine),
            Some(_) => Err(C3Error::DRIVER_INVALID_ENGINE),
            None => Ok(self.shared.next_engine.fetch_add(1, Ordering::Relaxed) % count),
        }
    }

    /// Validates `req`, maps its buffers into a slot, encodes the program
    /// and enqueues it with the delivery built by `delivery`.
    fn dispatch<F>(&self, req: &Request, delivery: F) -> C3Result<(usize, Vec<CopyOut>)>
    where
        F: FnOnce(Vec<CopyOut>) -> Delivery,
    {
        let Prepared {
            code,
            mut words,
            plans,
        } = Prepared::new(req)?;
        let engine = self.select_engine(req)?;
        let copy_outs = copy_outs(&plans);
        let delivery = delivery(copy_outs.clone());

        let slot = self.submit(engine, delivery, |slot| {
            for plan in plans.iter() {
                let dev_addr = slot.prepare_dma(plan.device.as_ref(), plan.map_len, plan.dir)?;
                for &index in plan.params.iter() {
                    words[index] = dev_addr;
                }
            }
            encoders::encode(code, &words, slot.program())
        })?;
        debug!(
            "c3: {code:?} on engine {engine} slot {slot}, {} buffers",
            plans.len()
        );
        Ok((engine, copy_outs))
    }

    /// Dispatches `req` for a caller that will block on the result.
    pub fn issue_blocking(&self, req: &Request) -> C3Result<BlockingCall> {
        let call = PendingCall::new();
        let waiter = call.clone();
        let (engine, copy_outs) = self.dispatch(req, |_| Delivery::Waiter(waiter))?;
        call.mark_waiting();
        Ok(BlockingCall {
            engine,
            call,
            copy_outs,
            stats: self.shared.stats.clone(),
        })
    }

    /// Runs `req` and blocks until it completes or `signal` is raised.
    pub fn submit_blocking(&self, req: &Request, signal: &Signal) -> C3Result<Response> {
        self.issue_blocking(req)?.wait(signal)
    }

    /// Dispatches `req` and returns at once; the result is delivered only
    /// through `callback(param, status)`.
    pub fn submit_async(&self, req: &Request, callback: CallbackFn, param: usize) -> C3Result<()> {
        self.dispatch(req, |copy_outs| {
            if copy_outs.is_empty() {
                return Delivery::Callback(callback, param);
            }
            Delivery::Callback(
                Arc::new(move |param: usize, status: CompletionStatus| {
                    CopyOut::run_all(&copy_outs);
                    callback(param, status)
                }),
                param,
            )
        })?;
        Ok(())
    }
}

//! A pipeline that needs no weights or GPU.
//!
//! Produces a deterministic gradient derived from the seed and records every
//! call, so orchestration code can be exercised end to end in tests.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use crate::{Cancelled, CancelFlag, GeneratedImage, ImagePipeline, InferRequest};

/// Scripted misbehavior. Call numbers are 1-based.
#[derive(Debug, Clone, Default)]
pub struct StubBehavior {
    /// Fail this call with an allocation-style error.
    pub fail_on_call: Option<usize>,
    /// Act as if Ctrl-C arrived during this call.
    pub cancel_on_call: Option<usize>,
}

#[derive(Debug, Default)]
struct Calls {
    requests: Vec<InferRequest>,
    syncs: usize,
}

/// Read side of the stub's call record; stays valid after the stub is boxed.
#[derive(Debug, Clone, Default)]
pub struct StubLog(Rc<RefCell<Calls>>);

impl StubLog {
    /// Every request the stub was asked to run, including failed ones.
    pub fn requests(&self) -> Vec<InferRequest> {
        self.0.borrow().requests.clone()
    }

    pub fn seeds(&self) -> Vec<u64> {
        self.0.borrow().requests.iter().map(|r| r.seed).collect()
    }

    pub fn syncs(&self) -> usize {
        self.0.borrow().syncs
    }
}

pub struct StubPipeline {
    behavior: StubBehavior,
    log: StubLog,
}

impl StubPipeline {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            log: StubLog::default(),
        }
    }

    pub fn log(&self) -> StubLog {
        self.log.clone()
    }
}

impl Default for StubPipeline {
    fn default() -> Self {
        Self::new(StubBehavior::default())
    }
}

impl ImagePipeline for StubPipeline {
    fn infer(&mut self, request: &InferRequest, cancel: &CancelFlag) -> Result<GeneratedImage> {
        cancel.check()?;

        let call = {
            let mut calls = self.log.0.borrow_mut();
            calls.requests.push(request.clone());
            calls.requests.len()
        };

        if self.behavior.cancel_on_call == Some(call) {
            cancel.cancel();
            return Err(Cancelled.into());
        }
        if self.behavior.fail_on_call == Some(call) {
            anyhow::bail!(
                "MPSNDArray: failed to allocate {} bytes",
                request.width as u64 * request.height as u64 * 4096
            );
        }

        let (w, h) = (request.width, request.height);
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let v = (x as u64 + y as u64 + request.seed) as u8;
                pixels.extend_from_slice(&[v, v.wrapping_mul(3), v.wrapping_add(128)]);
            }
        }
        Ok(GeneratedImage {
            pixels,
            width: w,
            height: h,
        })
    }

    fn synchronize(&self) -> Result<()> {
        self.log.0.borrow_mut().syncs += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

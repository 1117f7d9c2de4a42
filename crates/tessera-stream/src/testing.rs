//! Scripted in-memory bridge for unit tests.

use std::sync::{Arc, Mutex};

use tessera_mesh::greedy_boxes;
use tessera_voxel::{AtlasImage, Occupancy};

use crate::bridge::{Detail, FetchPayload, FetchRequest, FetchResult, WorkerBridge};
use crate::error::FetchError;
use crate::scheduler::TaskContext;

/// How the bridge answers new requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    /// Complete immediately with a payload.
    Succeed,
    /// Complete immediately with a network error.
    Fail,
    /// Park the request until the test releases it.
    Hold,
}

pub(crate) struct ScriptedBridge {
    side: usize,
    reply: Mutex<Reply>,
    runs: Mutex<Vec<FetchRequest>>,
    held: Mutex<Vec<(FetchRequest, TaskContext<FetchResult>)>>,
}

impl ScriptedBridge {
    pub(crate) fn new(side: usize, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            side,
            reply: Mutex::new(reply),
            runs: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    /// Every request seen, in launch order.
    pub(crate) fn runs(&self) -> Vec<FetchRequest> {
        self.runs.lock().unwrap().clone()
    }

    pub(crate) fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub(crate) fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Completes every parked request successfully.
    pub(crate) fn release_all(&self) {
        let held: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        for (request, ctx) in held {
            ctx.complete(Ok(payload(request.mode, self.side)));
        }
    }

    /// Completes the parked request at `index` (in launch order) with
    /// `result`, returning what it asked for.
    pub(crate) fn complete_held(&self, index: usize, result: FetchResult) -> FetchRequest {
        let (request, ctx) = self.held.lock().unwrap().remove(index);
        ctx.complete(result);
        request
    }

    /// Completes the parked request at `index` successfully.
    pub(crate) fn release(&self, index: usize) -> FetchRequest {
        let mode = self.held.lock().unwrap()[index].0.mode;
        self.complete_held(index, Ok(payload(mode, self.side)))
    }

    /// Fails every parked request.
    pub(crate) fn fail_held(&self) {
        let held: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        for (_, ctx) in held {
            ctx.complete(Err(FetchError::Network("scripted".into())));
        }
    }
}

impl WorkerBridge for ScriptedBridge {
    fn run(&self, request: FetchRequest, ctx: TaskContext<FetchResult>) {
        self.runs.lock().unwrap().push(request);
        let reply = *self.reply.lock().unwrap();
        match reply {
            Reply::Succeed => ctx.complete(Ok(payload(request.mode, self.side))),
            Reply::Fail => ctx.complete(Err(FetchError::Network("scripted".into()))),
            Reply::Hold => self.held.lock().unwrap().push((request, ctx)),
        }
    }
}

/// A floor slab plus one voxel at `(1, 2, 3)`.
pub(crate) fn occupancy(side: usize) -> Occupancy {
    let mut occ = Occupancy::new(side);
    for z in 0..side {
        for x in 0..side {
            occ.set(x, 0, z, true);
        }
    }
    occ.set(1, 2, 3, true);
    occ
}

pub(crate) fn payload(mode: Detail, side: usize) -> FetchPayload {
    let occ = occupancy(side);
    let bitmap = AtlasImage::from_occupancy(&occ, |_, _, _| [200, 180, 90]).unwrap();
    match mode {
        Detail::Full => FetchPayload {
            bitmap,
            mesh: Some(greedy_boxes(&occ)),
            occupancy: Some(occ),
            mode: Detail::Full,
        },
        _ => FetchPayload {
            bitmap,
            occupancy: None,
            mesh: None,
            mode: Detail::Image,
        },
    }
}

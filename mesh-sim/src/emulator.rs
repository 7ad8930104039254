// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A [`Backend`] that runs heap images on emulated slots.
//!
//! Every booted slot runs the same interpreter a board would, against a
//! [`SimSlotOps`] on a shared [`Fabric`]. The run happens on a worker thread
//! with its own engine; host-bound messages reach the caller through the
//! backend's [`HostQueue`]. Host messages sent before `go` are waiting in
//! their slots at time 0; later ones cross to the worker on a channel. When
//! the mesh terminates the worker prints the counters a board would print.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use mesh_config::settings::{MeshDims, SimConfig};
use mesh_engine::engine::Engine;
use mesh_engine::sim_error;
use mesh_engine::types::{SimError, SimResult};
use mesh_graph::address::{SlotAddress, all_slots, board_of};
use mesh_hostlink::backend::Backend;
use mesh_hostlink::counters::{Category, CounterLine};
use mesh_hostlink::queue::HostQueue;
use mesh_mapper::image::HeapImage;
use mesh_mapper::layout::MAX_MSG_BYTES;
use mesh_mapper::routing::{BEAT_BYTES, ROUTER_TABLE_BASE, decode_beat};
use mesh_runtime::counters::SlotCounters;
use mesh_runtime::device::Device;
use mesh_runtime::interp::{SlotReport, run_slot};
use mesh_track::entity::Entity;
use mesh_track::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::TrackerFactory;
use crate::delay::Latency;
use crate::fabric::{Fabric, SimSlotOps};

/// Everything a finished run leaves behind.
#[derive(Clone, Debug)]
pub struct FabricOutcome<D> {
    pub reports: Vec<SlotReport<D>>,
    pub lines: Vec<(u32, String)>,

    /// Tick at which the last slot finished.
    pub ticks: u64,
}

/// What the worker thread takes with it.
struct Run {
    dims: MeshDims,
    config: SimConfig,
    tracker: TrackerFactory,
    images: Vec<HeapImage>,
    pending: Vec<(SlotAddress, Vec<u8>)>,
    queue: HostQueue,
    host_in: Receiver<(u32, Vec<u8>)>,
}

pub struct FabricBackend<D: Device> {
    pub entity: Rc<Entity>,
    dims: MeshDims,
    config: SimConfig,
    tracker: TrackerFactory,
    images: Vec<HeapImage>,
    pending: Vec<(SlotAddress, Vec<u8>)>,
    queue: HostQueue,

    /// Messages for the running mesh, once `go` has started it.
    host_out: Option<Sender<(u32, Vec<u8>)>>,
    worker: Option<JoinHandle<Result<FabricOutcome<D>, SimError>>>,
    outcome: Option<FabricOutcome<D>>,
}

impl<D> FabricBackend<D>
where
    D: Device + Send,
{
    /// `tracker` builds the tracker used on the worker thread.
    pub fn new(
        parent: &Rc<Entity>,
        dims: MeshDims,
        config: SimConfig,
        tracker: TrackerFactory,
    ) -> Result<Self, SimError> {
        let entity = Rc::new(Entity::new(parent, "fabric"));
        dims.validate().map_err(|e| SimError(format!("{entity}: {e}")))?;
        Latency::new(&config).map_err(|e| SimError(format!("{entity}: {}", e.0)))?;
        if config.max_in_flight == 0 {
            return sim_error!(format!("{entity}: no messages may be in flight"));
        }
        Ok(Self {
            entity,
            dims,
            config,
            tracker,
            images: Vec::new(),
            pending: Vec::new(),
            queue: HostQueue::new(),
            host_out: None,
            worker: None,
            outcome: None,
        })
    }

    /// Wait for the run to end.
    pub fn wait(&mut self) -> Result<&FabricOutcome<D>, SimError> {
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(result) => self.outcome = Some(result?),
                Err(_) => return sim_error!(format!("{}: worker panicked", self.entity)),
            }
        }
        match &self.outcome {
            Some(outcome) => Ok(outcome),
            None => sim_error!(format!("{}: not started", self.entity)),
        }
    }

    /// The final report of every slot, in address order.
    pub fn reports(&mut self) -> Result<&[SlotReport<D>], SimError> {
        Ok(&self.wait()?.reports)
    }

    fn check_router_table(&self, image: &HeapImage) -> SimResult {
        let mut records = 0;
        for beat in image.bytes.chunks(BEAT_BYTES) {
            records += decode_beat(beat)
                .map_err(|e| SimError(format!("{}: {}: {}", self.entity, image.slot, e.0)))?
                .len();
        }
        debug!(self.entity ; "{}: router table of {records} records", image.slot);
        Ok(())
    }
}

impl<D> Backend for FabricBackend<D>
where
    D: Device + Send,
{
    fn boot(&mut self, images: &[HeapImage]) -> SimResult {
        for image in images {
            if !image.slot.within(&self.dims) {
                return sim_error!(format!("{}: {} is not in the mesh", self.entity, image.slot));
            }
            if image.heap_base == ROUTER_TABLE_BASE {
                self.check_router_table(image)?;
                continue;
            }
            if self.images.iter().any(|booted| booted.slot == image.slot) {
                return sim_error!(format!("{}: {} booted twice", self.entity, image.slot));
            }
            self.images.push(image.clone());
        }
        info!(self.entity ; "{} slots booted", self.images.len());
        Ok(())
    }

    fn go(&mut self) -> SimResult {
        if self.host_out.is_some() {
            return sim_error!(format!("{}: already started", self.entity));
        }
        let (host_out, host_in) = mpsc::channel();
        self.host_out = Some(host_out);
        let run = Run {
            dims: self.dims,
            config: self.config,
            tracker: self.tracker.clone(),
            images: std::mem::take(&mut self.images),
            pending: std::mem::take(&mut self.pending),
            queue: self.queue.clone(),
            host_in,
        };
        let handle = thread::Builder::new()
            .name("fabric".to_string())
            .spawn(move || {
                let queue = run.queue.clone();
                let result = run_fabric::<D>(run);
                match &result {
                    Ok(_) => queue.finish()?,
                    Err(e) => queue.fail(e.clone())?,
                }
                result
            })
            .map_err(|e| SimError(format!("{}: cannot start worker: {e}", self.entity)))?;
        self.worker = Some(handle);
        Ok(())
    }

    fn send(&mut self, slot: SlotAddress, msg: &[u8]) -> SimResult {
        if msg.len() > MAX_MSG_BYTES as usize {
            return sim_error!(format!(
                "{}: {} byte message for {slot}",
                self.entity,
                msg.len()
            ));
        }
        let Some(host_out) = &self.host_out else {
            self.pending.push((slot, msg.to_vec()));
            return Ok(());
        };
        if host_out.send((slot.encode()?, msg.to_vec())).is_err() {
            return sim_error!(format!(
                "{}: message for {slot} after the mesh terminated",
                self.entity
            ));
        }
        Ok(())
    }

    fn queue(&self) -> &HostQueue {
        &self.queue
    }

    fn counter_lines(&mut self) -> Result<Vec<(u32, String)>, SimError> {
        Ok(self.wait()?.lines.clone())
    }
}

fn run_fabric<D: Device>(run: Run) -> Result<FabricOutcome<D>, SimError> {
    let tracker = (run.tracker)();
    let mut engine = Engine::new(&tracker);
    let clock = engine.clock();
    let fabric = Rc::new(Fabric::new(
        engine.top(),
        clock,
        engine.spawner(),
        Latency::new(&run.config)?,
        StdRng::seed_from_u64(run.config.seed),
        run.config.max_in_flight,
        run.queue,
        run.host_in,
    ));

    for image in &run.images {
        fabric.attach(image.slot.encode()?)?;
    }
    for (slot, msg) in run.pending {
        fabric.inject(slot.encode()?, msg)?;
    }

    let reports = Rc::new(RefCell::new(BTreeMap::new()));
    let finished_at = Rc::new(RefCell::new(0));
    for image in run.images {
        let ops = SimSlotOps::new(&fabric, image.slot)?;
        let fabric = fabric.clone();
        let reports = reports.clone();
        let finished_at = finished_at.clone();
        engine.spawn(async move {
            let report = run_slot::<D, _>(&fabric.entity, &image, &ops).await?;
            fabric.finish(ops.id())?;
            *finished_at.borrow_mut() = fabric.now();
            reports.borrow_mut().insert(ops.id(), report);
            Ok(())
        });
    }

    let result = engine.run();
    fabric.close_host();
    result?;
    fabric.take_fault()?;
    let running = fabric.running();
    if !running.is_empty() {
        return sim_error!(format!(
            "{}: deadlock with {} slots still running",
            fabric.entity,
            running.len()
        ));
    }

    let ticks = *finished_at.borrow();
    info!(fabric.entity ; "mesh terminated after {ticks} ticks");
    let reports = std::mem::take(&mut *reports.borrow_mut());
    let lines = counter_lines(&run.dims, &fabric, &reports, ticks)?;
    Ok(FabricOutcome {
        reports: reports.into_values().collect(),
        lines,
        ticks,
    })
}

/// The counter lines every thread of the mesh prints at the end of a run.
/// Slots without a program report zeros and count as idle throughout.
fn counter_lines<D>(
    dims: &MeshDims,
    fabric: &Fabric,
    reports: &BTreeMap<u32, SlotReport<D>>,
    ticks: u64,
) -> Result<Vec<(u32, String)>, SimError> {
    let mut lines = Vec::new();
    for slot in all_slots(dims) {
        let id = slot.encode()?;
        let counters = reports
            .get(&id)
            .map(|report| report.counters)
            .unwrap_or_else(SlotCounters::default);
        lines.extend(CounterLine::for_thread(id, &counters));

        if slot.thread == 0 {
            let idle = (0..dims.threads_per_core)
                .map(|thread| fabric.idle_ticks(id + thread).unwrap_or(ticks))
                .min()
                .unwrap_or(ticks);
            lines.extend(CounterLine::for_core(id, ticks, idle));
        }
        if slot.thread == 0 && slot.core == 0 {
            lines.extend(CounterLine::for_values(Category::Cache, id, &[0, 0, 0]));
        }
        if slot.thread == 0 && slot.core == 0 && slot.mailbox_x == 0 && slot.mailbox_y == 0 {
            let traffic = fabric.traffic(board_of(id));
            let values = [saturate(traffic.sent), saturate(traffic.inter_board)];
            lines.extend(CounterLine::for_values(Category::Board, id, &values));
        }
    }
    Ok(lines
        .into_iter()
        .map(|line| (line.thread, line.to_string()))
        .collect())
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/*!
Composition engine.

Receives "buffer filled" notifications from the driver threads, tracks which
required channels have completed the open cycle and emits result bundles:

- a `final` bundle once every required channel completed the same cycle,
- a `preview` bundle for any other new data (optional channels, raster lines
  whose scan index has not advanced, cycles still missing a channel).

Bundles leave in non-decreasing cycle order with at most one final per
cycle. A cycle that can no longer complete (a newer cycle started, or the
driver signalled the end of the scan) is closed with a degraded final that
lists the channels it is missing.
*/

use crate::config::RunMode;
use crate::sink::ResultSink;
use parking_lot::{Condvar, Mutex};
use shared::protocol::SPIM_PREFIX;
use shared::{
    AcqError, AcquisitionMode, BundleItem, ChannelId, ChannelSet, Completeness, CompletionRule, ItemRole, RasterInput,
    ResultBundle, Snapshot,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How a notification relates to its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// The channel finished writing its buffer for the cycle
    Filled,
    /// Intermediate data; never completes a cycle
    Partial,
}

/// Names given to bundle items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemNames {
    pub camera: String,
    /// Raster planes A and B
    pub raster: [String; 2],
}

impl ItemNames {
    pub fn new(mode: AcquisitionMode, camera_model: &str, inputs: [&str; 2]) -> Self {
        let prefix = if mode.has_secondary() { SPIM_PREFIX } else { "" };
        Self {
            camera: format!("Camera {}", camera_model),
            raster: inputs.map(|input| format!("{}{}", prefix, input)),
        }
    }
}

/// Everything the engine needs for one mode activation
#[derive(Debug, Clone)]
pub struct ArmPlan {
    pub epoch: u64,
    pub mode: AcquisitionMode,
    pub run: RunMode,
    pub names: ItemNames,
}

/// Counters of one activation, reported at disarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationStats {
    pub finals: u64,
    pub degraded: u64,
    pub previews: u64,
    pub discarded: bool,
}

struct OpenCycle {
    cycle: u64,
    ready: ChannelSet,
}

struct Activation {
    plan: ArmPlan,
    armed: ChannelSet,
    required: ChannelSet,
    reference: Vec<BundleItem>,
    latest: BTreeMap<ChannelId, Snapshot>,
    /// Channels with data newer than the last final
    pending: ChannelSet,
    open: Option<OpenCycle>,
    last_final: Option<u64>,
    last_emitted: u64,
    /// Last scan index at which the raster channel completed; 0 until the
    /// first full frame
    raster_index: u64,
    completed: bool,
    drain: bool,
    faulted: bool,
    stats: ActivationStats,
}

impl Activation {
    fn new(plan: ArmPlan, reference: Vec<BundleItem>) -> Self {
        Self {
            armed: plan.mode.armed_channels(),
            required: plan.mode.required_channels(),
            plan,
            reference,
            latest: BTreeMap::new(),
            pending: ChannelSet::empty(),
            open: None,
            last_final: None,
            last_emitted: 0,
            raster_index: 0,
            completed: false,
            drain: false,
            faulted: false,
            stats: ActivationStats::default(),
        }
    }

    /// Cycle index for a preview: the open cycle, or the next one a final
    /// could carry
    fn preview_index(&self) -> u64 {
        let candidate = match (&self.open, self.last_final) {
            (Some(open), _) => open.cycle,
            (None, Some(last)) => last + 1,
            (None, None) => 0,
        };
        candidate.max(self.last_emitted)
    }

    /// Items for `channels`, in bundle order, from the latest snapshots
    fn items(&self, channels: ChannelSet) -> Vec<BundleItem> {
        let mut items = Vec::new();
        if channels.contains(ChannelId::Raster) {
            if let Some(raster) = self.latest.get(&ChannelId::Raster) {
                for input in [RasterInput::A, RasterInput::B] {
                    if let Some(plane) = raster.plane(input.plane()) {
                        let name = self.plan.names.raster[input.plane()].clone();
                        items.push(BundleItem::new(name, ItemRole::Raster(input), plane));
                    }
                }
            }
        }
        let camera = [
            (ChannelId::CameraFrame, ItemRole::CameraImage),
            (ChannelId::Hypercube, ItemRole::Hypercube),
            (ChannelId::Spectrum, ItemRole::Spectrum),
        ];
        for (channel, role) in camera {
            if !channels.contains(channel) {
                continue;
            }
            if let Some(snapshot) = self.latest.get(&channel) {
                let name = match role {
                    ItemRole::CameraImage => self.plan.names.camera.clone(),
                    ItemRole::Hypercube => SPIM_PREFIX.trim_end().to_string(),
                    _ => "Spectrum".to_string(),
                };
                items.push(BundleItem::new(name, role, snapshot.clone()));
            }
        }
        items
    }
}

#[derive(Default)]
struct EngineState {
    activation: Option<Activation>,
    fault: Option<AcqError>,
    /// Raster planes of the last `RasterScan` final
    last_raster: Vec<BundleItem>,
}

/// Per-cycle readiness tracking and bundle composition
pub struct CompositionEngine {
    state: Mutex<EngineState>,
    completed: Condvar,
    sink: ResultSink,
}

impl CompositionEngine {
    pub fn new(sink: ResultSink) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            completed: Condvar::new(),
            sink,
        }
    }

    /// Start a fresh activation; per-cycle state from any earlier one is gone
    pub fn arm(&self, plan: ArmPlan) {
        let mut state = self.state.lock();
        let reference = if plan.mode.has_secondary() {
            state.last_raster.clone()
        } else {
            Vec::new()
        };
        if !reference.is_empty() {
            info!("🖼️ Using {} reference image(s) for {}", reference.len(), plan.mode);
        }
        state.fault = None;
        state.activation = Some(Activation::new(plan, reference));
    }

    /// Drop the activation, discarding any partially filled cycle
    pub fn disarm(&self) -> Option<ActivationStats> {
        let mut state = self.state.lock();
        let activation = state.activation.take()?;
        let mut stats = activation.stats;
        if let Some(open) = &activation.open {
            if !activation.completed {
                warn!(
                    "🗑️ Discarding partial cycle {} ({} of {} channels)",
                    open.cycle,
                    open.ready.len(),
                    activation.required.len()
                );
                stats.discarded = true;
            }
        }
        self.completed.notify_all();
        Some(stats)
    }

    /// Reference items the next hyperspectral activation would carry
    pub fn reference(&self) -> Vec<BundleItem> {
        self.state.lock().last_raster.clone()
    }

    /// A channel buffer was committed with data for `cycle`
    pub fn on_channel_ready(&self, epoch: u64, channel: ChannelId, cycle: u64, snapshot: Snapshot, update: Update) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(act) = state.activation.as_mut().filter(|act| act.plan.epoch == epoch) else {
            debug!(%channel, cycle, "notification outside its activation ignored");
            return;
        };
        if act.completed || act.faulted {
            debug!(%channel, cycle, "notification after completion ignored");
            return;
        }
        if !act.armed.contains(channel) {
            let err = AcqError::violation(channel, format!("data for a channel not armed in {}", act.plan.mode));
            Self::fault_locked(state, Some(epoch), err);
            self.completed.notify_all();
            return;
        }

        act.latest.insert(channel, snapshot);
        act.pending.insert(channel);

        let completes = match update {
            Update::Partial => false,
            Update::Filled => match act.plan.mode.completion_rule(channel) {
                CompletionRule::EveryCommit => true,
                CompletionRule::IndexAdvance => {
                    if cycle == act.raster_index {
                        false
                    } else {
                        act.raster_index = cycle;
                        true
                    }
                }
            },
        };

        let fresh = act.last_final.map_or(true, |last| cycle > last);
        let behind_open = act.open.as_ref().is_some_and(|open| cycle < open.cycle);
        if !completes || !act.required.contains(channel) || !fresh || behind_open {
            self.emit_preview(act);
            return;
        }

        if act.open.as_ref().is_some_and(|open| open.cycle < cycle) {
            self.terminate_open(act, &mut state.last_raster);
        }
        let open = act.open.get_or_insert(OpenCycle {
            cycle,
            ready: ChannelSet::empty(),
        });
        open.ready.insert(channel);

        if open.ready.is_superset(&act.required) {
            let ready = open.ready;
            act.open = None;
            self.emit_final(act, &mut state.last_raster, cycle, ready, ChannelSet::empty());
            if act.plan.run == RunMode::Single || act.drain {
                act.completed = true;
                self.completed.notify_all();
            }
        } else {
            self.emit_preview(act);
        }
    }

    /// Terminal "scan finished" signal: close the open cycle and complete.
    ///
    /// Data that never opened a cycle (raster lines whose index did not
    /// advance, optional channels only) still ends in a degraded final.
    pub fn finish(&self, epoch: u64, cycle: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(act) = state.activation.as_mut().filter(|act| act.plan.epoch == epoch) else {
            return;
        };
        if act.completed || act.faulted {
            return;
        }
        info!("🏁 Scan finished at cycle {}", cycle);
        if act.open.is_some() {
            self.terminate_open(act, &mut state.last_raster);
        } else if !act.pending.is_empty() {
            let at = act.last_final.map_or(cycle, |last| cycle.max(last + 1)).max(act.last_emitted);
            warn!("⚠️ Scan finished before cycle {} completed any required channel", at);
            let with_data = act.pending;
            let missing = act.required;
            self.emit_final(act, &mut state.last_raster, at, with_data, missing);
        }
        act.completed = true;
        self.completed.notify_all();
    }

    /// Park a callback-thread failure for the next poll
    pub fn report_fault(&self, epoch: Option<u64>, err: AcqError) {
        let mut state = self.state.lock();
        Self::fault_locked(&mut state, epoch, err);
        self.completed.notify_all();
    }

    fn fault_locked(state: &mut EngineState, epoch: Option<u64>, err: AcqError) {
        let Some(act) = state.activation.as_mut().filter(|act| Some(act.plan.epoch) == epoch) else {
            debug!("fault outside an activation: {}", err);
            return;
        };
        error!("❌ {}", err);
        act.faulted = true;
        act.open = None;
        if state.fault.is_none() {
            state.fault = Some(err);
        }
    }

    /// First parked fault, if any; clears it
    pub fn take_fault(&self) -> Option<AcqError> {
        self.state.lock().fault.take()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().activation.as_ref().is_some_and(|act| act.completed)
    }

    /// Complete after the open cycle finalizes, or right away when none is open
    pub fn request_drain(&self) {
        let mut state = self.state.lock();
        if let Some(act) = state.activation.as_mut() {
            act.drain = true;
            if act.open.is_none() {
                act.completed = true;
                self.completed.notify_all();
            }
        }
    }

    /// Wait for completion, a fault or disarm; `true` only on completion
    pub fn wait_completed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match state.activation.as_ref() {
                Some(act) if act.completed => return true,
                Some(act) if !act.faulted => {}
                _ => return false,
            }
            if self.completed.wait_until(&mut state, deadline).timed_out() {
                return state.activation.as_ref().is_some_and(|act| act.completed);
            }
        }
    }

    fn terminate_open(&self, act: &mut Activation, last_raster: &mut Vec<BundleItem>) {
        if let Some(open) = act.open.take() {
            let missing = act.required.difference(&open.ready);
            warn!(
                "⚠️ Cycle {} closed without {}",
                open.cycle,
                missing.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
            );
            self.emit_final(act, last_raster, open.cycle, open.ready, missing);
        }
    }

    fn emit_final(
        &self,
        act: &mut Activation,
        last_raster: &mut Vec<BundleItem>,
        cycle: u64,
        ready: ChannelSet,
        missing: ChannelSet,
    ) {
        let optional = act.armed.difference(&act.required);
        let mut items = act.reference.clone();
        items.extend(act.items(ready.union(&optional)));

        if act.plan.mode == AcquisitionMode::RasterScan && missing.is_empty() {
            *last_raster = items
                .iter()
                .filter_map(|item| match item.role {
                    ItemRole::Raster(input) => Some(BundleItem::new(
                        item.name.clone(),
                        ItemRole::Reference(input),
                        item.snapshot.clone(),
                    )),
                    _ => None,
                })
                .collect();
        }

        let mut bundle = ResultBundle::new(act.plan.mode, cycle, Completeness::Final, items);
        bundle.missing = missing.iter().collect();
        act.last_final = Some(cycle);
        act.last_emitted = cycle;
        act.pending.clear();
        act.stats.finals += 1;
        if !missing.is_empty() {
            act.stats.degraded += 1;
        }
        info!("📦 Final bundle for cycle {} ({} items)", cycle, bundle.items.len());
        self.sink.emit(bundle);
    }

    fn emit_preview(&self, act: &mut Activation) {
        let cycle = act.preview_index();
        let items = act.items(act.armed);
        if items.is_empty() {
            return;
        }
        act.last_emitted = cycle;
        act.stats.previews += 1;
        debug!(cycle, items = items.len(), "preview bundle");
        self.sink.emit(ResultBundle::new(act.plan.mode, cycle, Completeness::Preview, items));
    }
}

impl std::fmt::Debug for CompositionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CompositionEngine")
            .field("mode", &state.activation.as_ref().map(|act| act.plan.mode))
            .field("fault", &state.fault)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{result_channels, SinkReceiver};
    use shared::{ChannelDescriptor, ElementType};

    fn engine(mode: AcquisitionMode, run: RunMode) -> (CompositionEngine, SinkReceiver) {
        let (sink, receiver) = result_channels(64);
        let engine = CompositionEngine::new(sink);
        engine.arm(plan(1, mode, run));
        (engine, receiver)
    }

    fn plan(epoch: u64, mode: AcquisitionMode, run: RunMode) -> ArmPlan {
        ArmPlan {
            epoch,
            mode,
            run,
            names: ItemNames::new(mode, "PIXIS: 256E", ["HAADF", "BF"]),
        }
    }

    fn snapshot(element_type: ElementType, dims: Vec<usize>, fill: u8) -> Snapshot {
        let descriptor = ChannelDescriptor::new(element_type, dims).unwrap();
        let raw = vec![fill; descriptor.byte_len()];
        Snapshot::copy_from(descriptor, &raw).unwrap()
    }

    fn raster(fill: u8) -> Snapshot {
        snapshot(ElementType::I16, vec![4, 4, 2], fill)
    }

    fn cube() -> Snapshot {
        snapshot(ElementType::F32, vec![4, 4, 16], 0)
    }

    #[test]
    fn test_frame_single_run_completes() {
        let (engine, receiver) = engine(AcquisitionMode::Frame, RunMode::Single);
        let frame = snapshot(ElementType::F32, vec![8, 4], 1);

        engine.on_channel_ready(1, ChannelId::CameraFrame, 1, frame.clone(), Update::Filled);
        engine.on_channel_ready(1, ChannelId::CameraFrame, 2, frame, Update::Filled);

        let (previews, finals) = receiver.drain();
        assert!(previews.is_empty());
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].items[0].name, "Camera PIXIS: 256E");
        assert_eq!(finals[0].items[0].dims(), &[8, 4]);
        assert!(engine.is_completed());
    }

    #[test]
    fn test_hyperspectral_preview_then_final() {
        let (engine, receiver) = engine(AcquisitionMode::RasterScanHyperspectral, RunMode::Single);

        engine.on_channel_ready(1, ChannelId::Raster, 1, raster(1), Update::Filled);
        engine.on_channel_ready(1, ChannelId::Hypercube, 1, cube(), Update::Filled);

        let (previews, finals) = receiver.drain();
        assert_eq!(previews.len(), 1);
        assert_eq!(
            previews[0].roles(),
            vec![ItemRole::Raster(RasterInput::A), ItemRole::Raster(RasterInput::B)]
        );
        assert_eq!(finals.len(), 1);
        let names: Vec<_> = finals[0].items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, vec!["SPIM HAADF", "SPIM BF", "SPIM"]);
        assert_eq!(finals[0].cycle, 1);
    }

    #[test]
    fn test_raster_index_must_advance() {
        let (engine, receiver) = engine(AcquisitionMode::RasterScan, RunMode::Continuous);

        // line updates for the first frame carry the previous index
        engine.on_channel_ready(1, ChannelId::Raster, 0, raster(1), Update::Filled);
        engine.on_channel_ready(1, ChannelId::Raster, 0, raster(2), Update::Filled);
        engine.on_channel_ready(1, ChannelId::Raster, 1, raster(3), Update::Filled);
        engine.on_channel_ready(1, ChannelId::Raster, 1, raster(4), Update::Filled);
        engine.on_channel_ready(1, ChannelId::Raster, 2, raster(5), Update::Filled);

        let (previews, finals) = receiver.drain();
        assert_eq!(previews.len(), 3);
        assert_eq!(finals.iter().map(|b| b.cycle).collect::<Vec<_>>(), vec![1, 2]);
        assert!(!engine.is_completed());
        assert_eq!(engine.reference().len(), 2);
        assert_eq!(engine.reference()[0].role, ItemRole::Reference(RasterInput::A));
    }

    #[test]
    fn test_reference_leads_hyperspectral_finals() {
        let (sink, receiver) = result_channels(16);
        let engine = CompositionEngine::new(sink);

        engine.arm(plan(1, AcquisitionMode::RasterScan, RunMode::Single));
        engine.on_channel_ready(1, ChannelId::Raster, 1, raster(7), Update::Filled);
        engine.disarm();

        engine.arm(plan(2, AcquisitionMode::RasterScanHyperspectral, RunMode::Single));
        engine.on_channel_ready(2, ChannelId::Spectrum, 1, snapshot(ElementType::F32, vec![16], 0), Update::Filled);
        engine.on_channel_ready(2, ChannelId::Raster, 1, raster(1), Update::Filled);
        engine.on_channel_ready(2, ChannelId::Hypercube, 1, cube(), Update::Filled);

        let (_, finals) = receiver.drain();
        let last = finals.last().unwrap();
        assert_eq!(
            last.roles(),
            vec![
                ItemRole::Reference(RasterInput::A),
                ItemRole::Reference(RasterInput::B),
                ItemRole::Raster(RasterInput::A),
                ItemRole::Raster(RasterInput::B),
                ItemRole::Hypercube,
                ItemRole::Spectrum,
            ]
        );
        assert_eq!(last.items[0].name, "HAADF");
        assert_eq!(last.items[0].snapshot.values()[0], f64::from(i16::from_ne_bytes([7, 7])));
    }

    #[test]
    fn test_newer_cycle_terminates_open_one() {
        let (engine, receiver) = engine(AcquisitionMode::RasterScanHyperspectral, RunMode::Continuous);

        engine.on_channel_ready(1, ChannelId::Hypercube, 1, cube(), Update::Filled);
        engine.on_channel_ready(1, ChannelId::Hypercube, 2, cube(), Update::Filled);
        engine.on_channel_ready(1, ChannelId::Raster, 2, raster(1), Update::Filled);
        // stale completion for an already finalized cycle
        engine.on_channel_ready(1, ChannelId::Hypercube, 1, cube(), Update::Filled);

        let (previews, finals) = receiver.drain();
        assert_eq!(finals.len(), 2);
        assert_eq!(finals[0].cycle, 1);
        assert_eq!(finals[0].missing, vec![ChannelId::Raster]);
        assert!(finals[0].is_degraded());
        assert_eq!(finals[1].cycle, 2);
        assert!(!finals[1].is_degraded());
        assert!(previews.iter().all(|p| p.cycle >= 1));
        assert_eq!(previews.last().unwrap().cycle, 3);
    }

    #[test]
    fn test_finish_closes_open_cycle() {
        let (engine, receiver) = engine(AcquisitionMode::RasterScanHyperspectral, RunMode::Continuous);

        engine.on_channel_ready(1, ChannelId::Raster, 2, raster(1), Update::Filled);
        engine.finish(1, 2);

        let (_, finals) = receiver.drain();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].cycle, 2);
        assert_eq!(finals[0].missing, vec![ChannelId::Hypercube]);
        assert!(engine.is_completed());
    }

    #[test]
    fn test_finish_without_completed_channel_emits_degraded_final() {
        let (engine, receiver) = engine(AcquisitionMode::SpectrumCube, RunMode::Continuous);

        engine.on_channel_ready(1, ChannelId::Spectrum, 4, snapshot(ElementType::F32, vec![16], 0), Update::Filled);
        engine.finish(1, 4);

        let (previews, finals) = receiver.drain();
        assert_eq!(previews.len(), 1);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].cycle, 4);
        assert_eq!(finals[0].roles(), vec![ItemRole::Spectrum]);
        assert_eq!(finals[0].missing, vec![ChannelId::Hypercube]);
        assert!(engine.is_completed());
        assert!(engine.wait_completed(Duration::from_millis(1)));
    }

    #[test]
    fn test_finish_with_unadvanced_raster_keeps_lines() {
        let (engine, receiver) = engine(AcquisitionMode::RasterScan, RunMode::Single);

        // line update only; the scan index never advanced
        engine.on_channel_ready(1, ChannelId::Raster, 0, raster(5), Update::Filled);
        engine.finish(1, 1);

        let (previews, finals) = receiver.drain();
        assert_eq!(previews.len(), 1);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].cycle, 1);
        assert_eq!(
            finals[0].roles(),
            vec![ItemRole::Raster(RasterInput::A), ItemRole::Raster(RasterInput::B)]
        );
        assert_eq!(finals[0].missing, vec![ChannelId::Raster]);
        assert!(engine.reference().is_empty());
        assert!(engine.take_fault().is_none());
    }

    #[test]
    fn test_finish_after_final_emits_nothing_new() {
        let (engine, receiver) = engine(AcquisitionMode::Frame, RunMode::Continuous);
        let frame = snapshot(ElementType::F32, vec![8, 4], 1);

        engine.on_channel_ready(1, ChannelId::CameraFrame, 1, frame, Update::Filled);
        engine.finish(1, 1);

        let (_, finals) = receiver.drain();
        assert_eq!(finals.len(), 1);
        assert!(!finals[0].is_degraded());
        assert!(engine.is_completed());
    }

    #[test]
    fn test_fault_discards_cycle() {
        let (engine, receiver) = engine(AcquisitionMode::RasterScanHyperspectral, RunMode::Single);

        engine.on_channel_ready(1, ChannelId::Raster, 1, raster(1), Update::Filled);
        engine.report_fault(Some(1), AcqError::violation(ChannelId::Hypercube, "bad shape"));
        engine.on_channel_ready(1, ChannelId::Hypercube, 1, cube(), Update::Filled);

        let (_, finals) = receiver.drain();
        assert!(finals.is_empty());
        assert!(!engine.wait_completed(Duration::from_millis(1)));
        assert!(engine.take_fault().is_some());
        assert!(engine.take_fault().is_none());
        let stats = engine.disarm().unwrap();
        assert_eq!(stats.finals, 0);
    }

    #[test]
    fn test_stale_epoch_is_ignored() {
        let (engine, receiver) = engine(AcquisitionMode::Frame, RunMode::Continuous);
        engine.on_channel_ready(7, ChannelId::CameraFrame, 1, snapshot(ElementType::F32, vec![2], 0), Update::Filled);
        engine.report_fault(Some(7), AcqError::violation(ChannelId::CameraFrame, "late"));

        let (previews, finals) = receiver.drain();
        assert!(previews.is_empty() && finals.is_empty());
        assert!(engine.take_fault().is_none());
    }

    #[test]
    fn test_drain_completes_after_open_cycle() {
        let (engine, receiver) = engine(AcquisitionMode::RasterScanHyperspectral, RunMode::Continuous);

        engine.on_channel_ready(1, ChannelId::Raster, 1, raster(1), Update::Filled);
        engine.request_drain();
        assert!(!engine.is_completed());
        engine.on_channel_ready(1, ChannelId::Hypercube, 1, cube(), Update::Filled);

        assert!(engine.is_completed());
        assert_eq!(receiver.drain().1.len(), 1);
        assert!(!engine.disarm().unwrap().discarded);
    }
}

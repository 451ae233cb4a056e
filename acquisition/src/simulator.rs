/*!
Simulated camera and scan generator.

[`SimulatedDriver`] drives the full callback contract from a background
worker thread: it locks channel buffers, writes synthetic data and unlocks
them the way the real devices do, including line-by-line raster updates
that repeat the previous scan index. [`SimulatedSensor`] is the matching
health source. Used by the `acquire` binary when no hardware is attached and
by the scenario tests.
*/

use crate::callbacks::{CallbackTable, Commit};
use crate::config::{Binning, RunMode, SimulatorConfig};
use crate::driver::{Driver, StartRequest};
use crate::geometry::SensorReadout;
use crate::health::HealthSource;
use shared::protocol::{CAMERA_ELEMENT, RASTER_ELEMENT};
use shared::{AcqError, AcquisitionMode, ChannelId, ElementType, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct SimulatedDriver {
    config: SimulatorConfig,
    readout: SensorReadout,
    table: Option<CallbackTable>,
    running: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    worker: Option<JoinHandle<u64>>,
    reject_start: bool,
    last_request: Option<StartRequest>,
    parked: Option<(usize, usize)>,
    starts: u64,
    stops: u64,
}

impl SimulatedDriver {
    pub fn new(config: &SimulatorConfig) -> Self {
        let readout = SensorReadout {
            sensor_width: config.sensor_width,
            sensor_height: config.sensor_height,
            binning: Binning::default(),
            image_width: config.sensor_width,
            image_height: config.sensor_height,
        };
        Self {
            config: config.clone(),
            readout,
            table: None,
            running: Arc::new(AtomicBool::new(false)),
            abort: Arc::new(AtomicBool::new(false)),
            worker: None,
            reject_start: false,
            last_request: None,
            parked: None,
            starts: 0,
            stops: 0,
        }
    }

    /// Make the next start calls fail like a busy device
    pub fn set_reject_start(&mut self, reject: bool) {
        self.reject_start = reject;
    }

    pub fn is_registered(&self) -> bool {
        self.table.is_some()
    }

    pub fn last_request(&self) -> Option<&StartRequest> {
        self.last_request.as_ref()
    }

    /// Where the probe was last parked
    pub fn parked(&self) -> Option<(usize, usize)> {
        self.parked
    }

    pub fn starts(&self) -> u64 {
        self.starts
    }

    pub fn stops(&self) -> u64 {
        self.stops
    }

    /// Largest supported step not above `requested`
    fn snap(&self, requested: u32) -> u32 {
        let mut steps = self.config.binning_steps.clone();
        steps.sort_unstable();
        steps
            .iter()
            .copied()
            .filter(|step| *step <= requested)
            .last()
            .or_else(|| steps.first().copied())
            .unwrap_or(1)
    }
}

impl Driver for SimulatedDriver {
    fn register(&mut self, table: CallbackTable) -> Result<()> {
        debug!(?table, "callback table registered");
        self.table = Some(table);
        Ok(())
    }

    fn unregister(&mut self) {
        self.table = None;
    }

    fn start(&mut self, request: StartRequest) -> Result<()> {
        if self.reject_start {
            return Err(AcqError::driver("simulated device is busy"));
        }
        let table = self
            .table
            .clone()
            .ok_or_else(|| AcqError::driver("start without a registered callback table"))?;
        self.stop(true);

        self.running.store(true, Ordering::SeqCst);
        self.abort.store(false, Ordering::SeqCst);
        self.starts += 1;
        self.last_request = Some(request.clone());

        let worker = Worker {
            table,
            request,
            lines_per_update: self.config.lines_per_update.max(1),
            interval: Duration::from_millis(self.config.cycle_interval_ms),
            running: Arc::clone(&self.running),
            abort: Arc::clone(&self.abort),
        };
        let handle = thread::Builder::new()
            .name("simulated-driver".to_string())
            .spawn(move || worker.run())
            .map_err(|e| AcqError::driver(format!("failed to spawn simulator thread: {}", e)))?;
        self.worker = Some(handle);
        Ok(())
    }

    fn stop(&mut self, immediate: bool) {
        self.running.store(false, Ordering::SeqCst);
        if immediate {
            self.abort.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.worker.take() {
            self.stops += 1;
            match handle.join() {
                Ok(cycles) => info!("🧪 Simulator stopped after {} cycle(s)", cycles),
                Err(_) => warn!("⚠️ Simulator thread panicked"),
            }
        }
    }

    fn apply_binning(&mut self, requested: Binning) -> Result<SensorReadout> {
        if requested.x == 0 || requested.y == 0 {
            return Err(AcqError::driver(format!("binning {}x{} refused", requested.x, requested.y)));
        }
        let x = self.snap(requested.x);
        // full vertical binning is the spectrometer readout
        let y = if requested.y as usize >= self.config.sensor_height {
            self.config.sensor_height as u32
        } else {
            self.snap(requested.y)
        };

        self.readout = SensorReadout {
            sensor_width: self.config.sensor_width,
            sensor_height: self.config.sensor_height,
            binning: Binning::new(x, y),
            image_width: (self.config.sensor_width / x as usize).max(1),
            image_height: (self.config.sensor_height / y as usize).max(1),
        };
        Ok(self.readout)
    }

    fn readout(&self) -> SensorReadout {
        self.readout
    }

    fn inputs(&self) -> Vec<String> {
        self.config.inputs.clone()
    }

    fn park_probe(&mut self, x: usize, y: usize) -> Result<()> {
        self.parked = Some((x, y));
        Ok(())
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        self.stop(true);
    }
}

/// Background producer for one start call
struct Worker {
    table: CallbackTable,
    request: StartRequest,
    lines_per_update: usize,
    interval: Duration,
    running: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl Worker {
    /// Produce cycles until stopped; returns the number of full cycles
    fn run(self) -> u64 {
        info!("🧪 Starting simulated {} acquisition", self.request.mode);
        debug!(
            pattern = self.request.pattern.index(),
            line_averaging = self.request.line_averaging,
            pixel_time_s = self.request.pixel_time_s,
            "scan timing"
        );
        let mut cycle = 0u64;

        while self.running.load(Ordering::SeqCst) {
            let next = cycle + 1;
            let complete = match self.request.mode {
                AcquisitionMode::Frame => self.frame_cycle(next),
                AcquisitionMode::SpectrumCube => self.cube_cycle(next),
                AcquisitionMode::RasterScan | AcquisitionMode::RasterScanHyperspectral => self.raster_cycle(next),
            };
            if !complete {
                break;
            }
            cycle = next;

            if self.request.run == RunMode::Single {
                self.table.finish(cycle);
                break;
            }
            if !self.pause() {
                break;
            }
        }
        cycle
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Sleep for the cycle interval, waking early on stop
    fn pause(&self) -> bool {
        let deadline = Instant::now() + self.interval;
        while Instant::now() < deadline {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(Duration::from_millis(5).min(self.interval));
        }
        true
    }

    /// Lock, fill and unlock one channel buffer
    fn write(&self, channel: ChannelId, cycle: u64, fill: impl FnOnce(&mut [u8])) -> bool {
        if self.aborted() {
            return false;
        }
        let Some(mut lease) = self.table.lock(channel) else {
            return false;
        };
        let expected = if channel == ChannelId::Raster { RASTER_ELEMENT } else { CAMERA_ELEMENT };
        if ElementType::from_code(lease.type_code()) != Some(expected) {
            warn!(%channel, code = lease.type_code(), "⚠️ Buffer element type does not match the device");
            self.table.unlock(channel, cycle, Commit::NoData);
            return false;
        }
        // SAFETY: the lease is held until the unlock below
        fill(unsafe { lease.bytes_mut() });
        self.table.unlock(channel, cycle, Commit::Filled);
        true
    }

    fn dims(&self, channel: ChannelId) -> (usize, usize, usize) {
        self.request
            .geometry
            .descriptor(channel)
            .map(|descriptor| descriptor.xyz())
            .unwrap_or((1, 1, 1))
    }

    fn frame_cycle(&self, cycle: u64) -> bool {
        let (w, _, _) = self.dims(ChannelId::CameraFrame);
        self.write(ChannelId::CameraFrame, cycle, |bytes| {
            fill_f32(bytes, |i| {
                let (x, y) = ((i % w) as f32, (i / w) as f32);
                100.0 + 50.0 * ((x * 0.05 + cycle as f32).sin() * (y * 0.1).cos())
            })
        })
    }

    fn spectrum(&self, cycle: u64, position: usize) -> bool {
        let (spectral, _, _) = self.dims(ChannelId::Spectrum);
        self.write(ChannelId::Spectrum, cycle, |bytes| {
            fill_f32(bytes, |e| peak(e, spectral, position, cycle))
        })
    }

    fn cube(&self, cycle: u64) -> bool {
        let (sx, sy, spectral) = self.dims(ChannelId::Hypercube);
        self.write(ChannelId::Hypercube, cycle, |bytes| {
            fill_f32(bytes, |i| {
                let position = i % (sx * sy);
                peak(i / (sx * sy), spectral, position, cycle)
            })
        })
    }

    fn cube_cycle(&self, cycle: u64) -> bool {
        let (_, rows, _) = self.dims(ChannelId::Hypercube);
        for row in 0..rows {
            if !self.spectrum(cycle, row) {
                return false;
            }
        }
        self.cube(cycle)
    }

    /// One scan frame: partial line updates carry the previous index, the
    /// completed frame carries its own
    fn raster_cycle(&self, cycle: u64) -> bool {
        let (px, py, _) = self.dims(ChannelId::Raster);
        let inputs = self.request.inputs;
        let secondary = self.request.mode.has_secondary();
        let fill = move |bytes: &mut [u8], lines: usize| {
            fill_i16(bytes, |i| {
                let (x, y, plane) = (i % px, (i / px) % py, i / (px * py));
                if y >= lines {
                    return None;
                }
                let base = ((x + y + cycle as usize) % 256) as i16;
                Some(base + inputs[plane.min(1)] as i16 * 100)
            })
        };

        let mut lines = 0;
        while lines < py {
            lines = (lines + self.lines_per_update).min(py);
            if !self.write(ChannelId::Raster, cycle - 1, |bytes| fill(bytes, lines)) {
                return false;
            }
            if secondary && !self.spectrum(cycle, lines * px) {
                return false;
            }
        }
        if !self.write(ChannelId::Raster, cycle, |bytes| fill(bytes, py)) {
            return false;
        }
        !secondary || self.cube(cycle)
    }
}

/// Gaussian emission line drifting with the scan position
fn peak(channel: usize, spectral: usize, position: usize, cycle: u64) -> f32 {
    let center = (spectral / 2 + position % 32) as f32;
    let offset = channel as f32 - center;
    10.0 + 1000.0 * (-offset * offset / 50.0).exp() + (cycle % 7) as f32
}

fn fill_f32(bytes: &mut [u8], value: impl Fn(usize) -> f32) {
    for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
        chunk.copy_from_slice(&value(i).to_ne_bytes());
    }
}

fn fill_i16(bytes: &mut [u8], value: impl Fn(usize) -> Option<i16>) {
    for (i, chunk) in bytes.chunks_exact_mut(2).enumerate() {
        if let Some(v) = value(i) {
            chunk.copy_from_slice(&v.to_ne_bytes());
        }
    }
}

/// Simulated cooled sensor relaxing towards its set point
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    celsius: f64,
    set_point_c: f64,
}

impl SimulatedSensor {
    pub fn new(ambient_c: f64) -> Self {
        Self {
            celsius: ambient_c,
            set_point_c: ambient_c,
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(20.0)
    }
}

impl HealthSource for SimulatedSensor {
    fn temperature(&mut self) -> Result<(f64, bool)> {
        self.celsius += (self.set_point_c - self.celsius) * 0.3;
        let locked = (self.celsius - self.set_point_c).abs() < 0.5;
        Ok((self.celsius, locked))
    }

    fn set_temperature(&mut self, set_point_c: f64) -> Result<()> {
        if !(-100.0..=30.0).contains(&set_point_c) {
            return Err(AcqError::config(format!("set point {:.1} °C out of range", set_point_c)));
        }
        self.set_point_c = set_point_c;
        Ok(())
    }
}

/*!
Acquisition controller: the control surface.

Owns the live configuration, the mode state machine and the driver. All
methods run on the single application thread; the registry and the
composition engine are shared with the driver threads through the callback
table built at arm time.
*/

use crate::callbacks::{CallbackTable, ChannelHooks, Commit, FinishHook, ViolationHook};
use crate::config::{AcquisitionSettings, Binning, EngineConfig};
use crate::driver::{Driver, StartRequest};
use crate::engine::{ArmPlan, CompositionEngine, ItemNames, Update};
use crate::geometry::{resolve, Geometry};
use crate::machine::{AcqState, ModeMachine};
use crate::registry::BufferRegistry;
use crate::sink::{result_channels, SinkReceiver};
use shared::{AcqError, AcquisitionMode, ChannelId, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration snapshot and input assignment of the armed mode
#[derive(Debug, Clone)]
struct ArmedMode {
    settings: Arc<AcquisitionSettings>,
    inputs: [usize; 2],
}

pub struct AcquisitionController<D: Driver> {
    driver: D,
    settings: AcquisitionSettings,
    stop_timeout: Duration,
    machine: ModeMachine,
    registry: Arc<BufferRegistry>,
    engine: Arc<CompositionEngine>,
    geometry: Option<Arc<Geometry>>,
    geometry_stale: bool,
    armed: Option<ArmedMode>,
    epoch: u64,
}

impl<D: Driver> AcquisitionController<D> {
    /// Create a controller and the receiving end of its result sinks
    pub fn new(driver: D, settings: AcquisitionSettings, engine: &EngineConfig) -> (Self, SinkReceiver) {
        let (sink, receiver) = result_channels(engine.preview_capacity);
        let controller = Self {
            driver,
            settings,
            stop_timeout: Duration::from_millis(engine.stop_timeout_ms),
            machine: ModeMachine::new(),
            registry: Arc::new(BufferRegistry::new()),
            engine: Arc::new(CompositionEngine::new(sink)),
            geometry: None,
            geometry_stale: true,
            armed: None,
            epoch: 0,
        };
        (controller, receiver)
    }

    pub fn state(&self) -> AcqState {
        self.machine.state()
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Mutable configuration; only while idle. Shapes follow on the next
    /// geometry reconfiguration.
    pub fn settings_mut(&mut self) -> Result<&mut AcquisitionSettings> {
        let state = self.machine.state();
        if !state.is_idle() {
            return Err(AcqError::transition("change the configuration", state));
        }
        self.geometry_stale = true;
        Ok(&mut self.settings)
    }

    /// Last committed geometry
    pub fn geometry(&self) -> Option<Arc<Geometry>> {
        self.geometry.clone()
    }

    pub fn registry(&self) -> &Arc<BufferRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<CompositionEngine> {
        &self.engine
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Times the controller settled back into `Idle`
    pub fn idle_entries(&self) -> u64 {
        self.machine.idle_entries()
    }

    /// Re-derive buffer shapes from the configuration and the device.
    ///
    /// Camera modes re-apply the binning and adopt whatever the device
    /// actually set. Hyperspectral modes bin the full sensor height.
    pub fn reconfigure_geometry(&mut self) -> Result<Arc<Geometry>> {
        let state = self.machine.state();
        if !state.is_idle() {
            return Err(AcqError::transition("reconfigure geometry", state));
        }

        let mode = self.settings.mode;
        let readout = if mode.uses_camera() {
            let requested = self.settings.camera.binning;
            if requested.x == 0 || requested.y == 0 {
                return Err(AcqError::config(format!(
                    "binning {}x{} has a zero factor",
                    requested.x, requested.y
                )));
            }
            let spectrometer = mode != AcquisitionMode::Frame;
            let request = if spectrometer {
                Binning::new(requested.x, self.driver.readout().sensor_height as u32)
            } else {
                requested
            };

            let readout = self.driver.apply_binning(request)?;
            let adopted = if spectrometer {
                Binning::new(readout.binning.x, requested.y)
            } else {
                readout.binning
            };
            if adopted != requested {
                info!(
                    "🔧 Device applied binning {}x{} (requested {}x{})",
                    adopted.x, adopted.y, requested.x, requested.y
                );
                self.settings.camera.binning = adopted;
            }
            readout
        } else {
            self.driver.readout()
        };

        let geometry = Arc::new(resolve(&self.settings, &readout)?);
        self.registry.allocate(&geometry)?;
        for (channel, descriptor) in geometry.shapes() {
            debug!(%channel, dims = ?descriptor.dims, element = %descriptor.element_type, "channel shape");
        }
        self.geometry = Some(Arc::clone(&geometry));
        self.geometry_stale = false;
        Ok(geometry)
    }

    /// `Idle → Armed`: commit buffers, snapshot the configuration and
    /// register the callback table
    pub fn arm(&mut self, mode: AcquisitionMode) -> Result<()> {
        let state = self.machine.state();
        if !state.is_idle() {
            return Err(AcqError::transition("arm", state));
        }

        if self.settings.mode != mode {
            self.settings.mode = mode;
            self.geometry_stale = true;
        }
        if self.geometry_stale || self.geometry.as_ref().map(|g| g.mode) != Some(mode) {
            self.reconfigure_geometry()?;
        }

        let (inputs, input_names) = if mode.uses_scan() {
            let [a, b] = self.settings.inputs.resolve(&self.driver.inputs())?;
            ([a.0, b.0], [a.1, b.1])
        } else {
            ([0, 1], ["A".to_string(), "B".to_string()])
        };

        self.machine.arm(mode)?;
        self.epoch += 1;
        let epoch = self.epoch;

        if let Err(err) = self.registry.arm(mode.armed_channels()) {
            self.machine.settle()?;
            return Err(err);
        }
        let names = ItemNames::new(mode, &self.settings.camera.model, [input_names[0].as_str(), input_names[1].as_str()]);
        self.engine.arm(ArmPlan {
            epoch,
            mode,
            run: self.settings.run,
            names,
        });

        if let Err(err) = self.driver.register(self.callback_table(mode, epoch)) {
            self.engine.disarm();
            self.registry.disarm();
            self.machine.settle()?;
            return Err(err);
        }

        self.armed = Some(ArmedMode {
            settings: Arc::new(self.settings.clone()),
            inputs,
        });
        info!("🎯 Armed {} ({:?} run, epoch {})", mode, self.settings.run, epoch);
        Ok(())
    }

    /// `Armed → Acquiring`; a refused start returns to `Idle`
    pub fn start(&mut self) -> Result<()> {
        let state = self.machine.state();
        let (AcqState::Armed(mode), Some(armed), Some(geometry)) = (state, self.armed.clone(), self.geometry.clone())
        else {
            return Err(AcqError::transition("start", state));
        };

        let settings = &armed.settings;
        let request = StartRequest {
            mode,
            geometry,
            exposure_s: settings.exposure_s,
            pixel_time_s: settings.pixel_time_s(),
            line_averaging: settings.scan.line_averaging,
            pattern: settings.scan.pattern,
            inputs: armed.inputs,
            run: settings.run,
        };

        match self.driver.start(request) {
            Ok(()) => {
                self.machine.started()?;
                info!("▶️ Acquiring {}", mode);
                Ok(())
            }
            Err(err) => {
                warn!("⚠️ Start of {} refused: {}", mode, err);
                self.driver.unregister();
                self.engine.disarm();
                self.registry.disarm();
                self.armed = None;
                self.machine.start_failed()?;
                Err(err)
            }
        }
    }

    /// Stop the acquisition. Idle is a no-op.
    ///
    /// An immediate stop aborts: the open cycle is discarded. Otherwise the
    /// current cycle may finish within the stop timeout before the hardware
    /// is released. Either way the controller ends `Idle`; `StopTimeout`
    /// reports buffers the driver failed to hand back in time.
    pub fn stop(&mut self, immediate: bool) -> Result<()> {
        match self.machine.state() {
            AcqState::Idle => {
                debug!("stop while idle");
                Ok(())
            }
            AcqState::Armed(_) => {
                self.machine.abort();
                self.release()
            }
            AcqState::Acquiring(_) | AcqState::Completing(_) => {
                if self.engine.is_completed() {
                    return self.complete();
                }
                if !immediate {
                    self.driver.stop(false);
                    self.engine.request_drain();
                    if self.engine.wait_completed(self.stop_timeout) {
                        return self.complete();
                    }
                    warn!("⚠️ Cycle did not finish within {:?}, aborting", self.stop_timeout);
                }
                self.abort()
            }
            AcqState::Aborting(_) => self.abort(),
        }
    }

    /// Surface callback-thread faults and finish completed acquisitions
    pub fn poll(&mut self) -> Result<AcqState> {
        if let Some(err) = self.engine.take_fault() {
            if !self.machine.state().is_idle() {
                if let Err(stop_err) = self.abort() {
                    warn!("⚠️ {}", stop_err);
                }
            }
            return Err(err);
        }
        if matches!(self.machine.state(), AcqState::Acquiring(_)) && self.engine.is_completed() {
            self.complete()?;
        }
        Ok(self.machine.state())
    }

    /// `Acquiring → Completing → Idle`
    fn complete(&mut self) -> Result<()> {
        if matches!(self.machine.state(), AcqState::Acquiring(_)) {
            self.machine.complete()?;
        }
        self.driver.stop(false);
        self.release()
    }

    /// Any state → `Aborting → Idle`
    fn abort(&mut self) -> Result<()> {
        self.machine.abort();
        self.driver.stop(true);
        self.release()
    }

    /// Unregister callbacks, wait for lent buffers and settle into `Idle`
    fn release(&mut self) -> Result<()> {
        self.driver.unregister();
        if let Some(stats) = self.engine.disarm() {
            info!(
                "📊 Activation stats: {} final(s), {} degraded, {} preview(s)",
                stats.finals, stats.degraded, stats.previews
            );
        }
        self.registry.disarm();

        let started = Instant::now();
        let drained = self.registry.wait_idle(self.stop_timeout);
        let outcome = if drained {
            Ok(())
        } else {
            let in_flight = self.registry.force_release();
            Err(AcqError::StopTimeout {
                waited_ms: started.elapsed().as_millis() as u64,
                in_flight,
            })
        };

        if let Some(armed) = self.armed.take() {
            let spot = armed.settings.spot;
            if armed.settings.mode.uses_scan() && spot.park_after_stop {
                match self.driver.park_probe(spot.x, spot.y) {
                    Ok(()) => debug!(x = spot.x, y = spot.y, "probe parked"),
                    Err(err) => warn!("⚠️ Could not park the probe: {}", err),
                }
            }
        }

        self.machine.settle()?;
        outcome
    }

    fn callback_table(&self, mode: AcquisitionMode, epoch: u64) -> CallbackTable {
        let engine = Arc::clone(&self.engine);
        let finish: FinishHook = Arc::new(move |cycle| engine.finish(epoch, cycle));
        let engine = Arc::clone(&self.engine);
        let violation: ViolationHook = Arc::new(move |err| engine.report_fault(Some(epoch), err));

        let mut table = CallbackTable::new(mode, epoch, finish, violation);
        for channel in mode.armed_channels().iter() {
            table = table.with_channel(channel, self.channel_hooks(channel, epoch));
        }
        table
    }

    fn channel_hooks(&self, channel: ChannelId, epoch: u64) -> ChannelHooks {
        let (registry, engine) = (Arc::clone(&self.registry), Arc::clone(&self.engine));
        let describe = Arc::new(move || match registry.describe(channel) {
            Ok(descriptor) => Some(descriptor),
            Err(err) => {
                engine.report_fault(Some(epoch), err);
                None
            }
        });

        let (registry, engine) = (Arc::clone(&self.registry), Arc::clone(&self.engine));
        let lock = Arc::new(move || match registry.lock(channel) {
            Ok(lease) => Some(lease),
            Err(err) => {
                engine.report_fault(Some(epoch), err);
                None
            }
        });

        let (registry, engine) = (Arc::clone(&self.registry), Arc::clone(&self.engine));
        let unlock = Arc::new(move |cycle: u64, commit: Commit| {
            match registry.commit(channel, commit.has_data()) {
                Ok(Some(snapshot)) => {
                    let update = if commit == Commit::InProgress {
                        Update::Partial
                    } else {
                        Update::Filled
                    };
                    engine.on_channel_ready(epoch, channel, cycle, snapshot, update);
                }
                Ok(None) => {}
                Err(err) => engine.report_fault(Some(epoch), err),
            }
        });

        ChannelHooks { describe, lock, unlock }
    }
}

impl<D: Driver> Drop for AcquisitionController<D> {
    fn drop(&mut self) {
        if !self.machine.state().is_idle() {
            if let Err(err) = self.stop(true) {
                warn!("⚠️ {}", err);
            }
        }
    }
}

impl<D: Driver> std::fmt::Debug for AcquisitionController<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("state", &self.machine.state())
            .field("epoch", &self.epoch)
            .field("geometry", &self.geometry)
            .finish()
    }
}

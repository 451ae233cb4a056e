//! End-to-end acquisition scenarios through the controller.
//!
//! `ManualDriver` hands the registered callback table back to the test so
//! each scenario can play the driver's side step by step; the simulator
//! covers the threaded paths.

use acquisition::config::{AcquisitionSettings, Binning, EngineConfig, SimulatorConfig};
use acquisition::{
    AcqState, AcquisitionController, CallbackTable, Commit, Driver, SensorReadout, SimulatedDriver, SinkReceiver,
    StartRequest,
};
use parking_lot::Mutex;
use shared::{AcquisitionMode, ChannelId, ErrorKind, ItemRole, RasterInput, Result};
use std::sync::Arc;
use std::time::Duration;

type SharedTable = Arc<Mutex<Option<CallbackTable>>>;

struct ManualDriver {
    table: SharedTable,
    readout: SensorReadout,
    stops: Arc<Mutex<Vec<bool>>>,
}

impl ManualDriver {
    fn new(width: usize, height: usize) -> (Self, SharedTable) {
        let table = SharedTable::default();
        let driver = Self {
            table: Arc::clone(&table),
            readout: SensorReadout {
                sensor_width: width,
                sensor_height: height,
                binning: Binning::default(),
                image_width: width,
                image_height: height,
            },
            stops: Arc::default(),
        };
        (driver, table)
    }
}

impl Driver for ManualDriver {
    fn register(&mut self, table: CallbackTable) -> Result<()> {
        *self.table.lock() = Some(table);
        Ok(())
    }

    fn unregister(&mut self) {
        *self.table.lock() = None;
    }

    fn start(&mut self, _request: StartRequest) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self, immediate: bool) {
        self.stops.lock().push(immediate);
    }

    fn apply_binning(&mut self, requested: Binning) -> Result<SensorReadout> {
        self.readout.binning = requested;
        self.readout.image_width = (self.readout.sensor_width / requested.x as usize).max(1);
        self.readout.image_height = (self.readout.sensor_height / requested.y as usize).max(1);
        Ok(self.readout)
    }

    fn readout(&self) -> SensorReadout {
        self.readout
    }

    fn inputs(&self) -> Vec<String> {
        vec!["HAADF".to_string(), "BF".to_string()]
    }

    fn park_probe(&mut self, _x: usize, _y: usize) -> Result<()> {
        Ok(())
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        stop_timeout_ms: 50,
        preview_capacity: 64,
    }
}

fn manual(mode: AcquisitionMode) -> (AcquisitionController<ManualDriver>, SinkReceiver, SharedTable) {
    let (driver, table) = ManualDriver::new(1024, 256);
    let settings = AcquisitionSettings {
        mode,
        ..AcquisitionSettings::default()
    };
    let (controller, sink) = AcquisitionController::new(driver, settings, &engine_config());
    (controller, sink, table)
}

fn table(shared: &SharedTable) -> CallbackTable {
    shared.lock().clone().expect("no callback table registered")
}

/// Play one driver write: lock, fill with `value`, unlock
fn write(table: &CallbackTable, channel: ChannelId, cycle: u64, value: u8) {
    let mut lease = table.lock(channel).expect("lock refused");
    unsafe { lease.bytes_mut() }.fill(value);
    table.unlock(channel, cycle, Commit::Filled);
}

#[test]
fn frame_round_trip_yields_one_final() {
    let (mut controller, sink, shared) = manual(AcquisitionMode::Frame);
    controller.arm(AcquisitionMode::Frame).unwrap();
    controller.start().unwrap();

    write(&table(&shared), ChannelId::CameraFrame, 1, 0);
    controller.stop(false).unwrap();

    let (_, finals) = sink.drain();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].items.len(), 1);
    assert_eq!(finals[0].items[0].role, ItemRole::CameraImage);
    assert_eq!(finals[0].items[0].dims(), &[1024, 256]);
    assert_eq!(controller.state(), AcqState::Idle);
    assert!(shared.lock().is_none());
    assert_eq!(*controller.driver().stops.lock(), vec![false]);
}

#[test]
fn hyperspectral_raster_first_gives_preview_then_final() {
    let (mut controller, sink, shared) = manual(AcquisitionMode::RasterScanHyperspectral);
    controller.arm(AcquisitionMode::RasterScanHyperspectral).unwrap();
    controller.start().unwrap();

    let table = table(&shared);
    assert_eq!(table.describe(ChannelId::Hypercube).unwrap().dims, vec![10, 10, 1024]);
    write(&table, ChannelId::Raster, 1, 1);
    write(&table, ChannelId::Hypercube, 1, 0);

    let (previews, finals) = sink.drain();
    assert_eq!(previews.len(), 1);
    assert_eq!(
        previews[0].roles(),
        vec![ItemRole::Raster(RasterInput::A), ItemRole::Raster(RasterInput::B)]
    );
    assert_eq!(finals.len(), 1);
    assert_eq!(
        finals[0].roles(),
        vec![ItemRole::Raster(RasterInput::A), ItemRole::Raster(RasterInput::B), ItemRole::Hypercube]
    );
    assert_eq!(finals[0].items[0].name, "SPIM HAADF");
    assert_eq!(finals[0].items[0].dims(), &[10, 10]);
    assert_eq!(finals[0].items[2].dims(), &[10, 10, 1024]);

    assert_eq!(controller.poll().unwrap(), AcqState::Idle);
}

#[test]
fn raster_scan_becomes_hyperspectral_reference() {
    let (mut controller, sink, shared) = manual(AcquisitionMode::RasterScan);
    controller.settings_mut().unwrap().hyperspectral.scan_x = 32;
    controller.settings_mut().unwrap().hyperspectral.scan_y = 32;

    controller.arm(AcquisitionMode::RasterScan).unwrap();
    controller.start().unwrap();
    write(&table(&shared), ChannelId::Raster, 1, 3);
    assert_eq!(controller.poll().unwrap(), AcqState::Idle);

    controller.arm(AcquisitionMode::RasterScanHyperspectral).unwrap();
    controller.start().unwrap();
    let table = table(&shared);
    write(&table, ChannelId::Spectrum, 1, 0);
    write(&table, ChannelId::Raster, 1, 1);
    write(&table, ChannelId::Hypercube, 1, 0);

    let (_, finals) = sink.drain();
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
    assert_eq!(last.items[2].name, "SPIM HAADF");
}

#[test]
fn immediate_stop_mid_cycle_discards_partial_data() {
    let (mut controller, sink, shared) = manual(AcquisitionMode::RasterScanHyperspectral);
    controller.arm(AcquisitionMode::RasterScanHyperspectral).unwrap();
    controller.start().unwrap();

    write(&table(&shared), ChannelId::Raster, 1, 1);
    controller.stop(true).unwrap();

    let (_, finals) = sink.drain();
    assert!(finals.is_empty());
    assert_eq!(controller.state(), AcqState::Idle);
    assert!(controller.registry().armed().is_empty());
    assert_eq!(controller.registry().in_flight(), 0);
}

#[test]
fn stop_twice_settles_once() {
    let (mut controller, _sink, _shared) = manual(AcquisitionMode::Frame);
    controller.stop(true).unwrap();
    assert_eq!(controller.idle_entries(), 0);

    controller.arm(AcquisitionMode::Frame).unwrap();
    controller.start().unwrap();
    controller.stop(true).unwrap();
    controller.stop(true).unwrap();

    assert_eq!(controller.idle_entries(), 1);
    assert_eq!(controller.state(), AcqState::Idle);
}

#[test]
fn describe_is_stable_until_reconfigure() {
    let (mut controller, _sink, shared) = manual(AcquisitionMode::Frame);
    controller.arm(AcquisitionMode::Frame).unwrap();
    let before = table(&shared).describe(ChannelId::CameraFrame).unwrap();
    assert_eq!(before.dims, vec![1024, 256]);
    assert_eq!(controller.settings_mut().unwrap_err().kind(), ErrorKind::InvalidTransition);
    controller.stop(true).unwrap();

    controller.settings_mut().unwrap().camera.binning = Binning::new(2, 2);
    assert_eq!(controller.registry().allocated(ChannelId::CameraFrame), Some(before));

    controller.reconfigure_geometry().unwrap();
    assert_eq!(controller.registry().allocated(ChannelId::CameraFrame).unwrap().dims, vec![512, 128]);
}

#[test]
fn unsupported_binning_adopts_device_value() {
    let config = SimulatorConfig {
        binning_steps: vec![1, 2, 4],
        ..SimulatorConfig::default()
    };
    let mut settings = AcquisitionSettings::default();
    settings.camera.binning = Binning::new(3, 3);
    let (mut controller, _sink) = AcquisitionController::new(SimulatedDriver::new(&config), settings, &engine_config());

    let geometry = controller.reconfigure_geometry().unwrap();
    assert_eq!(controller.settings().camera.binning, Binning::new(2, 2));
    assert_eq!(geometry.descriptor(ChannelId::CameraFrame).unwrap().dims, vec![512, 128]);
    assert_eq!(controller.registry().allocated(ChannelId::CameraFrame).unwrap().dims, vec![512, 128]);
}

#[test]
fn rejected_start_returns_to_idle() {
    let mut driver = SimulatedDriver::new(&SimulatorConfig::default());
    driver.set_reject_start(true);
    let (mut controller, _sink) = AcquisitionController::new(driver, AcquisitionSettings::default(), &engine_config());

    controller.arm(AcquisitionMode::Frame).unwrap();
    let err = controller.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DriverRejected);
    assert_eq!(controller.state(), AcqState::Idle);
    assert!(!controller.driver().is_registered());

    controller.driver_mut().set_reject_start(false);
    controller.arm(AcquisitionMode::Frame).unwrap();
    controller.start().unwrap();
    controller.stop(true).unwrap();
}

#[test]
fn contract_violation_surfaces_on_poll() {
    let (mut controller, sink, shared) = manual(AcquisitionMode::Frame);
    controller.arm(AcquisitionMode::Frame).unwrap();
    controller.start().unwrap();

    let table = table(&shared);
    assert!(table.lock(ChannelId::Raster).is_none());

    let err = controller.poll().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallbackContractViolation);
    assert_eq!(controller.state(), AcqState::Idle);
    assert!(sink.drain().1.is_empty());
    assert_eq!(controller.poll().unwrap(), AcqState::Idle);
}

#[test]
fn unlock_without_lock_surfaces_on_poll() {
    let (mut controller, sink, shared) = manual(AcquisitionMode::Frame);
    controller.arm(AcquisitionMode::Frame).unwrap();
    controller.start().unwrap();

    table(&shared).unlock(ChannelId::CameraFrame, 1, Commit::Filled);

    let err = controller.poll().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallbackContractViolation);
    assert_eq!(controller.state(), AcqState::Idle);
    assert!(sink.drain().1.is_empty());
}

#[test]
fn unreturned_buffer_reports_stop_timeout() {
    let (mut controller, _sink, shared) = manual(AcquisitionMode::Frame);
    controller.arm(AcquisitionMode::Frame).unwrap();
    controller.start().unwrap();

    let _lease = table(&shared).lock(ChannelId::CameraFrame).unwrap();
    let err = controller.stop(true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StopTimeout);
    assert_eq!(controller.state(), AcqState::Idle);
    assert_eq!(controller.registry().in_flight(), 0);
}

#[test]
fn start_requires_armed_mode() {
    let (mut controller, _sink, _shared) = manual(AcquisitionMode::Frame);
    assert_eq!(controller.start().unwrap_err().kind(), ErrorKind::InvalidTransition);

    controller.settings_mut().unwrap().roi.enabled = true;
    controller.settings_mut().unwrap().roi.x0 = 40;
    let err = controller.arm(AcquisitionMode::RasterScan).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
    assert_eq!(controller.state(), AcqState::Idle);
}

fn simulator_config() -> SimulatorConfig {
    SimulatorConfig {
        sensor_width: 64,
        sensor_height: 16,
        cycle_interval_ms: 5,
        lines_per_update: 2,
        ..SimulatorConfig::default()
    }
}

#[test]
fn simulated_single_raster_scan_completes_and_parks() {
    let mut settings = AcquisitionSettings::default();
    settings.scan.pixels_x = 8;
    settings.scan.pixels_y = 8;
    settings.spot.x = 3;
    settings.spot.y = 5;
    let driver = SimulatedDriver::new(&simulator_config());
    let (mut controller, sink) = AcquisitionController::new(driver, settings, &engine_config());

    controller.arm(AcquisitionMode::RasterScan).unwrap();
    controller.start().unwrap();
    let bundle = sink.next_final(Duration::from_secs(5)).expect("no final bundle");
    assert_eq!(bundle.cycle, 1);
    assert_eq!(bundle.items[0].dims(), &[8, 8]);

    for _ in 0..100 {
        if controller.poll().unwrap() == AcqState::Idle {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(controller.state(), AcqState::Idle);
    assert_eq!(controller.driver().parked(), Some((3, 5)));
    assert_eq!(controller.driver().last_request().unwrap().inputs, [0, 1]);

    let (previews, finals) = sink.drain();
    assert!(finals.is_empty());
    assert!(previews.iter().all(|p| p.cycle <= 1));
}

#[test]
fn simulated_continuous_hyperspectral_keeps_order() {
    let mut settings = AcquisitionSettings::default();
    settings.run = acquisition::RunMode::Continuous;
    settings.scan.pixels_x = 8;
    settings.scan.pixels_y = 8;
    settings.hyperspectral.scan_x = 4;
    settings.hyperspectral.scan_y = 4;
    let driver = SimulatedDriver::new(&simulator_config());
    let (mut controller, sink) = AcquisitionController::new(driver, settings, &engine_config());

    controller.arm(AcquisitionMode::RasterScanHyperspectral).unwrap();
    controller.start().unwrap();

    let mut finals = Vec::new();
    while finals.len() < 3 {
        let bundle = sink.next_final(Duration::from_secs(5)).expect("no final bundle");
        finals.push(bundle);
    }
    controller.stop(false).unwrap();
    let (previews, rest) = sink.drain();
    finals.extend(rest);

    let cycles: Vec<u64> = finals.iter().map(|b| b.cycle).collect();
    assert!(cycles.windows(2).all(|w| w[0] < w[1]), "{:?}", cycles);
    assert!(finals.iter().all(|b| !b.is_degraded()));
    assert_eq!(finals[0].items.last().unwrap().role, ItemRole::Spectrum);
    assert_eq!(finals[0].items[2].dims(), &[4, 4, 64]);

    let preview_cycles: Vec<u64> = previews.iter().map(|b| b.cycle).collect();
    assert!(preview_cycles.windows(2).all(|w| w[0] <= w[1]), "{:?}", preview_cycles);
    assert_eq!(controller.state(), AcqState::Idle);
}

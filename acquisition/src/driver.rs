/*!
Hardware driver seam.

A [`Driver`] is the camera plus scan generator pair the acquisition core
controls. Drivers receive a [`CallbackTable`] when a mode is armed and call
its hooks from their own threads while acquiring.
*/

use crate::callbacks::CallbackTable;
use crate::config::{Binning, RunMode, ScanPattern};
use crate::geometry::{Geometry, SensorReadout};
use shared::{AcquisitionMode, Result};
use std::sync::Arc;

/// Parameters of one hardware start call
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub mode: AcquisitionMode,
    pub geometry: Arc<Geometry>,
    pub exposure_s: f64,
    pub pixel_time_s: f64,
    pub line_averaging: u32,
    pub pattern: ScanPattern,
    /// Scan generator input indices feeding raster planes A and B
    pub inputs: [usize; 2],
    pub run: RunMode,
}

pub trait Driver: Send {
    /// Install the callback table of a new activation
    fn register(&mut self, table: CallbackTable) -> Result<()>;

    /// Drop the installed callback table; no hook may be called afterwards
    fn unregister(&mut self);

    /// Start the hardware; an error means nothing was started
    fn start(&mut self, request: StartRequest) -> Result<()>;

    /// Stop the hardware. Immediate stops abandon the current cycle; others
    /// let it run to its end. Must be safe to call when already stopped.
    fn stop(&mut self, immediate: bool);

    /// Apply a camera binning, returning the readout the device actually uses
    fn apply_binning(&mut self, requested: Binning) -> Result<SensorReadout>;

    /// Current camera readout
    fn readout(&self) -> SensorReadout;

    /// Names of the scan generator inputs
    fn inputs(&self) -> Vec<String>;

    /// Move the probe to a scan position
    fn park_probe(&mut self, x: usize, y: usize) -> Result<()>;
}

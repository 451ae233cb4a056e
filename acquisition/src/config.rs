/*!
Configuration management for the acquisition core.

[`AcquisitionSettings`] is the live, mutable configuration owned by the
control thread. The controller captures an immutable copy of it when a mode is
armed; callbacks and the geometry resolver only ever see that copy.
*/

use serde::{Deserialize, Serialize};
use shared::{AcqError, AcquisitionMode};
use std::path::Path;
use anyhow::{Context, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub acquisition: AcquisitionSettings,
    pub engine: EngineConfig,
    pub health: HealthConfig,
    pub simulator: SimulatorConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            acquisition: AcquisitionSettings::default(),
            engine: EngineConfig::default(),
            health: HealthConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an armed mode stops after its first final bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One completed cycle, then the hardware is stopped
    #[default]
    Single,
    /// Every completed cycle yields a final bundle until stopped
    Continuous,
}

/// Scan generator sweep pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanPattern {
    #[default]
    Normal,
    Random,
    Ebm,
}

impl ScanPattern {
    /// Index the scan generator expects
    pub fn index(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Random => 1,
            Self::Ebm => 2,
        }
    }
}

/// Camera binning factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binning {
    pub x: u32,
    pub y: u32,
}

impl Binning {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Temperature set point in degrees Celsius
    pub set_point_c: f64,
    /// Model string used to name camera items
    pub model: String,
    /// Requested binning; replaced by what the device actually applied
    pub binning: Binning,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            set_point_c: -70.0,
            model: "PIXIS: 256E".to_string(),
            binning: Binning::default(),
        }
    }
}

/// Scan generator field and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Scan field in pixels
    pub pixels_x: usize,
    pub pixels_y: usize,
    pub line_averaging: u32,
    pub pattern: ScanPattern,
    /// Pixel dwell time used in continuous (live) runs, microseconds
    pub pixel_time_live_us: f64,
    /// Pixel dwell time used in single (capture) runs, microseconds
    pub pixel_time_capture_us: f64,
}

impl ScanSettings {
    /// Same scan with twice the pixel counts
    pub fn doubled(&self) -> Self {
        Self {
            pixels_x: self.pixels_x * 2,
            pixels_y: self.pixels_y * 2,
            ..self.clone()
        }
    }

    /// Same scan with half the pixel counts, never below one pixel
    pub fn halved(&self) -> Self {
        Self {
            pixels_x: (self.pixels_x / 2).max(1),
            pixels_y: (self.pixels_y / 2).max(1),
            ..self.clone()
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            pixels_x: 32,
            pixels_y: 32,
            line_averaging: 1,
            pattern: ScanPattern::Normal,
            pixel_time_live_us: 10.0,
            pixel_time_capture_us: 10.0,
        }
    }
}

/// Region of interest inside the scan field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub enabled: bool,
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            enabled: false,
            x0: 0,
            y0: 0,
            width: 1,
            height: 1,
        }
    }
}

/// Scan positions of a hyperspectral acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperspectralSettings {
    pub scan_x: usize,
    pub scan_y: usize,
}

impl Default for HyperspectralSettings {
    fn default() -> Self {
        Self { scan_x: 10, scan_y: 10 }
    }
}

/// Which physical scan inputs feed raster planes A and B
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InputAssignment {
    pub input_a: Option<String>,
    pub input_b: Option<String>,
}

impl InputAssignment {
    /// Resolve the assignment against the inputs the scan generator offers.
    ///
    /// Unassigned planes default to "HAADF" (A) and "BF" (B) when present,
    /// otherwise to the first inputs not already taken.
    pub fn resolve(&self, available: &[String]) -> shared::Result<[(usize, String); 2]> {
        if available.len() < 2 {
            return Err(AcqError::config(format!(
                "scan generator offers {} input(s), two are required",
                available.len()
            )));
        }

        let find = |name: &str| available.iter().position(|candidate| candidate == name);
        let pick = |requested: &Option<String>, preferred: &str, taken: Option<usize>| -> shared::Result<usize> {
            match requested {
                Some(name) => find(name.as_str()).ok_or_else(|| AcqError::config(format!("unknown scan input '{}'", name))),
                None => Ok(find(preferred)
                    .filter(|index| Some(*index) != taken)
                    .or_else(|| (0..available.len()).find(|index| Some(*index) != taken))
                    .unwrap_or(0)),
            }
        };

        let a = pick(&self.input_a, "HAADF", None)?;
        let b = pick(&self.input_b, "BF", Some(a))?;
        if a == b {
            return Err(AcqError::config(format!(
                "input '{}' assigned to both raster planes",
                available[a]
            )));
        }

        Ok([(a, available[a].clone()), (b, available[b].clone())])
    }
}

/// Where to park the probe after a scan stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotSettings {
    pub park_after_stop: bool,
    pub x: usize,
    pub y: usize,
}

impl Default for SpotSettings {
    fn default() -> Self {
        Self {
            park_after_stop: true,
            x: 0,
            y: 0,
        }
    }
}

/// Live acquisition configuration (ROI, binning, timing, mode, inputs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    pub mode: AcquisitionMode,
    pub run: RunMode,
    /// Camera exposure in seconds
    pub exposure_s: f64,
    pub camera: CameraSettings,
    pub scan: ScanSettings,
    pub roi: Roi,
    pub hyperspectral: HyperspectralSettings,
    pub inputs: InputAssignment,
    pub spot: SpotSettings,
}

impl AcquisitionSettings {
    /// Scan pixel dwell time in seconds for the current mode and run
    pub fn pixel_time_s(&self) -> f64 {
        if self.mode.has_secondary() {
            // the spectrometer exposure sets the dwell per scan position
            return self.exposure_s;
        }
        match self.run {
            RunMode::Continuous => self.scan.pixel_time_live_us / 1e6,
            RunMode::Single => self.scan.pixel_time_capture_us / 1e6,
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Frame,
            run: RunMode::Single,
            exposure_s: 0.1,
            camera: CameraSettings::default(),
            scan: ScanSettings::default(),
            roi: Roi::default(),
            hyperspectral: HyperspectralSettings::default(),
            inputs: InputAssignment::default(),
            spot: SpotSettings::default(),
        }
    }
}

/// Composition engine and stop behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on waiting for in-flight callbacks when stopping
    pub stop_timeout_ms: u64,
    /// Preview bundles kept before older ones are superseded
    pub preview_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 500,
            preview_capacity: 4,
        }
    }
}

/// Temperature housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2000,
        }
    }
}

/// Simulated camera and scan generator used when no hardware is attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub sensor_width: usize,
    pub sensor_height: usize,
    /// Binning factors the simulated sensor supports
    pub binning_steps: Vec<u32>,
    pub inputs: Vec<String>,
    /// Pause between simulated cycles
    pub cycle_interval_ms: u64,
    /// Raster lines written between intermediate notifications
    pub lines_per_update: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sensor_width: 1024,
            sensor_height: 256,
            binning_steps: vec![1, 2, 4, 8],
            inputs: vec!["HAADF".to_string(), "BF".to_string(), "DF".to_string()],
            cycle_interval_ms: 50,
            lines_per_update: 8,
        }
    }
}

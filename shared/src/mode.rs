/*!
Acquisition modes and the channel sets they arm.
*/

use crate::channel::{ChannelId, ChannelSet};
use serde::{Deserialize, Serialize};

/// Acquisition configuration of the detector. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionMode {
    /// Single camera frame
    #[default]
    Frame,
    /// Spectrometer camera: running spectrum plus hyperspectral cube
    SpectrumCube,
    /// Two-input raster scan image
    RasterScan,
    /// Raster scan driving the spectrometer camera as a secondary source
    RasterScanHyperspectral,
}

/// How a channel's commits count towards cycle completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRule {
    /// Every successful commit completes the channel for its cycle
    EveryCommit,
    /// A commit completes the channel only when its scan index differs from
    /// the previous completion; otherwise it is an intermediate update
    IndexAdvance,
}

impl AcquisitionMode {
    pub const ALL: [AcquisitionMode; 4] = [
        AcquisitionMode::Frame,
        AcquisitionMode::SpectrumCube,
        AcquisitionMode::RasterScan,
        AcquisitionMode::RasterScanHyperspectral,
    ];

    /// Parse a mode from its kebab-case name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "frame" => Some(Self::Frame),
            "spectrum-cube" | "spim" => Some(Self::SpectrumCube),
            "raster" | "raster-scan" => Some(Self::RasterScan),
            "raster-hyperspectral" | "raster-scan-hyperspectral" => Some(Self::RasterScanHyperspectral),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::SpectrumCube => "spectrum-cube",
            Self::RasterScan => "raster-scan",
            Self::RasterScanHyperspectral => "raster-scan-hyperspectral",
        }
    }

    /// Channels that get buffers and callbacks in this mode
    pub fn armed_channels(&self) -> ChannelSet {
        match self {
            Self::Frame => ChannelSet::of(&[ChannelId::CameraFrame]),
            Self::SpectrumCube => ChannelSet::of(&[ChannelId::Spectrum, ChannelId::Hypercube]),
            Self::RasterScan => ChannelSet::of(&[ChannelId::Raster]),
            Self::RasterScanHyperspectral => {
                ChannelSet::of(&[ChannelId::Raster, ChannelId::Spectrum, ChannelId::Hypercube])
            }
        }
    }

    /// Channels that must all complete a cycle before it is final.
    ///
    /// The running spectrum is armed in the hyperspectral modes but only ever
    /// feeds previews.
    pub fn required_channels(&self) -> ChannelSet {
        match self {
            Self::Frame => ChannelSet::of(&[ChannelId::CameraFrame]),
            Self::SpectrumCube => ChannelSet::of(&[ChannelId::Hypercube]),
            Self::RasterScan => ChannelSet::of(&[ChannelId::Raster]),
            Self::RasterScanHyperspectral => ChannelSet::of(&[ChannelId::Raster, ChannelId::Hypercube]),
        }
    }

    pub fn completion_rule(&self, channel: ChannelId) -> CompletionRule {
        match channel {
            ChannelId::Raster => CompletionRule::IndexAdvance,
            _ => CompletionRule::EveryCommit,
        }
    }

    /// True when a dependent camera-style acquisition runs as secondary source
    pub fn has_secondary(&self) -> bool {
        matches!(self, Self::RasterScanHyperspectral)
    }

    pub fn uses_camera(&self) -> bool {
        !matches!(self, Self::RasterScan)
    }

    pub fn uses_scan(&self) -> bool {
        matches!(self, Self::RasterScan | Self::RasterScanHyperspectral)
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

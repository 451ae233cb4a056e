/*!
Geometry/ROI resolver.

Turns a configuration snapshot plus the camera readout the device actually
applied into the per-channel buffer shapes of one acquisition mode. The
resolver is pure: querying the device for its real binning happens before,
in [`AcquisitionController::reconfigure_geometry`](crate::controller::AcquisitionController::reconfigure_geometry).
*/

use crate::config::{AcquisitionSettings, Binning};
use shared::protocol::{CAMERA_ELEMENT, RASTER_ELEMENT, RASTER_INPUTS};
use shared::{AcqError, AcquisitionMode, ChannelDescriptor, ChannelId, ChannelSet, Result};
use std::collections::BTreeMap;

/// Camera readout as reported by the device after applying a binning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReadout {
    pub sensor_width: usize,
    pub sensor_height: usize,
    pub binning: Binning,
    /// Pixel counts of one binned image
    pub image_width: usize,
    pub image_height: usize,
}

/// Area swept by the scan generator: sample counts plus the field window
/// `[x0, x1) × [y0, y1)` they are spread over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanArea {
    pub pixels_x: usize,
    pub pixels_y: usize,
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
}

/// Committed per-channel shapes of one mode
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub mode: AcquisitionMode,
    pub readout: SensorReadout,
    pub scan: Option<ScanArea>,
    pub spectral_length: Option<usize>,
    shapes: BTreeMap<ChannelId, ChannelDescriptor>,
}

impl Geometry {
    pub fn descriptor(&self, channel: ChannelId) -> Option<&ChannelDescriptor> {
        self.shapes.get(&channel)
    }

    pub fn channels(&self) -> ChannelSet {
        self.shapes.keys().copied().collect()
    }

    pub fn shapes(&self) -> impl Iterator<Item = (ChannelId, &ChannelDescriptor)> {
        self.shapes.iter().map(|(channel, descriptor)| (*channel, descriptor))
    }

    pub fn total_bytes(&self) -> usize {
        self.shapes.values().map(ChannelDescriptor::byte_len).sum()
    }
}

/// Derive the buffer shapes for `settings.mode`
pub fn resolve(settings: &AcquisitionSettings, readout: &SensorReadout) -> Result<Geometry> {
    let mode = settings.mode;
    if readout.image_width == 0 || readout.image_height == 0 {
        return Err(AcqError::config(format!(
            "camera reports an empty image ({}x{})",
            readout.image_width, readout.image_height
        )));
    }
    if settings.camera.binning.x == 0 || settings.camera.binning.y == 0 {
        return Err(AcqError::config("binning factors must be at least 1"));
    }

    let mut shapes = BTreeMap::new();
    let mut scan = None;
    let mut spectral_length = None;

    match mode {
        AcquisitionMode::Frame => {
            shapes.insert(
                ChannelId::CameraFrame,
                ChannelDescriptor::new(CAMERA_ELEMENT, frame_dims(readout))?,
            );
        }
        AcquisitionMode::SpectrumCube => {
            let spectral = readout.image_width;
            let (sx, sy) = hyperspectral_positions(settings)?;
            insert_spectral(&mut shapes, sx, sy, spectral)?;
            spectral_length = Some(spectral);
        }
        AcquisitionMode::RasterScan => {
            let area = raster_area(settings)?;
            shapes.insert(
                ChannelId::Raster,
                ChannelDescriptor::new(RASTER_ELEMENT, vec![area.pixels_x, area.pixels_y, RASTER_INPUTS])?,
            );
            scan = Some(area);
        }
        AcquisitionMode::RasterScanHyperspectral => {
            let spectral = readout.image_width;
            let (sx, sy) = hyperspectral_positions(settings)?;
            let window = roi_window(settings)?;
            let area = ScanArea {
                pixels_x: sx,
                pixels_y: sy,
                ..window
            };
            // raster and cube share one scan grid
            shapes.insert(
                ChannelId::Raster,
                ChannelDescriptor::new(RASTER_ELEMENT, vec![sx, sy, RASTER_INPUTS])?,
            );
            insert_spectral(&mut shapes, sx, sy, spectral)?;
            scan = Some(area);
            spectral_length = Some(spectral);
        }
    }

    if mode.uses_scan() && settings.spot.park_after_stop {
        let spot = settings.spot;
        if spot.x >= settings.scan.pixels_x || spot.y >= settings.scan.pixels_y {
            return Err(AcqError::config(format!(
                "park spot ({}, {}) outside the {}x{} scan field",
                spot.x, spot.y, settings.scan.pixels_x, settings.scan.pixels_y
            )));
        }
    }

    Ok(Geometry {
        mode,
        readout: *readout,
        scan,
        spectral_length,
        shapes,
    })
}

/// Frame rank follows the readout: 1x1 is a scalar, a single row or column
/// is a line
fn frame_dims(readout: &SensorReadout) -> Vec<usize> {
    match (readout.image_width, readout.image_height) {
        (1, 1) => Vec::new(),
        (1, h) => vec![h],
        (w, 1) => vec![w],
        (w, h) => vec![w, h],
    }
}

fn insert_spectral(
    shapes: &mut BTreeMap<ChannelId, ChannelDescriptor>,
    scan_x: usize,
    scan_y: usize,
    spectral: usize,
) -> Result<()> {
    shapes.insert(ChannelId::Spectrum, ChannelDescriptor::new(CAMERA_ELEMENT, vec![spectral])?);
    shapes.insert(
        ChannelId::Hypercube,
        ChannelDescriptor::new(CAMERA_ELEMENT, vec![scan_x, scan_y, spectral])?,
    );
    Ok(())
}

fn hyperspectral_positions(settings: &AcquisitionSettings) -> Result<(usize, usize)> {
    let hs = settings.hyperspectral;
    if hs.scan_x == 0 || hs.scan_y == 0 {
        return Err(AcqError::config(format!(
            "hyperspectral scan of {}x{} positions",
            hs.scan_x, hs.scan_y
        )));
    }
    Ok((hs.scan_x, hs.scan_y))
}

fn scan_field(settings: &AcquisitionSettings) -> Result<(usize, usize)> {
    let scan = &settings.scan;
    if scan.pixels_x == 0 || scan.pixels_y == 0 {
        return Err(AcqError::config(format!(
            "scan field of {}x{} pixels",
            scan.pixels_x, scan.pixels_y
        )));
    }
    Ok((scan.pixels_x, scan.pixels_y))
}

/// Field window selected by the ROI, or the whole field when it is disabled
fn roi_window(settings: &AcquisitionSettings) -> Result<ScanArea> {
    let (nx, ny) = scan_field(settings)?;
    let roi = settings.roi;
    if !roi.enabled {
        return Ok(ScanArea {
            pixels_x: nx,
            pixels_y: ny,
            x0: 0,
            x1: nx,
            y0: 0,
            y1: ny,
        });
    }

    if roi.width == 0 || roi.height == 0 {
        return Err(AcqError::config("ROI width and height must be at least 1"));
    }
    let x1 = roi.x0.checked_add(roi.width).filter(|x1| *x1 <= nx);
    let y1 = roi.y0.checked_add(roi.height).filter(|y1| *y1 <= ny);
    match (x1, y1) {
        (Some(x1), Some(y1)) => Ok(ScanArea {
            pixels_x: roi.width,
            pixels_y: roi.height,
            x0: roi.x0,
            x1,
            y0: roi.y0,
            y1,
        }),
        _ => Err(AcqError::config(format!(
            "ROI {}x{}+{}+{} exceeds the {}x{} scan field",
            roi.width, roi.height, roi.x0, roi.y0, nx, ny
        ))),
    }
}

fn raster_area(settings: &AcquisitionSettings) -> Result<ScanArea> {
    // one sample per field pixel inside the window
    roi_window(settings)
}

/*!
# Shared Types and Utilities

This crate contains the types shared between the acquisition core and its
consumers: channel identities and shapes, element types, result bundles and
the common error type.

## Core Types

- [`ChannelId`] / [`ChannelSet`] - data-producing lines and sets of them
- [`ChannelDescriptor`] - element type and shape handed to drivers
- [`AcquisitionMode`] - which channels a mode arms and requires
- [`ResultBundle`] - composed snapshots delivered to the sinks

## Modules

- [`element`] - driver element type codes
- [`channel`] - channel ids, sets and descriptors
- [`mode`] - acquisition modes
- [`bundle`] - snapshots and result bundles
- [`error`] - common error types
*/

pub mod bundle;
pub mod channel;
pub mod element;
pub mod error;
pub mod mode;

// Re-export commonly used types
pub use bundle::{BundleItem, BundleSummary, Completeness, ItemRole, RasterInput, ResultBundle, Snapshot};
pub use channel::{ChannelDescriptor, ChannelId, ChannelSet};
pub use element::ElementType;
pub use error::{AcqError, ErrorKind, Result};
pub use mode::{AcquisitionMode, CompletionRule};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    use crate::element::ElementType;

    /// Element type of every camera-derived buffer
    pub const CAMERA_ELEMENT: ElementType = ElementType::F32;

    /// Element type of the scan generator buffer
    pub const RASTER_ELEMENT: ElementType = ElementType::I16;

    /// Number of inputs the scan generator writes per position
    pub const RASTER_INPUTS: usize = 2;

    /// Name prefix of raster items acquired alongside a hypercube
    pub const SPIM_PREFIX: &str = "SPIM ";
}

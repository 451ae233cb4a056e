/*!
Channel identities, channel sets and buffer descriptors.

A channel is one named stream of data produced by a driver callback. The
[`ChannelDescriptor`] is what the driver is told at lock time: the element
type and the dimension sizes, fastest-varying first (the order the driver
reports them).
*/

use crate::element::ElementType;
use crate::error::{AcqError, Result};
use serde::{Deserialize, Serialize};

/// Data-producing lines known to the acquisition core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelId {
    /// Full camera readout (2-D, or squeezed to 1-D / 0-D)
    CameraFrame,
    /// Running spectrum of the spectrometer camera
    Spectrum,
    /// Hyperspectral cube, one spectrum per scan position
    Hypercube,
    /// Scan generator buffer holding both assigned inputs
    Raster,
}

impl ChannelId {
    pub const ALL: [ChannelId; 4] = [
        ChannelId::CameraFrame,
        ChannelId::Spectrum,
        ChannelId::Hypercube,
        ChannelId::Raster,
    ];

    /// Human readable channel name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CameraFrame => "camera frame",
            Self::Spectrum => "spectrum line",
            Self::Hypercube => "hyperspectral cube",
            Self::Raster => "raster inputs",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Small set of channels, used for armed sets and per-cycle readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelSet {
    bits: u8,
}

impl ChannelSet {
    /// Create an empty set
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Create a set from a list of channels
    pub fn of(channels: &[ChannelId]) -> Self {
        let mut set = Self::empty();
        for channel in channels {
            set.insert(*channel);
        }
        set
    }

    /// Add a channel; returns `true` if it was not present yet
    pub fn insert(&mut self, channel: ChannelId) -> bool {
        let fresh = !self.contains(channel);
        self.bits |= channel.bit();
        fresh
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        self.bits & channel.bit() != 0
    }

    pub fn is_superset(&self, other: &ChannelSet) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Channels of `self` that are not in `other`
    pub fn difference(&self, other: &ChannelSet) -> ChannelSet {
        ChannelSet { bits: self.bits & !other.bits }
    }

    pub fn union(&self, other: &ChannelSet) -> ChannelSet {
        ChannelSet { bits: self.bits | other.bits }
    }

    pub fn clear(&mut self) {
        self.bits = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Iterate in declaration order of [`ChannelId`]
    pub fn iter(&self) -> impl Iterator<Item = ChannelId> + '_ {
        ChannelId::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<ChannelId> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = ChannelId>>(iter: I) -> Self {
        let mut set = ChannelSet::empty();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

/// Element type and shape of one channel buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorFields")]
pub struct ChannelDescriptor {
    pub element_type: ElementType,
    /// Dimension sizes, fastest-varying first. Empty for a scalar.
    pub dims: Vec<usize>,
}

/// Unvalidated wire form; deserialization goes through [`ChannelDescriptor::new`]
#[derive(Deserialize)]
struct DescriptorFields {
    element_type: ElementType,
    dims: Vec<usize>,
}

impl TryFrom<DescriptorFields> for ChannelDescriptor {
    type Error = AcqError;

    fn try_from(fields: DescriptorFields) -> Result<Self> {
        Self::new(fields.element_type, fields.dims)
    }
}

impl ChannelDescriptor {
    /// Create a descriptor, rejecting zero-sized dimensions
    pub fn new(element_type: ElementType, dims: Vec<usize>) -> Result<Self> {
        if let Some(axis) = dims.iter().position(|d| *d == 0) {
            return Err(AcqError::config(format!("dimension {} has size 0 in {:?}", axis, dims)));
        }
        let descriptor = Self { element_type, dims };
        descriptor.checked_byte_len()?;
        Ok(descriptor)
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements (1 for a scalar)
    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Buffer size in bytes
    pub fn byte_len(&self) -> usize {
        self.element_count() * self.element_type.size_bytes()
    }

    fn checked_byte_len(&self) -> Result<usize> {
        self.dims
            .iter()
            .try_fold(self.element_type.size_bytes(), |acc, d| acc.checked_mul(*d))
            .ok_or_else(|| AcqError::config(format!("buffer size overflows for dims {:?}", self.dims)))
    }

    /// Driver-style (x, y, z) triple, padding missing axes with 1
    pub fn xyz(&self) -> (usize, usize, usize) {
        let at = |i: usize| self.dims.get(i).copied().unwrap_or(1);
        (at(0), at(1), at(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_set_operations() {
        let required = ChannelSet::of(&[ChannelId::Raster, ChannelId::Hypercube]);
        let mut ready = ChannelSet::empty();

        assert!(ready.insert(ChannelId::Raster));
        assert!(!ready.insert(ChannelId::Raster));
        assert!(!ready.is_superset(&required));

        let missing: Vec<_> = required.difference(&ready).iter().collect();
        assert_eq!(missing, vec![ChannelId::Hypercube]);

        ready.insert(ChannelId::Hypercube);
        assert!(ready.is_superset(&required));
        assert_eq!(ready.len(), 2);

        ready.clear();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_iteration_order_is_stable() {
        let set: ChannelSet = [ChannelId::Raster, ChannelId::Spectrum, ChannelId::Hypercube]
            .into_iter()
            .collect();
        let order: Vec<_> = set.iter().collect();
        assert_eq!(order, vec![ChannelId::Spectrum, ChannelId::Hypercube, ChannelId::Raster]);
    }

    #[test]
    fn test_descriptor_sizes() {
        let cube = ChannelDescriptor::new(ElementType::F32, vec![10, 10, 1024]).unwrap();
        assert_eq!(cube.rank(), 3);
        assert_eq!(cube.element_count(), 102_400);
        assert_eq!(cube.byte_len(), 409_600);
        assert_eq!(cube.xyz(), (10, 10, 1024));

        let scalar = ChannelDescriptor::new(ElementType::F32, vec![]).unwrap();
        assert_eq!(scalar.rank(), 0);
        assert_eq!(scalar.byte_len(), 4);
        assert_eq!(scalar.xyz(), (1, 1, 1));
    }

    #[test]
    fn test_descriptor_rejects_bad_shapes() {
        assert!(ChannelDescriptor::new(ElementType::I16, vec![32, 0, 2]).is_err());
        assert!(ChannelDescriptor::new(ElementType::F64, vec![usize::MAX, 2]).is_err());
    }

    #[test]
    fn test_deserialized_descriptor_is_validated() {
        let cube = ChannelDescriptor::new(ElementType::F32, vec![4, 4, 16]).unwrap();
        let json = serde_json::to_string(&cube).unwrap();
        let parsed: ChannelDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cube);

        let zero = r#"{"element_type":"I16","dims":[32,0,2]}"#;
        assert!(serde_json::from_str::<ChannelDescriptor>(zero).is_err());
    }
}

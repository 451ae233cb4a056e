/*!
Result bundles and channel snapshots.

A [`Snapshot`] is an owned copy of exactly one channel's declared shape worth
of bytes, taken at commit time. Bundles only ever hold snapshots, so a driver
overwriting its buffer for the next cycle cannot alter an emitted bundle.
*/

use crate::channel::{ChannelDescriptor, ChannelId};
use crate::error::{AcqError, Result};
use crate::mode::AcquisitionMode;
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Serialize;

/// Immutable copy of one channel buffer
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub descriptor: ChannelDescriptor,
    pub data: Bytes,
}

impl Snapshot {
    /// Copy `descriptor.byte_len()` bytes out of `source`
    pub fn copy_from(descriptor: ChannelDescriptor, source: &[u8]) -> Result<Self> {
        let len = descriptor.byte_len();
        if source.len() < len {
            return Err(AcqError::config(format!(
                "snapshot needs {} bytes, buffer holds {}",
                len,
                source.len()
            )));
        }
        Ok(Self {
            data: Bytes::copy_from_slice(&source[..len]),
            descriptor,
        })
    }

    pub fn len(&self) -> usize {
        self.descriptor.element_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode all elements to `f64`
    pub fn values(&self) -> Vec<f64> {
        let size = self.descriptor.element_type.size_bytes();
        self.data
            .chunks_exact(size)
            .filter_map(|chunk| self.descriptor.element_type.decode(chunk))
            .collect()
    }

    /// Split off one slice along the slowest-varying axis.
    ///
    /// The raster buffer is `[x, y, inputs]`; plane 0 is input A.
    pub fn plane(&self, index: usize) -> Option<Snapshot> {
        let (outer, inner) = self.descriptor.dims.split_last()?;
        if index >= *outer {
            return None;
        }
        let descriptor = ChannelDescriptor {
            element_type: self.descriptor.element_type,
            dims: inner.to_vec(),
        };
        let plane_len = descriptor.byte_len();
        let start = index * plane_len;
        Some(Snapshot {
            data: self.data.slice(start..start + plane_len),
            descriptor,
        })
    }
}

/// Which raster input a plane came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RasterInput {
    A,
    B,
}

impl RasterInput {
    pub fn plane(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// Logical role of a bundle item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ItemRole {
    /// Raster image captured before the hyperspectral mode engaged
    Reference(RasterInput),
    Raster(RasterInput),
    CameraImage,
    Hypercube,
    Spectrum,
}

impl ItemRole {
    /// Channel the item is sliced from; references come from an earlier run
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Self::Reference(_) => None,
            Self::Raster(_) => Some(ChannelId::Raster),
            Self::CameraImage => Some(ChannelId::CameraFrame),
            Self::Hypercube => Some(ChannelId::Hypercube),
            Self::Spectrum => Some(ChannelId::Spectrum),
        }
    }
}

/// One named data item of a bundle
#[derive(Debug, Clone, PartialEq)]
pub struct BundleItem {
    pub name: String,
    pub role: ItemRole,
    pub snapshot: Snapshot,
}

impl BundleItem {
    pub fn new(name: impl Into<String>, role: ItemRole, snapshot: Snapshot) -> Self {
        Self {
            name: name.into(),
            role,
            snapshot,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.snapshot.descriptor.dims
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Preview,
    Final,
}

/// Composed set of channel snapshots delivered for one cycle
#[derive(Debug, Clone)]
pub struct ResultBundle {
    pub mode: AcquisitionMode,
    pub cycle: u64,
    pub completeness: Completeness,
    pub items: Vec<BundleItem>,
    /// Required channels absent when the cycle was forced to terminate
    pub missing: Vec<ChannelId>,
    pub created_at: DateTime<Local>,
}

impl ResultBundle {
    pub fn new(mode: AcquisitionMode, cycle: u64, completeness: Completeness, items: Vec<BundleItem>) -> Self {
        Self {
            mode,
            cycle,
            completeness,
            items,
            missing: Vec::new(),
            created_at: Local::now(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.completeness == Completeness::Final
    }

    /// A final that terminated without every required channel
    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn item(&self, name: &str) -> Option<&BundleItem> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn roles(&self) -> Vec<ItemRole> {
        self.items.iter().map(|item| item.role).collect()
    }

    /// Compact, serializable description without the pixel data
    pub fn summary(&self) -> BundleSummary {
        BundleSummary {
            mode: self.mode,
            cycle: self.cycle,
            completeness: self.completeness,
            items: self
                .items
                .iter()
                .map(|item| ItemSummary {
                    name: item.name.clone(),
                    role: item.role,
                    dims: item.dims().to_vec(),
                    element_type: item.snapshot.descriptor.element_type.to_string(),
                })
                .collect(),
            missing: self.missing.clone(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub name: String,
    pub role: ItemRole,
    pub dims: Vec<usize>,
    pub element_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub mode: AcquisitionMode,
    pub cycle: u64,
    pub completeness: Completeness,
    pub items: Vec<ItemSummary>,
    pub missing: Vec<ChannelId>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementType;

    fn raster_snapshot() -> Snapshot {
        let descriptor = ChannelDescriptor::new(ElementType::I16, vec![2, 2, 2]).unwrap();
        let raw: Vec<u8> = (0i16..8).flat_map(|v| v.to_ne_bytes()).collect();
        Snapshot::copy_from(descriptor, &raw).unwrap()
    }

    #[test]
    fn test_snapshot_copies_declared_shape_only() {
        let descriptor = ChannelDescriptor::new(ElementType::U8, vec![4]).unwrap();
        let mut buffer = vec![1u8, 2, 3, 4, 5, 6];
        let snapshot = Snapshot::copy_from(descriptor, &buffer).unwrap();

        buffer[0] = 99;
        assert_eq!(snapshot.values(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_snapshot_rejects_short_source() {
        let descriptor = ChannelDescriptor::new(ElementType::F32, vec![8]).unwrap();
        assert!(Snapshot::copy_from(descriptor, &[0u8; 16]).is_err());
    }

    #[test]
    fn test_planes_split_inputs() {
        let snapshot = raster_snapshot();
        let a = snapshot.plane(RasterInput::A.plane()).unwrap();
        let b = snapshot.plane(RasterInput::B.plane()).unwrap();

        assert_eq!(a.descriptor.dims, vec![2, 2]);
        assert_eq!(a.values(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(b.values(), vec![4.0, 5.0, 6.0, 7.0]);
        assert!(snapshot.plane(2).is_none());
    }

    #[test]
    fn test_bundle_summary() {
        let snapshot = raster_snapshot();
        let bundle = ResultBundle::new(
            AcquisitionMode::RasterScan,
            3,
            Completeness::Final,
            vec![BundleItem::new("HAADF", ItemRole::Raster(RasterInput::A), snapshot.plane(0).unwrap())],
        );
        let summary = bundle.summary();

        assert!(bundle.is_final());
        assert!(!bundle.is_degraded());
        assert!(bundle.item("HAADF").is_some());
        assert_eq!(summary.items[0].dims, vec![2, 2]);
        assert_eq!(summary.items[0].element_type, "i16");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["completeness"], "final");
        assert_eq!(json["mode"], "raster-scan");
    }
}

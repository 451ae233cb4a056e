/*!
Element types understood by the detector drivers.

Drivers tag every buffer with a numeric type code when they lock it. This
module maps those codes onto Rust types and decodes raw buffer bytes.
*/

use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Element type codes as reported by the native driver locker callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementType {
    I8 = 1,
    I16 = 2,
    I32 = 3,
    U8 = 5,
    U16 = 6,
    U32 = 7,
    F32 = 11,
    F64 = 12,
}

impl ElementType {
    /// Parse an element type from its driver code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::I8),
            2 => Some(Self::I16),
            3 => Some(Self::I32),
            5 => Some(Self::U8),
            6 => Some(Self::U16),
            7 => Some(Self::U32),
            11 => Some(Self::F32),
            12 => Some(Self::F64),
            _ => None,
        }
    }

    /// The code handed back to the driver
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Size of one element in bytes
    pub fn size_bytes(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Decode one native-endian element into an `f64`.
    ///
    /// `bytes` must be exactly [`size_bytes`](Self::size_bytes) long.
    pub fn decode(self, bytes: &[u8]) -> Option<f64> {
        match self {
            Self::I8 => bytes.first().map(|b| *b as i8).and_then(|v| v.to_f64()),
            Self::U8 => bytes.first().copied().and_then(|v| v.to_f64()),
            Self::I16 => bytes.try_into().ok().map(i16::from_ne_bytes).and_then(|v| v.to_f64()),
            Self::U16 => bytes.try_into().ok().map(u16::from_ne_bytes).and_then(|v| v.to_f64()),
            Self::I32 => bytes.try_into().ok().map(i32::from_ne_bytes).and_then(|v| v.to_f64()),
            Self::U32 => bytes.try_into().ok().map(u32::from_ne_bytes).and_then(|v| v.to_f64()),
            Self::F32 => bytes.try_into().ok().map(f32::from_ne_bytes).and_then(|v| v.to_f64()),
            Self::F64 => bytes.try_into().ok().map(f64::from_ne_bytes),
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

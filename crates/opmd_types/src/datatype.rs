use std::fmt;
use std::str::FromStr;

use crate::{AffectedObject, Error, Reason, Result};

/// The closed set of wire datatypes understood by the core engine.
///
/// Scalars come with a homogeneous vector twin (`VecI8` for `I8`, …).
/// `F80`/`CF80` (the platform "long double" of other producers) are
/// recognised tags without a native Rust value representation: backends
/// either preserve them opaquely or answer
/// [`Error::UnsupportedInBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Datatype {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    F80,
    CF32,
    CF64,
    CF80,
    Bool,
    String,
    /// `[f64; 7]`, the openPMD `unitDimension` septuple.
    ArrF64x7,

    VecI8,
    VecI16,
    VecI32,
    VecI64,
    VecU8,
    VecU16,
    VecU32,
    VecU64,
    VecF32,
    VecF64,
    VecF80,
    VecCF32,
    VecCF64,
    VecCF80,
    VecString,
}

impl Datatype {
    /// All datatype tags, in declaration order.
    pub const ALL: [Self; 32] = [
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::F80,
        Self::CF32,
        Self::CF64,
        Self::CF80,
        Self::Bool,
        Self::String,
        Self::ArrF64x7,
        Self::VecI8,
        Self::VecI16,
        Self::VecI32,
        Self::VecI64,
        Self::VecU8,
        Self::VecU16,
        Self::VecU32,
        Self::VecU64,
        Self::VecF32,
        Self::VecF64,
        Self::VecF80,
        Self::VecCF32,
        Self::VecCF64,
        Self::VecCF80,
        Self::VecString,
    ];

    /// Size in bytes of one element, where that is meaningful.
    ///
    /// `None` for strings (variable length). For vector types this is the
    /// size of one *element*, not of the whole vector.
    pub fn size_of(self) -> Option<usize> {
        match self.scalar() {
            Self::I8 | Self::U8 | Self::Bool => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::CF32 => Some(8),
            Self::CF64 => Some(16),
            // x87 extended precision is padded to 16 bytes on every producer
            // we care about.
            Self::F80 => Some(16),
            Self::CF80 => Some(32),
            Self::ArrF64x7 => Some(7 * 8),
            Self::String => None,
            _ => None,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(
            self,
            Self::VecI8
                | Self::VecI16
                | Self::VecI32
                | Self::VecI64
                | Self::VecU8
                | Self::VecU16
                | Self::VecU32
                | Self::VecU64
                | Self::VecF32
                | Self::VecF64
                | Self::VecF80
                | Self::VecCF32
                | Self::VecCF64
                | Self::VecCF80
                | Self::VecString
        )
    }

    /// The scalar twin of a vector type; identity on scalars.
    pub fn scalar(self) -> Self {
        match self {
            Self::VecI8 => Self::I8,
            Self::VecI16 => Self::I16,
            Self::VecI32 => Self::I32,
            Self::VecI64 => Self::I64,
            Self::VecU8 => Self::U8,
            Self::VecU16 => Self::U16,
            Self::VecU32 => Self::U32,
            Self::VecU64 => Self::U64,
            Self::VecF32 => Self::F32,
            Self::VecF64 => Self::F64,
            Self::VecF80 => Self::F80,
            Self::VecCF32 => Self::CF32,
            Self::VecCF64 => Self::CF64,
            Self::VecCF80 => Self::CF80,
            Self::VecString => Self::String,
            other => other,
        }
    }

    /// The vector twin of a scalar type, if one exists.
    pub fn to_vector(self) -> Option<Self> {
        match self {
            Self::I8 => Some(Self::VecI8),
            Self::I16 => Some(Self::VecI16),
            Self::I32 => Some(Self::VecI32),
            Self::I64 => Some(Self::VecI64),
            Self::U8 => Some(Self::VecU8),
            Self::U16 => Some(Self::VecU16),
            Self::U32 => Some(Self::VecU32),
            Self::U64 => Some(Self::VecU64),
            Self::F32 => Some(Self::VecF32),
            Self::F64 => Some(Self::VecF64),
            Self::F80 => Some(Self::VecF80),
            Self::CF32 => Some(Self::VecCF32),
            Self::CF64 => Some(Self::VecCF64),
            Self::CF80 => Some(Self::VecCF80),
            Self::String => Some(Self::VecString),
            _ => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self.scalar(),
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::U8 | Self::U16 | Self::U32 | Self::U64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(self.scalar(), Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self.scalar(), Self::F32 | Self::F64 | Self::F80)
    }

    pub fn is_complex(self) -> bool {
        matches!(self.scalar(), Self::CF32 | Self::CF64 | Self::CF80)
    }

    /// Tags without a native Rust value representation.
    pub fn is_unrepresentable(self) -> bool {
        matches!(self.scalar(), Self::F80 | Self::CF80)
    }

    /// Whether a dataset may be declared with this element type.
    ///
    /// Strings and vectors are attribute-only.
    pub fn storable_in_dataset(self) -> bool {
        !self.is_vector() && !matches!(self, Self::String | Self::ArrF64x7) && !self.is_unrepresentable()
    }

    /// The canonical wire name, e.g. `DOUBLE` or `VEC_INT32`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::I8 => "INT8",
            Self::I16 => "INT16",
            Self::I32 => "INT32",
            Self::I64 => "INT64",
            Self::U8 => "UINT8",
            Self::U16 => "UINT16",
            Self::U32 => "UINT32",
            Self::U64 => "UINT64",
            Self::F32 => "FLOAT32",
            Self::F64 => "FLOAT64",
            Self::F80 => "FLOAT80",
            Self::CF32 => "CFLOAT32",
            Self::CF64 => "CFLOAT64",
            Self::CF80 => "CFLOAT80",
            Self::Bool => "BOOL",
            Self::String => "STRING",
            Self::ArrF64x7 => "ARR_FLOAT64_7",
            Self::VecI8 => "VEC_INT8",
            Self::VecI16 => "VEC_INT16",
            Self::VecI32 => "VEC_INT32",
            Self::VecI64 => "VEC_INT64",
            Self::VecU8 => "VEC_UINT8",
            Self::VecU16 => "VEC_UINT16",
            Self::VecU32 => "VEC_UINT32",
            Self::VecU64 => "VEC_UINT64",
            Self::VecF32 => "VEC_FLOAT32",
            Self::VecF64 => "VEC_FLOAT64",
            Self::VecF80 => "VEC_FLOAT80",
            Self::VecCF32 => "VEC_CFLOAT32",
            Self::VecCF64 => "VEC_CFLOAT64",
            Self::VecCF80 => "VEC_CFLOAT80",
            Self::VecString => "VEC_STRING",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datatype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|dtype| dtype.as_str() == s)
            .ok_or_else(|| {
                Error::read(
                    AffectedObject::Other,
                    Reason::UnexpectedContent,
                    format!("unknown datatype tag {s:?}"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for dtype in Datatype::ALL {
            assert_eq!(dtype.as_str().parse::<Datatype>().unwrap(), dtype);
        }
    }

    #[test]
    fn scalar_vector_twins() {
        for dtype in Datatype::ALL {
            if let Some(vector) = dtype.to_vector() {
                assert_eq!(vector.scalar(), dtype);
                assert!(vector.is_vector());
            }
            assert!(!dtype.scalar().is_vector());
        }
        assert_eq!(Datatype::Bool.to_vector(), None);
        assert_eq!(Datatype::ArrF64x7.to_vector(), None);
    }

    #[test]
    fn dataset_storability() {
        assert!(Datatype::F64.storable_in_dataset());
        assert!(Datatype::Bool.storable_in_dataset());
        assert!(!Datatype::String.storable_in_dataset());
        assert!(!Datatype::VecF64.storable_in_dataset());
        assert!(!Datatype::F80.storable_in_dataset());
    }
}

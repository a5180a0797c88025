use num_complex::{Complex32, Complex64};

use crate::{Datatype, Error, Result};

/// A tagged attribute value.
///
/// Together with its [`Datatype`] tag this is the unit of metadata the
/// engine moves between frontend and backend. Equality is value *and* tag
/// equality: `U32(1) != I32(1)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    CF32(Complex32),
    CF64(Complex64),
    Bool(bool),
    String(String),
    ArrF64x7([f64; 7]),

    VecI8(Vec<i8>),
    VecI16(Vec<i16>),
    VecI32(Vec<i32>),
    VecI64(Vec<i64>),
    VecU8(Vec<u8>),
    VecU16(Vec<u16>),
    VecU32(Vec<u32>),
    VecU64(Vec<u64>),
    VecF32(Vec<f32>),
    VecF64(Vec<f64>),
    VecCF32(Vec<Complex32>),
    VecCF64(Vec<Complex64>),
    VecString(Vec<String>),
}

/// Attributes *are* tagged values; the alias documents intent at call sites.
pub type Attribute = Value;

/// Scalar types that can be stored in and extracted from a [`Value`].
///
/// Sealed: the set of wire types is closed by design.
pub trait AttributeScalar: Sized + sealed::Sealed {
    const DTYPE: Datatype;

    fn into_value(self) -> Value;
    fn vec_into_value(vec: Vec<Self>) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
    fn vec_from_value(value: &Value) -> Option<Vec<Self>>;
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! impl_attribute_scalar {
    ($($ty:ty => $scalar:ident, $vector:ident;)*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl AttributeScalar for $ty {
                const DTYPE: Datatype = Datatype::$scalar;

                fn into_value(self) -> Value {
                    Value::$scalar(self)
                }

                fn vec_into_value(vec: Vec<Self>) -> Value {
                    Value::$vector(vec)
                }

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$scalar(v) => Some(v.clone()),
                        _ => None,
                    }
                }

                fn vec_from_value(value: &Value) -> Option<Vec<Self>> {
                    match value {
                        Value::$vector(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$scalar(value)
                }
            }

            impl From<Vec<$ty>> for Value {
                fn from(values: Vec<$ty>) -> Self {
                    Value::$vector(values)
                }
            }
        )*
    };
}

impl_attribute_scalar! {
    i8 => I8, VecI8;
    i16 => I16, VecI16;
    i32 => I32, VecI32;
    i64 => I64, VecI64;
    u8 => U8, VecU8;
    u16 => U16, VecU16;
    u32 => U32, VecU32;
    u64 => U64, VecU64;
    f32 => F32, VecF32;
    f64 => F64, VecF64;
    Complex32 => CF32, VecCF32;
    Complex64 => CF64, VecCF64;
    String => String, VecString;
}

// `bool` has no vector twin on the wire; implemented by hand.
impl sealed::Sealed for bool {}

impl AttributeScalar for bool {
    const DTYPE: Datatype = Datatype::Bool;

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn vec_into_value(vec: Vec<Self>) -> Value {
        // promoted to the boolean wire convention (u8 + marker) by backends
        Value::VecU8(vec.into_iter().map(u8::from).collect())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn vec_from_value(_value: &Value) -> Option<Vec<Self>> {
        None
    }
}

impl Value {
    pub fn dtype(&self) -> Datatype {
        match self {
            Self::I8(_) => Datatype::I8,
            Self::I16(_) => Datatype::I16,
            Self::I32(_) => Datatype::I32,
            Self::I64(_) => Datatype::I64,
            Self::U8(_) => Datatype::U8,
            Self::U16(_) => Datatype::U16,
            Self::U32(_) => Datatype::U32,
            Self::U64(_) => Datatype::U64,
            Self::F32(_) => Datatype::F32,
            Self::F64(_) => Datatype::F64,
            Self::CF32(_) => Datatype::CF32,
            Self::CF64(_) => Datatype::CF64,
            Self::Bool(_) => Datatype::Bool,
            Self::String(_) => Datatype::String,
            Self::ArrF64x7(_) => Datatype::ArrF64x7,
            Self::VecI8(_) => Datatype::VecI8,
            Self::VecI16(_) => Datatype::VecI16,
            Self::VecI32(_) => Datatype::VecI32,
            Self::VecI64(_) => Datatype::VecI64,
            Self::VecU8(_) => Datatype::VecU8,
            Self::VecU16(_) => Datatype::VecU16,
            Self::VecU32(_) => Datatype::VecU32,
            Self::VecU64(_) => Datatype::VecU64,
            Self::VecF32(_) => Datatype::VecF32,
            Self::VecF64(_) => Datatype::VecF64,
            Self::VecCF32(_) => Datatype::VecCF32,
            Self::VecCF64(_) => Datatype::VecCF64,
            Self::VecString(_) => Datatype::VecString,
        }
    }

    /// Exact typed extraction; the stored tag must match `T` exactly.
    pub fn get<T: AttributeScalar>(&self) -> Result<T> {
        T::from_value(self).ok_or_else(|| {
            Error::usage(format!(
                "attribute cannot be read as {:?}, stored datatype is {}",
                T::DTYPE,
                self.dtype()
            ))
        })
    }

    /// Exact typed extraction of a vector value.
    pub fn get_vec<T: AttributeScalar>(&self) -> Result<Vec<T>> {
        T::vec_from_value(self).ok_or_else(|| {
            Error::usage(format!(
                "attribute cannot be read as a vector of {:?}, stored datatype is {}",
                T::DTYPE,
                self.dtype()
            ))
        })
    }

    /// Widening numeric extraction used when a backend reports an
    /// unexpected-but-convertible scalar type.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v as f64),
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => Some(v as f64),
            Self::F32(v) => Some(v.into()),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Non-negative integral extraction from any integer scalar.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::I8(v) => u64::try_from(v).ok(),
            Self::I16(v) => u64::try_from(v).ok(),
            Self::I32(v) => u64::try_from(v).ok(),
            Self::I64(v) => u64::try_from(v).ok(),
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => Some(v),
            _ => None,
        }
    }

    /// Integral vector extraction, accepting a lone scalar as a 1-vector.
    ///
    /// This is the shape the `snapshot` attribute arrives in: a single
    /// index or an ordered list of indices.
    pub fn as_u64_vec(&self) -> Option<Vec<u64>> {
        fn convert<T: Copy>(values: &[T]) -> Option<Vec<u64>>
        where
            u64: TryFrom<T>,
        {
            values.iter().map(|&v| u64::try_from(v).ok()).collect()
        }

        match self {
            Self::VecI8(v) => convert(v),
            Self::VecI16(v) => convert(v),
            Self::VecI32(v) => convert(v),
            Self::VecI64(v) => convert(v),
            Self::VecU8(v) => convert(v),
            Self::VecU16(v) => convert(v),
            Self::VecU32(v) => convert(v),
            Self::VecU64(v) => Some(v.clone()),
            _ => self.as_u64().map(|v| vec![v]),
        }
    }

    /// The openPMD unit-dimension septuple, from either the fixed array or
    /// a 7-element float vector.
    pub fn as_unit_dimension(&self) -> Option<[f64; 7]> {
        match self {
            Self::ArrF64x7(arr) => Some(*arr),
            Self::VecF64(v) if v.len() == 7 => {
                let mut arr = [0.0; 7];
                arr.copy_from_slice(v);
                Some(arr)
            }
            Self::VecF32(v) if v.len() == 7 => {
                let mut arr = [0.0; 7];
                for (slot, &x) in arr.iter_mut().zip(v) {
                    *slot = x.into();
                }
                Some(arr)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<[f64; 7]> for Value {
    fn from(value: [f64; 7]) -> Self {
        Self::ArrF64x7(value)
    }
}

// attribute values cross the task queue into driver hands
static_assertions::assert_impl_all!(Value: Clone, PartialEq, Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_and_value_equality() {
        similar_asserts::assert_eq!(Value::from(1.0_f64), Value::F64(1.0));
        assert_ne!(Value::from(1_u32), Value::from(1_i32));
        similar_asserts::assert_eq!(Value::from(""), Value::String(String::new()));
        similar_asserts::assert_eq!(Value::from(Vec::<f64>::new()), Value::VecF64(vec![]));
    }

    #[test]
    fn exact_get_rejects_mismatched_tag() {
        let v = Value::from(42_u32);
        assert_eq!(v.get::<u32>().unwrap(), 42);
        assert!(v.get::<i32>().is_err());
        assert_eq!(v.as_f64(), Some(42.0));
    }

    #[test]
    fn snapshot_shapes() {
        assert_eq!(Value::from(3_u64).as_u64_vec(), Some(vec![3]));
        assert_eq!(Value::from(vec![3_i32, 5]).as_u64_vec(), Some(vec![3, 5]));
        assert_eq!(Value::from(-1_i32).as_u64_vec(), None);
    }

    #[test]
    fn unit_dimension_shapes() {
        let zero = [0.0; 7];
        assert_eq!(Value::from(zero).as_unit_dimension(), Some(zero));
        assert_eq!(Value::from(vec![0.0_f64; 7]).as_unit_dimension(), Some(zero));
        assert_eq!(Value::from(vec![0.0_f64; 6]).as_unit_dimension(), None);
    }

    #[test]
    fn infinity_round_trips() {
        let v = Value::from(f64::INFINITY);
        assert_eq!(v.get::<f64>().unwrap(), f64::INFINITY);
    }
}

use std::sync::Arc;

use num_complex::{Complex32, Complex64};
use parking_lot::Mutex;

use opmd_types::{AttributeScalar, Datatype};

/// Shared destination cell of a deferred read; `None` until the read
/// executed.
pub type TargetCell<T> = Arc<Mutex<Option<Vec<T>>>>;

/// A user buffer scheduled for writing, erased over the closed set of
/// dataset element types.
///
/// Reference counting keeps the payload alive until the task that
/// references it has executed, however long the user keeps the queue
/// unflushed.
#[derive(Debug, Clone)]
pub enum BufferRef {
    I8(Arc<[i8]>),
    I16(Arc<[i16]>),
    I32(Arc<[i32]>),
    I64(Arc<[i64]>),
    U8(Arc<[u8]>),
    U16(Arc<[u16]>),
    U32(Arc<[u32]>),
    U64(Arc<[u64]>),
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
    CF32(Arc<[Complex32]>),
    CF64(Arc<[Complex64]>),
    Bool(Arc<[bool]>),
}

impl BufferRef {
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
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::I8(data) => data.len(),
            Self::I16(data) => data.len(),
            Self::I32(data) => data.len(),
            Self::I64(data) => data.len(),
            Self::U8(data) => data.len(),
            Self::U16(data) => data.len(),
            Self::U32(data) => data.len(),
            Self::U64(data) => data.len(),
            Self::F32(data) => data.len(),
            Self::F64(data) => data.len(),
            Self::CF32(data) => data.len(),
            Self::CF64(data) => data.len(),
            Self::Bool(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The erased twin of [`BufferRef`] for the read direction: a shared cell
/// the driver fills during flush.
#[derive(Debug, Clone)]
pub enum BufferTarget {
    I8(TargetCell<i8>),
    I16(TargetCell<i16>),
    I32(TargetCell<i32>),
    I64(TargetCell<i64>),
    U8(TargetCell<u8>),
    U16(TargetCell<u16>),
    U32(TargetCell<u32>),
    U64(TargetCell<u64>),
    F32(TargetCell<f32>),
    F64(TargetCell<f64>),
    CF32(TargetCell<Complex32>),
    CF64(TargetCell<Complex64>),
    Bool(TargetCell<bool>),
}

impl BufferTarget {
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
        }
    }

    /// Whether the deferred read has delivered yet.
    pub fn is_filled(&self) -> bool {
        match self {
            Self::I8(cell) => cell.lock().is_some(),
            Self::I16(cell) => cell.lock().is_some(),
            Self::I32(cell) => cell.lock().is_some(),
            Self::I64(cell) => cell.lock().is_some(),
            Self::U8(cell) => cell.lock().is_some(),
            Self::U16(cell) => cell.lock().is_some(),
            Self::U32(cell) => cell.lock().is_some(),
            Self::U64(cell) => cell.lock().is_some(),
            Self::F32(cell) => cell.lock().is_some(),
            Self::F64(cell) => cell.lock().is_some(),
            Self::CF32(cell) => cell.lock().is_some(),
            Self::CF64(cell) => cell.lock().is_some(),
            Self::Bool(cell) => cell.lock().is_some(),
        }
    }
}

/// Element types that may live in a dataset: the attribute scalars minus
/// strings, which are attribute-only on the wire.
pub trait DatasetElement:
    AttributeScalar + Copy + Default + PartialEq + Send + Sync + 'static
{
    fn make_buffer(data: Arc<[Self]>) -> BufferRef;
    fn make_target(cell: TargetCell<Self>) -> BufferTarget;
    /// Typed view of an erased target; `None` on a dtype mismatch.
    fn as_target(target: &BufferTarget) -> Option<&TargetCell<Self>>;
    /// Typed view of an erased write buffer; `None` on a dtype mismatch.
    fn as_slice(buffer: &BufferRef) -> Option<&[Self]>;
}

macro_rules! impl_dataset_element {
    ($($ty:ty => $variant:ident;)*) => {
        $(
            impl DatasetElement for $ty {
                fn make_buffer(data: Arc<[Self]>) -> BufferRef {
                    BufferRef::$variant(data)
                }

                fn make_target(cell: TargetCell<Self>) -> BufferTarget {
                    BufferTarget::$variant(cell)
                }

                fn as_target(target: &BufferTarget) -> Option<&TargetCell<Self>> {
                    match target {
                        BufferTarget::$variant(cell) => Some(cell),
                        _ => None,
                    }
                }

                fn as_slice(buffer: &BufferRef) -> Option<&[Self]> {
                    match buffer {
                        BufferRef::$variant(data) => Some(data),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_dataset_element! {
    i8 => I8;
    i16 => I16;
    i32 => I32;
    i64 => I64;
    u8 => U8;
    u16 => U16;
    u32 => U32;
    u64 => U64;
    f32 => F32;
    f64 => F64;
    Complex32 => CF32;
    Complex64 => CF64;
    bool => Bool;
}

// both sides of a deferred transfer are shared with the driver
static_assertions::assert_impl_all!(BufferRef: Clone, Send, Sync);
static_assertions::assert_impl_all!(BufferTarget: Clone, Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_and_recover() {
        let data: Arc<[f64]> = vec![0.0, 1.0, 2.0].into();
        let buffer = f64::make_buffer(data);
        assert_eq!(buffer.dtype(), Datatype::F64);
        assert_eq!(buffer.len(), 3);
        assert_eq!(f64::as_slice(&buffer), Some(&[0.0, 1.0, 2.0][..]));
        assert_eq!(f32::as_slice(&buffer), None);
    }

    #[test]
    fn target_cells_report_fill_state() {
        let cell: TargetCell<u32> = Arc::new(Mutex::new(None));
        let target = u32::make_target(Arc::clone(&cell));
        assert!(!target.is_filled());
        *cell.lock() = Some(vec![7]);
        assert!(target.is_filled());
        assert_eq!(u32::as_target(&target).unwrap().lock().take(), Some(vec![7]));
    }
}

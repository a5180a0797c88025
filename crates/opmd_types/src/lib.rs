//! Shared vocabulary of the openPMD core engine: the closed set of wire
//! datatypes, the tagged attribute value, dataset descriptors, access modes
//! and the error taxonomy.
//!
//! Everything in here is backend-agnostic and plain data; the deferred I/O
//! machinery lives in `opmd_io`, the object model in `opmd_core`.

mod access;
mod datatype;
mod dataset;
mod error;
mod extent;
mod value;

pub use self::access::Access;
pub use self::datatype::Datatype;
pub use self::dataset::{Dataset, Operator};
pub use self::error::{AffectedObject, Error, Reason, Result};
pub use self::extent::{bounds_check, volume, Extent, Offset, MAX_RANK};
pub use self::value::{Attribute, AttributeScalar, Value};

// Re-exports
#[doc(no_inline)]
pub use num_complex::{Complex32, Complex64};

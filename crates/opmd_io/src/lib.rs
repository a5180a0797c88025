//! The deferred I/O machinery of the openPMD core engine.
//!
//! Frontend objects never talk to storage directly: every mutation and
//! every read is an [`IoTask`] enqueued on an [`IoHandler`], which drains
//! its strictly-FIFO queue into a [`Backend`] driver on `flush`. The
//! handler also owns the [`WritableRegistry`], the arena-backed mirror of
//! the on-disk hierarchy with per-node dirty tracking.

mod buffer;
mod encoding;
mod file;
mod handler;
mod streaming;
mod task;
mod writable;

#[doc(hidden)]
pub mod test_util;

pub use self::buffer::{BufferRef, BufferTarget, DatasetElement, TargetCell};
pub use self::encoding::IterationEncoding;
pub use self::file::{FileHandle, FileState};
pub use self::handler::{Backend, IoHandler};
pub use self::streaming::{AdvanceMode, AdvanceStatus, StepStatus, StreamStatus};
pub use self::task::{IoTask, Operation, OutCell, Param};
pub use self::writable::{FilePosition, Node, NodeId, WritableRegistry};

//! The openPMD object model: a [`Series`] of iterations carrying meshes,
//! particle species and record components, mirrored onto storage through
//! the deferred task queue of `opmd_io`.
//!
//! All mutation is lazy: frontend calls update the in-memory tree and
//! enqueue work; [`Series::flush`] (or a step boundary) makes it real.

mod attributable;
mod container;
mod group;
mod iteration;
mod record;
mod record_component;
mod series;
mod snapshots;
mod state;

pub use self::container::Container;
pub use self::group::Group;
pub use self::iteration::{CloseStatus, Iteration, ParseState};
pub use self::record::{Mesh, ParticleSpecies, Record};
pub use self::record_component::{ChunkHandle, RecordComponent, SpanBuffer};
pub use self::series::Series;
pub use self::snapshots::{
    RandomAccessIterator, ReadIterations, StatefulIterator, WriteIterations,
};

// Re-exports
pub use opmd_chunk::{ChunkTable, WrittenChunkInfo};
pub use opmd_io::{AdvanceStatus, IterationEncoding, StepStatus};
pub use opmd_types::{Access, Attribute, Dataset, Datatype, Error, Extent, Offset, Result, Value};

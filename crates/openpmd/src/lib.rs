//! The openPMD core I/O engine.
//!
//! A deferred task graph over a hierarchical object model: mutate the
//! [`Series`] tree, then [`Series::flush`] drains the queued work into a
//! pluggable storage driver. Iterations stream through engine steps or
//! sit side by side in files, chunk tables tell parallel readers what
//! exists, and the `chunk` module distributes them across ranks.
//!
//! ```no_run
//! use openpmd::{Access, Dataset, Datatype, Extent, Series};
//!
//! # fn main() -> openpmd::Result<()> {
//! let series = Series::new("simData_%T.json", Access::Create)?;
//! let iteration = series.write_iterations().get(100)?;
//! let field = iteration.meshes().at("E")?.component("x")?;
//! field.reset_dataset(Dataset::new(Datatype::F64, Extent::from_slice(&[4])))?;
//! field.store_chunk(vec![0.0, 1.0, 2.0, 3.0], &[0][..], &[4][..])?;
//! series.flush()?;
//! # Ok(())
//! # }
//! ```

pub use opmd_core::{
    Access, AdvanceStatus, Attribute, ChunkHandle, ChunkTable, CloseStatus, Container, Dataset,
    Datatype, Extent, Group, Iteration, IterationEncoding, Mesh, Offset, ParseState,
    ParticleSpecies, RandomAccessIterator, ReadIterations, Record, RecordComponent, Series,
    SpanBuffer, StatefulIterator, StepStatus, Value, WriteIterations, WrittenChunkInfo,
};
pub use opmd_types::{AffectedObject, Error, Reason, Result};

/// Chunk-level data placement and distribution strategies.
pub mod chunk {
    pub use opmd_chunk::*;
}

/// Storage driver contract and deferred-task machinery, for implementing
/// additional backends.
pub mod io {
    pub use opmd_io::{
        AdvanceMode, Backend, BufferRef, BufferTarget, DatasetElement, FilePosition, IoHandler,
        IoTask, NodeId, Operation, OutCell, Param, StreamStatus, TargetCell, WritableRegistry,
    };
}

/// The in-tree reference drivers.
pub mod backend {
    pub use opmd_backend_json::{AttributeMode, DatasetMode, JsonBackend, MemoryStreamBackend, StreamRole};
}

/// User configuration plumbing (JSON/TOML with use-tracing).
pub mod config {
    pub use opmd_config::{merge, merge_strings, parse_options, TracingJson};
}

/// Format an error including its chain of sources.
///
/// Prefer this over `to_string` when surfacing errors to users.
pub fn error_chain(error: impl AsRef<dyn std::error::Error>) -> String {
    fn format_impl(error: &dyn std::error::Error) -> String {
        let mut string = error.to_string();
        for source in std::iter::successors(error.source(), |error| error.source()) {
            string.push_str(" -> ");
            string.push_str(&source.to_string());
        }
        string
    }

    format_impl(error.as_ref())
}

#[cfg(test)]
mod tests {
    #[test]
    fn error_chain_includes_sources() {
        let err = anyhow::format_err!("root_cause").context("outer_context");
        assert_eq!(super::error_chain(&err), "outer_context -> root_cause");
    }
}

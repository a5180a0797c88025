//! Reference drivers for the core engine.
//!
//! [`JsonBackend`] persists every file of a series as one JSON document on
//! disk: groups nest under `subgroups`, datasets live in `datasets` with a
//! flat row-major payload, attributes carry an explicit datatype tag (the
//! default "long" mode) or a bare value with a boolean marker convention
//! (the "short" mode).
//!
//! [`MemoryStreamBackend`] shares the same document representation but
//! keeps it in process memory and adds transactional steps: writers seal a
//! snapshot of the document per step, readers consume the snapshots in
//! order. It exists to exercise the streaming surface of the engine
//! without an external streaming library.

mod backend;
mod memory;
mod repr;

pub use self::backend::{AttributeMode, DatasetMode, JsonBackend};
pub use self::memory::{MemoryStreamBackend, StreamRole};

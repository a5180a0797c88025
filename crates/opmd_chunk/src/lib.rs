//! Chunk-level data placement: which pieces of a dataset physically exist,
//! and which reading rank should load which piece.
//!
//! Writers produce a [`ChunkTable`] (one record per written block, tagged
//! with the producing rank). Readers run a [`Strategy`] over that table
//! plus per-rank locality metadata ([`RankMeta`]) to decide who loads what.
//! Strategies are pure over their inputs; tables are moved in and out by
//! value.

mod assign;
mod comm;
mod host;
mod slicer;
mod table;

pub use self::assign::{
    BinPacking, ByCuboidSlice, ByHostname, FromPartial, PartialAssignment, PartialStrategy,
    RoundRobin, Strategy,
};
pub use self::comm::{collective_file_read, Communicator, LocalCommunicator};
pub use self::host::{by_method, by_method_collective, hostname, Method, RankMeta};
pub use self::slicer::{BlockSlicer, OneDimensionalBlockSlicer};
pub use self::table::{intersection, ChunkInfo, ChunkTable, SourceId, WrittenChunkInfo};

use std::sync::Arc;

use parking_lot::Mutex;

use opmd_chunk::ChunkTable;
use opmd_types::{Attribute, Dataset, Datatype, Extent, Offset};

use crate::{AdvanceMode, AdvanceStatus, BufferRef, BufferTarget, IterationEncoding, NodeId};

/// Operation codes, one per [`Param`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateFile,
    CheckFile,
    OpenFile,
    CloseFile,
    CreatePath,
    OpenPath,
    ClosePath,
    CreateDataset,
    ExtendDataset,
    OpenDataset,
    DeleteFile,
    DeletePath,
    DeleteDataset,
    DeleteAttribute,
    WriteDataset,
    ReadDataset,
    GetBufferView,
    WriteAttribute,
    ReadAttribute,
    ListPaths,
    ListDatasets,
    ListAttributes,
    AvailableChunks,
    Advance,
    Touch,
    Deregister,
}

/// A result slot shared between the enqueuing frontend and the dispatch
/// loop; filled when the task executes during `flush`.
#[derive(Debug)]
pub struct OutCell<T>(Arc<Mutex<Option<T>>>);

impl<T> OutCell<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn set(&self, value: T) {
        *self.0.lock() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }
}

impl<T: Clone> OutCell<T> {
    pub fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }
}

impl<T> Default for OutCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for OutCell<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// The per-operation parameter record; exactly one variant per
/// [`Operation`].
#[derive(Debug, Clone)]
pub enum Param {
    CreateFile {
        name: String,
        encoding: IterationEncoding,
    },
    CheckFile {
        name: String,
        exists: OutCell<bool>,
    },
    OpenFile {
        name: String,
        encoding: IterationEncoding,
    },
    CloseFile,
    CreatePath {
        path: String,
    },
    OpenPath {
        path: String,
    },
    ClosePath,
    CreateDataset {
        name: String,
        dataset: Dataset,
    },
    ExtendDataset {
        extent: Extent,
    },
    OpenDataset {
        name: String,
        out_dtype: OutCell<Datatype>,
        out_extent: OutCell<Extent>,
    },
    DeleteFile {
        name: String,
    },
    DeletePath {
        path: String,
    },
    DeleteDataset {
        name: String,
    },
    DeleteAttribute {
        name: String,
    },
    WriteDataset {
        offset: Offset,
        extent: Extent,
        data: BufferRef,
    },
    ReadDataset {
        offset: Offset,
        extent: Extent,
        target: BufferTarget,
    },
    GetBufferView {
        offset: Offset,
        extent: Extent,
        dtype: Datatype,
        /// `Some(span)` when the driver offers one, `None` when it does
        /// not support span-based writing for this dataset.
        span: OutCell<Option<BufferTarget>>,
    },
    WriteAttribute {
        name: String,
        value: Attribute,
        /// The attribute is expected to change between steps (variable
        /// attribute); drivers without per-step attribute semantics must
        /// reject a conflicting overwrite instead.
        changes_over_steps: bool,
    },
    ReadAttribute {
        name: String,
        value: OutCell<Attribute>,
    },
    ListPaths {
        paths: OutCell<Vec<String>>,
    },
    ListDatasets {
        datasets: OutCell<Vec<String>>,
    },
    ListAttributes {
        attributes: OutCell<Vec<String>>,
    },
    AvailableChunks {
        chunks: OutCell<ChunkTable>,
    },
    Advance {
        mode: AdvanceMode,
        status: OutCell<AdvanceStatus>,
    },
    Touch,
    Deregister,
}

impl Param {
    pub fn operation(&self) -> Operation {
        match self {
            Self::CreateFile { .. } => Operation::CreateFile,
            Self::CheckFile { .. } => Operation::CheckFile,
            Self::OpenFile { .. } => Operation::OpenFile,
            Self::CloseFile => Operation::CloseFile,
            Self::CreatePath { .. } => Operation::CreatePath,
            Self::OpenPath { .. } => Operation::OpenPath,
            Self::ClosePath => Operation::ClosePath,
            Self::CreateDataset { .. } => Operation::CreateDataset,
            Self::ExtendDataset { .. } => Operation::ExtendDataset,
            Self::OpenDataset { .. } => Operation::OpenDataset,
            Self::DeleteFile { .. } => Operation::DeleteFile,
            Self::DeletePath { .. } => Operation::DeletePath,
            Self::DeleteDataset { .. } => Operation::DeleteDataset,
            Self::DeleteAttribute { .. } => Operation::DeleteAttribute,
            Self::WriteDataset { .. } => Operation::WriteDataset,
            Self::ReadDataset { .. } => Operation::ReadDataset,
            Self::GetBufferView { .. } => Operation::GetBufferView,
            Self::WriteAttribute { .. } => Operation::WriteAttribute,
            Self::ReadAttribute { .. } => Operation::ReadAttribute,
            Self::ListPaths { .. } => Operation::ListPaths,
            Self::ListDatasets { .. } => Operation::ListDatasets,
            Self::ListAttributes { .. } => Operation::ListAttributes,
            Self::AvailableChunks { .. } => Operation::AvailableChunks,
            Self::Advance { .. } => Operation::Advance,
            Self::Touch => Operation::Touch,
            Self::Deregister => Operation::Deregister,
        }
    }
}

/// The unit of deferred work: an operation against one writable.
#[derive(Debug, Clone)]
pub struct IoTask {
    pub writable: NodeId,
    pub param: Param,
}

impl IoTask {
    pub fn new(writable: NodeId, param: Param) -> Self {
        Self { writable, param }
    }
}

use std::collections::VecDeque;

use opmd_chunk::ChunkTable;
use opmd_types::{
    volume, Access, Attribute, Dataset, Datatype, Error, Extent, Offset, Result,
};

use crate::{
    AdvanceMode, AdvanceStatus, BufferRef, BufferTarget, FilePosition, IoTask, IterationEncoding,
    NodeId, Param, WritableRegistry,
};

/// The contract a storage driver implements.
///
/// Methods are only ever called from the dispatch loop of an
/// [`IoHandler`], one task at a time, with the file/position bookkeeping
/// already done. Drivers keep whatever internal state they need, keyed by
/// file name.
pub trait Backend: Send {
    fn backend_name(&self) -> &'static str;

    /// The file suffix this driver claims, without the dot.
    fn default_suffix(&self) -> &'static str;

    /// Canonicalise a user-provided suffix; the second element carries a
    /// warning to log when the user picked an unexpected one.
    fn adjust_file_suffix(&self, user_suffix: Option<&str>) -> (String, Option<String>) {
        match user_suffix {
            None => (self.default_suffix().to_owned(), None),
            Some(suffix) if suffix == self.default_suffix() => (suffix.to_owned(), None),
            Some(suffix) => (
                suffix.to_owned(),
                Some(format!(
                    "file suffix '.{suffix}' is unusual for the {} backend (expected '.{}')",
                    self.backend_name(),
                    self.default_suffix()
                )),
            ),
        }
    }

    /// Whether an already-written attribute may be overwritten with a new
    /// value while a step is active.
    fn variable_attributes_supported(&self) -> bool {
        false
    }

    /// `flush_target` knob: whether `flush_data` should reach durable
    /// storage (`true`) or may stop at driver-internal buffers.
    fn set_flush_target(&mut self, _to_disk: bool) {}

    fn create_file(&mut self, name: &str, encoding: IterationEncoding) -> Result<()>;
    fn check_file(&mut self, name: &str) -> Result<bool>;
    fn open_file(&mut self, name: &str, encoding: IterationEncoding) -> Result<()>;
    fn close_file(&mut self, name: &str) -> Result<()>;

    fn create_path(&mut self, file: &str, position: &FilePosition) -> Result<()>;
    fn open_path(&mut self, file: &str, position: &FilePosition) -> Result<()>;
    fn close_path(&mut self, _file: &str, _position: &FilePosition) -> Result<()> {
        Ok(())
    }

    fn create_dataset(&mut self, file: &str, position: &FilePosition, dataset: &Dataset)
        -> Result<()>;
    fn extend_dataset(&mut self, file: &str, position: &FilePosition, extent: &Extent)
        -> Result<()>;
    fn open_dataset(&mut self, file: &str, position: &FilePosition) -> Result<(Datatype, Extent)>;

    fn delete_file(&mut self, _name: &str) -> Result<()> {
        Err(Error::unsupported(self.backend_name(), "cannot delete files"))
    }
    fn delete_path(&mut self, _file: &str, _position: &FilePosition) -> Result<()> {
        Err(Error::unsupported(self.backend_name(), "cannot delete paths"))
    }
    fn delete_dataset(&mut self, _file: &str, _position: &FilePosition) -> Result<()> {
        Err(Error::unsupported(self.backend_name(), "cannot delete datasets"))
    }
    fn delete_attribute(&mut self, _file: &str, _position: &FilePosition, _name: &str) -> Result<()> {
        Err(Error::unsupported(self.backend_name(), "cannot delete attributes"))
    }

    fn write_dataset(
        &mut self,
        file: &str,
        position: &FilePosition,
        offset: &Offset,
        extent: &Extent,
        data: &BufferRef,
    ) -> Result<()>;
    fn read_dataset(
        &mut self,
        file: &str,
        position: &FilePosition,
        offset: &Offset,
        extent: &Extent,
        target: &BufferTarget,
    ) -> Result<()>;

    /// A span the user may fill in place of supplying their own buffer.
    /// `None`: not supported here, fall back to `write_dataset`.
    fn get_buffer_view(
        &mut self,
        _file: &str,
        _position: &FilePosition,
        _offset: &Offset,
        _extent: &Extent,
        _dtype: Datatype,
    ) -> Result<Option<BufferTarget>> {
        Ok(None)
    }

    fn write_attribute(
        &mut self,
        file: &str,
        position: &FilePosition,
        name: &str,
        value: &Attribute,
        changes_over_steps: bool,
    ) -> Result<()>;
    fn read_attribute(&mut self, file: &str, position: &FilePosition, name: &str)
        -> Result<Attribute>;

    fn list_paths(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>>;
    fn list_datasets(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>>;
    fn list_attributes(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>>;

    fn available_chunks(&mut self, file: &str, position: &FilePosition) -> Result<ChunkTable>;

    fn advance(&mut self, file: &str, mode: AdvanceMode) -> Result<AdvanceStatus>;

    /// Push everything buffered so far to durable storage.
    fn flush_data(&mut self) -> Result<()>;
}

/// One handler per open series: the writable registry, the FIFO task
/// queue, and the driver the queue drains into.
pub struct IoHandler {
    pub registry: WritableRegistry,
    queue: VecDeque<IoTask>,
    backend: Box<dyn Backend>,
    pub access: Access,
}

impl IoHandler {
    pub fn new(backend: Box<dyn Backend>, access: Access) -> Self {
        Self {
            registry: WritableRegistry::new(),
            queue: VecDeque::new(),
            backend,
            access,
        }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    pub fn enqueue(&mut self, task: IoTask) {
        self.queue.push_back(task);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drain the queue in FIFO order.
    ///
    /// A failing task drops every task queued behind it and surfaces its
    /// error; the handler stays usable (in particular for close).
    pub fn flush(&mut self) -> Result<()> {
        while let Some(task) = self.queue.pop_front() {
            if let Err(err) = self.execute(&task) {
                let dropped = self.queue.len();
                self.queue.clear();
                log::error!(
                    "I/O task {:?} failed, clearing {dropped} queued task(s): {err}",
                    task.param.operation(),
                );
                return Err(err);
            }
        }
        self.backend.flush_data()
    }

    fn require_writable_access(&self, what: &str) -> Result<()> {
        if self.access.writable() {
            Ok(())
        } else {
            Err(Error::usage(format!("cannot {what} in access mode {}", self.access)))
        }
    }

    /// File handle for the task target, with a validity check.
    fn target_file(&mut self, writable: NodeId) -> Result<(crate::FileHandle, String)> {
        let handle = self.registry.resolve_file(writable)?;
        let state = self.registry.file(handle);
        if !state.valid {
            return Err(Error::usage(format!(
                "operating on closed file '{}'",
                state.name
            )));
        }
        Ok((handle, state.name.clone()))
    }

    fn node_position(&self, writable: NodeId) -> Result<FilePosition> {
        self.registry.node(writable).position.clone().ok_or_else(|| {
            Error::Internal("task target has no file position yet".to_owned())
        })
    }

    /// Base position for children of the task target: the parent's
    /// position (series-root targets start at the file root).
    fn parent_position(&self, writable: NodeId) -> FilePosition {
        match self.registry.node(writable).parent {
            Some(parent) => self.registry.base_position(parent),
            None => FilePosition::root(),
        }
    }

    fn execute(&mut self, task: &IoTask) -> Result<()> {
        let writable = task.writable;
        match &task.param {
            Param::CreateFile { name, encoding } => {
                self.require_writable_access("create a file")?;
                self.backend.create_file(name, *encoding)?;
                let handle = self.registry.register_file(name.clone());
                let node = self.registry.node_mut(writable);
                node.file = Some(handle);
                node.position = Some(FilePosition::root());
                node.written = true;
            }
            Param::CheckFile { name, exists } => {
                exists.set(self.backend.check_file(name)?);
            }
            Param::OpenFile { name, encoding } => {
                self.backend.open_file(name, *encoding)?;
                let handle = self.registry.register_file(name.clone());
                let node = self.registry.node_mut(writable);
                node.file = Some(handle);
                node.position = Some(FilePosition::root());
                node.written = true;
            }
            Param::CloseFile => {
                let handle = self.registry.resolve_file(writable)?;
                if self.registry.file(handle).valid {
                    let name = self.registry.file(handle).name.clone();
                    self.backend.close_file(&name)?;
                    self.registry.file_mut(handle).invalidate();
                }
            }
            Param::CreatePath { path } => {
                self.require_writable_access("create a path")?;
                let (_, file) = self.target_file(writable)?;
                let position = self.parent_position(writable).extended(path);
                self.backend.create_path(&file, &position)?;
                let node = self.registry.node_mut(writable);
                node.position = Some(position);
                node.written = true;
            }
            Param::OpenPath { path } => {
                let (_, file) = self.target_file(writable)?;
                let position = self.parent_position(writable).extended(path);
                self.backend.open_path(&file, &position)?;
                let node = self.registry.node_mut(writable);
                node.position = Some(position);
                node.written = true;
            }
            Param::ClosePath => {
                let (_, file) = self.target_file(writable)?;
                let position = self.node_position(writable)?;
                self.backend.close_path(&file, &position)?;
            }
            Param::CreateDataset { name, dataset } => {
                self.require_writable_access("create a dataset")?;
                dataset.validate()?;
                let (_, file) = self.target_file(writable)?;
                let position = self.parent_position(writable).extended(name);
                self.backend.create_dataset(&file, &position, dataset)?;
                let node = self.registry.node_mut(writable);
                node.position = Some(position);
                node.written = true;
            }
            Param::ExtendDataset { extent } => {
                self.require_writable_access("extend a dataset")?;
                let (_, file) = self.target_file(writable)?;
                let position = self.node_position(writable)?;
                self.backend.extend_dataset(&file, &position, extent)?;
            }
            Param::OpenDataset {
                name,
                out_dtype,
                out_extent,
            } => {
                let (_, file) = self.target_file(writable)?;
                let position = self.parent_position(writable).extended(name);
                let (dtype, extent) = self.backend.open_dataset(&file, &position)?;
                out_dtype.set(dtype);
                out_extent.set(extent);
                let node = self.registry.node_mut(writable);
                node.position = Some(position);
                node.written = true;
            }
            Param::DeleteFile { name } => {
                self.require_writable_access("delete a file")?;
                self.backend.delete_file(name)?;
            }
            Param::DeletePath { path } => {
                self.require_writable_access("delete a path")?;
                let (_, file) = self.target_file(writable)?;
                let position = self.registry.base_position(writable).extended(path);
                self.backend.delete_path(&file, &position)?;
            }
            Param::DeleteDataset { name } => {
                self.require_writable_access("delete a dataset")?;
                let (_, file) = self.target_file(writable)?;
                let position = self.registry.base_position(writable).extended(name);
                self.backend.delete_dataset(&file, &position)?;
            }
            Param::DeleteAttribute { name } => {
                self.require_writable_access("delete an attribute")?;
                let (_, file) = self.target_file(writable)?;
                let position = self.node_position(writable)?;
                self.backend.delete_attribute(&file, &position, name)?;
            }
            Param::WriteDataset {
                offset,
                extent,
                data,
            } => {
                self.require_writable_access("write a dataset")?;
                if data.len() as u64 != volume(extent) {
                    return Err(Error::usage(format!(
                        "write buffer holds {} element(s) but the selected extent covers {}",
                        data.len(),
                        volume(extent)
                    )));
                }
                let (_, file) = self.target_file(writable)?;
                let position = self.node_position(writable)?;
                self.backend.write_dataset(&file, &position, offset, extent, data)?;
            }
            Param::ReadDataset {
                offset,
                extent,
                target,
            } => {
                let (_, file) = self.target_file(writable)?;
                let position = self.node_position(writable)?;
                self.backend.read_dataset(&file, &position, offset, extent, target)?;
            }
            Param::GetBufferView {
                offset,
                extent,
                dtype,
                span,
            } => {
                self.require_writable_access("request a buffer view")?;
                let (_, file) = self.target_file(writable)?;
                let position = self.node_position(writable)?;
                span.set(self.backend.get_buffer_view(&file, &position, offset, extent, *dtype)?);
            }
            Param::WriteAttribute {
                name,
                value,
                changes_over_steps,
            } => {
                self.require_writable_access("write an attribute")?;
                let (_, file) = self.target_file(writable)?;
                let position = self.registry.base_position(writable);
                self.backend
                    .write_attribute(&file, &position, name, value, *changes_over_steps)?;
            }
            Param::ReadAttribute { name, value } => {
                let (_, file) = self.target_file(writable)?;
                let position = self.registry.base_position(writable);
                value.set(self.backend.read_attribute(&file, &position, name)?);
            }
            Param::ListPaths { paths } => {
                let (_, file) = self.target_file(writable)?;
                let position = self.registry.base_position(writable);
                paths.set(self.backend.list_paths(&file, &position)?);
            }
            Param::ListDatasets { datasets } => {
                let (_, file) = self.target_file(writable)?;
                let position = self.registry.base_position(writable);
                datasets.set(self.backend.list_datasets(&file, &position)?);
            }
            Param::ListAttributes { attributes } => {
                let (_, file) = self.target_file(writable)?;
                let position = self.registry.base_position(writable);
                attributes.set(self.backend.list_attributes(&file, &position)?);
            }
            Param::AvailableChunks { chunks } => {
                let (_, file) = self.target_file(writable)?;
                let position = self.node_position(writable)?;
                chunks.set(self.backend.available_chunks(&file, &position)?);
            }
            Param::Advance { mode, status } => {
                let (_, file) = self.target_file(writable)?;
                status.set(self.backend.advance(&file, *mode)?);
            }
            Param::Touch => {
                self.registry.mark_dirty(writable);
            }
            Param::Deregister => {
                self.registry.deregister(writable);
            }
        }
        Ok(())
    }
}

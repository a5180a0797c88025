//! Test doubles for the dispatch loop. Not part of the public API.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use opmd_chunk::ChunkTable;
use opmd_types::{
    AffectedObject, Attribute, Dataset, Datatype, Error, Extent, Offset, Reason, Result,
};

use crate::{
    AdvanceMode, AdvanceStatus, Backend, BufferRef, BufferTarget, FilePosition, IterationEncoding,
    Operation,
};

/// A driver that records every operation it sees and can be told to fail
/// on specific ones.
#[derive(Default)]
pub struct RecordingBackend {
    pub log: Arc<Mutex<Vec<(Operation, String)>>>,
    pub fail_on: BTreeSet<&'static str>,
    files: BTreeSet<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.fail_on.insert(op);
        self
    }

    fn record(&mut self, op: Operation, detail: impl Into<String>) -> Result<()> {
        let detail = detail.into();
        self.log.lock().push((op, detail.clone()));
        if self.fail_on.contains(format!("{op:?}").as_str()) {
            Err(Error::read(
                AffectedObject::Other,
                Reason::Other,
                format!("{op:?} was told to fail ({detail})"),
            ))
        } else {
            Ok(())
        }
    }
}

impl Backend for RecordingBackend {
    fn backend_name(&self) -> &'static str {
        "recording"
    }

    fn default_suffix(&self) -> &'static str {
        "mock"
    }

    fn create_file(&mut self, name: &str, _encoding: IterationEncoding) -> Result<()> {
        self.files.insert(name.to_owned());
        self.record(Operation::CreateFile, name)
    }

    fn check_file(&mut self, name: &str) -> Result<bool> {
        self.record(Operation::CheckFile, name)?;
        Ok(self.files.contains(name))
    }

    fn open_file(&mut self, name: &str, _encoding: IterationEncoding) -> Result<()> {
        self.record(Operation::OpenFile, name)
    }

    fn close_file(&mut self, name: &str) -> Result<()> {
        self.record(Operation::CloseFile, name)
    }

    fn create_path(&mut self, _file: &str, position: &FilePosition) -> Result<()> {
        self.record(Operation::CreatePath, position.join())
    }

    fn open_path(&mut self, _file: &str, position: &FilePosition) -> Result<()> {
        self.record(Operation::OpenPath, position.join())
    }

    fn create_dataset(
        &mut self,
        _file: &str,
        position: &FilePosition,
        _dataset: &Dataset,
    ) -> Result<()> {
        self.record(Operation::CreateDataset, position.join())
    }

    fn extend_dataset(
        &mut self,
        _file: &str,
        position: &FilePosition,
        _extent: &Extent,
    ) -> Result<()> {
        self.record(Operation::ExtendDataset, position.join())
    }

    fn open_dataset(&mut self, _file: &str, position: &FilePosition) -> Result<(Datatype, Extent)> {
        self.record(Operation::OpenDataset, position.join())?;
        Ok((Datatype::F64, Extent::from_slice(&[1])))
    }

    fn write_dataset(
        &mut self,
        _file: &str,
        position: &FilePosition,
        _offset: &Offset,
        _extent: &Extent,
        _data: &BufferRef,
    ) -> Result<()> {
        self.record(Operation::WriteDataset, position.join())
    }

    fn read_dataset(
        &mut self,
        _file: &str,
        position: &FilePosition,
        _offset: &Offset,
        _extent: &Extent,
        _target: &BufferTarget,
    ) -> Result<()> {
        self.record(Operation::ReadDataset, position.join())
    }

    fn write_attribute(
        &mut self,
        _file: &str,
        position: &FilePosition,
        name: &str,
        _value: &Attribute,
        _changes_over_steps: bool,
    ) -> Result<()> {
        self.record(Operation::WriteAttribute, format!("{}@{name}", position.join()))
    }

    fn read_attribute(
        &mut self,
        _file: &str,
        position: &FilePosition,
        name: &str,
    ) -> Result<Attribute> {
        self.record(Operation::ReadAttribute, format!("{}@{name}", position.join()))?;
        Ok(Attribute::from(0.0_f64))
    }

    fn list_paths(&mut self, _file: &str, position: &FilePosition) -> Result<Vec<String>> {
        self.record(Operation::ListPaths, position.join())?;
        Ok(Vec::new())
    }

    fn list_datasets(&mut self, _file: &str, position: &FilePosition) -> Result<Vec<String>> {
        self.record(Operation::ListDatasets, position.join())?;
        Ok(Vec::new())
    }

    fn list_attributes(&mut self, _file: &str, position: &FilePosition) -> Result<Vec<String>> {
        self.record(Operation::ListAttributes, position.join())?;
        Ok(Vec::new())
    }

    fn available_chunks(&mut self, _file: &str, position: &FilePosition) -> Result<ChunkTable> {
        self.record(Operation::AvailableChunks, position.join())?;
        Ok(ChunkTable::new())
    }

    fn advance(&mut self, file: &str, _mode: AdvanceMode) -> Result<AdvanceStatus> {
        self.record(Operation::Advance, file)?;
        Ok(AdvanceStatus::RandomAccess)
    }

    fn flush_data(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IoHandler, IoTask, Param};
    use opmd_types::Access;

    fn handler_with(backend: RecordingBackend) -> (IoHandler, Arc<Mutex<Vec<(Operation, String)>>>) {
        let log = Arc::clone(&backend.log);
        (IoHandler::new(Box::new(backend), Access::Create), log)
    }

    #[test]
    fn fifo_order_and_position_inheritance() {
        let (mut handler, log) = handler_with(RecordingBackend::new());
        let root = handler.registry.create_node();
        let iterations = handler.registry.create_child(root, "iterations");
        let iteration = handler.registry.create_child(iterations, "100");

        handler.enqueue(IoTask::new(
            root,
            Param::CreateFile {
                name: "series.mock".to_owned(),
                encoding: IterationEncoding::GroupBased,
            },
        ));
        handler.enqueue(IoTask::new(
            iterations,
            Param::CreatePath { path: "data".to_owned() },
        ));
        handler.enqueue(IoTask::new(
            iteration,
            Param::CreatePath { path: "100".to_owned() },
        ));
        handler.flush().unwrap();

        let log = log.lock();
        similar_asserts::assert_eq!(
            *log,
            vec![
                (Operation::CreateFile, "series.mock".to_owned()),
                (Operation::CreatePath, "data".to_owned()),
                (Operation::CreatePath, "data/100".to_owned()),
            ]
        );
        assert_eq!(
            handler.registry.node(iteration).position,
            Some(FilePosition::root().extended("data/100"))
        );
    }

    #[test]
    fn failing_task_drains_the_queue() {
        let (mut handler, log) = handler_with(RecordingBackend::new().failing_on("CreatePath"));
        let root = handler.registry.create_node();
        let child = handler.registry.create_child(root, "a");

        handler.enqueue(IoTask::new(
            root,
            Param::CreateFile {
                name: "series.mock".to_owned(),
                encoding: IterationEncoding::GroupBased,
            },
        ));
        handler.enqueue(IoTask::new(child, Param::CreatePath { path: "a".to_owned() }));
        handler.enqueue(IoTask::new(
            child,
            Param::WriteAttribute {
                name: "never".to_owned(),
                value: Attribute::from(1_u32),
                changes_over_steps: false,
            },
        ));

        assert!(handler.flush().is_err());
        assert_eq!(handler.queue_len(), 0);
        // the attribute write behind the failure never reached the driver
        assert!(log.lock().iter().all(|(op, _)| *op != Operation::WriteAttribute));

        // the handler stays usable afterwards
        handler.enqueue(IoTask::new(root, Param::CloseFile));
        handler.flush().unwrap();
    }

    #[test]
    fn read_only_mode_rejects_mutation() {
        let backend = RecordingBackend::new();
        let mut handler = IoHandler::new(Box::new(backend), Access::ReadOnly);
        let root = handler.registry.create_node();
        handler.enqueue(IoTask::new(
            root,
            Param::CreateFile {
                name: "series.mock".to_owned(),
                encoding: IterationEncoding::GroupBased,
            },
        ));
        let err = handler.flush().unwrap_err();
        assert!(matches!(err, Error::WrongApiUsage(_)));
    }

    #[test]
    fn closed_files_reject_late_tasks() {
        let (mut handler, _) = handler_with(RecordingBackend::new());
        let root = handler.registry.create_node();
        handler.enqueue(IoTask::new(
            root,
            Param::CreateFile {
                name: "series.mock".to_owned(),
                encoding: IterationEncoding::GroupBased,
            },
        ));
        handler.enqueue(IoTask::new(root, Param::CloseFile));
        handler.flush().unwrap();

        handler.enqueue(IoTask::new(
            root,
            Param::WriteAttribute {
                name: "late".to_owned(),
                value: Attribute::from(1_u32),
                changes_over_steps: false,
            },
        ));
        let err = handler.flush().unwrap_err();
        assert!(err.to_string().contains("closed file"), "{err}");
    }
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::Value as Json;

use opmd_chunk::{ChunkTable, WrittenChunkInfo};
use opmd_io::{
    AdvanceMode, AdvanceStatus, Backend, BufferRef, BufferTarget, FilePosition, IterationEncoding,
};
use opmd_types::{
    AffectedObject, Attribute, Dataset, Datatype, Error, Extent, Offset, Reason, Result,
};

const BACKEND_NAME: &str = "memory_stream";

/// One streamed resource: the writer's live document plus the sealed
/// per-step snapshots the readers consume.
#[derive(Default)]
struct StreamFile {
    current: Json,
    snapshots: Vec<Json>,
    dirty_since_snapshot: bool,
    complete: bool,
}

fn hub() -> &'static Mutex<HashMap<String, Arc<Mutex<StreamFile>>>> {
    static HUB: OnceLock<Mutex<HashMap<String, Arc<Mutex<StreamFile>>>>> = OnceLock::new();
    HUB.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Which side of the stream this driver instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Writer,
    Reader,
}

struct OpenStream {
    file: Arc<Mutex<StreamFile>>,
    /// Reader side: index of the snapshot currently visible.
    consumed: Option<usize>,
}

/// A step-capable driver over process-shared memory.
///
/// Writers mutate a live document and seal a snapshot of it on every
/// END-advance (and on close, if unsealed changes remain). Readers see
/// exactly one snapshot at a time, advancing BEGIN by BEGIN until the
/// writer has marked the stream complete, at which point
/// [`AdvanceStatus::Over`] is reported.
///
/// Streams are addressed by directory + file name, so a writer and a
/// reader series in the same process meet on the same resource.
pub struct MemoryStreamBackend {
    base_dir: PathBuf,
    role: StreamRole,
    open: HashMap<String, OpenStream>,
}

impl MemoryStreamBackend {
    pub fn new(base_dir: impl Into<PathBuf>, role: StreamRole) -> Self {
        Self {
            base_dir: base_dir.into(),
            role,
            open: HashMap::new(),
        }
    }

    /// Drop a stream from the process-wide hub (test hygiene).
    pub fn evict(base_dir: impl Into<PathBuf>, name: &str) {
        let key = stream_key(&base_dir.into(), name);
        hub().lock().remove(&key);
    }

    fn stream(&self, name: &str) -> Result<&OpenStream> {
        self.open.get(name).ok_or_else(|| {
            Error::Internal(format!("stream '{name}' has not been opened in this driver"))
        })
    }

    /// Run `f` against the document this instance currently sees.
    fn with_view<R>(&self, name: &str, f: impl FnOnce(&Json) -> Result<R>) -> Result<R> {
        let stream = self.stream(name)?;
        let file = stream.file.lock();
        match self.role {
            StreamRole::Writer => f(&file.current),
            StreamRole::Reader => match stream.consumed {
                Some(step) => f(&file.snapshots[step]),
                None => f(&Json::Null),
            },
        }
    }

    /// Run `f` against the writer's live document.
    fn with_current<R>(&mut self, name: &str, f: impl FnOnce(&mut Json) -> Result<R>) -> Result<R> {
        if self.role != StreamRole::Writer {
            return Err(Error::usage("cannot mutate a stream from the reading side"));
        }
        let stream = self.stream(name)?;
        let mut file = stream.file.lock();
        file.dirty_since_snapshot = true;
        f(&mut file.current)
    }
}

fn stream_key(base_dir: &std::path::Path, name: &str) -> String {
    format!("{}/{name}", base_dir.display())
}

fn not_found(kind: AffectedObject, what: impl Into<String>) -> Error {
    Error::read_in(BACKEND_NAME, kind, Reason::NotFound, what)
}

impl Backend for MemoryStreamBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn default_suffix(&self) -> &'static str {
        "mem"
    }

    fn create_file(&mut self, name: &str, _encoding: IterationEncoding) -> Result<()> {
        if self.role != StreamRole::Writer {
            return Err(Error::usage("cannot create a stream from the reading side"));
        }
        let key = stream_key(&self.base_dir, name);
        let file = Arc::new(Mutex::new(StreamFile {
            current: crate::repr::empty_group(),
            ..StreamFile::default()
        }));
        hub().lock().insert(key, Arc::clone(&file));
        self.open.insert(name.to_owned(), OpenStream { file, consumed: None });
        Ok(())
    }

    fn check_file(&mut self, name: &str) -> Result<bool> {
        Ok(hub().lock().contains_key(&stream_key(&self.base_dir, name)))
    }

    fn open_file(&mut self, name: &str, _encoding: IterationEncoding) -> Result<()> {
        if self.open.contains_key(name) {
            return Ok(());
        }
        let key = stream_key(&self.base_dir, name);
        let file = hub().lock().get(&key).cloned().ok_or_else(|| {
            not_found(AffectedObject::File, format!("no stream '{key}' is being produced"))
        })?;
        self.open.insert(name.to_owned(), OpenStream { file, consumed: None });
        Ok(())
    }

    fn close_file(&mut self, name: &str) -> Result<()> {
        if let Some(stream) = self.open.remove(name) {
            if self.role == StreamRole::Writer {
                let mut file = stream.file.lock();
                if file.dirty_since_snapshot {
                    let snapshot = file.current.clone();
                    file.snapshots.push(snapshot);
                    file.dirty_since_snapshot = false;
                }
                file.complete = true;
            }
        }
        Ok(())
    }

    fn create_path(&mut self, file: &str, position: &FilePosition) -> Result<()> {
        self.with_current(file, |root| {
            crate::repr::ensure_group(root, &position.segments);
            Ok(())
        })
    }

    fn open_path(&mut self, file: &str, position: &FilePosition) -> Result<()> {
        self.with_view(file, |root| {
            crate::repr::find_group(root, &position.segments)
                .map(|_| ())
                .ok_or_else(|| not_found(AffectedObject::Group, format!("no group '{}'", position.join())))
        })
    }

    fn create_dataset(&mut self, file: &str, position: &FilePosition, dataset: &Dataset) -> Result<()> {
        let Some((name, parents)) = position.segments.split_last() else {
            return Err(Error::usage("cannot create a dataset at the stream root"));
        };
        self.with_current(file, |root| {
            let parent = crate::repr::ensure_group(root, parents);
            let node = parent
                .as_object_mut()
                .expect("groups are objects")
                .entry("datasets")
                .or_insert_with(|| Json::Object(serde_json::Map::new()))
                .as_object_mut()
                .expect("datasets is an object")
                .entry(name.clone())
                .or_insert(Json::Null);
            if node.is_null() {
                *node = crate::repr::new_dataset_node(dataset.dtype, &dataset.extent, true);
            }
            Ok(())
        })
    }

    fn extend_dataset(&mut self, file: &str, position: &FilePosition, extent: &Extent) -> Result<()> {
        self.with_current(file, |root| {
            let node = crate::repr::find_dataset_mut(root, &position.segments).ok_or_else(|| {
                not_found(AffectedObject::Dataset, format!("no dataset '{}'", position.join()))
            })?;
            crate::repr::extend_dataset_node(node, &position.join(), extent)
        })
    }

    fn open_dataset(&mut self, file: &str, position: &FilePosition) -> Result<(Datatype, Extent)> {
        self.with_view(file, |root| {
            let node = crate::repr::find_dataset(root, &position.segments).ok_or_else(|| {
                not_found(AffectedObject::Dataset, format!("no dataset '{}'", position.join()))
            })?;
            Ok((crate::repr::dataset_dtype(node)?, crate::repr::dataset_extent(node)?))
        })
    }

    fn write_dataset(
        &mut self,
        file: &str,
        position: &FilePosition,
        offset: &Offset,
        extent: &Extent,
        data: &BufferRef,
    ) -> Result<()> {
        self.with_current(file, |root| {
            let node = crate::repr::find_dataset_mut(root, &position.segments).ok_or_else(|| {
                not_found(AffectedObject::Dataset, format!("no dataset '{}'", position.join()))
            })?;
            crate::repr::write_chunk(node, &position.join(), offset, extent, data)
        })
    }

    fn read_dataset(
        &mut self,
        file: &str,
        position: &FilePosition,
        offset: &Offset,
        extent: &Extent,
        target: &BufferTarget,
    ) -> Result<()> {
        self.with_view(file, |root| {
            let node = crate::repr::find_dataset(root, &position.segments).ok_or_else(|| {
                not_found(AffectedObject::Dataset, format!("no dataset '{}'", position.join()))
            })?;
            crate::repr::read_chunk(node, &position.join(), offset, extent, target)
        })
    }

    fn write_attribute(
        &mut self,
        file: &str,
        position: &FilePosition,
        name: &str,
        value: &Attribute,
        _changes_over_steps: bool,
    ) -> Result<()> {
        self.with_current(file, |root| {
            let node = crate::repr::find_attributable_mut(root, &position.segments)
                .ok_or_else(|| {
                    not_found(
                        AffectedObject::Group,
                        format!("no group or dataset at '{}'", position.join()),
                    )
                })?;
            crate::repr::attributes_mut(node).insert(
                name.to_owned(),
                serde_json::json!({
                    "datatype": value.dtype().as_str(),
                    "value": crate::repr::value_to_json(value),
                }),
            );
            Ok(())
        })
    }

    fn read_attribute(&mut self, file: &str, position: &FilePosition, name: &str) -> Result<Attribute> {
        self.with_view(file, |root| {
            let node = crate::repr::find_attributable(root, &position.segments).ok_or_else(|| {
                not_found(
                    AffectedObject::Group,
                    format!("no group or dataset at '{}'", position.join()),
                )
            })?;
            let stored = node
                .get("attributes")
                .and_then(Json::as_object)
                .and_then(|map| map.get(name))
                .ok_or_else(|| {
                    not_found(
                        AffectedObject::Attribute,
                        format!("no attribute '{name}' at '{}'", position.join()),
                    )
                })?;
            let (Some(tag), Some(value)) = (
                stored.get("datatype").and_then(Json::as_str),
                stored.get("value"),
            ) else {
                return Err(Error::read_in(
                    BACKEND_NAME,
                    AffectedObject::Attribute,
                    Reason::UnexpectedContent,
                    format!("attribute '{name}' lacks its datatype tag"),
                ));
            };
            crate::repr::value_from_json(value, tag.parse()?)
        })
    }

    fn list_paths(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>> {
        self.with_view(file, |root| {
            let node = crate::repr::find_group(root, &position.segments).ok_or_else(|| {
                not_found(AffectedObject::Group, format!("no group '{}'", position.join()))
            })?;
            Ok(node
                .get("subgroups")
                .and_then(Json::as_object)
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn list_datasets(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>> {
        self.with_view(file, |root| {
            let node = crate::repr::find_group(root, &position.segments).ok_or_else(|| {
                not_found(AffectedObject::Group, format!("no group '{}'", position.join()))
            })?;
            Ok(node
                .get("datasets")
                .and_then(Json::as_object)
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn list_attributes(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>> {
        self.with_view(file, |root| {
            let node = crate::repr::find_attributable(root, &position.segments).ok_or_else(|| {
                not_found(AffectedObject::Group, format!("no group at '{}'", position.join()))
            })?;
            Ok(node
                .get("attributes")
                .and_then(Json::as_object)
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn available_chunks(&mut self, file: &str, position: &FilePosition) -> Result<ChunkTable> {
        let (_, extent) = self.open_dataset(file, position)?;
        let offset = Offset::from_elem(0, extent.len());
        Ok(vec![WrittenChunkInfo::new(offset, extent, 0)])
    }

    fn advance(&mut self, file: &str, mode: AdvanceMode) -> Result<AdvanceStatus> {
        let role = self.role;
        let stream = self.open.get_mut(file).ok_or_else(|| {
            Error::Internal(format!("stream '{file}' has not been opened in this driver"))
        })?;
        match (role, mode) {
            (StreamRole::Writer, AdvanceMode::Begin) => Ok(AdvanceStatus::Ok),
            (StreamRole::Writer, AdvanceMode::End) => {
                let mut shared = stream.file.lock();
                let snapshot = shared.current.clone();
                shared.snapshots.push(snapshot);
                shared.dirty_since_snapshot = false;
                Ok(AdvanceStatus::Ok)
            }
            (StreamRole::Reader, AdvanceMode::Begin) => {
                let shared = stream.file.lock();
                let next = stream.consumed.map_or(0, |step| step + 1);
                if next < shared.snapshots.len() {
                    drop(shared);
                    stream.consumed = Some(next);
                    Ok(AdvanceStatus::Ok)
                } else {
                    // nothing sealed beyond this point; a complete stream
                    // is over, an incomplete one has simply run dry
                    Ok(AdvanceStatus::Over)
                }
            }
            (StreamRole::Reader, AdvanceMode::End) => Ok(AdvanceStatus::Ok),
        }
    }

    fn flush_data(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use opmd_io::DatasetElement as _;

    #[test]
    fn writer_seals_steps_reader_consumes_them() {
        let dir = "/virtual/memory-backend-test";
        MemoryStreamBackend::evict(dir, "s.mem");

        let mut writer = MemoryStreamBackend::new(dir, StreamRole::Writer);
        writer.create_file("s.mem", IterationEncoding::GroupBased).unwrap();

        let root = FilePosition::root();
        writer
            .write_attribute("s.mem", &root, "step", &Attribute::from(0_u64), true)
            .unwrap();
        assert_eq!(writer.advance("s.mem", AdvanceMode::End).unwrap(), AdvanceStatus::Ok);
        writer
            .write_attribute("s.mem", &root, "step", &Attribute::from(1_u64), true)
            .unwrap();
        writer.close_file("s.mem").unwrap();

        let mut reader = MemoryStreamBackend::new(dir, StreamRole::Reader);
        reader.open_file("s.mem", IterationEncoding::GroupBased).unwrap();

        assert_eq!(reader.advance("s.mem", AdvanceMode::Begin).unwrap(), AdvanceStatus::Ok);
        assert_eq!(
            reader.read_attribute("s.mem", &root, "step").unwrap(),
            Attribute::from(0_u64)
        );
        assert_eq!(reader.advance("s.mem", AdvanceMode::End).unwrap(), AdvanceStatus::Ok);

        assert_eq!(reader.advance("s.mem", AdvanceMode::Begin).unwrap(), AdvanceStatus::Ok);
        assert_eq!(
            reader.read_attribute("s.mem", &root, "step").unwrap(),
            Attribute::from(1_u64)
        );

        assert_eq!(reader.advance("s.mem", AdvanceMode::Begin).unwrap(), AdvanceStatus::Over);
    }

    #[test]
    fn reading_side_cannot_mutate_and_cannot_delete() {
        let dir = "/virtual/memory-backend-test-2";
        MemoryStreamBackend::evict(dir, "s.mem");

        let mut writer = MemoryStreamBackend::new(dir, StreamRole::Writer);
        writer.create_file("s.mem", IterationEncoding::GroupBased).unwrap();
        let data: Arc<[f64]> = vec![1.0].into();
        let position = FilePosition::root().extended("x");
        writer
            .create_dataset(
                "s.mem",
                &position,
                &opmd_types::Dataset::new(Datatype::F64, Extent::from_slice(&[1])),
            )
            .unwrap();
        writer
            .write_dataset(
                "s.mem",
                &position,
                &Offset::from_slice(&[0]),
                &Extent::from_slice(&[1]),
                &f64::make_buffer(data),
            )
            .unwrap();
        writer.close_file("s.mem").unwrap();

        let mut reader = MemoryStreamBackend::new(dir, StreamRole::Reader);
        reader.open_file("s.mem", IterationEncoding::GroupBased).unwrap();
        assert!(reader
            .create_path("s.mem", &FilePosition::root().extended("nope"))
            .is_err());
        // streams are append-only; deletion is a backend limitation
        assert!(matches!(
            reader.delete_attribute("s.mem", &FilePosition::root(), "x"),
            Err(Error::UnsupportedInBackend { .. })
        ));

        MemoryStreamBackend::evict(dir, "s.mem");
    }
}

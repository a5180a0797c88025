use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value as Json};

use opmd_chunk::{ChunkTable, WrittenChunkInfo};
use opmd_config::TracingJson;
use opmd_io::{
    AdvanceMode, AdvanceStatus, Backend, BufferRef, BufferTarget, FilePosition, IterationEncoding,
    TargetCell,
};
use opmd_types::{
    AffectedObject, Attribute, Dataset, Datatype, Error, Extent, Offset, Reason, Result,
};

use crate::repr::{self, BACKEND_NAME};

/// How attributes are spelled in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeMode {
    /// `{"datatype": "FLOAT64", "value": 1.0}` — lossless.
    #[default]
    Long,
    /// Bare values; booleans become `0`/`1` with a sibling marker
    /// attribute, other datatypes are inferred on read.
    Short,
}

/// Whether dataset payloads are materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatasetMode {
    #[default]
    Dataset,
    /// Structure and metadata only; writes are swallowed, reads yield
    /// default values.
    Template,
}

struct FileDoc {
    root: Json,
    dirty: bool,
}

struct SpanEntry {
    file: String,
    position: FilePosition,
    offset: Offset,
    extent: Extent,
    target: BufferTarget,
}

/// The on-disk reference driver: one JSON document per file.
pub struct JsonBackend {
    base_dir: PathBuf,
    attribute_mode: AttributeMode,
    dataset_mode: DatasetMode,
    /// `flush_target`: whether plain flushes reach the disk or only the
    /// in-memory documents (close always reaches the disk).
    flush_to_disk: bool,
    files: HashMap<String, FileDoc>,
    spans: Vec<SpanEntry>,
}

impl JsonBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            attribute_mode: AttributeMode::default(),
            dataset_mode: DatasetMode::default(),
            flush_to_disk: true,
            files: HashMap::new(),
            spans: Vec::new(),
        }
    }

    pub fn with_attribute_mode(mut self, mode: AttributeMode) -> Self {
        self.attribute_mode = mode;
        self
    }

    pub fn with_dataset_mode(mut self, mode: DatasetMode) -> Self {
        self.dataset_mode = mode;
        self
    }

    /// Apply the `json.*` subtree of the user configuration.
    pub fn from_config(base_dir: impl Into<PathBuf>, config: &mut TracingJson) -> Result<Self> {
        let mut backend = Self::new(base_dir);
        if let Some(mode) = config.get_traced(&["json", "attribute", "mode"]) {
            backend.attribute_mode = match mode.as_str() {
                Some("long") => AttributeMode::Long,
                Some("short") => AttributeMode::Short,
                _ => {
                    return Err(Error::config_schema(
                        vec!["json".to_owned(), "attribute".to_owned(), "mode".to_owned()],
                        "expected 'long' or 'short'",
                    ));
                }
            };
        }
        if let Some(mode) = config.get_traced(&["json", "dataset", "mode"]) {
            backend.dataset_mode = match mode.as_str() {
                Some("dataset") => DatasetMode::Dataset,
                Some("template") => DatasetMode::Template,
                _ => {
                    return Err(Error::config_schema(
                        vec!["json".to_owned(), "dataset".to_owned(), "mode".to_owned()],
                        "expected 'dataset' or 'template'",
                    ));
                }
            };
        }
        if let Some(target) = config.get_traced(&["json", "engine", "flush_target"]) {
            backend.flush_to_disk = match target.as_str() {
                Some("disk") => true,
                Some("buffer") => false,
                _ => {
                    return Err(Error::config_schema(
                        vec!["json".to_owned(), "engine".to_owned(), "flush_target".to_owned()],
                        "expected 'disk' or 'buffer'",
                    ));
                }
            };
        }
        // opaque pass-through maps; nothing to do with them here
        config.declare_fully_read(&["json", "engine", "parameters"]);
        Ok(backend)
    }

    fn disk_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn doc(&self, name: &str) -> Result<&FileDoc> {
        self.files.get(name).ok_or_else(|| {
            Error::Internal(format!("file '{name}' has not been opened in the json driver"))
        })
    }

    fn doc_mut(&mut self, name: &str) -> Result<&mut FileDoc> {
        self.files.get_mut(name).ok_or_else(|| {
            Error::Internal(format!("file '{name}' has not been opened in the json driver"))
        })
    }

    fn find_node<'a>(&'a self, file: &str, position: &FilePosition) -> Result<&'a Json> {
        let doc = self.doc(file)?;
        repr::find_attributable(&doc.root, &position.segments).ok_or_else(|| {
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::Group,
                Reason::NotFound,
                format!("no group or dataset at '{}'", position.join()),
            )
        })
    }

    fn write_doc_to_disk(&self, name: &str, doc: &FileDoc) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir).map_err(|err| {
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::File,
                Reason::Inaccessible,
                format!("cannot create directory '{}': {err}", self.base_dir.display()),
            )
        })?;
        let path = self.disk_path(name);
        let payload = serde_json::to_string_pretty(&doc.root)
            .map_err(|err| Error::Internal(format!("serialising '{name}' failed: {err}")))?;
        std::fs::write(&path, payload).map_err(|err| {
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::File,
                Reason::Inaccessible,
                format!("cannot write '{}': {err}", path.display()),
            )
        })
    }

    fn drain_spans(&mut self) -> Result<()> {
        let spans = std::mem::take(&mut self.spans);
        for span in spans {
            let data = span_to_buffer(&span.target)?;
            self.write_dataset(&span.file, &span.position, &span.offset, &span.extent, &data)?;
        }
        Ok(())
    }
}

/// Turn a filled span cell back into a write buffer.
fn span_to_buffer(target: &BufferTarget) -> Result<BufferRef> {
    fn take<T: opmd_io::DatasetElement>(cell: &TargetCell<T>) -> Result<Arc<[T]>> {
        cell.lock()
            .take()
            .map(Arc::from)
            .ok_or_else(|| Error::Internal("span buffer vanished before flush".to_owned()))
    }

    Ok(match target {
        BufferTarget::I8(c) => BufferRef::I8(take(c)?),
        BufferTarget::I16(c) => BufferRef::I16(take(c)?),
        BufferTarget::I32(c) => BufferRef::I32(take(c)?),
        BufferTarget::I64(c) => BufferRef::I64(take(c)?),
        BufferTarget::U8(c) => BufferRef::U8(take(c)?),
        BufferTarget::U16(c) => BufferRef::U16(take(c)?),
        BufferTarget::U32(c) => BufferRef::U32(take(c)?),
        BufferTarget::U64(c) => BufferRef::U64(take(c)?),
        BufferTarget::F32(c) => BufferRef::F32(take(c)?),
        BufferTarget::F64(c) => BufferRef::F64(take(c)?),
        BufferTarget::CF32(c) => BufferRef::CF32(take(c)?),
        BufferTarget::CF64(c) => BufferRef::CF64(take(c)?),
        BufferTarget::Bool(c) => BufferRef::Bool(take(c)?),
    })
}

fn fresh_span(dtype: Datatype, len: usize) -> Result<BufferTarget> {
    fn cell<T: opmd_io::DatasetElement>(len: usize) -> BufferTarget {
        let cell: TargetCell<T> = Arc::new(Mutex::new(Some(vec![T::default(); len])));
        T::make_target(cell)
    }

    Ok(match dtype {
        Datatype::I8 => cell::<i8>(len),
        Datatype::I16 => cell::<i16>(len),
        Datatype::I32 => cell::<i32>(len),
        Datatype::I64 => cell::<i64>(len),
        Datatype::U8 => cell::<u8>(len),
        Datatype::U16 => cell::<u16>(len),
        Datatype::U32 => cell::<u32>(len),
        Datatype::U64 => cell::<u64>(len),
        Datatype::F32 => cell::<f32>(len),
        Datatype::F64 => cell::<f64>(len),
        Datatype::CF32 => cell::<num_complex::Complex32>(len),
        Datatype::CF64 => cell::<num_complex::Complex64>(len),
        Datatype::Bool => cell::<bool>(len),
        other => {
            return Err(Error::unsupported(
                BACKEND_NAME,
                format!("no span buffers for datatype {other}"),
            ));
        }
    })
}

impl Backend for JsonBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn default_suffix(&self) -> &'static str {
        "json"
    }

    fn variable_attributes_supported(&self) -> bool {
        // the document is mutable until close; overwriting is harmless
        true
    }

    fn set_flush_target(&mut self, to_disk: bool) {
        self.flush_to_disk = to_disk;
    }

    fn create_file(&mut self, name: &str, _encoding: IterationEncoding) -> Result<()> {
        self.files.insert(
            name.to_owned(),
            FileDoc {
                root: repr::empty_group(),
                dirty: true,
            },
        );
        Ok(())
    }

    fn check_file(&mut self, name: &str) -> Result<bool> {
        Ok(self.files.contains_key(name) || self.disk_path(name).is_file())
    }

    fn open_file(&mut self, name: &str, _encoding: IterationEncoding) -> Result<()> {
        if self.files.contains_key(name) {
            return Ok(());
        }
        let path = self.disk_path(name);
        let content = std::fs::read_to_string(&path).map_err(|err| {
            let reason = if err.kind() == std::io::ErrorKind::NotFound {
                Reason::NotFound
            } else {
                Reason::CannotRead
            };
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::File,
                reason,
                format!("cannot open '{}': {err}", path.display()),
            )
        })?;
        let root = serde_json::from_str(&content).map_err(|err| {
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::File,
                Reason::UnexpectedContent,
                format!("'{}' is not a JSON document: {err}", path.display()),
            )
        })?;
        self.files.insert(name.to_owned(), FileDoc { root, dirty: false });
        Ok(())
    }

    fn close_file(&mut self, name: &str) -> Result<()> {
        self.drain_spans()?;
        if let Some(doc) = self.files.remove(name) {
            if doc.dirty {
                self.write_doc_to_disk(name, &doc)?;
            }
        }
        Ok(())
    }

    fn delete_file(&mut self, name: &str) -> Result<()> {
        self.files.remove(name);
        let path = self.disk_path(name);
        if path.is_file() {
            std::fs::remove_file(&path).map_err(|err| {
                Error::read_in(
                    BACKEND_NAME,
                    AffectedObject::File,
                    Reason::Inaccessible,
                    format!("cannot delete '{}': {err}", path.display()),
                )
            })?;
        }
        Ok(())
    }

    fn create_path(&mut self, file: &str, position: &FilePosition) -> Result<()> {
        let doc = self.doc_mut(file)?;
        repr::ensure_group(&mut doc.root, &position.segments);
        doc.dirty = true;
        Ok(())
    }

    fn open_path(&mut self, file: &str, position: &FilePosition) -> Result<()> {
        let doc = self.doc(file)?;
        if repr::find_group(&doc.root, &position.segments).is_none() {
            return Err(Error::read_in(
                BACKEND_NAME,
                AffectedObject::Group,
                Reason::NotFound,
                format!("no group '{}' in '{file}'", position.join()),
            ));
        }
        Ok(())
    }

    fn delete_path(&mut self, file: &str, position: &FilePosition) -> Result<()> {
        let doc = self.doc_mut(file)?;
        if let Some((name, parents)) = position.segments.split_last() {
            if let Some(parent) = repr::find_group_mut(&mut doc.root, parents) {
                if let Some(subgroups) = parent.get_mut("subgroups").and_then(Json::as_object_mut) {
                    subgroups.remove(name);
                    doc.dirty = true;
                }
            }
        }
        Ok(())
    }

    fn create_dataset(
        &mut self,
        file: &str,
        position: &FilePosition,
        dataset: &Dataset,
    ) -> Result<()> {
        if !dataset.operators.is_empty() {
            log::warn!(
                "the {BACKEND_NAME} driver ignores the {} configured dataset operator(s)",
                dataset.operators.len()
            );
        }
        let with_payload = self.dataset_mode == DatasetMode::Dataset;
        let doc = self.doc_mut(file)?;
        let Some((name, parents)) = position.segments.split_last() else {
            return Err(Error::usage("cannot create a dataset at the file root"));
        };
        let parent = repr::ensure_group(&mut doc.root, parents);
        let datasets = parent
            .as_object_mut()
            .expect("groups are objects")
            .entry("datasets")
            .or_insert_with(|| Json::Object(Map::new()))
            .as_object_mut()
            .expect("datasets is an object")
            .entry(name.clone())
            .or_insert(Json::Null);

        if datasets.is_null() {
            *datasets = repr::new_dataset_node(dataset.dtype, &dataset.extent, with_payload);
        } else {
            let existing_dtype = repr::dataset_dtype(datasets)?;
            let existing_rank = repr::dataset_extent(datasets)?.len();
            if existing_dtype != dataset.dtype || existing_rank != dataset.rank() {
                return Err(Error::usage(format!(
                    "dataset '{}' already exists with datatype {existing_dtype} and rank \
                     {existing_rank}, cannot redefine as {} with rank {}",
                    position.join(),
                    dataset.dtype,
                    dataset.rank()
                )));
            }
        }
        doc.dirty = true;
        Ok(())
    }

    fn extend_dataset(&mut self, file: &str, position: &FilePosition, extent: &Extent) -> Result<()> {
        let doc = self.doc_mut(file)?;
        let node = repr::find_dataset_mut(&mut doc.root, &position.segments).ok_or_else(|| {
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::Dataset,
                Reason::NotFound,
                format!("no dataset '{}' in '{file}'", position.join()),
            )
        })?;
        repr::extend_dataset_node(node, &position.join(), extent)?;
        doc.dirty = true;
        Ok(())
    }

    fn open_dataset(&mut self, file: &str, position: &FilePosition) -> Result<(Datatype, Extent)> {
        let doc = self.doc(file)?;
        let node = repr::find_dataset(&doc.root, &position.segments).ok_or_else(|| {
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::Dataset,
                Reason::NotFound,
                format!("no dataset '{}' in '{file}'", position.join()),
            )
        })?;
        Ok((repr::dataset_dtype(node)?, repr::dataset_extent(node)?))
    }

    fn delete_dataset(&mut self, file: &str, position: &FilePosition) -> Result<()> {
        let doc = self.doc_mut(file)?;
        if let Some((name, parents)) = position.segments.split_last() {
            if let Some(parent) = repr::find_group_mut(&mut doc.root, parents) {
                if let Some(datasets) = parent.get_mut("datasets").and_then(Json::as_object_mut) {
                    datasets.remove(name);
                    doc.dirty = true;
                }
            }
        }
        Ok(())
    }

    fn write_dataset(
        &mut self,
        file: &str,
        position: &FilePosition,
        offset: &Offset,
        extent: &Extent,
        data: &BufferRef,
    ) -> Result<()> {
        let position_name = position.join();
        let doc = self.doc_mut(file)?;
        let node = repr::find_dataset_mut(&mut doc.root, &position.segments).ok_or_else(|| {
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::Dataset,
                Reason::NotFound,
                format!("no dataset '{position_name}' in '{file}'"),
            )
        })?;
        repr::write_chunk(node, &position_name, offset, extent, data)?;
        doc.dirty = true;
        Ok(())
    }

    fn read_dataset(
        &mut self,
        file: &str,
        position: &FilePosition,
        offset: &Offset,
        extent: &Extent,
        target: &BufferTarget,
    ) -> Result<()> {
        let doc = self.doc(file)?;
        let node = repr::find_dataset(&doc.root, &position.segments).ok_or_else(|| {
            Error::read_in(
                BACKEND_NAME,
                AffectedObject::Dataset,
                Reason::NotFound,
                format!("no dataset '{}' in '{file}'", position.join()),
            )
        })?;
        repr::read_chunk(node, &position.join(), offset, extent, target)
    }

    fn get_buffer_view(
        &mut self,
        file: &str,
        position: &FilePosition,
        offset: &Offset,
        extent: &Extent,
        dtype: Datatype,
    ) -> Result<Option<BufferTarget>> {
        if self.dataset_mode == DatasetMode::Template {
            return Ok(None);
        }
        let target = fresh_span(dtype, opmd_types::volume(extent) as usize)?;
        self.spans.push(SpanEntry {
            file: file.to_owned(),
            position: position.clone(),
            offset: offset.clone(),
            extent: extent.clone(),
            target: target.clone(),
        });
        Ok(Some(target))
    }

    fn write_attribute(
        &mut self,
        file: &str,
        position: &FilePosition,
        name: &str,
        value: &Attribute,
        _changes_over_steps: bool,
    ) -> Result<()> {
        let mode = self.attribute_mode;
        let doc = self.doc_mut(file)?;
        let node =
            repr::find_attributable_mut(&mut doc.root, &position.segments).ok_or_else(|| {
                Error::read_in(
                    BACKEND_NAME,
                    AffectedObject::Group,
                    Reason::NotFound,
                    format!("no group or dataset at '{}'", position.join()),
                )
            })?;
        let attributes = repr::attributes_mut(node);
        match mode {
            AttributeMode::Long => {
                attributes.insert(
                    name.to_owned(),
                    serde_json::json!({
                        "datatype": value.dtype().as_str(),
                        "value": repr::value_to_json(value),
                    }),
                );
            }
            AttributeMode::Short => {
                if let Attribute::Bool(b) = value {
                    attributes.insert(name.to_owned(), serde_json::json!(u8::from(*b)));
                    attributes.insert(repr::boolean_marker(name), Json::Bool(true));
                } else {
                    attributes.insert(name.to_owned(), repr::value_to_json(value));
                }
            }
        }
        doc.dirty = true;
        Ok(())
    }

    fn read_attribute(&mut self, file: &str, position: &FilePosition, name: &str) -> Result<Attribute> {
        let node = self.find_node(file, position)?;
        let attributes = node.get("attributes").and_then(Json::as_object);
        let Some(stored) = attributes.and_then(|map| map.get(name)) else {
            return Err(Error::read_in(
                BACKEND_NAME,
                AffectedObject::Attribute,
                Reason::NotFound,
                format!("no attribute '{name}' at '{}'", position.join()),
            ));
        };

        // long spelling carries its tag; anything else is short spelling
        if let (Some(tag), Some(value)) = (
            stored.get("datatype").and_then(Json::as_str),
            stored.get("value"),
        ) {
            return repr::value_from_json(value, tag.parse()?);
        }

        let marker = attributes
            .and_then(|map| map.get(&repr::boolean_marker(name)))
            .and_then(Json::as_bool)
            .unwrap_or(false);
        if marker {
            let raw = stored.as_u64().ok_or_else(|| {
                Error::read_in(
                    BACKEND_NAME,
                    AffectedObject::Attribute,
                    Reason::UnexpectedContent,
                    format!("boolean-marked attribute '{name}' is not an integer"),
                )
            })?;
            return Ok(Attribute::Bool(raw != 0));
        }
        repr::value_from_json(stored, repr::infer_dtype(stored))
    }

    fn delete_attribute(&mut self, file: &str, position: &FilePosition, name: &str) -> Result<()> {
        let doc = self.doc_mut(file)?;
        if let Some(node) = repr::find_attributable_mut(&mut doc.root, &position.segments) {
            let attributes = repr::attributes_mut(node);
            attributes.remove(name);
            attributes.remove(&repr::boolean_marker(name));
            doc.dirty = true;
        }
        Ok(())
    }

    fn list_paths(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>> {
        let node = self.find_node(file, position)?;
        Ok(node
            .get("subgroups")
            .and_then(Json::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn list_datasets(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>> {
        let node = self.find_node(file, position)?;
        Ok(node
            .get("datasets")
            .and_then(Json::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn list_attributes(&mut self, file: &str, position: &FilePosition) -> Result<Vec<String>> {
        let node = self.find_node(file, position)?;
        Ok(node
            .get("attributes")
            .and_then(Json::as_object)
            .map(|map| {
                map.keys()
                    .filter(|key| !key.ends_with("/__is_boolean__"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn available_chunks(&mut self, file: &str, position: &FilePosition) -> Result<ChunkTable> {
        let (_, extent) = self.open_dataset(file, position)?;
        let offset = Offset::from_elem(0, extent.len());
        Ok(vec![WrittenChunkInfo::new(offset, extent, 0)])
    }

    fn advance(&mut self, _file: &str, _mode: AdvanceMode) -> Result<AdvanceStatus> {
        Ok(AdvanceStatus::RandomAccess)
    }

    fn flush_data(&mut self) -> Result<()> {
        self.drain_spans()?;
        if !self.flush_to_disk {
            return Ok(());
        }
        let names: Vec<String> = self
            .files
            .iter()
            .filter(|(_, doc)| doc.dirty)
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            let doc = self.files.get(&name).expect("just listed");
            self.write_doc_to_disk(&name, doc)?;
            self.files.get_mut(&name).expect("just listed").dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opmd_io::DatasetElement as _;

    fn position(path: &str) -> FilePosition {
        FilePosition::root().extended(path)
    }

    #[test]
    fn disk_cycle_preserves_groups_datasets_and_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = JsonBackend::new(dir.path());

        backend.create_file("cycle.json", IterationEncoding::GroupBased).unwrap();
        backend.create_path("cycle.json", &position("data/0")).unwrap();
        backend
            .write_attribute(
                "cycle.json",
                &position("data/0"),
                "time",
                &Attribute::from(0.5_f64),
                false,
            )
            .unwrap();
        backend
            .create_dataset(
                "cycle.json",
                &position("data/0/x"),
                &Dataset::new(Datatype::I64, Extent::from_slice(&[2])),
            )
            .unwrap();
        let data: std::sync::Arc<[i64]> = vec![5, 6].into();
        backend
            .write_dataset(
                "cycle.json",
                &position("data/0/x"),
                &Offset::from_slice(&[0]),
                &Extent::from_slice(&[2]),
                &i64::make_buffer(data),
            )
            .unwrap();
        backend.close_file("cycle.json").unwrap();

        let mut backend = JsonBackend::new(dir.path());
        assert!(backend.check_file("cycle.json").unwrap());
        backend.open_file("cycle.json", IterationEncoding::GroupBased).unwrap();
        assert_eq!(
            backend.read_attribute("cycle.json", &position("data/0"), "time").unwrap(),
            Attribute::from(0.5_f64)
        );
        assert_eq!(backend.list_paths("cycle.json", &position("data")).unwrap(), vec!["0"]);
        assert_eq!(
            backend.list_datasets("cycle.json", &position("data/0")).unwrap(),
            vec!["x"]
        );
        let (dtype, extent) = backend.open_dataset("cycle.json", &position("data/0/x")).unwrap();
        assert_eq!(dtype, Datatype::I64);
        assert_eq!(extent, Extent::from_slice(&[2]));

        // append-style reopening keeps the existing content writable
        backend
            .write_attribute(
                "cycle.json",
                &position("data/0"),
                "time",
                &Attribute::from(1.5_f64),
                false,
            )
            .unwrap();
        backend.close_file("cycle.json").unwrap();
    }

    #[test]
    fn short_attribute_mode_uses_the_boolean_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend =
            JsonBackend::new(dir.path()).with_attribute_mode(AttributeMode::Short);
        backend.create_file("short.json", IterationEncoding::GroupBased).unwrap();
        backend
            .write_attribute(
                "short.json",
                &FilePosition::root(),
                "flag",
                &Attribute::Bool(true),
                false,
            )
            .unwrap();

        // the marker is invisible in listings but drives decoding
        assert_eq!(
            backend.list_attributes("short.json", &FilePosition::root()).unwrap(),
            vec!["flag"]
        );
        assert_eq!(
            backend.read_attribute("short.json", &FilePosition::root(), "flag").unwrap(),
            Attribute::Bool(true)
        );
    }

    #[test]
    fn missing_files_report_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = JsonBackend::new(dir.path());
        let err = backend
            .open_file("nope.json", IterationEncoding::GroupBased)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Read { reason: Reason::NotFound, .. }
        ));
    }
}

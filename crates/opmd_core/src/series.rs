use std::path::Path;
use std::sync::Arc;

use opmd_backend_json::{JsonBackend, MemoryStreamBackend, StreamRole};
use opmd_chunk::Communicator;
use opmd_config::TracingJson;
use opmd_io::{
    AdvanceMode, AdvanceStatus, Backend, IoTask, IterationEncoding, NodeId, OutCell, Param,
    StepStatus,
};
use opmd_types::{Access, AffectedObject, Error, Reason, Result};

use crate::attributable::{self, impl_attributable};
use crate::iteration::{CloseStatus, Iteration, ParseState};
use crate::snapshots::{ReadIterations, WriteIterations};
use crate::state::{
    FilePattern, Inner, IterationState, NodeKind, Shared, SharedRef, SpanPolicy,
};

/// The root object: a collection of iterations living in one file, one
/// file per iteration, or one stream.
pub struct Series {
    pub(crate) shared: SharedRef,
    pub(crate) node: NodeId,
}

impl std::fmt::Debug for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Series").field("node", &self.node).finish()
    }
}

impl Series {
    /// Open or create a series with default options.
    ///
    /// The path selects the encoding (`%T`/`%0NT` patterns are
    /// file-based) and, via its suffix, the storage driver.
    pub fn new(path: &str, access: Access) -> Result<Self> {
        Self::with_options(path, access, "{}")
    }

    /// Open or create a series with a JSON/TOML options string
    /// (inline or `@file`).
    pub fn with_options(path: &str, access: Access, options: &str) -> Result<Self> {
        let config = opmd_config::parse_options(options)?;
        Self::build(path, access, config)
    }

    /// Like [`Series::with_options`], reading `@file` configs
    /// collectively: rank zero reads, everyone parses the same bytes.
    pub fn with_options_collective(
        path: &str,
        access: Access,
        options: &str,
        comm: &dyn Communicator,
    ) -> Result<Self> {
        let config = opmd_config::parse_options_with_reader(options, |file| {
            opmd_chunk::collective_file_read(file, comm)
        })?;
        Self::build(path, access, config)
    }

    fn build(path: &str, access: Access, mut config: serde_json::Value) -> Result<Self> {
        opmd_config::env_default(&mut config, "OPENPMD_DEFER_ITERATION_PARSING", &[
            "defer_iteration_parsing",
        ]);
        opmd_config::env_default(&mut config, "OPENPMD_BACKEND", &["backend"]);
        opmd_config::env_default(&mut config, "OPENPMD_JSON_ATTRIBUTE_MODE", &[
            "json", "attribute", "mode",
        ]);
        let mut config = TracingJson::new(config);

        let mut pattern = parse_input(path)?;

        let requested_encoding = match config.get_traced(&["iteration_encoding"]) {
            Some(value) => {
                let text = value.as_str().ok_or_else(|| {
                    Error::config_schema(
                        vec!["iteration_encoding".to_owned()],
                        "expected a string",
                    )
                })?;
                Some(IterationEncoding::from_config(text)?)
            }
            None => None,
        };
        let encoding = if pattern.file_based {
            IterationEncoding::FileBased
        } else {
            requested_encoding.unwrap_or(IterationEncoding::GroupBased)
        };

        let defer_parsing = config
            .get_traced(&["defer_iteration_parsing"])
            .map(bool_like)
            .unwrap_or(false);
        let span_policy = match config.get_traced(&["json", "use_span_based_put"]) {
            None => SpanPolicy::Auto,
            Some(value) => match value.as_str() {
                Some("auto") => SpanPolicy::Auto,
                Some("yes") => SpanPolicy::Yes,
                Some("no") => SpanPolicy::No,
                _ => {
                    return Err(Error::config_schema(
                        vec!["json".to_owned(), "use_span_based_put".to_owned()],
                        "expected 'auto', 'yes' or 'no'",
                    ));
                }
            },
        };
        // accepted for compatibility; both in-tree drivers decide this on
        // their own
        if let Some(usesteps) = config.get_traced(&["json", "engine", "usesteps"]) {
            log::debug!("json.engine.usesteps = {usesteps} has no effect on this driver");
        }

        let backend_key = config
            .get_traced(&["backend"])
            .and_then(|value| value.as_str().map(str::to_owned));
        let backend = select_backend(
            backend_key.as_deref(),
            &mut pattern,
            access,
            &mut config,
        )?;

        let mut handler = opmd_io::IoHandler::new(backend, access);
        let root_node = handler.registry.create_node();
        let iterations_node = handler.registry.create_child(root_node, "data");

        let mut inner = Inner {
            handler,
            encoding,
            pattern,
            config,
            warned_unused: false,
            root_node,
            iterations_node,
            iterations: Default::default(),
            aux: Default::default(),
            meshes_path: "meshes/".to_owned(),
            particles_path: "particles/".to_owned(),
            defer_parsing,
            span_policy,
            step_status: StepStatus::NoStep,
            step_generation: 0,
            uses_steps: None,
            currently_open: None,
            parsing: false,
            root_parsed: false,
            closed: false,
        };
        inner.aux_mut(root_node).kind = NodeKind::Group;
        inner.aux_mut(iterations_node).kind = NodeKind::Group;

        if access.writable() {
            write_root_attributes(&mut inner)?;
        }
        if access.readable() && access != Access::ReadLinear {
            init_read(&mut inner)?;
        } else if access == Access::ReadLinear {
            open_root_file(&mut inner)?;
        }

        let shared = Shared::new(inner);
        Ok(Self {
            shared,
            node: root_node,
        })
    }

    pub fn iteration_encoding(&self) -> IterationEncoding {
        self.shared.inner.lock().encoding
    }

    pub fn meshes_path(&self) -> String {
        self.shared.inner.lock().meshes_path.clone()
    }

    pub fn set_meshes_path(&self, path: &str) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let path = if path.ends_with('/') {
            path.to_owned()
        } else {
            format!("{path}/")
        };
        inner.meshes_path = path.clone();
        let node = inner.root_node;
        attributable::set_attribute(&mut inner, node, "meshesPath", path.into(), false)
    }

    pub fn particles_path(&self) -> String {
        self.shared.inner.lock().particles_path.clone()
    }

    pub fn set_particles_path(&self, path: &str) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let path = if path.ends_with('/') {
            path.to_owned()
        } else {
            format!("{path}/")
        };
        inner.particles_path = path.clone();
        let node = inner.root_node;
        attributable::set_attribute(&mut inner, node, "particlesPath", path.into(), false)
    }

    /// The openPMD standard version this series declares.
    pub fn openpmd_version(&self) -> String {
        self.get_attribute("openPMD")
            .and_then(|attr| attr.as_str().map(str::to_owned))
            .unwrap_or_else(|| "1.1.0".to_owned())
    }

    pub fn base_path(&self) -> String {
        self.get_attribute("basePath")
            .and_then(|attr| attr.as_str().map(str::to_owned))
            .unwrap_or_else(|| "/data/%T/".to_owned())
    }

    pub fn author(&self) -> Option<String> {
        self.get_attribute("author")
            .and_then(|attr| attr.as_str().map(str::to_owned))
    }

    pub fn set_author(&self, author: &str) -> Result<()> {
        self.set_attribute("author", author)
    }

    pub fn set_software(&self, name: &str, version: Option<&str>) -> Result<()> {
        self.set_attribute("software", name)?;
        if let Some(version) = version {
            self.set_attribute("softwareVersion", version)?;
        }
        Ok(())
    }

    pub fn set_comment(&self, comment: &str) -> Result<()> {
        self.set_attribute("comment", comment)
    }

    pub fn set_date(&self, date: &str) -> Result<()> {
        self.set_attribute("date", date)
    }

    /// All iteration indices currently known, ascending.
    pub fn iteration_indices(&self) -> Vec<u64> {
        self.shared.inner.lock().iterations.keys().copied().collect()
    }

    pub fn contains_iteration(&self, index: u64) -> bool {
        self.shared.inner.lock().iterations.contains_key(&index)
    }

    /// Access one iteration: parses it if its parse was deferred, creates
    /// it under writable access modes.
    pub fn iteration(&self, index: u64) -> Result<Iteration> {
        let mut inner = self.shared.inner.lock();
        if !inner.iterations.contains_key(&index) {
            if inner.handler.access.writable() {
                create_iteration(&mut inner, index, true)?;
            } else {
                return Err(Error::read(
                    AffectedObject::Group,
                    Reason::NotFound,
                    format!("no iteration {index} in this series"),
                ));
            }
        }
        let state = &inner.iterations[&index];
        let node = state.node;
        if state.parse_state == ParseState::Deferred {
            parse_iteration(&mut inner, index, false)?;
        }
        drop(inner);
        Ok(Iteration::wrap_indexed(Arc::clone(&self.shared), node, index))
    }

    /// The write-side iteration sequence: accessing index `i` closes a
    /// previously open different iteration and eagerly begins a step where
    /// the engine supports them.
    pub fn write_iterations(&self) -> WriteIterations {
        WriteIterations::new(Arc::clone(&self.shared))
    }

    /// Random-access traversal over every known snapshot, ascending.
    ///
    /// Requires a random-access resource; streams are consumed through
    /// [`Series::read_iterations`] instead.
    pub fn snapshots(&self) -> Result<crate::snapshots::RandomAccessIterator> {
        let inner = self.shared.inner.lock();
        if !inner.handler.access.readable() {
            return Err(Error::usage(format!(
                "cannot iterate snapshots in access mode {}",
                inner.handler.access
            )));
        }
        drop(inner);
        Ok(crate::snapshots::RandomAccessIterator::new(Arc::clone(&self.shared)))
    }

    /// The read-side stateful iterator over snapshots.
    pub fn read_iterations(&self) -> Result<ReadIterations> {
        {
            let inner = self.shared.inner.lock();
            if !inner.handler.access.readable() {
                return Err(Error::usage(format!(
                    "cannot read iterations in access mode {}",
                    inner.handler.access
                )));
            }
            if inner
                .iterations
                .values()
                .next()
                .is_some_and(|state| state.close_status == CloseStatus::ClosedInBackend)
            {
                return Err(Error::usage(
                    "cannot call read_iterations on a partially consumed series".to_owned(),
                ));
            }
        }
        Ok(ReadIterations::new(Arc::clone(&self.shared)))
    }

    /// Drain every queued task into the backend.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        flush_inner(&mut inner)?;
        if !inner.warned_unused {
            inner.warned_unused = true;
            inner.config.warn_global_unused();
        }
        Ok(())
    }

    /// [`Series::flush`] with an inline JSON/TOML fragment merged over the
    /// construction-time configuration; recognised here:
    /// `<backend>.engine.flush_target`.
    pub fn flush_with_options(&self, options: &str) -> Result<()> {
        let fragment = opmd_config::parse_options(options)?;
        {
            let mut inner = self.shared.inner.lock();
            if let Some(target) = fragment
                .get("json")
                .and_then(|json| json.get("engine"))
                .and_then(|engine| engine.get("flush_target"))
            {
                match target.as_str() {
                    Some("disk") => inner.handler.backend_mut().set_flush_target(true),
                    Some("buffer") => inner.handler.backend_mut().set_flush_target(false),
                    _ => {
                        return Err(Error::config_schema(
                            vec![
                                "json".to_owned(),
                                "engine".to_owned(),
                                "flush_target".to_owned(),
                            ],
                            "expected 'disk' or 'buffer'",
                        ));
                    }
                }
            }
        }
        self.flush()
    }

    /// Flush everything and release the backend resources. The tree stays
    /// navigable afterwards; further backend accesses error.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        close_inner(&mut inner)
    }
}

impl Drop for Series {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        if let Err(err) = close_inner(&mut inner) {
            log::error!("error while closing series on drop: {err}");
        }
    }
}

impl_attributable!(Series);

fn bool_like(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        serde_json::Value::String(s) => matches!(s.as_str(), "1" | "true" | "yes" | "on"),
        _ => false,
    }
}

/// Split a user path into directory, filename pattern and suffix.
fn parse_input(path: &str) -> Result<FilePattern> {
    let as_path = Path::new(path);
    let directory = as_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file = as_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Parse(format!("'{path}' has no file name component")))?;

    let (stem, suffix) = match file.rfind('.') {
        // a dot before the expansion pattern belongs to the stem
        Some(pos) if !file[pos..].contains("%") && pos > 0 => {
            (&file[..pos], file[pos + 1..].to_owned())
        }
        _ => (file, String::new()),
    };

    if let Some(percent) = stem.find('%') {
        let prefix = stem[..percent].to_owned();
        let expansion = &stem[percent..];
        let (padding, t_pos) = if let Some(rest) = expansion.strip_prefix("%0") {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            let t_offset = 2 + digits.len();
            if digits.is_empty() || !expansion[t_offset..].starts_with('T') {
                return Err(Error::Parse(format!(
                    "malformed expansion pattern in '{file}', expected %T or %0NT"
                )));
            }
            let padding: usize = digits.parse().map_err(|_| {
                Error::Parse(format!("padding width in '{file}' is out of range"))
            })?;
            (Some(padding), t_offset)
        } else if expansion.starts_with("%T") {
            (None, 1)
        } else {
            return Err(Error::Parse(format!(
                "malformed expansion pattern in '{file}', expected %T or %0NT"
            )));
        };
        let postfix = expansion[t_pos + 1..].to_owned();
        Ok(FilePattern {
            directory,
            prefix,
            postfix,
            suffix,
            padding,
            file_based: true,
        })
    } else {
        Ok(FilePattern {
            directory,
            prefix: stem.to_owned(),
            postfix: String::new(),
            suffix,
            padding: None,
            file_based: false,
        })
    }
}

fn select_backend(
    backend_key: Option<&str>,
    pattern: &mut FilePattern,
    access: Access,
    config: &mut TracingJson,
) -> Result<Box<dyn Backend>> {
    let chosen = match backend_key {
        Some(key) => key.to_owned(),
        None => match pattern.suffix.as_str() {
            "" | "json" => "json".to_owned(),
            "mem" => "memory_stream".to_owned(),
            other => {
                return Err(Error::Parse(format!(
                    "file suffix '.{other}' does not select a known backend; \
                     set the 'backend' configuration key"
                )));
            }
        },
    };

    let backend: Box<dyn Backend> = match chosen.as_str() {
        "json" => Box::new(JsonBackend::from_config(&pattern.directory, config)?),
        "memory_stream" => {
            let role = if access.writable() {
                StreamRole::Writer
            } else {
                StreamRole::Reader
            };
            Box::new(MemoryStreamBackend::new(&pattern.directory, role))
        }
        other => {
            return Err(Error::config_schema(
                vec!["backend".to_owned()],
                format!("unknown backend '{other}'"),
            ));
        }
    };

    let (suffix, warning) = backend.adjust_file_suffix(if pattern.suffix.is_empty() {
        None
    } else {
        Some(pattern.suffix.as_str())
    });
    if let Some(warning) = warning {
        log::warn!("{warning}");
    }
    pattern.suffix = suffix;
    Ok(backend)
}

fn write_root_attributes(inner: &mut Inner) -> Result<()> {
    let root = inner.root_node;
    let iteration_format = match inner.encoding {
        IterationEncoding::FileBased => {
            format!("{}%T{}", inner.pattern.prefix, inner.pattern.postfix)
        }
        IterationEncoding::GroupBased | IterationEncoding::VariableBased => {
            "/data/%T/".to_owned()
        }
    };
    attributable::set_attribute(inner, root, "openPMD", "1.1.0".into(), false)?;
    attributable::set_attribute(inner, root, "openPMDextension", 0_u32.into(), false)?;
    attributable::set_attribute(inner, root, "basePath", "/data/%T/".into(), false)?;
    attributable::set_attribute(
        inner,
        root,
        "iterationEncoding",
        inner.encoding.as_str().into(),
        false,
    )?;
    attributable::set_attribute(inner, root, "iterationFormat", iteration_format.into(), false)?;
    attributable::set_attribute(inner, root, "meshesPath", inner.meshes_path.clone().into(), false)?;
    attributable::set_attribute(
        inner,
        root,
        "particlesPath",
        inner.particles_path.clone().into(),
        false,
    )
}

// --- iteration bookkeeping ---

pub(crate) fn create_iteration(inner: &mut Inner, index: u64, write_defaults: bool) -> Result<NodeId> {
    if let Some(state) = inner.iterations.get(&index) {
        return Ok(state.node);
    }
    let node = match inner.encoding {
        // variable-based: every iteration occupies the same group
        IterationEncoding::VariableBased => inner.iterations_node,
        _ => {
            let parent = inner.iterations_node;
            let node = inner.handler.registry.create_child(parent, &index.to_string());
            inner.aux_mut(node).kind = NodeKind::Group;
            node
        }
    };
    if write_defaults {
        attributable::set_attribute(inner, node, "time", 0.0_f64.into(), false)?;
        attributable::set_attribute(inner, node, "dt", 1.0_f64.into(), false)?;
        attributable::set_attribute(inner, node, "timeUnitSI", 1.0_f64.into(), false)?;
    }
    if inner.handler.access.writable() {
        inner.handler.registry.mark_dirty(node);
    }
    inner.iterations.insert(index, IterationState::new(node));
    Ok(node)
}

pub(crate) fn step_status_of(inner: &Inner, index: u64) -> StepStatus {
    match inner.encoding {
        IterationEncoding::FileBased => inner
            .iterations
            .get(&index)
            .map(|state| state.step_status)
            .unwrap_or(StepStatus::NoStep),
        _ => inner.step_status,
    }
}

fn set_step_status(inner: &mut Inner, index: Option<u64>, status: StepStatus) {
    match (inner.encoding, index) {
        (IterationEncoding::FileBased, Some(index)) => {
            if let Some(state) = inner.iterations.get_mut(&index) {
                state.step_status = status;
            }
        }
        _ => inner.step_status = status,
    }
}

// --- flushing ---

/// Flush every known iteration plus the root metadata.
pub(crate) fn flush_inner(inner: &mut Inner) -> Result<()> {
    let indices: Vec<u64> = inner.iterations.keys().copied().collect();
    flush_iterations(inner, &indices)
}

pub(crate) fn flush_iterations(inner: &mut Inner, indices: &[u64]) -> Result<()> {
    flush_iterations_level(inner, indices, false)
}

/// Structure-only flush used when a step opens: files, groups and
/// datasets come into being, attribute values stay uncommitted.
pub(crate) fn flush_skeleton(inner: &mut Inner, indices: &[u64]) -> Result<()> {
    flush_iterations_level(inner, indices, true)
}

fn flush_iterations_level(inner: &mut Inner, indices: &[u64], skeleton: bool) -> Result<()> {
    if !inner.handler.access.writable() {
        // read side: drain the deferred reads, then execute them
        for &index in indices {
            if let Some(state) = inner.iterations.get(&index) {
                let node = state.node;
                attributable::enqueue_pending_subtree(inner, node);
            }
        }
        return inner.handler.flush();
    }
    match inner.encoding {
        IterationEncoding::FileBased => {
            for &index in indices {
                flush_file_based_iteration(inner, index, skeleton)?;
            }
        }
        IterationEncoding::GroupBased | IterationEncoding::VariableBased => {
            flush_single_file(inner, indices, skeleton)?;
        }
    }
    attributable::mark_attributes_flushed(inner);
    let root = inner.root_node;
    let iterations_node = inner.iterations_node;
    inner.handler.registry.node_mut(root).dirty = false;
    inner.handler.registry.node_mut(iterations_node).dirty = false;
    for &index in indices {
        if let Some(state) = inner.iterations.get(&index) {
            let node = state.node;
            inner.handler.registry.clear_dirty_recursive(node);
        }
    }
    Ok(())
}

fn flush_single_file(inner: &mut Inner, indices: &[u64], skeleton: bool) -> Result<()> {
    ensure_root_file(inner)?;
    let iterations_node = inner.iterations_node;
    let needs_data_group = {
        let aux = inner.aux_mut(iterations_node);
        let needed = !aux.structure_enqueued;
        aux.structure_enqueued = true;
        needed
    };
    if needs_data_group && !inner.handler.registry.node(iterations_node).written {
        inner
            .handler
            .enqueue(IoTask::new(iterations_node, Param::CreatePath { path: "data".to_owned() }));
    }
    let root = inner.root_node;
    if !skeleton {
        attributable::enqueue_staged_attributes(inner, root, false)?;
    }

    for &index in indices {
        let Some(state) = inner.iterations.get(&index) else {
            continue;
        };
        if state.close_status == CloseStatus::ClosedInBackend {
            continue;
        }
        let node = state.node;
        if inner.encoding == IterationEncoding::VariableBased {
            // the snapshot attribute names the iteration this step holds
            attributable::set_attribute(
                inner,
                node,
                "snapshot",
                opmd_types::Value::U64(index),
                true,
            )?;
        }
        attributable::enqueue_subtree(inner, node, skeleton)?;
    }
    inner.handler.flush()
}

fn ensure_root_file(inner: &mut Inner) -> Result<()> {
    let root = inner.root_node;
    if inner.aux_mut(root).structure_enqueued {
        return Ok(());
    }
    inner.aux_mut(root).structure_enqueued = true;
    let name = inner.pattern.filename(None);
    let encoding = inner.encoding;

    let open_instead = match inner.handler.access {
        Access::Create => false,
        Access::Append | Access::ReadWrite => {
            let exists = OutCell::new();
            inner.handler.enqueue(IoTask::new(
                root,
                Param::CheckFile { name: name.clone(), exists: exists.clone() },
            ));
            inner.handler.flush()?;
            exists.take().unwrap_or(false)
        }
        _ => true,
    };

    let param = if open_instead {
        Param::OpenFile { name, encoding }
    } else {
        Param::CreateFile { name, encoding }
    };
    inner.handler.enqueue(IoTask::new(root, param));
    Ok(())
}

fn flush_file_based_iteration(inner: &mut Inner, index: u64, skeleton: bool) -> Result<()> {
    let Some(state) = inner.iterations.get(&index) else {
        return Ok(());
    };
    if state.close_status == CloseStatus::ClosedInBackend {
        return Ok(());
    }
    let node = state.node;
    let root = inner.root_node;
    let iterations_node = inner.iterations_node;
    let fresh = !inner.handler.registry.node(node).written;
    let filename = inner.pattern.filename(Some(index));
    let encoding = inner.encoding;

    // the shared upper nodes move from file to file; their association is
    // re-resolved against the file this batch opens
    inner.handler.registry.node_mut(iterations_node).file = None;
    inner.handler.registry.node_mut(node).file = None;

    if fresh {
        inner.handler.enqueue(IoTask::new(
            root,
            Param::CreateFile { name: filename, encoding },
        ));
        inner
            .handler
            .enqueue(IoTask::new(iterations_node, Param::CreatePath { path: "data".to_owned() }));
        inner.aux_mut(iterations_node).structure_enqueued = true;
        inner.handler.enqueue(IoTask::new(
            node,
            Param::CreatePath { path: index.to_string() },
        ));
        inner.aux_mut(node).structure_enqueued = true;
        if !skeleton {
            // every file carries the full series metadata
            attributable::enqueue_staged_attributes(inner, root, true)?;
        }
    } else {
        inner.handler.enqueue(IoTask::new(
            root,
            Param::OpenFile { name: filename, encoding },
        ));
        if !skeleton {
            attributable::enqueue_staged_attributes(inner, root, false)?;
        }
    }
    attributable::enqueue_subtree(inner, node, skeleton)?;
    inner.handler.flush()
}

pub(crate) fn open_iteration_file(inner: &mut Inner, index: u64) -> Result<()> {
    let root = inner.root_node;
    let filename = inner.pattern.filename(Some(index));
    let encoding = inner.encoding;
    inner.handler.enqueue(IoTask::new(
        root,
        Param::OpenFile { name: filename, encoding },
    ));
    inner.handler.flush()
}

fn open_root_file(inner: &mut Inner) -> Result<()> {
    let root = inner.root_node;
    let name = inner.pattern.filename(None);
    let encoding = inner.encoding;
    inner.handler.enqueue(IoTask::new(root, Param::OpenFile { name, encoding }));
    inner.handler.flush()
}

fn close_inner(inner: &mut Inner) -> Result<()> {
    if inner.closed {
        return Ok(());
    }
    inner.closed = true;
    if inner.handler.access.writable() {
        flush_inner(inner)?;
    }
    let root = inner.root_node;
    inner.handler.enqueue(IoTask::new(root, Param::CloseFile));
    inner.handler.flush()
}

// --- the step machine ---

fn advance_task(inner: &mut Inner, mode: AdvanceMode) -> Result<AdvanceStatus> {
    let root = inner.root_node;
    let status = OutCell::new();
    inner.handler.enqueue(IoTask::new(
        root,
        Param::Advance { mode, status: status.clone() },
    ));
    inner.handler.flush()?;
    status
        .take()
        .ok_or_else(|| Error::Internal("ADVANCE produced no status".to_owned()))
}

/// Open an engine step.
///
/// Returns the advance status plus, on reading step-capable resources, the
/// iterations visible inside the fresh step.
pub(crate) fn begin_step(
    inner: &mut Inner,
    index: Option<u64>,
) -> Result<(AdvanceStatus, Option<Vec<u64>>)> {
    match step_status_of_opt(inner, index) {
        StepStatus::StreamOver => return Ok((AdvanceStatus::Over, None)),
        StepStatus::DuringStep => {
            return Err(Error::usage("a step is already active".to_owned()));
        }
        StepStatus::NoStep | StepStatus::OutOfStep => {}
    }
    if inner.uses_steps == Some(false) {
        // spelled out: BEGIN without steps is a no-op
        return Ok((AdvanceStatus::RandomAccess, None));
    }

    if inner.handler.access.writable() {
        match index {
            Some(index) => flush_skeleton(inner, &[index])?,
            None => {
                let indices: Vec<u64> = inner.iterations.keys().copied().collect();
                flush_skeleton(inner, &indices)?;
            }
        }
    } else {
        if inner.encoding == IterationEncoding::FileBased {
            if let Some(index) = index {
                open_iteration_file(inner, index)?;
            }
        }
        inner.handler.flush()?;
    }

    let status = advance_task(inner, AdvanceMode::Begin)?;
    if inner.uses_steps.is_none() {
        inner.uses_steps = Some(status == AdvanceStatus::Ok);
    }
    match status {
        AdvanceStatus::Ok => set_step_status(inner, index, StepStatus::DuringStep),
        AdvanceStatus::RandomAccess => set_step_status(inner, index, StepStatus::NoStep),
        AdvanceStatus::Over => set_step_status(inner, index, StepStatus::StreamOver),
    }

    let available = if status == AdvanceStatus::Ok
        && inner.handler.access.readable()
        && inner.encoding != IterationEncoding::FileBased
    {
        parse_root_if_needed(inner)?;
        Some(visible_iterations(inner)?)
    } else {
        None
    };
    Ok((status, available))
}

/// Linear readers see the series metadata only once the resource became
/// readable (for streams: once a step is open); catch up here.
pub(crate) fn parse_root_if_needed(inner: &mut Inner) -> Result<()> {
    if inner.root_parsed || !inner.handler.access.readable() {
        return Ok(());
    }
    let was_parsing = inner.parsing;
    inner.parsing = true;
    let parsed = parse_root(inner);
    inner.parsing = was_parsing;
    parsed
}

/// Seal the active step. A no-op outside a step; an error after the
/// stream ended.
pub(crate) fn end_step(inner: &mut Inner, index: Option<u64>) -> Result<()> {
    match step_status_of_opt(inner, index) {
        StepStatus::StreamOver => {
            return Err(Error::usage("the stream is over, there is no step to end".to_owned()));
        }
        StepStatus::NoStep | StepStatus::OutOfStep => {
            // nothing to seal; still push pending work through
            return flush_iterations_or_reads(inner, index);
        }
        StepStatus::DuringStep => {}
    }
    flush_iterations_or_reads(inner, index)?;
    let status = advance_task(inner, AdvanceMode::End)?;
    let next = if status == AdvanceStatus::Over {
        StepStatus::StreamOver
    } else {
        StepStatus::OutOfStep
    };
    set_step_status(inner, index, next);
    inner.step_generation += 1;
    Ok(())
}

fn flush_iterations_or_reads(inner: &mut Inner, index: Option<u64>) -> Result<()> {
    if inner.handler.access.writable() {
        match index {
            Some(index) => flush_iterations(inner, &[index]),
            None => flush_inner(inner),
        }
    } else {
        inner.handler.flush()
    }
}

fn step_status_of_opt(inner: &Inner, index: Option<u64>) -> StepStatus {
    match index {
        Some(index) => step_status_of(inner, index),
        None => inner.step_status,
    }
}

// --- the read side ---

fn init_read(inner: &mut Inner) -> Result<()> {
    inner.parsing = true;
    let result = init_read_impl(inner);
    inner.parsing = false;
    result
}

fn init_read_impl(inner: &mut Inner) -> Result<()> {
    if inner.pattern.file_based {
        let indices = scan_directory(inner)?;
        if indices.is_empty() {
            return Err(Error::read(
                AffectedObject::File,
                Reason::NotFound,
                format!(
                    "no iterations found for pattern '{}' in '{}'",
                    inner.pattern.filename(None),
                    inner.pattern.directory.display()
                ),
            ));
        }
        // the series metadata comes from the first file
        open_iteration_file(inner, indices[0])?;
        parse_root(inner)?;
        for index in indices {
            create_iteration(inner, index, false)?;
            inner
                .iterations
                .get_mut(&index)
                .expect("just created")
                .parse_state = ParseState::Deferred;
        }
        if !inner.defer_parsing {
            let indices: Vec<u64> = inner.iterations.keys().copied().collect();
            for index in indices {
                parse_iteration(inner, index, false)?;
            }
        }
    } else {
        open_root_file(inner)?;
        parse_root(inner)?;
        for index in visible_iterations(inner)? {
            if !inner.defer_parsing {
                parse_iteration(inner, index, false)?;
            }
        }
    }
    Ok(())
}

/// Read and validate the series-level metadata of the currently open file.
pub(crate) fn parse_root(inner: &mut Inner) -> Result<()> {
    let root = inner.root_node;
    attributable::read_all_attributes(inner, root)?;
    inner.root_parsed = true;

    let attrs = &inner.handler.registry.node(root).attributes;
    let Some(_) = attrs.get("openPMD").and_then(|attr| attr.as_str()) else {
        return Err(Error::read(
            AffectedObject::Attribute,
            Reason::UnexpectedContent,
            "required root attribute 'openPMD' is missing or not a string",
        ));
    };
    if let Some(base_path) = attrs.get("basePath") {
        let Some(base_path) = base_path.as_str() else {
            return Err(Error::read(
                AffectedObject::Attribute,
                Reason::UnexpectedContent,
                "root attribute 'basePath' is not a string",
            ));
        };
        if !base_path.contains("%T") {
            return Err(Error::read(
                AffectedObject::Attribute,
                Reason::UnexpectedContent,
                format!("basePath '{base_path}' does not contain the %T expansion"),
            ));
        }
    }
    if let Some(path) = attrs.get("meshesPath").and_then(|attr| attr.as_str()) {
        inner.meshes_path = path.to_owned();
    }
    if let Some(path) = attrs.get("particlesPath").and_then(|attr| attr.as_str()) {
        inner.particles_path = path.to_owned();
    }
    if !inner.pattern.file_based {
        if let Some(encoding) = attrs.get("iterationEncoding").and_then(|attr| attr.as_str()) {
            inner.encoding = IterationEncoding::from_attribute(encoding)?;
        }
    }
    Ok(())
}

fn scan_directory(inner: &mut Inner) -> Result<Vec<u64>> {
    let directory = inner.pattern.directory.clone();
    let entries = std::fs::read_dir(&directory).map_err(|err| {
        Error::read(
            AffectedObject::File,
            Reason::Inaccessible,
            format!("cannot list '{}': {err}", directory.display()),
        )
    })?;
    let mut indices = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| {
            Error::read(
                AffectedObject::File,
                Reason::Inaccessible,
                format!("cannot list '{}': {err}", directory.display()),
            )
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(index) = inner.pattern.parse_filename(name)? {
            indices.push(index);
        }
    }
    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}

/// The iterations currently visible in the open (group/variable) file,
/// ascending for group encoding, in snapshot order for variable encoding.
/// Newly seen indices get a deferred state.
pub(crate) fn visible_iterations(inner: &mut Inner) -> Result<Vec<u64>> {
    let was_parsing = inner.parsing;
    inner.parsing = true;
    let result = visible_iterations_impl(inner);
    inner.parsing = was_parsing;
    result
}

fn visible_iterations_impl(inner: &mut Inner) -> Result<Vec<u64>> {
    let iterations_node = inner.iterations_node;
    inner.handler.enqueue(IoTask::new(
        iterations_node,
        Param::OpenPath { path: "data".to_owned() },
    ));
    inner.handler.flush()?;

    let indices = match inner.encoding {
        IterationEncoding::VariableBased => {
            match attributable::read_attribute_now(inner, iterations_node, "snapshot") {
                Ok(attr) => attr.as_u64_vec().ok_or_else(|| {
                    Error::read(
                        AffectedObject::Attribute,
                        Reason::UnexpectedContent,
                        "the snapshot attribute is not an integer (list)",
                    )
                })?,
                // producers of a lone snapshot may omit the attribute
                Err(Error::Read { reason: Reason::NotFound, .. }) => vec![0],
                Err(other) => return Err(other),
            }
        }
        _ => {
            let paths = OutCell::new();
            inner.handler.enqueue(IoTask::new(
                iterations_node,
                Param::ListPaths { paths: paths.clone() },
            ));
            inner.handler.flush()?;
            let mut indices: Vec<u64> = paths
                .take()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|name| name.parse().ok())
                .collect();
            indices.sort_unstable();
            indices
        }
    };

    for &index in &indices {
        if !inner.iterations.contains_key(&index) {
            create_iteration(inner, index, false)?;
            inner
                .iterations
                .get_mut(&index)
                .expect("just created")
                .parse_state = ParseState::Deferred;
        }
    }
    Ok(indices)
}

// --- per-iteration parsing ---

pub(crate) fn parse_iteration(inner: &mut Inner, index: u64, force: bool) -> Result<()> {
    let Some(state) = inner.iterations.get_mut(&index) else {
        return Err(Error::Internal(format!("iteration {index} has no state")));
    };
    match state.parse_state {
        ParseState::Parsing => return Ok(()),
        ParseState::Parsed if !force => return Ok(()),
        _ => {}
    }
    state.parse_state = ParseState::Parsing;
    let was_parsing = inner.parsing;
    inner.parsing = true;

    let result = parse_iteration_impl(inner, index);

    inner.parsing = was_parsing;
    if let Some(state) = inner.iterations.get_mut(&index) {
        state.parse_state = if result.is_ok() {
            ParseState::Parsed
        } else {
            ParseState::Failed
        };
    }
    result
}

fn parse_iteration_impl(inner: &mut Inner, index: u64) -> Result<()> {
    let state = inner.iterations.get(&index).expect("caller checked");
    let node = state.node;
    let iterations_node = inner.iterations_node;

    match inner.encoding {
        IterationEncoding::FileBased => {
            inner.handler.registry.node_mut(iterations_node).file = None;
            inner.handler.registry.node_mut(node).file = None;
            open_iteration_file(inner, index)?;
            inner.handler.enqueue(IoTask::new(
                iterations_node,
                Param::OpenPath { path: "data".to_owned() },
            ));
            inner.handler.enqueue(IoTask::new(
                node,
                Param::OpenPath { path: index.to_string() },
            ));
        }
        IterationEncoding::GroupBased => {
            inner.handler.enqueue(IoTask::new(
                iterations_node,
                Param::OpenPath { path: "data".to_owned() },
            ));
            inner.handler.enqueue(IoTask::new(
                node,
                Param::OpenPath { path: index.to_string() },
            ));
        }
        IterationEncoding::VariableBased => {
            inner.handler.enqueue(IoTask::new(
                iterations_node,
                Param::OpenPath { path: "data".to_owned() },
            ));
        }
    }
    inner.handler.flush()?;

    attributable::read_all_attributes(inner, node)?;
    for required in ["dt", "time", "timeUnitSI"] {
        let attr = attributable::get_attribute(inner, node, required);
        match attr {
            None => {
                return Err(Error::read(
                    AffectedObject::Attribute,
                    Reason::NotFound,
                    format!("iteration {index} lacks the required attribute '{required}'"),
                ));
            }
            Some(value) if value.as_f64().is_none() => {
                return Err(Error::read(
                    AffectedObject::Attribute,
                    Reason::UnexpectedContent,
                    format!(
                        "unexpected datatype {} for '{required}' (expected a floating point)",
                        value.dtype()
                    ),
                ));
            }
            Some(_) => {}
        }
    }

    let paths = OutCell::new();
    inner
        .handler
        .enqueue(IoTask::new(node, Param::ListPaths { paths: paths.clone() }));
    inner.handler.flush()?;
    let children = paths.take().unwrap_or_default();

    let meshes_key = inner.meshes_path.trim_end_matches('/').to_owned();
    let particles_key = inner.particles_path.trim_end_matches('/').to_owned();
    for child in children {
        if child == meshes_key {
            parse_record_container(inner, node, &child)?;
        } else if child == particles_key {
            parse_species_container(inner, node, &child)?;
        } else {
            parse_custom_group(inner, node, &child)?;
        }
    }
    Ok(())
}

fn get_or_create_child(inner: &mut Inner, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
    match inner.handler.registry.child(parent, name) {
        Some(node) => node,
        None => {
            let node = inner.handler.registry.create_child(parent, name);
            inner.aux_mut(node).kind = kind;
            node
        }
    }
}

fn open_and_read(inner: &mut Inner, node: NodeId, name: &str) -> Result<()> {
    inner
        .handler
        .enqueue(IoTask::new(node, Param::OpenPath { path: name.to_owned() }));
    inner.handler.flush()?;
    attributable::read_all_attributes(inner, node)
}

/// `meshes/`: every child is a record (scalar = dataset or constant
/// group, vector = group of components). Malformed records are logged and
/// skipped so the rest of the iteration stays usable.
fn parse_record_container(inner: &mut Inner, iteration_node: NodeId, name: &str) -> Result<()> {
    let container = get_or_create_child(inner, iteration_node, name, NodeKind::Group);
    open_and_read(inner, container, name)?;

    let (groups, datasets) = list_children(inner, container)?;
    for record in datasets {
        try_parse_child(inner, container, &record, |inner, container, record| {
            let node = get_or_create_child(inner, container, record, NodeKind::Dataset);
            parse_dataset_component(inner, node, record)
        });
    }
    for record in groups {
        try_parse_child(inner, container, &record, parse_record_group);
    }
    Ok(())
}

/// `particles/`: every child is a species, every grandchild a record.
fn parse_species_container(inner: &mut Inner, iteration_node: NodeId, name: &str) -> Result<()> {
    let container = get_or_create_child(inner, iteration_node, name, NodeKind::Group);
    open_and_read(inner, container, name)?;

    let (species_names, _) = list_children(inner, container)?;
    for species in species_names {
        try_parse_child(inner, container, &species, |inner, container, species| {
            let node = get_or_create_child(inner, container, species, NodeKind::Group);
            open_and_read(inner, node, species)?;
            let (groups, datasets) = list_children(inner, node)?;
            for record in datasets {
                let component = get_or_create_child(inner, node, &record, NodeKind::Dataset);
                parse_dataset_component(inner, component, &record)?;
            }
            for record in groups {
                parse_record_group(inner, node, &record)?;
            }
            Ok(())
        });
    }
    Ok(())
}

fn try_parse_child(
    inner: &mut Inner,
    parent: NodeId,
    name: &str,
    parse: impl FnOnce(&mut Inner, NodeId, &str) -> Result<()>,
) {
    if let Err(err) = parse(inner, parent, name) {
        if err.is_recoverable_read() {
            log::warn!("skipping malformed child '{name}': {err}");
            if let Some(node) = inner.handler.registry.child(parent, name) {
                inner.handler.registry.deregister(node);
            }
        } else {
            log::error!("failed parsing child '{name}': {err}");
        }
    }
}

/// A record stored as a group: either a constant scalar (value/shape
/// attributes) or a vector of components.
fn parse_record_group(inner: &mut Inner, parent: NodeId, name: &str) -> Result<()> {
    let node = get_or_create_child(inner, parent, name, NodeKind::Group);
    open_and_read(inner, node, name)?;
    if try_mark_constant(inner, node)? {
        return Ok(());
    }
    let (groups, datasets) = list_children(inner, node)?;
    for component in datasets {
        let child = get_or_create_child(inner, node, &component, NodeKind::Dataset);
        parse_dataset_component(inner, child, &component)?;
    }
    for component in groups {
        let child = get_or_create_child(inner, node, &component, NodeKind::Group);
        open_and_read(inner, child, &component)?;
        if !try_mark_constant(inner, child)? {
            return Err(Error::read(
                AffectedObject::Group,
                Reason::UnexpectedContent,
                format!("component '{component}' is a group without value/shape attributes"),
            ));
        }
    }
    Ok(())
}

/// Recognise the constant-component convention (`value` + `shape`
/// attributes) on an already-read node.
fn try_mark_constant(inner: &mut Inner, node: NodeId) -> Result<bool> {
    let value = attributable::get_attribute(inner, node, "value");
    let shape = attributable::get_attribute(inner, node, "shape");
    let (Some(value), Some(shape)) = (value, shape) else {
        return Ok(false);
    };
    let extent = shape.as_u64_vec().ok_or_else(|| {
        Error::read(
            AffectedObject::Attribute,
            Reason::UnexpectedContent,
            "constant component with a non-integer shape attribute",
        )
    })?;
    let aux = inner.aux_mut(node);
    aux.kind = NodeKind::Constant;
    aux.dataset = Some(opmd_types::Dataset::new(
        value.dtype(),
        opmd_types::Extent::from_vec(extent),
    ));
    aux.constant = Some(value);
    Ok(true)
}

/// A record component backed by a real dataset.
fn parse_dataset_component(inner: &mut Inner, node: NodeId, name: &str) -> Result<()> {
    let out_dtype = OutCell::new();
    let out_extent = OutCell::new();
    inner.handler.enqueue(IoTask::new(
        node,
        Param::OpenDataset {
            name: name.to_owned(),
            out_dtype: out_dtype.clone(),
            out_extent: out_extent.clone(),
        },
    ));
    inner.handler.flush()?;
    let dtype = out_dtype
        .take()
        .ok_or_else(|| Error::Internal("OPEN_DATASET produced no datatype".to_owned()))?;
    let extent = out_extent
        .take()
        .ok_or_else(|| Error::Internal("OPEN_DATASET produced no extent".to_owned()))?;
    let aux = inner.aux_mut(node);
    aux.kind = NodeKind::Dataset;
    aux.dataset = Some(opmd_types::Dataset::new(dtype, extent));
    attributable::read_all_attributes(inner, node)
}

/// Arbitrary custom hierarchy next to meshes/particles: attributes plus
/// nested groups.
fn parse_custom_group(inner: &mut Inner, parent: NodeId, name: &str) -> Result<()> {
    let node = get_or_create_child(inner, parent, name, NodeKind::Group);
    open_and_read(inner, node, name)?;
    let (groups, _) = list_children(inner, node)?;
    for child in groups {
        parse_custom_group(inner, node, &child)?;
    }
    Ok(())
}

fn list_children(inner: &mut Inner, node: NodeId) -> Result<(Vec<String>, Vec<String>)> {
    let paths = OutCell::new();
    let datasets = OutCell::new();
    inner
        .handler
        .enqueue(IoTask::new(node, Param::ListPaths { paths: paths.clone() }));
    inner.handler.enqueue(IoTask::new(
        node,
        Param::ListDatasets { datasets: datasets.clone() },
    ));
    inner.handler.flush()?;
    Ok((paths.take().unwrap_or_default(), datasets.take().unwrap_or_default()))
}

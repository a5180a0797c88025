use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use ahash::HashMap;
use nohash_hasher::IntMap;
use parking_lot::Mutex;

use opmd_config::TracingJson;
use opmd_io::{IoHandler, IterationEncoding, NodeId, Param, StepStatus};
use opmd_types::{Attribute, Dataset, Error, Result};

use crate::iteration::{CloseStatus, ParseState};

/// The one lock every handle of a series goes through.
///
/// The engine is single-threaded cooperative by contract; the mutex exists
/// because handles share ownership, not for parallelism.
pub(crate) struct Shared {
    pub inner: Mutex<Inner>,
}

pub(crate) type SharedRef = Arc<Shared>;

impl Shared {
    pub fn new(inner: Inner) -> SharedRef {
        Arc::new(Self {
            inner: Mutex::new(inner),
        })
    }
}

/// What kind of on-disk object a frontend node maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum NodeKind {
    #[default]
    Group,
    /// A record component backed by a real dataset.
    Dataset,
    /// A record component synthesised from a constant value (stored as a
    /// group with `value`/`shape` attributes).
    Constant,
}

/// Write-tracking for one staged attribute.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AttrState {
    /// Step generation the value was staged in.
    pub generation: u64,
    /// Whether the staged value still needs a WRITE_ATT task.
    pub staged_dirty: bool,
    /// Whether any value for this name reached the backend already.
    pub flushed: bool,
    /// Variable attribute: expected to change between steps.
    pub changes_over_steps: bool,
}

/// Frontend bookkeeping that does not belong in the writable registry.
#[derive(Debug, Default)]
pub(crate) struct NodeAux {
    pub kind: NodeKind,
    pub dataset: Option<Dataset>,
    pub constant: Option<Attribute>,
    pub attr_state: HashMap<String, AttrState>,
    /// Structure task already enqueued (not necessarily executed).
    pub structure_enqueued: bool,
    /// Deferred data operations, flushed after the structure.
    pub pending: Vec<Param>,
}

/// Frontend state of one iteration.
#[derive(Debug)]
pub(crate) struct IterationState {
    pub node: NodeId,
    pub close_status: CloseStatus,
    pub parse_state: ParseState,
    /// File-based encoding: step status of this iteration's file.
    pub step_status: StepStatus,
    /// Whether the `closed` marker attribute still has to be written.
    pub pending_close_marker: bool,
}

impl IterationState {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            close_status: CloseStatus::Open,
            parse_state: ParseState::Parsed,
            step_status: StepStatus::NoStep,
            pending_close_marker: false,
        }
    }
}

/// Filename pattern of a series: `<prefix>%T<postfix>.<suffix>` for
/// file-based encodings, `<prefix>.<suffix>` otherwise.
#[derive(Debug, Clone)]
pub(crate) struct FilePattern {
    pub directory: PathBuf,
    pub prefix: String,
    pub postfix: String,
    pub suffix: String,
    /// `Some(n)` for `%0NT`, `None` for plain `%T` until detected.
    pub padding: Option<usize>,
    pub file_based: bool,
}

impl FilePattern {
    /// The on-backend file name of one iteration (file-based) or of the
    /// whole series.
    pub fn filename(&self, iteration: Option<u64>) -> String {
        match iteration {
            Some(index) if self.file_based => {
                let width = self.padding.unwrap_or(0);
                format!(
                    "{}{:0width$}{}.{}",
                    self.prefix, index, self.postfix, self.suffix
                )
            }
            _ => format!("{}{}.{}", self.prefix, self.postfix, self.suffix),
        }
    }

    /// Match a directory entry against the pattern; `Ok(Some(index))` on a
    /// hit, error on a padding conflict.
    pub fn parse_filename(&mut self, name: &str) -> Result<Option<u64>> {
        let Some(rest) = name.strip_prefix(self.prefix.as_str()) else {
            return Ok(None);
        };
        let expected_tail = format!("{}.{}", self.postfix, self.suffix);
        let Some(digits) = rest.strip_suffix(expected_tail.as_str()) else {
            return Ok(None);
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        let index: u64 = digits.parse().map_err(|_| {
            Error::read(
                opmd_types::AffectedObject::File,
                opmd_types::Reason::UnexpectedContent,
                format!("iteration index in '{name}' does not fit 64 bits"),
            )
        })?;
        let zero_padded = digits.len() > 1 && digits.starts_with('0');
        match self.padding {
            Some(padding) => {
                if digits.len() != padding && (zero_padded || digits.len() < padding) {
                    return Err(Error::read(
                        opmd_types::AffectedObject::File,
                        opmd_types::Reason::UnexpectedContent,
                        format!(
                            "file '{name}' has a {}-digit index, expected a padding of {padding}",
                            digits.len()
                        ),
                    ));
                }
            }
            None => {
                if zero_padded {
                    self.padding = Some(digits.len());
                }
            }
        }
        Ok(Some(index))
    }
}

/// Span-based writing policy (`use_span_based_put`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SpanPolicy {
    #[default]
    Auto,
    Yes,
    No,
}

/// The whole frontend state of one series.
pub(crate) struct Inner {
    pub handler: IoHandler,
    pub encoding: IterationEncoding,
    pub pattern: FilePattern,
    pub config: TracingJson,
    pub warned_unused: bool,

    pub root_node: NodeId,
    /// The `/data` container node.
    pub iterations_node: NodeId,
    pub iterations: BTreeMap<u64, IterationState>,
    pub aux: IntMap<NodeId, NodeAux>,

    pub meshes_path: String,
    pub particles_path: String,
    pub defer_parsing: bool,
    pub span_policy: SpanPolicy,

    /// Group/variable-based: the step state of the whole series.
    pub step_status: StepStatus,
    /// Monotonic step counter for the attribute overwrite policy.
    pub step_generation: u64,
    /// `None` until the first ADVANCE answered; then whether the driver
    /// actually implements steps.
    pub uses_steps: Option<bool>,
    /// The iteration currently held open by `write_iterations`.
    pub currently_open: Option<u64>,
    /// Re-entrancy guard for (deferred) parsing.
    pub parsing: bool,
    /// Whether the series-level metadata has been read (read modes).
    pub root_parsed: bool,
    /// Backend resources released; set once, stays set.
    pub closed: bool,
}

impl Inner {
    pub fn aux_mut(&mut self, node: NodeId) -> &mut NodeAux {
        self.aux.entry(node).or_default()
    }

    pub fn aux_of(&self, node: NodeId) -> Option<&NodeAux> {
        self.aux.get(&node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(prefix: &str, padding: Option<usize>) -> FilePattern {
        FilePattern {
            directory: PathBuf::from("."),
            prefix: prefix.to_owned(),
            postfix: String::new(),
            suffix: "json".to_owned(),
            padding,
            file_based: true,
        }
    }

    #[test]
    fn filenames_respect_padding() {
        let p = pattern("data", Some(6));
        assert_eq!(p.filename(Some(100)), "data000100.json");
        let p = pattern("data", None);
        assert_eq!(p.filename(Some(100)), "data100.json");
    }

    #[test]
    fn filename_matching_detects_padding() {
        let mut p = pattern("data", None);
        assert_eq!(p.parse_filename("data000100.json").unwrap(), Some(100));
        assert_eq!(p.padding, Some(6));
        // a conflicting zero-padded length is rejected
        assert!(p.parse_filename("data0200.json").is_err());
        // unrelated files are skipped silently
        assert_eq!(p.parse_filename("other100.json").unwrap(), None);
        assert_eq!(p.parse_filename("data.json").unwrap(), None);
        assert_eq!(p.parse_filename("dataxyz.json").unwrap(), None);
    }

    #[test]
    fn fixed_padding_rejects_shorter_indices() {
        let mut p = pattern("data", Some(6));
        assert_eq!(p.parse_filename("data000100.json").unwrap(), Some(100));
        assert!(p.parse_filename("data100.json").is_err());
        // longer unpadded indices are fine (the pattern overflows)
        assert_eq!(p.parse_filename("data1000000.json").unwrap(), Some(1_000_000));
    }
}

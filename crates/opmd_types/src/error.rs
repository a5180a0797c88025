use std::fmt;

/// What kind of on-disk object a read failure concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffectedObject {
    Attribute,
    Dataset,
    File,
    Group,
    Other,
}

/// Why a read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    NotFound,
    CannotRead,
    UnexpectedContent,
    Inaccessible,
    Other,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::CannotRead => "cannot read",
            Self::UnexpectedContent => "unexpected content",
            Self::Inaccessible => "inaccessible",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// The error taxonomy of the core engine.
///
/// Every public operation surfaces one of these; destructors never do
/// (close paths log and swallow instead).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Something on the backend could not be read as required.
    #[error("Error while reading {affected:?} ({reason}){}: {description}",
        .backend.as_ref().map(|b| format!(" [backend: {b}]")).unwrap_or_default())]
    Read {
        affected: AffectedObject,
        reason: Reason,
        backend: Option<String>,
        description: String,
    },

    /// The user violated an API invariant.
    #[error("Wrong API usage: {0}")]
    WrongApiUsage(String),

    /// The selected backend cannot perform the requested operation.
    #[error("Operation unsupported in backend {backend}: {description}")]
    UnsupportedInBackend { backend: String, description: String },

    /// A configuration field had the wrong type or an unknown value.
    #[error("Invalid backend configuration at [{}]: {description}", .path.join("."))]
    BackendConfigSchema { path: Vec<String>, description: String },

    /// Structural failure while parsing user input (filenames, options).
    #[error("Parse error: {0}")]
    Parse(String),

    /// An internal invariant broke. This is a bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn read(affected: AffectedObject, reason: Reason, description: impl Into<String>) -> Self {
        Self::Read {
            affected,
            reason,
            backend: None,
            description: description.into(),
        }
    }

    pub fn read_in(
        backend: impl Into<String>,
        affected: AffectedObject,
        reason: Reason,
        description: impl Into<String>,
    ) -> Self {
        Self::Read {
            affected,
            reason,
            backend: Some(backend.into()),
            description: description.into(),
        }
    }

    pub fn usage(description: impl Into<String>) -> Self {
        Self::WrongApiUsage(description.into())
    }

    pub fn unsupported(backend: impl Into<String>, description: impl Into<String>) -> Self {
        Self::UnsupportedInBackend {
            backend: backend.into(),
            description: description.into(),
        }
    }

    pub fn config_schema(path: impl Into<Vec<String>>, description: impl Into<String>) -> Self {
        Self::BackendConfigSchema {
            path: path.into(),
            description: description.into(),
        }
    }

    /// Whether retrying the same call can ever succeed.
    ///
    /// Read errors on optional children are recoverable (the child is
    /// skipped); everything else is not.
    pub fn is_recoverable_read(&self) -> bool {
        matches!(self, Self::Read { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_backend_and_path() {
        let err = Error::read_in("json", AffectedObject::Attribute, Reason::NotFound, "no 'time'");
        let msg = err.to_string();
        assert!(msg.contains("Attribute"), "{msg}");
        assert!(msg.contains("json"), "{msg}");
        assert!(msg.contains("no 'time'"), "{msg}");

        let err = Error::config_schema(
            vec!["json".to_owned(), "dataset".to_owned(), "mode".to_owned()],
            "unknown mode",
        );
        assert!(err.to_string().contains("[json.dataset.mode]"), "{err}");
    }
}

use std::fmt;

use opmd_types::{Error, Result};

/// How iterations map to files and groups on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationEncoding {
    /// One file per iteration, `pattern%T.ext`.
    FileBased,
    /// One file, one group `/data/<T>/` per iteration.
    GroupBased,
    /// One file, one logical group; a `snapshot` attribute names the
    /// active iteration.
    VariableBased,
}

impl IterationEncoding {
    /// The value of the `iterationEncoding` root attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileBased => "fileBased",
            Self::GroupBased => "groupBased",
            Self::VariableBased => "variableBased",
        }
    }

    /// The spelling used in user configuration.
    pub fn from_config(value: &str) -> Result<Self> {
        match value {
            "file_based" => Ok(Self::FileBased),
            "group_based" => Ok(Self::GroupBased),
            "variable_based" => Ok(Self::VariableBased),
            other => Err(Error::config_schema(
                vec!["iteration_encoding".to_owned()],
                format!("unknown iteration encoding '{other}'"),
            )),
        }
    }

    pub fn from_attribute(value: &str) -> Result<Self> {
        match value {
            "fileBased" => Ok(Self::FileBased),
            "groupBased" => Ok(Self::GroupBased),
            "variableBased" => Ok(Self::VariableBased),
            other => Err(Error::read(
                opmd_types::AffectedObject::Attribute,
                opmd_types::Reason::UnexpectedContent,
                format!("unknown iterationEncoding attribute '{other}'"),
            )),
        }
    }
}

impl fmt::Display for IterationEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use std::fmt;

/// How a series is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Random-access reading; no mutation of any kind.
    ReadOnly,
    /// Step-wise forward reading, required for streaming engines.
    ReadLinear,
    /// Read and modify an existing series.
    ReadWrite,
    /// Create a new series, overwriting whatever is in the way.
    Create,
    /// Add iterations to an existing series without reading it back.
    Append,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadLinear | Self::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::ReadWrite | Self::Create | Self::Append)
    }

    pub fn write_only(self) -> bool {
        matches!(self, Self::Create | Self::Append)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadOnly => "READ_ONLY",
            Self::ReadLinear => "READ_LINEAR",
            Self::ReadWrite => "READ_WRITE",
            Self::Create => "CREATE",
            Self::Append => "APPEND",
        };
        f.write_str(s)
    }
}

use crate::{Datatype, Error, Extent, Result, MAX_RANK};

/// One element of a per-dataset transformation pipeline (compression and
/// friends). Parameters are opaque to the core and handed to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub kind: String,
    pub parameters: serde_json::Value,
}

/// Description of an n-dimensional dataset.
///
/// The rank and element type are fixed when the description is first
/// applied to a record component; growing a resizable dataset goes through
/// `extend` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub dtype: Datatype,
    pub extent: Extent,
    pub resizable: bool,
    /// Preferred physical chunk shape, if the driver honours one.
    pub chunking: Option<Extent>,
    pub operators: Vec<Operator>,
    /// Driver-specific remainder of the per-dataset configuration.
    pub backend_config: serde_json::Value,
}

impl Dataset {
    pub fn new(dtype: Datatype, extent: impl Into<Extent>) -> Self {
        Self {
            dtype,
            extent: extent.into(),
            resizable: false,
            chunking: None,
            operators: Vec::new(),
            backend_config: serde_json::Value::Null,
        }
    }

    /// A dataset of known rank but no content yet (all extents zero).
    pub fn empty(dtype: Datatype, rank: usize) -> Self {
        Self::new(dtype, Extent::from_elem(0, rank))
    }

    pub fn rank(&self) -> usize {
        self.extent.len()
    }

    pub fn resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }

    pub fn chunking(mut self, chunks: impl Into<Extent>) -> Self {
        self.chunking = Some(chunks.into());
        self
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operators.push(operator);
        self
    }

    /// Apply a per-dataset JSON/TOML config fragment.
    ///
    /// Recognised keys: `resizable` (bool), `chunks` (array of integers),
    /// `operators` (array of `{type, parameters}`); everything else is kept
    /// verbatim for the driver.
    pub fn options(mut self, options: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = options else {
            return Err(Error::config_schema(
                Vec::new(),
                "per-dataset options must be a JSON object",
            ));
        };
        let mut rest = serde_json::Map::new();
        for (key, value) in map {
            match key.as_str() {
                "resizable" => {
                    self.resizable = value.as_bool().ok_or_else(|| {
                        Error::config_schema(vec!["resizable".to_owned()], "expected a boolean")
                    })?;
                }
                "chunks" => {
                    let chunks = value
                        .as_array()
                        .and_then(|arr| {
                            arr.iter().map(serde_json::Value::as_u64).collect::<Option<Extent>>()
                        })
                        .ok_or_else(|| {
                            Error::config_schema(
                                vec!["chunks".to_owned()],
                                "expected an array of unsigned integers",
                            )
                        })?;
                    self.chunking = Some(chunks);
                }
                "operators" => {
                    let list = value.as_array().ok_or_else(|| {
                        Error::config_schema(vec!["operators".to_owned()], "expected an array")
                    })?;
                    for entry in list {
                        let kind = entry
                            .get("type")
                            .and_then(serde_json::Value::as_str)
                            .ok_or_else(|| {
                                Error::config_schema(
                                    vec!["operators".to_owned(), "type".to_owned()],
                                    "operator entries need a string 'type'",
                                )
                            })?;
                        self.operators.push(Operator {
                            kind: kind.to_owned(),
                            parameters: entry
                                .get("parameters")
                                .cloned()
                                .unwrap_or(serde_json::Value::Null),
                        });
                    }
                }
                _ => {
                    rest.insert(key.clone(), value.clone());
                }
            }
        }
        if !rest.is_empty() {
            self.backend_config = serde_json::Value::Object(rest);
        }
        Ok(self)
    }

    /// Check the description itself for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.rank() > MAX_RANK {
            return Err(Error::usage(format!(
                "dataset rank {} exceeds the supported maximum of {MAX_RANK}",
                self.rank()
            )));
        }
        if !self.dtype.storable_in_dataset() {
            return Err(Error::usage(format!(
                "datatype {} cannot be stored in a dataset",
                self.dtype
            )));
        }
        if let Some(chunks) = &self.chunking {
            if chunks.len() != self.rank() {
                return Err(Error::usage(format!(
                    "chunk shape rank {} does not match dataset rank {}",
                    chunks.len(),
                    self.rank()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fragment() {
        let options: serde_json::Value = serde_json::from_str(
            r#"{"resizable": true, "chunks": [2, 2], "operators": [{"type": "blosc", "parameters": {"clevel": 5}}], "custom": 1}"#,
        )
        .unwrap();
        let dataset = Dataset::new(Datatype::F64, Extent::from_slice(&[4, 4]))
            .options(&options)
            .unwrap();
        assert!(dataset.resizable);
        assert_eq!(dataset.chunking, Some(Extent::from_slice(&[2, 2])));
        assert_eq!(dataset.operators.len(), 1);
        assert_eq!(dataset.operators[0].kind, "blosc");
        assert_eq!(dataset.backend_config["custom"], 1);
        dataset.validate().unwrap();
    }

    #[test]
    fn validation() {
        assert!(Dataset::new(Datatype::String, Extent::from_slice(&[1])).validate().is_err());
        assert!(Dataset::new(Datatype::F64, Extent::from_slice(&[1]))
            .chunking(Extent::from_slice(&[1, 1]))
            .validate()
            .is_err());
        assert!(Dataset::empty(Datatype::F64, 3).validate().is_ok());
    }
}

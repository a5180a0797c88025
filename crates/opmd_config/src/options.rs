use opmd_types::{Error, Result};
use serde_json::Value;

use crate::ARRAY_SEGMENT;

/// Backends that claim a top-level key in user configuration.
///
/// Keys under these are handed to the driver; the global unused-key warning
/// must not flag them.
pub const BACKEND_KEYS: &[&str] = &["json"];

/// On-wire flavour of a configuration string or file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

/// `@some/file.toml` → `Some("some/file.toml")`, else `None`.
pub fn extract_filename(options: &str) -> Option<&str> {
    let trimmed = options.trim();
    trimmed.strip_prefix('@').map(str::trim)
}

/// Parse a user-supplied options string into a lower-cased JSON tree.
///
/// Inline strings starting with `{` are JSON, anything else inline is TOML.
/// The `@file` form selects the format by file extension (default JSON).
pub fn parse_options(options: &str) -> Result<Value> {
    parse_options_with_reader(options, |path| {
        std::fs::read_to_string(path).map_err(|err| {
            Error::Parse(format!("failed reading config from file '{path}': {err}"))
        })
    })
}

/// Like [`parse_options`], with file access routed through the caller.
///
/// Parallel series pass a closure that reads on rank zero and broadcasts,
/// so every rank parses identical bytes.
pub fn parse_options_with_reader(
    options: &str,
    read_file: impl FnOnce(&str) -> Result<String>,
) -> Result<Value> {
    let (content, format) = if let Some(filename) = extract_filename(options) {
        let format = if filename.ends_with(".toml") {
            ConfigFormat::Toml
        } else {
            ConfigFormat::Json
        };
        (read_file(filename)?, format)
    } else {
        let trimmed = options.trim();
        if trimmed.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        let format = if trimmed.starts_with('{') {
            ConfigFormat::Json
        } else {
            ConfigFormat::Toml
        };
        (options.to_owned(), format)
    };

    let mut parsed = match format {
        ConfigFormat::Json => serde_json::from_str(&content)
            .map_err(|err| Error::Parse(format!("invalid JSON configuration: {err}")))?,
        ConfigFormat::Toml => {
            let table: toml::Value = toml::from_str(&content)
                .map_err(|err| Error::Parse(format!("invalid TOML configuration: {err}")))?;
            let mut path = Vec::new();
            toml_to_json(&table, &mut path)?
        }
    };
    lower_case(&mut parsed)?;
    Ok(parsed)
}

fn toml_to_json(value: &toml::Value, path: &mut Vec<String>) -> Result<Value> {
    if let Some(b) = value.as_bool() {
        Ok(Value::Bool(b))
    } else if let Some(i) = value.as_integer() {
        Ok(Value::Number(i.into()))
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f).map(Value::Number).ok_or_else(|| {
            Error::config_schema(path.clone(), "non-finite float cannot be converted to JSON")
        })
    } else if let Some(s) = value.as_str() {
        Ok(Value::String(s.to_owned()))
    } else if value.is_datetime() {
        Err(Error::config_schema(
            path.clone(),
            "cannot convert date/time type to JSON",
        ))
    } else if let Some(arr) = value.as_array() {
        let mut result = Vec::with_capacity(arr.len());
        for (i, entry) in arr.iter().enumerate() {
            path.push(i.to_string());
            result.push(toml_to_json(entry, path)?);
            path.pop();
        }
        Ok(Value::Array(result))
    } else if let Some(table) = value.as_table() {
        let mut result = serde_json::Map::new();
        for (key, entry) in table {
            path.push(key.clone());
            result.insert(key.clone(), toml_to_json(entry, path)?);
            path.pop();
        }
        Ok(Value::Object(result))
    } else {
        Err(Error::config_schema(
            path.clone(),
            "unexpected datatype in TOML configuration",
        ))
    }
}

/// Normalise all object keys to lower case, except below paths whose values
/// are opaque driver parameter maps.
///
/// Two keys collapsing onto the same lower-cased spelling is a
/// [`Error::BackendConfigSchema`].
pub fn lower_case(json: &mut Value) -> Result<()> {
    let mut path = Vec::new();
    lower_case_impl(json, &mut path, &|path: &[String]| {
        let ignored: &[&[&str]] = &[
            &["json", "engine", "parameters"],
            &["json", "dataset", "operators", ARRAY_SEGMENT, "parameters"],
        ];
        ignored
            .iter()
            .any(|candidate| candidate.len() == path.len() && candidate.iter().zip(path).all(|(a, b)| *a == b))
    })
}

fn lower_case_impl(
    json: &mut Value,
    path: &mut Vec<String>,
    ignore: &dyn Fn(&[String]) -> bool,
) -> Result<()> {
    match json {
        Value::Object(map) => {
            if !ignore(path) {
                let entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
                let count = entries.len();
                for (key, value) in entries {
                    let lower = key.to_lowercase();
                    if map.insert(lower.clone(), value).is_some() {
                        let mut duplicate = path.clone();
                        duplicate.push(lower);
                        return Err(Error::config_schema(duplicate, "duplicate key"));
                    }
                }
                debug_assert_eq!(map.len(), count);
            }
            // recurse with lower-cased path segments even below ignored maps
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                path.push(key.to_lowercase());
                if let Some(child) = map.get_mut(&key) {
                    lower_case_impl(child, path, ignore)?;
                }
                path.pop();
            }
        }
        Value::Array(arr) => {
            for entry in arr {
                path.push(ARRAY_SEGMENT.to_owned());
                lower_case_impl(entry, path, ignore)?;
                path.pop();
            }
        }
        _ => {}
    }
    Ok(())
}

/// Deep-merge `overwrite` into `default`.
///
/// Objects merge recursively; arrays and scalars overwrite wholesale; a
/// null in `overwrite` prunes the key from `default`.
pub fn merge(default: &mut Value, overwrite: &Value) {
    if let (Value::Object(default_map), Value::Object(overwrite_map)) = (&mut *default, overwrite) {
        for (key, value) in overwrite_map {
            let slot = default_map.entry(key.clone()).or_insert(Value::Null);
            merge(slot, value);
            if slot.is_null() {
                default_map.remove(key);
            }
        }
    } else {
        *default = overwrite.clone();
    }
}

/// [`merge`] over two unparsed option strings.
pub fn merge_strings(default: &str, overwrite: &str) -> Result<String> {
    let mut result = parse_options(default)?;
    merge(&mut result, &parse_options(overwrite)?);
    Ok(result.to_string())
}

/// Seed `json[path]` from an environment variable when the config does not
/// set the key itself; an explicitly configured key always wins.
pub fn env_default(json: &mut Value, env_key: &str, path: &[&str]) {
    let Ok(env_value) = std::env::var(env_key) else {
        return;
    };
    let mut cursor = json;
    for (i, segment) in path.iter().enumerate() {
        let Value::Object(map) = cursor else { return };
        let last = i + 1 == path.len();
        if last {
            map.entry((*segment).to_owned())
                .or_insert_with(|| Value::String(env_value.to_lowercase()));
            return;
        }
        cursor = map
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn inline_json_and_toml_agree() {
        let json = parse_options(r#"{"Backend": "json", "json": {"Engine": {"UseSteps": true}}}"#).unwrap();
        let toml = parse_options("Backend = \"json\"\n[json.Engine]\nUseSteps = true\n").unwrap();
        similar_asserts::assert_eq!(json, toml);
        assert_eq!(json["backend"], "json");
        assert_eq!(json["json"]["engine"]["usesteps"], true);
    }

    #[test]
    fn file_indirection_by_extension() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "defer_iteration_parsing = true").unwrap();
        let options = format!("@{}", file.path().display());
        let parsed = parse_options(&options).unwrap();
        assert_eq!(parsed["defer_iteration_parsing"], true);
    }

    #[test]
    fn opaque_parameter_maps_keep_their_case() {
        let parsed = parse_options(
            r#"{"json": {"engine": {"parameters": {"ProfileUnits": "Seconds"}}}}"#,
        )
        .unwrap();
        assert_eq!(parsed["json"]["engine"]["parameters"]["ProfileUnits"], "Seconds");
    }

    #[test]
    fn merge_semantics() {
        let mut default = parse_options(r#"{"a": {"b": 1, "c": 2}, "arr": [1, 2]}"#).unwrap();
        let overwrite = parse_options(r#"{"a": {"b": null, "d": 3}, "arr": [9]}"#).unwrap();
        merge(&mut default, &overwrite);
        assert_eq!(default["a"].get("b"), None);
        assert_eq!(default["a"]["c"], 2);
        assert_eq!(default["a"]["d"], 3);
        assert_eq!(default["arr"], serde_json::json!([9]));
    }

    #[test]
    fn datetime_rejected() {
        let err = parse_options("when = 2020-01-01T00:00:00Z\n").unwrap_err();
        assert!(err.to_string().contains("date/time"), "{err}");
    }
}

//! User-facing configuration plumbing: inline JSON, inline TOML or
//! `@path/to/file` indirection, canonicalised to a lower-cased
//! [`serde_json::Value`] tree, with a tracing wrapper that records which
//! keys the engine actually consumed so the rest can be warned about.

mod options;
mod shadow;

pub use self::options::{
    env_default, extract_filename, lower_case, merge, merge_strings, parse_options,
    parse_options_with_reader, ConfigFormat, BACKEND_KEYS,
};
pub use self::shadow::TracingJson;

/// Marker segment used for array positions in config paths, mirroring the
/// element-wise ignore rules for operator parameter lists.
pub const ARRAY_SEGMENT: &str = "\u{000b}num";

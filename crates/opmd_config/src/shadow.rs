use serde_json::Value;

use crate::BACKEND_KEYS;

/// A JSON tree that records which keys were read.
///
/// The engine navigates user configuration exclusively through this
/// wrapper; every visited key leaves a mark in a parallel *shadow* tree.
/// [`TracingJson::invert_shadow`] then yields the part of the original the
/// engine never looked at, which the series warns about at flush time.
#[derive(Debug, Clone)]
pub struct TracingJson {
    original: Value,
    shadow: Value,
    trace: bool,
}

impl TracingJson {
    pub fn new(original: Value) -> Self {
        Self {
            original,
            shadow: Value::Object(serde_json::Map::new()),
            trace: true,
        }
    }

    /// A wrapper that does not trace; used for driver-internal re-parses so
    /// keys are not double-reported.
    pub fn untraced(original: Value) -> Self {
        Self {
            original,
            shadow: Value::Object(serde_json::Map::new()),
            trace: false,
        }
    }

    /// The whole (lower-cased) original tree.
    pub fn json(&self) -> &Value {
        &self.original
    }

    /// Read the value at `path`, recording every segment as consumed.
    pub fn get_traced(&mut self, path: &[&str]) -> Option<&Value> {
        // verify existence first so missing keys leave no mark
        let mut cursor = &self.original;
        for segment in path {
            cursor = cursor.as_object()?.get(*segment)?;
        }

        if self.trace {
            let mut shadow = &mut self.shadow;
            for segment in path {
                if !shadow.is_object() {
                    *shadow = Value::Object(serde_json::Map::new());
                }
                shadow = shadow
                    .as_object_mut()
                    .expect("just ensured an object")
                    .entry((*segment).to_owned())
                    .or_insert(Value::Null);
            }
        }
        Some(cursor)
    }

    /// Mark the whole subtree at `path` as consumed (opaque pass-through
    /// maps such as driver engine parameters).
    pub fn declare_fully_read(&mut self, path: &[&str]) {
        if !self.trace {
            return;
        }
        let Some(subtree) = lookup(&self.original, path).cloned() else {
            return;
        };
        let mut shadow = &mut self.shadow;
        for segment in path {
            if !shadow.is_object() {
                *shadow = Value::Object(serde_json::Map::new());
            }
            shadow = shadow
                .as_object_mut()
                .expect("just ensured an object")
                .entry((*segment).to_owned())
                .or_insert(Value::Null);
        }
        *shadow = subtree;
    }

    /// The original minus everything that was consumed: the unused keys.
    pub fn invert_shadow(&self) -> Value {
        let mut inverted = self.original.clone();
        invert(&mut inverted, &self.shadow);
        inverted
    }

    /// Warn (once per call) about unused *global* keys; backend subtrees
    /// are the respective driver's responsibility.
    pub fn warn_global_unused(&self) {
        let mut unused = self.invert_shadow();
        if let Value::Object(map) = &mut unused {
            for backend in BACKEND_KEYS {
                map.remove(*backend);
            }
            if !map.is_empty() {
                log::warn!("The following parts of the global configuration remain unused: {unused}");
            }
        }
    }
}

fn lookup<'a>(tree: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cursor = tree;
    for segment in path {
        cursor = cursor.as_object()?.get(*segment)?;
    }
    Some(cursor)
}

/// Remove from `result` every key the shadow knows about: consumed leaves
/// disappear, partially consumed objects shrink, fully consumed objects
/// vanish.
fn invert(result: &mut Value, shadow: &Value) {
    let Value::Object(shadow_map) = shadow else {
        return;
    };
    let Value::Object(result_map) = result else {
        return;
    };
    let mut to_remove = Vec::new();
    for (key, shadow_child) in shadow_map {
        let Some(result_child) = result_map.get_mut(key) else {
            continue;
        };
        if result_child.is_object() {
            invert(result_child, shadow_child);
            if result_child.as_object().is_some_and(serde_json::Map::is_empty) {
                to_remove.push(key.clone());
            }
        } else {
            to_remove.push(key.clone());
        }
    }
    for key in &to_remove {
        result_map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn traced_keys_disappear_from_inversion() {
        let mut config = TracingJson::new(json!({
            "backend": "json",
            "json": {"engine": {"usesteps": true}},
            "typo_key": 1,
        }));

        assert_eq!(config.get_traced(&["backend"]), Some(&json!("json")));
        assert_eq!(
            config.get_traced(&["json", "engine", "usesteps"]),
            Some(&json!(true))
        );
        assert_eq!(config.get_traced(&["missing"]), None);

        let unused = config.invert_shadow();
        similar_asserts::assert_eq!(unused, json!({"typo_key": 1}));
    }

    #[test]
    fn fully_read_subtrees_count_as_consumed() {
        let mut config = TracingJson::new(json!({
            "json": {"engine": {"parameters": {"Threads": 4, "Profile": "On"}}},
        }));
        config.declare_fully_read(&["json", "engine", "parameters"]);
        similar_asserts::assert_eq!(config.invert_shadow(), json!({}));
    }

    #[test]
    fn partially_consumed_objects_shrink() {
        let mut config = TracingJson::new(json!({
            "json": {"engine": {"usesteps": true}, "dataset": {"mode": "dataset"}},
        }));
        config.get_traced(&["json", "engine", "usesteps"]);
        similar_asserts::assert_eq!(
            config.invert_shadow(),
            json!({"json": {"dataset": {"mode": "dataset"}}})
        );
    }

    #[test]
    fn untraced_reads_leave_everything_unused() {
        let mut config = TracingJson::untraced(json!({"a": 1}));
        config.get_traced(&["a"]);
        similar_asserts::assert_eq!(config.invert_shadow(), json!({"a": 1}));
    }
}

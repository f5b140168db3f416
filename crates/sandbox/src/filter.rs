//! Decides which namespace entries may cross a serialization boundary.
//!
//! The transportable value set is a closed, tagged union: unit, booleans,
//! integers, floats, chars, strings, arrays, maps, and uncurried function
//! pointers (encoded as `{"$fnptr": "<name>"}`). Live execution state
//! (closure-captured shared values, curried function pointers) and host
//! types such as timestamps never cross. A value that fails conversion is
//! dropped on its own, never the whole snapshot.

use std::collections::BTreeSet;

use rhai::{Dynamic, FnPtr, ImmutableString};
use serde_json::Value;

use crate::contract::{SandboxOptions, VarMap};
use crate::interpreter::Namespace;

/// Names the engine itself may inject into a scope; never exported.
pub const RESERVED_NAMES: &[&str] = &["this"];

/// Key reserved for the function-pointer encoding. Maps containing it are
/// not transportable, so the tag can never be forged from script data.
const FNPTR_TAG: &str = "$fnptr";

/// Rule set deciding which namespace entries may be serialized.
#[derive(Debug, Clone, Default)]
pub struct TransportFilter {
    exclude_names: BTreeSet<String>,
    exclude_prefixes: Vec<String>,
    exclude_callables: bool,
}

impl TransportFilter {
    pub fn new(
        exclude_names: &[String],
        exclude_prefixes: &[String],
        exclude_callables: bool,
    ) -> Self {
        Self {
            exclude_names: exclude_names.iter().cloned().collect(),
            exclude_prefixes: exclude_prefixes.to_vec(),
            exclude_callables,
        }
    }

    pub fn from_options(options: &SandboxOptions) -> Self {
        Self::new(
            &options.exclude_names,
            &options.exclude_prefixes,
            options.exclude_callables,
        )
    }

    /// Name-based rules: private prefix, reserved names, caller exclusions.
    pub fn allows_name(&self, name: &str) -> bool {
        if name.starts_with("__") || RESERVED_NAMES.contains(&name) {
            return false;
        }
        if self.exclude_names.contains(name) {
            return false;
        }
        !self
            .exclude_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
    }

    /// Convert one value into the transportable union. `None` means the
    /// value stays behind.
    pub fn export_value(&self, value: &Dynamic) -> Option<Value> {
        // Shared values are closure-captured, live execution state.
        if value.is_shared() {
            return None;
        }
        if value.is::<FnPtr>() {
            if self.exclude_callables {
                return None;
            }
            let fn_ptr = value.clone_cast::<FnPtr>();
            // Curried arguments are captured state, not a reusable definition.
            if !fn_ptr.curry().is_empty() {
                return None;
            }
            let mut tagged = serde_json::Map::with_capacity(1);
            tagged.insert(
                FNPTR_TAG.to_string(),
                Value::String(fn_ptr.fn_name().to_string()),
            );
            return Some(Value::Object(tagged));
        }
        if value.is_unit() {
            return Some(Value::Null);
        }
        if value.is::<bool>() {
            return Some(Value::Bool(value.clone_cast::<bool>()));
        }
        if value.is::<i64>() {
            return Some(Value::from(value.clone_cast::<i64>()));
        }
        if value.is::<f64>() {
            // Non-finite floats have no JSON form; dropped like any other
            // unserializable value.
            return serde_json::Number::from_f64(value.clone_cast::<f64>()).map(Value::Number);
        }
        if value.is::<char>() {
            return Some(Value::String(value.clone_cast::<char>().to_string()));
        }
        if value.is::<ImmutableString>() {
            return Some(Value::String(
                value.clone_cast::<ImmutableString>().to_string(),
            ));
        }
        if value.is::<rhai::Array>() {
            let array = value.clone_cast::<rhai::Array>();
            let mut out = Vec::with_capacity(array.len());
            for element in &array {
                out.push(self.export_value(element)?);
            }
            return Some(Value::Array(out));
        }
        if value.is::<rhai::Map>() {
            let map = value.clone_cast::<rhai::Map>();
            if map.contains_key(FNPTR_TAG) {
                return None;
            }
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, element) in &map {
                out.insert(key.to_string(), self.export_value(element)?);
            }
            return Some(Value::Object(out));
        }
        // Anything else is a host type (timestamp, open handle, custom Rust
        // value) with no transportable form.
        None
    }

    /// The maximal transportable subset of a namespace. Never fails; every
    /// excluded entry is logged and skipped.
    pub fn snapshot(&self, namespace: &Namespace) -> VarMap {
        let mut out = VarMap::new();
        for (name, value) in namespace {
            if !self.allows_name(name) {
                tracing::debug!(name = %name, "context export: name excluded");
                continue;
            }
            match self.export_value(value) {
                Some(exported) => {
                    out.insert(name.clone(), exported);
                }
                None => {
                    tracing::debug!(
                        name = %name,
                        value_type = value.type_name(),
                        "context export: value not transportable"
                    );
                }
            }
        }
        out
    }

    /// Name-based rules only, for namespaces that already hold transportable
    /// values (the parent side of the subprocess backend).
    pub fn filter_values(&self, variables: &VarMap) -> VarMap {
        variables
            .iter()
            .filter(|(name, _)| self.allows_name(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Rebuild an engine value from its transportable form.
pub fn import_value(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else {
                Dynamic::from(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(elements) => {
            let array: rhai::Array = elements.iter().map(import_value).collect();
            Dynamic::from(array)
        }
        Value::Object(fields) => {
            if fields.len() == 1 {
                if let Some(Value::String(name)) = fields.get(FNPTR_TAG) {
                    if let Ok(fn_ptr) = FnPtr::new(name.as_str()) {
                        return Dynamic::from(fn_ptr);
                    }
                }
            }
            let mut map = rhai::Map::new();
            for (key, element) in fields {
                map.insert(key.as_str().into(), import_value(element));
            }
            Dynamic::from(map)
        }
    }
}

/// Rebuild a whole namespace from transportable values.
pub fn import_values(variables: &VarMap) -> Namespace {
    variables
        .iter()
        .map(|(name, value)| (name.clone(), import_value(value)))
        .collect()
}

/// Transportable bindings that are new or changed relative to `base`.
pub fn updated_between(base: &VarMap, after: &VarMap) -> VarMap {
    after
        .iter()
        .filter(|&(name, value)| base.get(name) != Some(value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

//! Path-addressed workflow state management
//!
//! Every execution owns one [`StateStore`]: a JSON document addressed by path
//! strings, with deep get/set/merge/delete, immutable snapshots, and mutation
//! hooks. Nodes communicate through this document; the interpreter snapshots
//! it for config templating and the execution manager snapshots it for status
//! reads.
//!
//! # Operations
//!
//! | Op | Result | Failure |
//! |----|--------|---------|
//! | `get(path)` | deep-copied value or `None` | never fails |
//! | `set(path, v)` | replaces/creates value; intermediate containers auto-created | never fails |
//! | `update(partial)` | deep-merge into root (maps merge, sequences/primitives replace) | never fails |
//! | `delete(path)` | removes key or sequence element; absent path is a no-op | never fails |
//! | `has(path)` | whether `get(path)` would return a value | never fails |
//! | `snapshot()` | deep copy of the root | never fails |
//!
//! # Path grammar
//!
//! Segments are separated by `.` or enclosed in `[...]`; bracket segments may
//! be quoted with `'` or `"`. A leading `$` or `$.` is optional. The root is
//! addressed by `$` or the empty string.
//!
//! ```text
//! user.name            ["user", "name"]
//! $.items[0].id        ["items", "0", "id"]
//! config["a.b"].value  ["config", "a.b", "value"]
//! ```
//!
//! Numeric segments index into sequences. When `set` creates intermediate
//! containers, it chooses a sequence if the next segment is all-digits and a
//! map otherwise.
//!
//! # Copy semantics
//!
//! Everything returned by the store is a deep copy of the internal document,
//! and everything written is deep-copied on write - callers can never alias
//! internal state. `serde_json::Value` trees cannot contain cycles, so a
//! structural clone is a deep copy.

use crate::error::{FlowError, Result};
use serde_json::{Map, Value};
use std::sync::RwLock;

/// Hook fired before a mutating operation commits.
///
/// Receives the path being mutated, a deep copy of the old value at that path
/// (`Null` when absent) and a deep copy of the incoming value.
pub type BeforeUpdateHook = Box<dyn Fn(&str, &Value, &Value) + Send + Sync>;

/// Hook fired after a mutating operation commits, with the new value.
pub type AfterUpdateHook = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Per-execution path-addressed state document
///
/// Thread-safe via interior locking; shared across the interpreter, the
/// runtime context, and nodes behind an `Arc`.
pub struct StateStore {
    root: RwLock<Value>,
    before_update: RwLock<Option<BeforeUpdateHook>>,
    after_update: RwLock<Option<AfterUpdateHook>>,
}

impl StateStore {
    /// Create an empty store (root is an empty map)
    pub fn new() -> Self {
        Self::with_initial(Value::Object(Map::new()))
    }

    /// Create a store seeded with an initial document
    ///
    /// Non-object initial values are accepted; the root is whatever the
    /// workflow definition declared.
    pub fn with_initial(initial: Value) -> Self {
        Self {
            root: RwLock::new(initial),
            before_update: RwLock::new(None),
            after_update: RwLock::new(None),
        }
    }

    /// Register the before-update hook
    ///
    /// At most one hook may be registered per store; a second registration is
    /// rejected.
    pub fn set_before_update(&self, hook: BeforeUpdateHook) -> Result<()> {
        let mut slot = self.before_update.write().unwrap();
        if slot.is_some() {
            return Err(FlowError::validation(
                "before-update hook is already registered",
            ));
        }
        *slot = Some(hook);
        Ok(())
    }

    /// Register the after-update hook
    ///
    /// At most one hook may be registered per store; a second registration is
    /// rejected.
    pub fn set_after_update(&self, hook: AfterUpdateHook) -> Result<()> {
        let mut slot = self.after_update.write().unwrap();
        if slot.is_some() {
            return Err(FlowError::validation(
                "after-update hook is already registered",
            ));
        }
        *slot = Some(hook);
        Ok(())
    }

    /// Get a deep copy of the value at `path`, or `None` if absent
    pub fn get(&self, path: &str) -> Option<Value> {
        let segs = parse_path(path);
        let root = self.root.read().unwrap();
        resolve(&root, &segs).cloned()
    }

    /// Whether a value exists at `path`
    ///
    /// Equivalent to `get(path).is_some()`; an explicit `null` at the path
    /// counts as present.
    pub fn has(&self, path: &str) -> bool {
        let segs = parse_path(path);
        let root = self.root.read().unwrap();
        resolve(&root, &segs).is_some()
    }

    /// Set the value at `path`, creating intermediate containers as needed
    pub fn set(&self, path: &str, value: Value) {
        let segs = parse_path(path);
        let old = {
            let root = self.root.read().unwrap();
            resolve(&root, &segs).cloned().unwrap_or(Value::Null)
        };
        self.fire_before(path, &old, &value);
        {
            let mut root = self.root.write().unwrap();
            set_in(&mut root, &segs, value.clone());
        }
        self.fire_after(path, &value);
    }

    /// Deep-merge a partial document into the root
    ///
    /// Maps are merged recursively; sequences and primitives on the incoming
    /// side replace whatever was there. Hooks fire once for the whole call
    /// (with path `$`), not once per merged key.
    pub fn update(&self, partial: Value) {
        let merged = {
            let root = self.root.read().unwrap();
            let mut next = root.clone();
            deep_merge(&mut next, partial);
            next
        };
        let old = self.snapshot();
        self.fire_before("$", &old, &merged);
        {
            let mut root = self.root.write().unwrap();
            *root = merged.clone();
        }
        self.fire_after("$", &merged);
    }

    /// Remove the value at `path`
    ///
    /// Map deletion removes the key; sequence deletion removes the element
    /// and shifts the remainder left. Deleting an absent path is a no-op, as
    /// is deleting the root.
    pub fn delete(&self, path: &str) {
        let segs = parse_path(path);
        if segs.is_empty() {
            return;
        }
        let old = {
            let root = self.root.read().unwrap();
            match resolve(&root, &segs) {
                Some(v) => v.clone(),
                None => return,
            }
        };
        self.fire_before(path, &old, &Value::Null);
        {
            let mut root = self.root.write().unwrap();
            delete_in(&mut root, &segs);
        }
        self.fire_after(path, &Value::Null);
    }

    /// Deep copy of the entire document
    pub fn snapshot(&self) -> Value {
        self.root.read().unwrap().clone()
    }

    fn fire_before(&self, path: &str, old: &Value, new: &Value) {
        if let Some(hook) = self.before_update.read().unwrap().as_ref() {
            hook(path, old, new);
        }
    }

    fn fire_after(&self, path: &str, new: &Value) {
        if let Some(hook) = self.after_update.read().unwrap().as_ref() {
            hook(path, new);
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("root", &*self.root.read().unwrap())
            .finish()
    }
}

/// Parse a path string into segments
///
/// Strips an optional leading `$`/`$.`, splits on `.` outside brackets, and
/// unwraps `[...]` segments (quoted or bare). `$` and the empty string parse
/// to zero segments (the root).
pub(crate) fn parse_path(path: &str) -> Vec<String> {
    let path = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                let quote = match chars.peek() {
                    Some(&q) if q == '"' || q == '\'' => {
                        chars.next();
                        Some(q)
                    }
                    _ => None,
                };
                let mut seg = String::new();
                for inner in chars.by_ref() {
                    match quote {
                        Some(q) if inner == q => continue,
                        _ if inner == ']' => break,
                        _ => seg.push(inner),
                    }
                }
                segments.push(seg);
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn all_digits(seg: &str) -> Option<usize> {
    if !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
        seg.parse().ok()
    } else {
        None
    }
}

fn resolve<'a>(value: &'a Value, segs: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for seg in segs {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(arr) => arr.get(all_digits(seg)?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_in(target: &mut Value, segs: &[String], value: Value) {
    let Some(seg) = segs.first() else {
        *target = value;
        return;
    };
    let rest = &segs[1..];
    match target {
        // Existing maps keep map semantics even for numeric segments.
        Value::Object(map) => {
            let entry = map.entry(seg.clone()).or_insert(Value::Null);
            set_in(entry, rest, value);
        }
        Value::Array(arr) => {
            if let Some(idx) = all_digits(seg) {
                while arr.len() <= idx {
                    arr.push(Value::Null);
                }
                set_in(&mut arr[idx], rest, value);
            } else {
                // Non-numeric segment into a sequence: the container is
                // replaced, matching the never-fails contract of `set`.
                *target = Value::Object(Map::new());
                set_in(target, segs, value);
            }
        }
        _ => {
            *target = if all_digits(seg).is_some() {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            };
            set_in(target, segs, value);
        }
    }
}

fn delete_in(target: &mut Value, segs: &[String]) {
    let (last, parents) = match segs.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = target;
    for seg in parents {
        current = match current {
            Value::Object(map) => match map.get_mut(seg) {
                Some(v) => v,
                None => return,
            },
            Value::Array(arr) => match all_digits(seg).and_then(|i| arr.get_mut(i)) {
                Some(v) => v,
                None => return,
            },
            _ => return,
        };
    }
    match current {
        Value::Object(map) => {
            map.remove(last);
        }
        Value::Array(arr) => {
            if let Some(idx) = all_digits(last) {
                if idx < arr.len() {
                    arr.remove(idx);
                }
            }
        }
        _ => {}
    }
}

/// Deep-merge `incoming` into `target`
///
/// Recurses only when both sides are plain maps; in every other case the
/// incoming side replaces. Sequences and dates are never recursively merged.
pub(crate) fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_parse_path_variants() {
        assert_eq!(parse_path("a.b.c"), vec!["a", "b", "c"]);
        assert_eq!(parse_path("$.a.b"), vec!["a", "b"]);
        assert_eq!(parse_path("$"), Vec::<String>::new());
        assert_eq!(parse_path(""), Vec::<String>::new());
        assert_eq!(parse_path("items[0].id"), vec!["items", "0", "id"]);
        assert_eq!(parse_path("config[\"a.b\"].v"), vec!["config", "a.b", "v"]);
        assert_eq!(parse_path("config['x'].v"), vec!["config", "x", "v"]);
        assert_eq!(parse_path("items.0"), vec!["items", "0"]);
    }

    #[test]
    fn test_set_get_roundtrip() {
        let store = StateStore::new();
        store.set("user.name", json!("Ada"));
        assert_eq!(store.get("user.name"), Some(json!("Ada")));
        assert_eq!(store.get("user"), Some(json!({"name": "Ada"})));
    }

    #[test]
    fn test_set_creates_sequences_for_numeric_segments() {
        let store = StateStore::new();
        store.set("items.0", json!("a"));
        store.set("items.2", json!("c"));
        assert_eq!(store.get("items"), Some(json!(["a", null, "c"])));
    }

    #[test]
    fn test_set_creates_maps_for_named_segments() {
        let store = StateStore::new();
        store.set("a.b.c", json!(1));
        assert_eq!(store.snapshot(), json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_set_replaces_scalar_in_path() {
        let store = StateStore::new();
        store.set("a", json!(42));
        store.set("a.b", json!("deep"));
        assert_eq!(store.get("a"), Some(json!({"b": "deep"})));
    }

    #[test]
    fn test_set_root() {
        let store = StateStore::new();
        store.set("$", json!({"fresh": true}));
        assert_eq!(store.snapshot(), json!({"fresh": true}));
    }

    #[test]
    fn test_get_returns_deep_copy() {
        let store = StateStore::new();
        store.set("list", json!([1, 2, 3]));
        let mut copy = store.get("list").unwrap();
        copy.as_array_mut().unwrap().push(json!(4));
        assert_eq!(store.get("list"), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_has_matches_get() {
        let store = StateStore::new();
        store.set("present", json!(null));
        assert!(store.has("present"));
        assert!(!store.has("absent"));
        assert!(store.has("$"));
    }

    #[test]
    fn test_delete_map_key() {
        let store = StateStore::new();
        store.set("a.b", json!(1));
        store.set("a.c", json!(2));
        store.delete("a.b");
        assert_eq!(store.get("a"), Some(json!({"c": 2})));
    }

    #[test]
    fn test_delete_sequence_element_shifts() {
        let store = StateStore::new();
        store.set("items", json!(["a", "b", "c"]));
        store.delete("items.1");
        assert_eq!(store.get("items"), Some(json!(["a", "c"])));
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let store = StateStore::new();
        store.set("a", json!(1));
        store.delete("missing.path");
        store.delete("a.b.c");
        assert_eq!(store.snapshot(), json!({"a": 1}));
    }

    #[test]
    fn test_update_merges_maps() {
        let store = StateStore::with_initial(json!({
            "user": {"name": "Ada", "role": "admin"},
            "count": 1
        }));
        store.update(json!({
            "user": {"role": "viewer"},
            "tags": ["new"]
        }));
        assert_eq!(
            store.snapshot(),
            json!({
                "user": {"name": "Ada", "role": "viewer"},
                "count": 1,
                "tags": ["new"]
            })
        );
    }

    #[test]
    fn test_update_replaces_sequences() {
        let store = StateStore::with_initial(json!({"items": [1, 2, 3]}));
        store.update(json!({"items": [9]}));
        assert_eq!(store.get("items"), Some(json!([9])));
    }

    #[test]
    fn test_hooks_fire_once_per_call() {
        let store = StateStore::new();
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));

        let b = before.clone();
        store
            .set_before_update(Box::new(move |_, _, _| {
                b.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        let a = after.clone();
        store
            .set_after_update(Box::new(move |_, _| {
                a.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        store.set("x", json!(1));
        store.update(json!({"y": {"z": 1}, "w": 2}));
        store.delete("x");

        assert_eq!(before.load(Ordering::SeqCst), 3);
        assert_eq!(after.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_hook_registration_is_once() {
        let store = StateStore::new();
        store.set_after_update(Box::new(|_, _| {})).unwrap();
        assert!(store.set_after_update(Box::new(|_, _| {})).is_err());
    }

    #[test]
    fn test_after_hook_sees_new_value() {
        let store = StateStore::new();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let s = seen.clone();
        store
            .set_after_update(Box::new(move |path, value| {
                s.write().unwrap().push((path.to_string(), value.clone()));
            }))
            .unwrap();

        store.set("a.b", json!("v"));
        let events = seen.read().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "a.b");
        assert_eq!(events[0].1, json!("v"));
    }
}

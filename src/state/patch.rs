//! Field-level diff and apply for state documents.
//!
//! [`diff`] produces the smallest ordered list of [`PatchOp`]s that turns the
//! previously emitted tree into the current one. A single restaurant appended
//! to a long list becomes one `add …/-` operation rather than a resend of the
//! whole list. [`apply`] is its inverse and is what a client mirror runs.
//!
//! The wire form follows RFC 6902 where an equivalent exists. `increment` has
//! no RFC 6902 counterpart and is only produced for integer fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One mutation record inside a `STATE_DELTA` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Set the field at `path`.
    Replace { path: String, value: Value },
    /// Append to the list at `path`, which always ends in `/-`.
    #[serde(rename = "add")]
    Append { path: String, value: Value },
    /// Add `value` to the integer at `path`.
    Increment { path: String, value: i64 },
    /// Delete the field at `path`.
    Remove { path: String },
}

impl PatchOp {
    /// JSON pointer the operation targets.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Replace { path, .. }
            | Self::Append { path, .. }
            | Self::Increment { path, .. }
            | Self::Remove { path } => path,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("invalid array index `{index}` in {path}")]
    InvalidIndex { path: String, index: String },
    #[error("cannot append to non-array at {0}")]
    NotAnArray(String),
    #[error("cannot increment non-integer at {0}")]
    NotAnInteger(String),
    #[error("integer overflow at {0}")]
    Overflow(String),
}

/// Compute the ordered operations that transform `old` into `new`.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_into(&mut ops, String::new(), old, new);
    ops
}

fn diff_into(ops: &mut Vec<PatchOp>, path: String, old: &Value, new: &Value) {
    if old == new {
        return;
    }

    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, new_child) in b {
                let child = format!("{path}/{}", escape(key));
                match a.get(key) {
                    Some(old_child) => diff_into(ops, child, old_child, new_child),
                    None => ops.push(PatchOp::Replace {
                        path: child,
                        value: new_child.clone(),
                    }),
                }
            }
            for key in a.keys().filter(|k| !b.contains_key(*k)) {
                ops.push(PatchOp::Remove {
                    path: format!("{path}/{}", escape(key)),
                });
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() < b.len() && b.starts_with(a) => {
            for item in &b[a.len()..] {
                ops.push(PatchOp::Append {
                    path: format!("{path}/-"),
                    value: item.clone(),
                });
            }
        }
        (Value::Number(a), Value::Number(b)) if !a.is_f64() && !b.is_f64() => {
            let step = a
                .as_i64()
                .zip(b.as_i64())
                .and_then(|(x, y)| y.checked_sub(x))
                .filter(|d| *d > 0);
            match step {
                Some(value) => ops.push(PatchOp::Increment { path, value }),
                None => ops.push(PatchOp::Replace {
                    path,
                    value: new.clone(),
                }),
            }
        }
        _ => ops.push(PatchOp::Replace {
            path,
            value: new.clone(),
        }),
    }
}

/// Apply `ops` to `doc` in order.
///
/// On error the document may hold the operations that preceded the failing
/// one.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> Result<(), PatchError> {
    for op in ops {
        apply_one(doc, op)?;
    }
    Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Replace { path, value } => {
            if path.is_empty() {
                *doc = value.clone();
                return Ok(());
            }
            let (parent, last) = split(path);
            match resolve(doc, parent, path)? {
                Value::Object(map) => {
                    map.insert(last, value.clone());
                }
                Value::Array(items) => {
                    let idx = index(&last, items.len(), path)?;
                    items[idx] = value.clone();
                }
                _ => return Err(PatchError::PathNotFound(path.clone())),
            }
        }
        PatchOp::Append { path, value } => {
            let list = path.strip_suffix("/-").unwrap_or(path);
            match resolve(doc, list, path)? {
                Value::Array(items) => items.push(value.clone()),
                _ => return Err(PatchError::NotAnArray(path.clone())),
            }
        }
        PatchOp::Increment { path, value } => {
            let target = resolve(doc, path, path)?;
            let current = target
                .as_i64()
                .filter(|_| !target.is_f64())
                .ok_or_else(|| PatchError::NotAnInteger(path.clone()))?;
            let next = current
                .checked_add(*value)
                .ok_or_else(|| PatchError::Overflow(path.clone()))?;
            *target = Value::from(next);
        }
        PatchOp::Remove { path } => {
            let (parent, last) = split(path);
            match resolve(doc, parent, path)? {
                Value::Object(map) => {
                    map.remove(&last)
                        .ok_or_else(|| PatchError::PathNotFound(path.clone()))?;
                }
                Value::Array(items) => {
                    let idx = index(&last, items.len(), path)?;
                    items.remove(idx);
                }
                _ => return Err(PatchError::PathNotFound(path.clone())),
            }
        }
    }
    Ok(())
}

fn resolve<'a>(doc: &'a mut Value, pointer: &str, full: &str) -> Result<&'a mut Value, PatchError> {
    doc.pointer_mut(pointer)
        .ok_or_else(|| PatchError::PathNotFound(full.to_string()))
}

fn index(token: &str, len: usize, path: &str) -> Result<usize, PatchError> {
    token
        .parse::<usize>()
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| PatchError::InvalidIndex {
            path: path.to_string(),
            index: token.to_string(),
        })
}

/// Split a pointer into its (still escaped) parent and unescaped last token.
fn split(path: &str) -> (&str, String) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], unescape(&path[pos + 1..])),
        None => ("", unescape(path)),
    }
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Build an empty object, the starting point of a client mirror.
#[must_use]
pub fn empty() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_change_is_single_replace() {
        let old = json!({ "search": { "location": "", "query": "q" } });
        let new = json!({ "search": { "location": "Chicago", "query": "q" } });

        let ops = diff(&old, &new);
        assert_eq!(
            ops,
            vec![PatchOp::Replace {
                path: "/search/location".to_string(),
                value: json!("Chicago"),
            }]
        );
    }

    #[test]
    fn test_list_growth_is_append() {
        let old = json!({ "items": [1, 2, 3, 4, 5, 6, 7, 8] });
        let new = json!({ "items": [1, 2, 3, 4, 5, 6, 7, 8, 9] });

        let ops = diff(&old, &new);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path(), "/items/-");
        assert!(matches!(ops[0], PatchOp::Append { .. }));
    }

    #[test]
    fn test_integer_span_beyond_i64_is_replaced() {
        let old = json!({ "n": i64::MIN });
        let new = json!({ "n": i64::MAX });

        let ops = diff(&old, &new);
        assert_eq!(
            ops,
            vec![PatchOp::Replace {
                path: "/n".to_string(),
                value: json!(i64::MAX),
            }]
        );

        let mut doc = old.clone();
        apply(&mut doc, &ops).unwrap();
        assert_eq!(doc, new);
    }

    #[test]
    fn test_reordered_list_is_replaced() {
        let old = json!({ "items": [1, 2] });
        let new = json!({ "items": [2, 1, 3] });

        let ops = diff(&old, &new);
        assert!(matches!(&ops[..], [PatchOp::Replace { path, .. }] if path == "/items"));
    }

    #[test]
    fn test_integer_increase_is_increment() {
        let old = json!({ "count": 2, "ratio": 0.25 });
        let new = json!({ "count": 5, "ratio": 0.5 });

        let ops = diff(&old, &new);
        assert!(ops.contains(&PatchOp::Increment {
            path: "/count".to_string(),
            value: 3,
        }));
        assert!(ops.contains(&PatchOp::Replace {
            path: "/ratio".to_string(),
            value: json!(0.5),
        }));
    }

    #[test]
    fn test_keys_are_escaped() {
        let old = json!({ "a/b": { "~x": 1 } });
        let new = json!({ "a/b": { "~x": "one" } });

        let ops = diff(&old, &new);
        assert_eq!(ops[0].path(), "/a~1b/~0x");

        let mut doc = old.clone();
        apply(&mut doc, &ops).unwrap();
        assert_eq!(doc, new);
    }

    #[test]
    fn test_apply_reconstructs_target() {
        let old = json!({
            "status": { "phase": "idle", "error": null },
            "search": { "restaurants": [], "restaurants_found": 0, "gone": true },
        });
        let new = json!({
            "status": { "phase": "found", "error": null },
            "search": {
                "restaurants": [{ "id": "rest_0" }, { "id": "rest_1" }],
                "restaurants_found": 2,
                "stage": "found",
            },
        });

        let mut doc = old.clone();
        apply(&mut doc, &diff(&old, &new)).unwrap();
        assert_eq!(doc, new);
    }

    #[test]
    fn test_wire_format() {
        let op = PatchOp::Append {
            path: "/search/restaurants/-".to_string(),
            value: json!({ "id": "rest_0" }),
        };
        let wire = serde_json::to_value(&op).unwrap();
        assert_eq!(wire["op"], "add");
        assert_eq!(wire["path"], "/search/restaurants/-");

        let back: PatchOp = serde_json::from_value(wire).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_apply_errors() {
        let mut doc = json!({ "name": "x", "list": [] });
        let err = apply(
            &mut doc,
            &[PatchOp::Increment {
                path: "/name".to_string(),
                value: 1,
            }],
        )
        .unwrap_err();
        assert_eq!(err, PatchError::NotAnInteger("/name".to_string()));

        let err = apply(
            &mut doc,
            &[PatchOp::Replace {
                path: "/missing/field".to_string(),
                value: json!(1),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::PathNotFound(_)));
    }
}

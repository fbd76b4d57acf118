//! Index keys, key ranges and key-path extraction
//!
//! Index keys are stored as order-preserving byte strings so SQLite's BLOB
//! comparison (memcmp) sorts them correctly: a one-byte type tag followed by
//! the payload. Booleans sort before numbers, numbers before strings.

use crate::error::{AppError, Result};
use serde_json::Value;
use std::ops::Bound;

const TAG_BOOL: u8 = 0x01;
const TAG_NUMBER: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;

/// A single key in a secondary index
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl IndexKey {
    /// Order-preserving byte encoding
    pub fn encode(&self) -> Vec<u8> {
        match self {
            IndexKey::Bool(b) => vec![TAG_BOOL, u8::from(*b)],
            IndexKey::Number(n) => {
                let mut out = Vec::with_capacity(9);
                out.push(TAG_NUMBER);
                out.extend_from_slice(&order_preserving_f64(*n).to_be_bytes());
                out
            }
            IndexKey::Text(s) => {
                let mut out = Vec::with_capacity(s.len() + 1);
                out.push(TAG_TEXT);
                out.extend_from_slice(s.as_bytes());
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (tag, payload) = bytes
            .split_first()
            .ok_or_else(|| AppError::Generic("Empty index key".to_string()))?;

        match *tag {
            TAG_BOOL if payload.len() == 1 => Ok(IndexKey::Bool(payload[0] != 0)),
            TAG_NUMBER => {
                let raw: [u8; 8] = payload
                    .try_into()
                    .map_err(|_| AppError::Generic("Corrupt numeric index key".to_string()))?;
                Ok(IndexKey::Number(restore_f64(u64::from_be_bytes(raw))))
            }
            TAG_TEXT => String::from_utf8(payload.to_vec())
                .map(IndexKey::Text)
                .map_err(|_| AppError::Generic("Corrupt text index key".to_string())),
            other => Err(AppError::Generic(format!("Unknown index key tag {:#04x}", other))),
        }
    }

    /// Convert a scalar JSON value into a key; null, arrays and objects are not keys
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => n.as_f64().filter(|f| !f.is_nan()).map(IndexKey::Number),
            Value::String(s) => Some(IndexKey::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<bool> for IndexKey {
    fn from(value: bool) -> Self {
        IndexKey::Bool(value)
    }
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        IndexKey::Number(value as f64)
    }
}

impl From<f64> for IndexKey {
    fn from(value: f64) -> Self {
        IndexKey::Number(value)
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        IndexKey::Text(value.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        IndexKey::Text(value)
    }
}

/// Flip the sign bit for positives and every bit for negatives so the
/// big-endian bytes sort like the numbers do
fn order_preserving_f64(n: f64) -> u64 {
    // -0.0 and 0.0 are the same key
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

fn restore_f64(encoded: u64) -> f64 {
    let bits = if encoded & (1 << 63) != 0 {
        encoded ^ (1 << 63)
    } else {
        !encoded
    };
    f64::from_bits(bits)
}

/// Inclusive/exclusive bounds over index keys
#[derive(Debug, Clone)]
pub struct KeyRange {
    pub lower: Bound<IndexKey>,
    pub upper: Bound<IndexKey>,
}

impl KeyRange {
    /// Every key
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Exactly one key
    pub fn only(key: impl Into<IndexKey>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Both ends inclusive
    pub fn bound(lower: impl Into<IndexKey>, upper: impl Into<IndexKey>) -> Self {
        Self {
            lower: Bound::Included(lower.into()),
            upper: Bound::Included(upper.into()),
        }
    }

    pub fn lower_bound(lower: impl Into<IndexKey>, open: bool) -> Self {
        let lower = lower.into();
        Self {
            lower: if open {
                Bound::Excluded(lower)
            } else {
                Bound::Included(lower)
            },
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound(upper: impl Into<IndexKey>, open: bool) -> Self {
        let upper = upper.into();
        Self {
            lower: Bound::Unbounded,
            upper: if open {
                Bound::Excluded(upper)
            } else {
                Bound::Included(upper)
            },
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(
            (&self.lower, &self.upper),
            (Bound::Unbounded, Bound::Unbounded)
        )
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Iteration order of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// Walk a dotted key path (`attachments.id`) through a JSON value.
///
/// Arrays met before the last segment are flattened, so one record can
/// yield several values.
pub fn resolve_path<'a>(value: &'a Value, key_path: &str) -> Vec<&'a Value> {
    let mut current = vec![value];

    for segment in key_path.split('.') {
        let mut next = Vec::new();
        for v in current {
            match v {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(child) = item.as_object().and_then(|m| m.get(segment)) {
                            next.push(child);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    current
}

/// Compute the index keys a record contributes to one index.
///
/// A multi-entry index yields one key per distinct array element; a plain
/// index yields at most one key and ignores array values.
pub fn extract_keys(value: &Value, key_path: &str, multi_entry: bool) -> Vec<IndexKey> {
    let resolved = resolve_path(value, key_path);
    let fanned_out = key_path.contains('.') && resolved.len() > 1;

    let mut keys: Vec<IndexKey> = Vec::new();
    for v in resolved {
        match v {
            Value::Array(items) if multi_entry => {
                for item in items {
                    if let Some(k) = IndexKey::from_json(item) {
                        push_unique(&mut keys, k);
                    }
                }
            }
            Value::Array(_) => {}
            scalar => {
                if let Some(k) = IndexKey::from_json(scalar) {
                    push_unique(&mut keys, k);
                }
            }
        }
    }

    if !multi_entry && (fanned_out || keys.len() > 1) {
        return Vec::new();
    }
    keys
}

fn push_unique(keys: &mut Vec<IndexKey>, key: IndexKey) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_sort_by_value() {
        let mut keys = vec![
            IndexKey::from(10.5),
            IndexKey::from(-3.0),
            IndexKey::from(0i64),
            IndexKey::from(1_700_000_000_000i64),
            IndexKey::from(-1_000_000.0),
        ];
        keys.sort_by(|a, b| a.encode().cmp(&b.encode()));

        let values: Vec<f64> = keys
            .iter()
            .map(|k| match k {
                IndexKey::Number(n) => *n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![-1_000_000.0, -3.0, 0.0, 10.5, 1_700_000_000_000.0]);
    }

    #[test]
    fn test_type_order() {
        let b = IndexKey::Bool(true).encode();
        let n = IndexKey::Number(-5.0).encode();
        let s = IndexKey::Text(String::new()).encode();
        assert!(b < n);
        assert!(n < s);
        assert!(IndexKey::Bool(false).encode() < b);
    }

    #[test]
    fn test_decode_restores_key() {
        for key in [
            IndexKey::Bool(false),
            IndexKey::Number(-42.25),
            IndexKey::Number(1_712_000_000_000.0),
            IndexKey::Text("reflektion".to_string()),
        ] {
            assert_eq!(IndexKey::decode(&key.encode()).unwrap(), key);
        }
        assert!(IndexKey::decode(&[]).is_err());
        assert!(IndexKey::decode(&[0x09, 1]).is_err());
    }

    #[test]
    fn test_extract_multi_entry_dedups() {
        let entry = json!({"tags": ["sorg", "projekt", "sorg"]});
        let keys = extract_keys(&entry, "tags", true);
        assert_eq!(keys, vec![IndexKey::from("sorg"), IndexKey::from("projekt")]);

        // The same field on a plain index is not indexable
        assert!(extract_keys(&entry, "tags", false).is_empty());
    }

    #[test]
    fn test_extract_nested_path() {
        let entry = json!({
            "attachments": [
                {"id": "a1", "mime": "image/png"},
                {"id": "a2", "mime": "audio/ogg"},
                {"mime": "text/plain"}
            ]
        });
        let keys = extract_keys(&entry, "attachments.id", true);
        assert_eq!(keys, vec![IndexKey::from("a1"), IndexKey::from("a2")]);
    }

    #[test]
    fn test_missing_and_null_are_not_indexed() {
        assert!(extract_keys(&json!({"category": null}), "category", false).is_empty());
        assert!(extract_keys(&json!({}), "category", false).is_empty());
        assert_eq!(
            extract_keys(&json!({"isFavorite": true}), "isFavorite", false),
            vec![IndexKey::Bool(true)]
        );
    }
}

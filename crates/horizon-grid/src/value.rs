//! Cell values and row payload access.
//!
//! The row model never interprets application rows directly. It asks them for
//! field values through [`RowData`] and works with the resulting [`CellValue`]s
//! when grouping, filtering, sorting and aggregating.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell value.
///
/// # Example
///
/// ```
/// use horizon_grid::CellValue;
///
/// let value = CellValue::from(42);
/// assert_eq!(value.as_f64(), Some(42.0));
/// assert_eq!(CellValue::Null.key_string(), "");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// No value.
    #[default]
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A string value.
    String(String),
}

impl CellValue {
    /// Returns `true` if this is `CellValue::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Returns `true` for null and empty strings.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Attempts to get the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Attempts to get the value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of the value. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(n) => Some(*n as f64),
            CellValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns `true` for `Int` and `Float`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, CellValue::Int(_) | CellValue::Float(_))
    }

    /// The stringified form used as a group key.
    ///
    /// Null maps to the blank key `""` so that rows without a value form
    /// their own group instead of being dropped.
    pub fn key_string(&self) -> String {
        self.to_string()
    }

    /// Total ordering between two non-null values.
    ///
    /// Numbers compare numerically with NaN after every other number,
    /// strings lexically, booleans `false < true`. Values of different kinds
    /// order by kind so that mixed columns still sort deterministically.
    pub fn compare(&self, other: &CellValue) -> Ordering {
        match (self, other) {
            (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                }
            }
            (CellValue::String(a), CellValue::String(b)) => a.cmp(b),
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Bool(_) => 1,
            CellValue::Int(_) | CellValue::Float(_) => 2,
            CellValue::String(_) => 3,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Int(n) => write!(f, "{n}"),
            CellValue::Float(n) => write!(f, "{n}"),
            CellValue::String(s) => f.write_str(s),
        }
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Int(n)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Int(n as i64)
    }
}

impl From<usize> for CellValue {
    fn from(n: usize) -> Self {
        CellValue::Int(n as i64)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Float(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(CellValue::Null)
    }
}

impl From<&serde_json::Value> for CellValue {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Int(i),
                None => n.as_f64().map(CellValue::Float).unwrap_or_default(),
            },
            serde_json::Value::String(s) => CellValue::String(s.clone()),
            other => CellValue::String(other.to_string()),
        }
    }
}

impl From<CellValue> for serde_json::Value {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(b),
            CellValue::Int(i) => serde_json::Value::from(i),
            CellValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::String(s) => serde_json::Value::String(s),
        }
    }
}

/// Access to the fields of an application row.
///
/// Implement this for your row type, or use one of the provided
/// implementations for JSON objects and maps.
pub trait RowData: Send + Sync + 'static {
    /// Returns the value of `field`, or `CellValue::Null` when absent.
    fn value(&self, field: &str) -> CellValue;

    /// Write `value` into `field`. Returns `false` when the row type does
    /// not support editing that field.
    fn set_value(&mut self, field: &str, value: CellValue) -> bool {
        let _ = (field, value);
        false
    }
}

impl RowData for serde_json::Value {
    fn value(&self, field: &str) -> CellValue {
        self.get(field).map(CellValue::from).unwrap_or_default()
    }

    fn set_value(&mut self, field: &str, value: CellValue) -> bool {
        let Some(object) = self.as_object_mut() else {
            return false;
        };
        object.insert(field.to_string(), serde_json::Value::from(value));
        true
    }
}

impl RowData for HashMap<String, CellValue> {
    fn value(&self, field: &str) -> CellValue {
        self.get(field).cloned().unwrap_or_default()
    }

    fn set_value(&mut self, field: &str, value: CellValue) -> bool {
        self.insert(field.to_string(), value);
        true
    }
}

impl RowData for BTreeMap<String, CellValue> {
    fn value(&self, field: &str) -> CellValue {
        self.get(field).cloned().unwrap_or_default()
    }

    fn set_value(&mut self, field: &str, value: CellValue) -> bool {
        self.insert(field.to_string(), value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_string() {
        assert_eq!(CellValue::Null.key_string(), "");
        assert_eq!(CellValue::from("US").key_string(), "US");
        assert_eq!(CellValue::from(2000).key_string(), "2000");
        assert_eq!(CellValue::from(1.0).key_string(), "1");
    }

    #[test]
    fn test_compare_mixed_numbers() {
        assert_eq!(CellValue::from(2).compare(&CellValue::from(2.5)), Ordering::Less);
        assert_eq!(CellValue::from(3.0).compare(&CellValue::from(3)), Ordering::Equal);
        assert_eq!(
            CellValue::from("b").compare(&CellValue::from("a")),
            Ordering::Greater
        );
        // numbers before strings
        assert_eq!(CellValue::from(9).compare(&CellValue::from("1")), Ordering::Less);
    }

    #[test]
    fn test_compare_nan_sorts_after_numbers() {
        let nan = CellValue::Float(f64::NAN);
        assert_eq!(nan.compare(&CellValue::from(f64::INFINITY)), Ordering::Greater);
        assert_eq!(CellValue::from(i64::MAX).compare(&nan), Ordering::Less);
        assert_eq!(nan.compare(&CellValue::Float(f64::NAN)), Ordering::Equal);

        let mut values: Vec<CellValue> = (0..60)
            .map(|i| if i % 3 == 0 { CellValue::Float(f64::NAN) } else { CellValue::Int(60 - i) })
            .collect();
        values.sort_by(|a, b| a.compare(b));
        assert!(values[..40].windows(2).all(|w| w[0].compare(&w[1]).is_le()));
        assert!(values[40..].iter().all(|v| v.as_f64().is_some_and(f64::is_nan)));
    }

    #[test]
    fn test_json_row_data() {
        let row = json!({ "country": "US", "gold": 3, "price": 1.5, "flag": true });
        assert_eq!(row.value("country"), CellValue::from("US"));
        assert_eq!(row.value("gold"), CellValue::Int(3));
        assert_eq!(row.value("price"), CellValue::Float(1.5));
        assert_eq!(row.value("flag"), CellValue::Bool(true));
        assert_eq!(row.value("missing"), CellValue::Null);
    }

    #[test]
    fn test_untagged_serde() {
        let values: Vec<CellValue> = serde_json::from_str(r#"[null, true, 1, 1.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Int(1),
                CellValue::Float(1.5),
                CellValue::from("x"),
            ]
        );
    }

    #[test]
    fn test_set_value() {
        let mut row = json!({ "gold": 1 });
        assert!(row.set_value("gold", CellValue::Int(5)));
        assert_eq!(row.value("gold"), CellValue::Int(5));

        let mut scalar = json!(3);
        assert!(!scalar.set_value("gold", CellValue::Int(5)));
    }

    #[test]
    fn test_blank() {
        assert!(CellValue::Null.is_blank());
        assert!(CellValue::from("  ").is_blank());
        assert!(!CellValue::from(0).is_blank());
    }
}

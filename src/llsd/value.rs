//! The LLSD value tree.

use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Insertion-ordered map of string keys to LLSD values.
pub type LlsdMap = IndexMap<String, LlsdValue>;

/// A self-describing structured value.
///
/// The tree is owned all the way down, so `Clone` is a deep copy and `==`
/// compares structure. Maps keep insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LlsdValue {
    #[default]
    Undef,
    Boolean(bool),
    Integer(i32),
    Real(f64),
    String(String),
    Array(Vec<LlsdValue>),
    Map(LlsdMap),
}

impl LlsdValue {
    /// Empty map value.
    pub fn map() -> Self {
        LlsdValue::Map(LlsdMap::new())
    }

    /// Name of the variant as used by the XML wire format.
    pub fn kind(&self) -> &'static str {
        match self {
            LlsdValue::Undef => "undef",
            LlsdValue::Boolean(_) => "boolean",
            LlsdValue::Integer(_) => "integer",
            LlsdValue::Real(_) => "real",
            LlsdValue::String(_) => "string",
            LlsdValue::Array(_) => "array",
            LlsdValue::Map(_) => "map",
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, LlsdValue::Undef)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LlsdValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            LlsdValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            LlsdValue::Real(r) => Some(*r),
            LlsdValue::Integer(i) => Some(f64::from(*i)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LlsdValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<LlsdValue>> {
        match self {
            LlsdValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<LlsdValue>> {
        match self {
            LlsdValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&LlsdMap> {
        match self {
            LlsdValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut LlsdMap> {
        match self {
            LlsdValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Boolean view that also accepts the textual forms `true`/`false`
    /// (case-insensitive, surrounding whitespace ignored).
    ///
    /// Grid services advertise every extra feature as a string, so flags
    /// arrive as `"True"` or `"false"` rather than as LLSD booleans.
    pub fn as_boolean_lenient(&self) -> Option<bool> {
        match self {
            LlsdValue::Boolean(b) => Some(*b),
            LlsdValue::String(s) => parse_bool_text(s),
            _ => None,
        }
    }

    /// Checks that the value survives an exact wire round-trip.
    ///
    /// Non-finite reals are the only representable values that do not: NaN
    /// never compares equal to itself. The error names the offending path.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.validate_at(&mut Vec::new())
    }

    fn validate_at(&self, path: &mut Vec<String>) -> std::result::Result<(), String> {
        match self {
            LlsdValue::Real(r) if !r.is_finite() => Err(if path.is_empty() {
                format!("non-finite real {}", r)
            } else {
                format!("non-finite real {} at {}", r, path.join("."))
            }),
            LlsdValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    path.push(format!("[{}]", i));
                    item.validate_at(path)?;
                    path.pop();
                }
                Ok(())
            }
            LlsdValue::Map(map) => {
                for (k, v) in map {
                    path.push(k.clone());
                    v.validate_at(path)?;
                    path.pop();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

pub(crate) fn parse_bool_text(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

impl From<bool> for LlsdValue {
    fn from(b: bool) -> Self {
        LlsdValue::Boolean(b)
    }
}

impl From<i32> for LlsdValue {
    fn from(i: i32) -> Self {
        LlsdValue::Integer(i)
    }
}

impl From<f64> for LlsdValue {
    fn from(r: f64) -> Self {
        LlsdValue::Real(r)
    }
}

impl From<&str> for LlsdValue {
    fn from(s: &str) -> Self {
        LlsdValue::String(s.to_string())
    }
}

impl From<String> for LlsdValue {
    fn from(s: String) -> Self {
        LlsdValue::String(s)
    }
}

impl From<Vec<LlsdValue>> for LlsdValue {
    fn from(items: Vec<LlsdValue>) -> Self {
        LlsdValue::Array(items)
    }
}

impl From<LlsdMap> for LlsdValue {
    fn from(map: LlsdMap) -> Self {
        LlsdValue::Map(map)
    }
}

impl<K: Into<String>, V: Into<LlsdValue>> FromIterator<(K, V)> for LlsdValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        LlsdValue::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// JSON interop: null/bool/number/string/array/object, untagged.

impl Serialize for LlsdValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            LlsdValue::Undef => serializer.serialize_unit(),
            LlsdValue::Boolean(b) => serializer.serialize_bool(*b),
            LlsdValue::Integer(i) => serializer.serialize_i32(*i),
            LlsdValue::Real(r) => serializer.serialize_f64(*r),
            LlsdValue::String(s) => serializer.serialize_str(s),
            LlsdValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            LlsdValue::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}

struct LlsdVisitor;

impl<'de> Visitor<'de> for LlsdVisitor {
    type Value = LlsdValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an LLSD-compatible value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<LlsdValue, E> {
        Ok(LlsdValue::Undef)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<LlsdValue, E> {
        Ok(LlsdValue::Undef)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<LlsdValue, D::Error> {
        LlsdValue::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> std::result::Result<LlsdValue, E> {
        Ok(LlsdValue::Boolean(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> std::result::Result<LlsdValue, E> {
        // Integers outside the 32-bit wire range degrade to reals.
        Ok(i32::try_from(i)
            .map(LlsdValue::Integer)
            .unwrap_or(LlsdValue::Real(i as f64)))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> std::result::Result<LlsdValue, E> {
        Ok(i32::try_from(u)
            .map(LlsdValue::Integer)
            .unwrap_or(LlsdValue::Real(u as f64)))
    }

    fn visit_f64<E: de::Error>(self, r: f64) -> std::result::Result<LlsdValue, E> {
        Ok(LlsdValue::Real(r))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> std::result::Result<LlsdValue, E> {
        Ok(LlsdValue::String(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> std::result::Result<LlsdValue, E> {
        Ok(LlsdValue::String(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<LlsdValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(LlsdValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut access: A,
    ) -> std::result::Result<LlsdValue, A::Error> {
        let mut map = LlsdMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((k, v)) = access.next_entry::<String, LlsdValue>()? {
            map.insert(k, v);
        }
        Ok(LlsdValue::Map(map))
    }
}

impl<'de> Deserialize<'de> for LlsdValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(LlsdVisitor)
    }
}

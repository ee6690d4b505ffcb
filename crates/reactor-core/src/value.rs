//! Firestore typed values and documents in their REST JSON form.
//!
//! Every field in a Firestore document is wrapped in a single-key object naming
//! its type, e.g. `{"stringValue": "Hi"}` or `{"integerValue": "42"}`. The same
//! encoding is used by the REST API and by Cloud Functions trigger payloads, so
//! both the store client and the event handler decode through these types.

use std::collections::BTreeMap;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Field map of a document.
pub type Fields = BTreeMap<String, FieldValue>;

/// A single Firestore value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    /// int64, carried as a decimal string on the wire.
    Integer(i64),
    /// Non-finite values travel as `"NaN"`, `"Infinity"` or `"-Infinity"`.
    Double(f64),
    /// RFC 3339 timestamp, kept verbatim.
    Timestamp(String),
    String(String),
    /// Base64-encoded bytes, kept verbatim.
    Bytes(String),
    Reference(String),
    GeoPoint(LatLng),
    Array(Vec<FieldValue>),
    Map(Fields),
    /// A value type this crate does not model, e.g. `vectorValue`; kept as received.
    Other {
        kind: String,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            FieldValue::Null => map.serialize_entry("nullValue", &())?,
            FieldValue::Boolean(b) => map.serialize_entry("booleanValue", b)?,
            FieldValue::Integer(i) => map.serialize_entry("integerValue", &i.to_string())?,
            FieldValue::Double(d) if d.is_nan() => map.serialize_entry("doubleValue", "NaN")?,
            FieldValue::Double(d) if d.is_infinite() => {
                let text = if *d > 0.0 { "Infinity" } else { "-Infinity" };
                map.serialize_entry("doubleValue", text)?
            }
            FieldValue::Double(d) => map.serialize_entry("doubleValue", d)?,
            FieldValue::Timestamp(t) => map.serialize_entry("timestampValue", t)?,
            FieldValue::String(s) => map.serialize_entry("stringValue", s)?,
            FieldValue::Bytes(b) => map.serialize_entry("bytesValue", b)?,
            FieldValue::Reference(r) => map.serialize_entry("referenceValue", r)?,
            FieldValue::GeoPoint(p) => map.serialize_entry("geoPointValue", p)?,
            FieldValue::Array(values) => {
                map.serialize_entry("arrayValue", &array::Wire { values: values.clone() })?
            }
            FieldValue::Map(fields) => {
                map.serialize_entry("mapValue", &map::Wire { fields: fields.clone() })?
            }
            FieldValue::Other { kind, value } => map.serialize_entry(kind, value)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(FieldValueVisitor)
    }
}

struct FieldValueVisitor;

impl<'de> Visitor<'de> for FieldValueVisitor {
    type Value = FieldValue;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a single-key Firestore value object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<FieldValue, A::Error> {
        let Some(kind) = map.next_key::<String>()? else {
            return Err(de::Error::custom("empty value object"));
        };
        let value = match kind.as_str() {
            "nullValue" => {
                map.next_value::<IgnoredAny>()?;
                FieldValue::Null
            }
            "booleanValue" => FieldValue::Boolean(map.next_value()?),
            "integerValue" => FieldValue::Integer(map.next_value::<int64::Int64>()?.0),
            "doubleValue" => FieldValue::Double(map.next_value::<float64::Float64>()?.0),
            "timestampValue" => FieldValue::Timestamp(map.next_value()?),
            "stringValue" => FieldValue::String(map.next_value()?),
            "bytesValue" => FieldValue::Bytes(map.next_value()?),
            "referenceValue" => FieldValue::Reference(map.next_value()?),
            "geoPointValue" => FieldValue::GeoPoint(map.next_value()?),
            "arrayValue" => FieldValue::Array(map.next_value::<array::Wire>()?.values),
            "mapValue" => FieldValue::Map(map.next_value::<map::Wire>()?.fields),
            _ => {
                let value = map.next_value()?;
                FieldValue::Other { kind, value }
            }
        };
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(value)
    }
}

/// A Firestore document as returned by the REST API and embedded in trigger payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name: `projects/{p}/databases/{d}/documents/{collection}/{id}`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

mod int64 {
    use serde::de::{self, Deserialize, Deserializer, Visitor};

    pub(super) struct Int64(pub i64);

    impl<'de> Deserialize<'de> for Int64 {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(Int64Visitor)
        }
    }

    struct Int64Visitor;

    impl<'de> Visitor<'de> for Int64Visitor {
        type Value = Int64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("an int64 as a decimal string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Int64, E> {
            v.parse().map(Int64).map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Int64, E> {
            Ok(Int64(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Int64, E> {
            i64::try_from(v).map(Int64).map_err(E::custom)
        }
    }
}

mod float64 {
    use serde::de::{self, Deserialize, Deserializer, Visitor};

    pub(super) struct Float64(pub f64);

    impl<'de> Deserialize<'de> for Float64 {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(Float64Visitor)
        }
    }

    struct Float64Visitor;

    impl<'de> Visitor<'de> for Float64Visitor {
        type Value = Float64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a double as a number, \"NaN\", \"Infinity\" or \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Float64, E> {
            Ok(Float64(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Float64, E> {
            Ok(Float64(v as f64))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Float64, E> {
            Ok(Float64(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Float64, E> {
            match v {
                "NaN" => Ok(Float64(f64::NAN)),
                "Infinity" => Ok(Float64(f64::INFINITY)),
                "-Infinity" => Ok(Float64(f64::NEG_INFINITY)),
                _ => v.parse().map(Float64).map_err(E::custom),
            }
        }
    }
}

mod array {
    use super::*;

    #[derive(Serialize, Deserialize)]
    pub(super) struct Wire {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub values: Vec<FieldValue>,
    }
}

mod map {
    use super::*;

    #[derive(Serialize, Deserialize)]
    pub(super) struct Wire {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        pub fields: Fields,
    }
}

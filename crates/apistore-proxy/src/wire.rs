//! Serde adapters for the etcd JSON gateway encoding.
//!
//! The gateway carries bytes as standard base64 strings and 64-bit integers
//! as decimal strings. Integers are accepted in either form on input.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serializer};

pub(crate) mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}

pub(crate) mod b64_opt {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(encoded) => STANDARD.decode(encoded).map(Some).map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

pub(crate) mod int64 {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "super::b64")]
        key: Vec<u8>,
        #[serde(with = "super::int64")]
        revision: i64,
        #[serde(default, with = "super::b64_opt", skip_serializing_if = "Option::is_none")]
        range_end: Option<Vec<u8>>,
    }

    #[test]
    fn gateway_encoding() {
        let sample = Sample {
            key: b"/registry/tigers".to_vec(),
            revision: 42,
            range_end: None,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["key"], "L3JlZ2lzdHJ5L3RpZ2Vycw==");
        assert_eq!(json["revision"], "42");
        assert!(json.get("range_end").is_none());
    }

    #[test]
    fn integers_accepted_as_numbers_or_strings() {
        let a: Sample = serde_json::from_str(r#"{"key":"YQ==","revision":7}"#).unwrap();
        let b: Sample = serde_json::from_str(r#"{"key":"YQ==","revision":"7","range_end":"Yg=="}"#).unwrap();
        assert_eq!(a.revision, 7);
        assert_eq!(b.revision, 7);
        assert_eq!(b.range_end.as_deref(), Some(&b"b"[..]));
    }

    #[test]
    fn bad_base64_rejected() {
        assert!(serde_json::from_str::<Sample>(r#"{"key":"***","revision":1}"#).is_err());
    }
}

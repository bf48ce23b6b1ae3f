//! The provider's response wrapper and lenient field decoding.
//!
//! Every endpoint answers `{Status, Msg, Code, Encrypt, Rnd, Data}`. `Data`
//! (sometimes spelled `data`) is ciphertext when `Encrypt` is set, and
//! otherwise either a JSON document encoded as a string or inline JSON.
//! Numeric fields arrive as numbers or numeric strings depending on the
//! endpoint, so the deserializers below accept both.

use super::ProcessError;
use crate::codec;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Status", default)]
    pub status: bool,
    #[serde(rename = "Msg", default, deserialize_with = "lenient_string")]
    pub msg: String,
    #[serde(rename = "Code", default, deserialize_with = "lenient_i64")]
    pub code: i64,
    #[serde(rename = "Encrypt", default)]
    pub encrypt: bool,
    #[serde(rename = "Rnd", default, deserialize_with = "lenient_string")]
    pub rnd: String,
    #[serde(rename = "Data", alias = "data", default)]
    pub data: Value,
}

impl Envelope {
    pub fn parse(raw: &str) -> Result<Self, ProcessError> {
        serde_json::from_str(raw).map_err(|e| ProcessError::payload("envelope", e))
    }

    /// Fails when the provider reported an error.
    pub fn check(&self) -> Result<(), ProcessError> {
        if self.status {
            Ok(())
        } else {
            Err(ProcessError::Envelope {
                code: self.code,
                msg: self.msg.clone(),
            })
        }
    }

    /// The decoded business payload; `None` when `Data` is null or empty.
    pub fn payload(&self) -> Result<Option<Value>, ProcessError> {
        let text = match &self.data {
            Value::Null => return Ok(None),
            Value::String(s) => s.as_str(),
            inline if !self.encrypt => return Ok(Some(inline.clone())),
            _ => {
                return Err(ProcessError::Payload(
                    "encrypted Data is not a string".to_string(),
                ))
            }
        };

        if self.encrypt {
            if text.is_empty() {
                return Err(ProcessError::Payload("encrypted Data is empty".to_string()));
            }
            let plain = codec::decode(text, &self.rnd)?;
            return serde_json::from_str(&plain)
                .map(Some)
                .map_err(|e| ProcessError::payload("decrypted Data", e));
        }

        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(text)
            .map(Some)
            .map_err(|e| ProcessError::payload("Data", e))
    }

    /// [`payload`](Self::payload) decoded into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<Option<T>, ProcessError> {
        match self.payload()? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ProcessError::payload("Data", e)),
        }
    }
}

fn number_from_str<T: std::str::FromStr>(s: &str) -> Option<T> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// Integer from a number, a numeric string, or null (zero).
pub fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| de::Error::custom(format!("not an integer: {n}"))),
        Value::String(s) => Ok(number_from_str::<i64>(&s)
            .or_else(|| number_from_str::<f64>(&s).map(|f| f as i64))
            .unwrap_or(0)),
        Value::Bool(b) => Ok(i64::from(b)),
        other => Err(de::Error::custom(format!("expected integer, got {other}"))),
    }
}

/// Float from a number, a numeric string, or null (zero).
pub fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(0.0),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Ok(number_from_str::<f64>(&s).unwrap_or(0.0)),
        other => Err(de::Error::custom(format!("expected number, got {other}"))),
    }
}

/// String from a string, a number, or null (empty).
pub fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(de::Error::custom(format!("expected string, got {other}"))),
    }
}

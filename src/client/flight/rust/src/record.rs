/* src/client/flight/rust/src/record.rs */

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde_json::Value;

use crate::errors::FlightStreamError;

/// One framed record pushed by an inline server script.
#[derive(Debug, Clone, PartialEq)]
pub enum FlightRecord {
  /// `[0]`: starts a fresh buffer.
  Bootstrap,
  /// `[1, text]`: a text fragment of the payload.
  Text(String),
  /// `[2, formState]`: progressive-enhancement form state, kept out of the payload.
  FormState(Value),
  /// `[3, base64]`: a binary fragment of the payload.
  Binary(Bytes),
}

impl FlightRecord {
  pub fn parse(raw: &str) -> Result<Self, FlightStreamError> {
    let value: Value = serde_json::from_str(raw)?;
    Self::from_value(&value)
  }

  pub fn from_value(value: &Value) -> Result<Self, FlightStreamError> {
    let items = value
      .as_array()
      .ok_or_else(|| FlightStreamError::MalformedRecord(format!("expected array, got {value}")))?;
    let tag = items
      .first()
      .and_then(Value::as_u64)
      .ok_or_else(|| FlightStreamError::MalformedRecord("missing record tag".to_string()))?;

    match (tag, items.get(1)) {
      (0, _) => Ok(Self::Bootstrap),
      (1, Some(Value::String(text))) => Ok(Self::Text(text.clone())),
      (2, Some(form)) => Ok(Self::FormState(form.clone())),
      (3, Some(Value::String(encoded))) => Ok(Self::Binary(Bytes::from(STANDARD.decode(encoded)?))),
      (1 | 3, _) => {
        Err(FlightStreamError::MalformedRecord(format!("record {tag} expects a string payload")))
      }
      (2, None) => Err(FlightStreamError::MalformedRecord("record 2 expects a payload".to_string())),
      _ => Err(FlightStreamError::MalformedRecord(format!("unknown record tag {tag}"))),
    }
  }

  /// Payload bytes for data records; `None` for control records.
  pub fn into_chunk(self) -> Option<Bytes> {
    match self {
      Self::Text(text) => Some(Bytes::from(text)),
      Self::Binary(bytes) => Some(bytes),
      Self::Bootstrap | Self::FormState(_) => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn parses_every_record_kind() {
    assert_eq!(FlightRecord::parse("[0]").unwrap(), FlightRecord::Bootstrap);
    assert_eq!(FlightRecord::parse(r#"[1,"0:{}"]"#).unwrap(), FlightRecord::Text("0:{}".into()));
    assert_eq!(
      FlightRecord::parse(r#"[2,{"action":"save"}]"#).unwrap(),
      FlightRecord::FormState(json!({"action": "save"}))
    );
    // "aGk=" is base64 for "hi"
    assert_eq!(
      FlightRecord::parse(r#"[3,"aGk="]"#).unwrap(),
      FlightRecord::Binary(Bytes::from_static(b"hi"))
    );
  }

  #[test]
  fn rejects_unknown_tag() {
    let err = FlightRecord::parse("[9]").unwrap_err();
    assert!(err.to_string().contains("unknown record tag 9"));
  }

  #[test]
  fn rejects_non_string_text() {
    assert!(FlightRecord::from_value(&json!([1, 42])).is_err());
  }

  #[test]
  fn rejects_bad_base64() {
    assert!(matches!(FlightRecord::parse(r#"[3,"***"]"#), Err(FlightStreamError::Base64(_))));
  }

  #[test]
  fn control_records_have_no_chunk() {
    assert!(FlightRecord::Bootstrap.into_chunk().is_none());
    assert!(FlightRecord::FormState(json!(null)).into_chunk().is_none());
    assert_eq!(FlightRecord::Text("ab".into()).into_chunk(), Some(Bytes::from_static(b"ab")));
  }
}

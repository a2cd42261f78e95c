/* src/client/flight/rust/src/errors.rs */

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlightStreamError {
  /// A data record arrived before the `[0]` bootstrap record.
  #[error("unexpected server data: missing bootstrap record")]
  MissingBootstrap,
  #[error("a reader is already registered for this stream")]
  ReaderAlreadyRegistered,
  #[error("malformed flight record: {0}")]
  MalformedRecord(String),
  #[error("malformed flight row: {0}")]
  MalformedRow(String),
  #[error("invalid base64 chunk: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("invalid json: {0}")]
  Json(#[from] serde_json::Error),
}

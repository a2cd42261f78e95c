/* src/client/router/rust/src/errors.rs */

use std::fmt;

use seam_flight::FlightStreamError;
use thiserror::Error;

/// Recoverable problems with data crossing into the router.
#[derive(Debug, Error)]
pub enum RouterError {
  #[error("malformed segment: {0}")]
  MalformedSegment(String),
  #[error("malformed router state: {0}")]
  MalformedRouterState(String),
  #[error("malformed flight data: {0}")]
  MalformedFlightData(String),
  #[error("malformed flight response: {0}")]
  MalformedResponse(String),
  #[error("invalid router config: {0}")]
  Config(String),
  #[error(transparent)]
  Stream(#[from] FlightStreamError),
  #[error("invalid url: {0}")]
  Url(#[from] url::ParseError),
  #[error("invalid json: {0}")]
  Json(#[from] serde_json::Error),
}

/// Opaque failure reported by the network boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
  message: String,
  status: Option<u16>,
}

impl FetchError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into(), status: None }
  }

  pub fn with_status(status: u16, message: impl Into<String>) -> Self {
    Self { message: message.into(), status: Some(status) }
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn status(&self) -> Option<u16> {
    self.status
  }
}

impl fmt::Display for FetchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.status {
      Some(status) => write!(f, "{status}: {}", self.message),
      None => f.write_str(&self.message),
    }
  }
}

impl std::error::Error for FetchError {}

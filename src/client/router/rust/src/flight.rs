/* src/client/router/rust/src/flight.rs */

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use seam_flight::{Row, RowDecoder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::cache_node::Rsc;
use crate::errors::RouterError;
use crate::router_state::FlightRouterState;
use crate::segment::{Segment, SegmentPath, parse_segment_path, segment_path_to_values};

/// Trailing `[tree, seedData, head, isHeadPartial]` of every raw flight path.
const FLIGHT_DATA_PATH_TRAILER: usize = 4;

/// Server-rendered content for a subtree: `[rsc, {slot: seed}, loading, isPartial?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedData {
  pub rsc: Option<Rsc>,
  pub parallel_routes: BTreeMap<String, SeedData>,
  pub loading: Option<Rsc>,
  /// Dynamic holes remain below this node.
  pub is_partial: bool,
}

fn payload(value: &Value) -> Option<Rsc> {
  if value.is_null() { None } else { Some(Arc::new(value.clone())) }
}

fn payload_value(rsc: Option<&Rsc>) -> Value {
  rsc.map_or(Value::Null, |v| (**v).clone())
}

impl SeedData {
  pub fn new(rsc: Value) -> Self {
    Self { rsc: payload(&rsc), parallel_routes: BTreeMap::new(), loading: None, is_partial: false }
  }

  pub fn with_child(mut self, slot: impl Into<String>, child: SeedData) -> Self {
    self.parallel_routes.insert(slot.into(), child);
    self
  }

  pub fn with_loading(mut self, loading: Value) -> Self {
    self.loading = payload(&loading);
    self
  }

  pub fn from_value(value: &Value) -> Result<Self, RouterError> {
    let items = value
      .as_array()
      .filter(|items| items.len() >= 3)
      .ok_or_else(|| RouterError::MalformedFlightData(format!("expected seed data tuple, got {value}")))?;
    let routes = items[1]
      .as_object()
      .ok_or_else(|| RouterError::MalformedFlightData("seed parallel routes must be an object".to_string()))?;
    let mut parallel_routes = BTreeMap::new();
    for (slot, child) in routes {
      if !child.is_null() {
        parallel_routes.insert(slot.clone(), Self::from_value(child)?);
      }
    }
    Ok(Self {
      rsc: payload(&items[0]),
      parallel_routes,
      loading: payload(&items[2]),
      is_partial: items.get(3).and_then(Value::as_bool).unwrap_or(false),
    })
  }

  pub fn to_value(&self) -> Value {
    let routes: Map<String, Value> =
      self.parallel_routes.iter().map(|(slot, seed)| (slot.clone(), seed.to_value())).collect();
    let mut items =
      vec![payload_value(self.rsc.as_ref()), Value::Object(routes), payload_value(self.loading.as_ref())];
    if self.is_partial {
      items.push(Value::Bool(true));
    }
    Value::Array(items)
  }
}

/// One positionally addressed server update.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFlightData {
  /// `segment_path` without its terminal step.
  pub path_to_segment: SegmentPath,
  /// Terminal segment; the root segment for root renders.
  pub segment: Segment,
  pub segment_path: SegmentPath,
  pub tree: FlightRouterState,
  pub seed_data: Option<SeedData>,
  pub head: Option<Rsc>,
  pub is_head_partial: bool,
  pub is_root_render: bool,
}

impl NormalizedFlightData {
  pub fn to_path_values(&self) -> Vec<Value> {
    let mut values = segment_path_to_values(&self.segment_path);
    values.push(self.tree.to_value());
    values.push(self.seed_data.as_ref().map_or(Value::Null, SeedData::to_value));
    values.push(payload_value(self.head.as_ref()));
    values.push(Value::Bool(self.is_head_partial));
    values
  }
}

/// Split a raw flight path into its segment path and fixed trailer.
///
/// # Panics
///
/// Panics when `raw` is shorter than the four-element trailer. The server
/// always emits the trailer; a shorter path is a broken wire contract.
pub fn get_flight_data_parts_from_path(raw: &[Value]) -> Result<NormalizedFlightData, RouterError> {
  assert!(
    raw.len() >= FLIGHT_DATA_PATH_TRAILER,
    "flight data path must end in [tree, seedData, head, isHeadPartial], got {} elements",
    raw.len()
  );
  let split = raw.len() - FLIGHT_DATA_PATH_TRAILER;
  let (prefix, trailer) = raw.split_at(split);
  let segment_path = parse_segment_path(prefix)?;
  let (path_to_segment, segment) = match segment_path.split_last() {
    Some((last, rest)) => (rest.to_vec(), last.segment.clone()),
    None => (Vec::new(), Segment::literal("")),
  };

  Ok(NormalizedFlightData {
    path_to_segment,
    segment,
    is_root_render: segment_path.is_empty(),
    segment_path,
    tree: FlightRouterState::from_value(&trailer[0])?,
    seed_data: match &trailer[1] {
      Value::Null => None,
      seed => Some(SeedData::from_value(seed)?),
    },
    head: payload(&trailer[2]),
    is_head_partial: trailer[3].as_bool().unwrap_or(false),
  })
}

/// Either a list of updates or an instruction to load `url` as a document.
#[derive(Debug, Clone, PartialEq)]
pub enum FlightData {
  MpaNavigation(String),
  Paths(Vec<NormalizedFlightData>),
}

impl FlightData {
  pub fn to_value(&self) -> Value {
    match self {
      Self::MpaNavigation(url) => Value::String(url.clone()),
      Self::Paths(paths) => Value::Array(paths.iter().map(|p| Value::Array(p.to_path_values())).collect()),
    }
  }
}

pub fn normalize_flight_data(value: &Value) -> Result<FlightData, RouterError> {
  match value {
    Value::String(url) => Ok(FlightData::MpaNavigation(url.clone())),
    Value::Array(paths) => paths
      .iter()
      .map(|path| match path {
        Value::Array(raw) => get_flight_data_parts_from_path(raw),
        other => Err(RouterError::MalformedFlightData(format!("flight path must be an array, got {other}"))),
      })
      .collect::<Result<Vec<_>, _>>()
      .map(FlightData::Paths),
    other => Err(RouterError::MalformedFlightData(format!("expected string or array, got {other}"))),
  }
}

/// Root row of a flight response.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightResponse {
  pub build_id: String,
  pub flight_data: FlightData,
  /// Server-side redirect target; replaces the requested URL when present.
  pub canonical_url: Option<String>,
  pub could_be_intercepted: bool,
  /// Dynamic holes were left unfilled (a partial prerender).
  pub postponed: bool,
  /// Seconds the result may be reused for, when the server says so.
  pub stale_time: Option<u64>,
}

impl FlightResponse {
  pub fn new(build_id: impl Into<String>, flight_data: FlightData) -> Self {
    Self {
      build_id: build_id.into(),
      flight_data,
      canonical_url: None,
      could_be_intercepted: false,
      postponed: false,
      stale_time: None,
    }
  }

  pub fn from_value(value: &Value) -> Result<Self, RouterError> {
    let obj = value
      .as_object()
      .ok_or_else(|| RouterError::MalformedResponse(format!("expected object, got {value}")))?;
    let flight_data =
      obj.get("f").ok_or_else(|| RouterError::MalformedResponse("missing flight data".to_string()))?;
    Ok(Self {
      build_id: obj.get("b").and_then(Value::as_str).unwrap_or_default().to_string(),
      flight_data: normalize_flight_data(flight_data)?,
      canonical_url: obj.get("u").and_then(Value::as_str).map(str::to_string),
      could_be_intercepted: obj.get("i").and_then(Value::as_bool).unwrap_or(false),
      postponed: obj.get("p").and_then(Value::as_bool).unwrap_or(false),
      stale_time: obj.get("s").and_then(Value::as_u64),
    })
  }

  pub fn to_value(&self) -> Value {
    let mut obj = json!({ "b": self.build_id, "f": self.flight_data.to_value() });
    if let Some(url) = &self.canonical_url {
      obj["u"] = Value::String(url.clone());
    }
    if self.could_be_intercepted {
      obj["i"] = Value::Bool(true);
    }
    if self.postponed {
      obj["p"] = Value::Bool(true);
    }
    if let Some(stale) = self.stale_time {
      obj["s"] = json!(stale);
    }
    obj
  }

  fn append_row(&mut self, row: &Row) -> Result<(), RouterError> {
    let Value::Array(paths) = &row.value else {
      tracing::trace!(id = %row.id, "ignoring non-path flight row");
      return Ok(());
    };
    if !paths.iter().all(Value::is_array) {
      tracing::trace!(id = %row.id, "ignoring non-path flight row");
      return Ok(());
    }
    let FlightData::Paths(existing) = &mut self.flight_data else {
      return Ok(());
    };
    if let FlightData::Paths(more) = normalize_flight_data(&row.value)? {
      existing.extend(more);
    }
    Ok(())
  }
}

impl Serialize for FlightResponse {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for FlightResponse {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Self::from_value(&value).map_err(serde::de::Error::custom)
  }
}

/// Decode a streamed response body. Row `0` is the root; later rows that
/// carry flight paths are appended in the order they arrive.
pub async fn read_flight_response<S>(mut body: S) -> Result<FlightResponse, RouterError>
where
  S: Stream<Item = Bytes> + Unpin,
{
  let mut decoder = RowDecoder::new();
  let mut rows = Vec::new();
  while let Some(chunk) = body.next().await {
    decoder.push(&chunk);
    while let Some(row) = decoder.next_row() {
      rows.push(row?);
    }
  }
  rows.extend(decoder.finish()?);

  let root_idx = rows
    .iter()
    .position(|row| row.id == "0")
    .ok_or_else(|| RouterError::MalformedResponse("missing root row".to_string()))?;
  let mut response = FlightResponse::from_value(&rows[root_idx].value)?;
  for (idx, row) in rows.iter().enumerate() {
    if idx != root_idx {
      response.append_row(row)?;
    }
  }
  Ok(response)
}

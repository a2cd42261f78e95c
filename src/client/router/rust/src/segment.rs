/* src/client/router/rust/src/segment.rs */

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::errors::RouterError;

pub const PAGE_SEGMENT_KEY: &str = "__PAGE__";
pub const DEFAULT_SEGMENT_KEY: &str = "__DEFAULT__";
pub const CHILDREN_SLOT: &str = "children";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicParamKind {
  /// `[slug]`
  Dynamic,
  /// `[...slug]`
  CatchAll,
  /// `[[...slug]]`
  OptionalCatchAll,
  DynamicIntercepted,
  CatchAllIntercepted,
}

impl DynamicParamKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Dynamic => "d",
      Self::CatchAll => "c",
      Self::OptionalCatchAll => "oc",
      Self::DynamicIntercepted => "di",
      Self::CatchAllIntercepted => "ci",
    }
  }

  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "d" => Some(Self::Dynamic),
      "c" => Some(Self::CatchAll),
      "oc" => Some(Self::OptionalCatchAll),
      "di" => Some(Self::DynamicIntercepted),
      "ci" => Some(Self::CatchAllIntercepted),
      _ => None,
    }
  }
}

/// One path component of a route.
///
/// On the wire a segment is either a string or a `[param, value, kind]`
/// triple; the page and default sentinels are reserved strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
  Literal(String),
  Dynamic { param: String, value: String, kind: DynamicParamKind },
  /// Terminal page. `search` holds the query string the page was rendered for.
  Page { search: Option<String> },
  /// Placeholder for a parallel slot that has no match for the current URL.
  Default,
}

impl Segment {
  pub fn literal(name: impl Into<String>) -> Self {
    Self::Literal(name.into())
  }

  pub fn dynamic(param: impl Into<String>, value: impl Into<String>, kind: DynamicParamKind) -> Self {
    Self::Dynamic { param: param.into(), value: value.into(), kind }
  }

  pub fn page() -> Self {
    Self::Page { search: None }
  }

  pub fn from_value(value: &Value) -> Result<Self, RouterError> {
    match value {
      Value::String(s) if s == DEFAULT_SEGMENT_KEY => Ok(Self::Default),
      Value::String(s) if s == PAGE_SEGMENT_KEY => Ok(Self::Page { search: None }),
      Value::String(s) => match s.strip_prefix(PAGE_SEGMENT_KEY).and_then(|r| r.strip_prefix('?')) {
        Some(search) => Ok(Self::Page { search: Some(search.to_string()) }),
        None => Ok(Self::Literal(s.clone())),
      },
      Value::Array(items) => match items.as_slice() {
        [Value::String(param), Value::String(value), Value::String(tag)] => {
          let kind = DynamicParamKind::parse(tag)
            .ok_or_else(|| RouterError::MalformedSegment(format!("unknown param kind {tag:?}")))?;
          Ok(Self::Dynamic { param: param.clone(), value: value.clone(), kind })
        }
        _ => Err(RouterError::MalformedSegment(format!("expected [param, value, kind], got {value}"))),
      },
      other => Err(RouterError::MalformedSegment(format!("unexpected segment {other}"))),
    }
  }

  pub fn to_value(&self) -> Value {
    match self {
      Self::Literal(s) => Value::String(s.clone()),
      Self::Dynamic { param, value, kind } => Value::Array(vec![
        Value::String(param.clone()),
        Value::String(value.clone()),
        Value::String(kind.as_str().to_string()),
      ]),
      Self::Page { search: None } => Value::String(PAGE_SEGMENT_KEY.to_string()),
      Self::Page { search: Some(search) } => Value::String(format!("{PAGE_SEGMENT_KEY}?{search}")),
      Self::Default => Value::String(DEFAULT_SEGMENT_KEY.to_string()),
    }
  }

  pub fn is_page(&self) -> bool {
    matches!(self, Self::Page { .. })
  }

  pub fn is_default(&self) -> bool {
    matches!(self, Self::Default)
  }

  /// Route groups such as `(marketing)` organize files without adding to the URL.
  pub fn is_group(&self) -> bool {
    matches!(self, Self::Literal(s) if s.starts_with('(') && s.ends_with(')'))
  }

  pub fn without_search(&self) -> Self {
    match self {
      Self::Page { .. } => Self::Page { search: None },
      other => other.clone(),
    }
  }

  /// The URL path component this segment renders, if any.
  pub fn path_component(&self) -> Option<&str> {
    match self {
      Self::Literal(s) if s.is_empty() || self.is_group() => None,
      Self::Literal(s) => Some(s),
      Self::Dynamic { value, .. } if value.is_empty() => None,
      Self::Dynamic { value, .. } => Some(value),
      Self::Page { .. } | Self::Default => None,
    }
  }

  pub fn cache_key(&self) -> String {
    create_cache_key(self)
  }
}

impl Serialize for Segment {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Segment {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Self::from_value(&value).map_err(serde::de::Error::custom)
  }
}

fn escape_key_part(raw: &str) -> String {
  raw.replace('%', "%25").replace('|', "%7C")
}

/// Stable, collision-free key for a segment inside a slot's child map.
///
/// Only dynamic keys contain an unescaped `|`, and no literal key can begin
/// with `__PAGE__` or equal `__DEFAULT__`.
pub fn create_cache_key(segment: &Segment) -> String {
  match segment {
    Segment::Literal(s) => {
      let escaped = escape_key_part(s);
      if escaped.starts_with(PAGE_SEGMENT_KEY) || escaped == DEFAULT_SEGMENT_KEY {
        format!("%5F{}", &escaped[1..])
      } else {
        escaped
      }
    }
    Segment::Dynamic { param, value, kind } => {
      format!("{}|{}|{}", escape_key_part(param), escape_key_part(value), kind.as_str())
    }
    Segment::Page { search: None } => PAGE_SEGMENT_KEY.to_string(),
    Segment::Page { search: Some(search) } => format!("{PAGE_SEGMENT_KEY}?{}", escape_key_part(search)),
    Segment::Default => DEFAULT_SEGMENT_KEY.to_string(),
  }
}

/// Dynamic segments match on name and value; the kind may differ between
/// an intercepted and a direct render of the same param.
pub fn match_segment(existing: &Segment, incoming: &Segment) -> bool {
  match (existing, incoming) {
    (
      Segment::Dynamic { param: pa, value: va, .. },
      Segment::Dynamic { param: pb, value: vb, .. },
    ) => pa == pb && va == vb,
    (a, b) => a == b,
  }
}

/// One `(slot, segment)` hop from a node to its child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
  pub slot: String,
  pub segment: Segment,
}

impl PathStep {
  pub fn new(slot: impl Into<String>, segment: Segment) -> Self {
    Self { slot: slot.into(), segment }
  }

  pub fn children(segment: Segment) -> Self {
    Self::new(CHILDREN_SLOT, segment)
  }
}

pub type SegmentPath = Vec<PathStep>;

pub fn get_next_segment_path(path: &[PathStep]) -> &[PathStep] {
  path.get(1..).unwrap_or(&[])
}

/// Parse the flat `[slot, segment, slot, segment, ...]` wire form.
pub fn parse_segment_path(items: &[Value]) -> Result<SegmentPath, RouterError> {
  if items.len() % 2 != 0 {
    return Err(RouterError::MalformedFlightData(format!(
      "segment path has odd length {}",
      items.len()
    )));
  }
  items
    .chunks_exact(2)
    .map(|pair| {
      let slot = pair[0]
        .as_str()
        .ok_or_else(|| RouterError::MalformedFlightData(format!("slot must be a string, got {}", pair[0])))?;
      Ok(PathStep::new(slot, Segment::from_value(&pair[1])?))
    })
    .collect()
}

pub fn segment_path_to_values(path: &[PathStep]) -> Vec<Value> {
  path.iter().flat_map(|step| [Value::String(step.slot.clone()), step.segment.to_value()]).collect()
}

/* src/client/router/rust/src/router_state.rs */

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::errors::RouterError;
use crate::segment::{CHILDREN_SLOT, PathStep, Segment, match_segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMarker {
  /// Ask the server to re-render from this segment down.
  Refetch,
  /// Client-side record of the href a page segment was rendered for.
  Refresh,
  InsideSharedLayout,
  MetadataOnly,
}

impl RefreshMarker {
  /// Markers the server needs to make rendering decisions.
  pub fn is_server_visible(self) -> bool {
    matches!(self, Self::Refetch | Self::InsideSharedLayout)
  }

  fn as_str(self) -> &'static str {
    match self {
      Self::Refetch => "refetch",
      Self::Refresh => "refresh",
      Self::InsideSharedLayout => "inside-shared-layout",
      Self::MetadataOnly => "metadata-only",
    }
  }

  fn parse(raw: &str) -> Option<Self> {
    match raw {
      "refetch" => Some(Self::Refetch),
      "refresh" => Some(Self::Refresh),
      "inside-shared-layout" => Some(Self::InsideSharedLayout),
      "metadata-only" => Some(Self::MetadataOnly),
      _ => None,
    }
  }
}

/// The route tree as both client and server see it.
///
/// Wire form: `[segment, {slot: tree}, url?, refreshMarker?, isRootLayout?, hasLoadingBoundary?]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightRouterState {
  pub segment: Segment,
  pub parallel_routes: BTreeMap<String, FlightRouterState>,
  pub url: Option<String>,
  pub refresh: Option<RefreshMarker>,
  pub is_root_layout: bool,
  pub has_loading_boundary: bool,
}

impl FlightRouterState {
  pub fn new(segment: Segment) -> Self {
    Self {
      segment,
      parallel_routes: BTreeMap::new(),
      url: None,
      refresh: None,
      is_root_layout: false,
      has_loading_boundary: false,
    }
  }

  pub fn with_child(mut self, slot: impl Into<String>, child: FlightRouterState) -> Self {
    self.parallel_routes.insert(slot.into(), child);
    self
  }

  pub fn with_children(self, child: FlightRouterState) -> Self {
    self.with_child(CHILDREN_SLOT, child)
  }

  pub fn root_layout(mut self) -> Self {
    self.is_root_layout = true;
    self
  }

  pub fn with_loading_boundary(mut self) -> Self {
    self.has_loading_boundary = true;
    self
  }

  pub fn with_refresh(mut self, marker: RefreshMarker) -> Self {
    self.refresh = Some(marker);
    self
  }

  pub fn from_value(value: &Value) -> Result<Self, RouterError> {
    let items = value
      .as_array()
      .filter(|items| items.len() >= 2)
      .ok_or_else(|| RouterError::MalformedRouterState(format!("expected [segment, routes, ...], got {value}")))?;
    let segment = Segment::from_value(&items[0])?;
    let routes = items[1]
      .as_object()
      .ok_or_else(|| RouterError::MalformedRouterState("parallel routes must be an object".to_string()))?;
    let mut parallel_routes = BTreeMap::new();
    for (slot, child) in routes {
      parallel_routes.insert(slot.clone(), Self::from_value(child)?);
    }

    let url = match items.get(2) {
      None | Some(Value::Null) => None,
      Some(Value::String(url)) => Some(url.clone()),
      Some(other) => {
        return Err(RouterError::MalformedRouterState(format!("url must be a string, got {other}")));
      }
    };
    let refresh = match items.get(3) {
      None | Some(Value::Null) => None,
      Some(Value::String(raw)) => Some(
        RefreshMarker::parse(raw)
          .ok_or_else(|| RouterError::MalformedRouterState(format!("unknown refresh marker {raw:?}")))?,
      ),
      Some(other) => {
        return Err(RouterError::MalformedRouterState(format!("refresh marker must be a string, got {other}")));
      }
    };
    let flag = |idx: usize| items.get(idx).and_then(Value::as_bool).unwrap_or(false);

    Ok(Self {
      segment,
      parallel_routes,
      url,
      refresh,
      is_root_layout: flag(4),
      has_loading_boundary: flag(5),
    })
  }

  pub fn to_value(&self) -> Value {
    let routes: Map<String, Value> =
      self.parallel_routes.iter().map(|(slot, child)| (slot.clone(), child.to_value())).collect();
    let mut items = vec![
      self.segment.to_value(),
      Value::Object(routes),
      self.url.clone().map_or(Value::Null, Value::String),
      self.refresh.map_or(Value::Null, |m| Value::String(m.as_str().to_string())),
      Value::Bool(self.is_root_layout),
      Value::Bool(self.has_loading_boundary),
    ];
    // Trailing defaults are omitted on the wire.
    while items.len() > 2 && matches!(items.last(), Some(Value::Null | Value::Bool(false))) {
      items.pop();
    }
    Value::Array(items)
  }

  /// Copy without client-only annotations, suitable for an outgoing request.
  pub fn strip_client_only_data(&self) -> Self {
    Self {
      segment: self.segment.without_search(),
      parallel_routes: self
        .parallel_routes
        .iter()
        .map(|(slot, child)| (slot.clone(), child.strip_client_only_data()))
        .collect(),
      url: None,
      refresh: self.refresh.filter(|m| m.is_server_visible()),
      is_root_layout: self.is_root_layout,
      has_loading_boundary: self.has_loading_boundary,
    }
  }

  /// Record `href` on every page segment that does not carry one yet.
  pub fn add_refresh_marker_to_active_parallel_segments(&mut self, href: &str) {
    if self.segment.is_page() && self.refresh != Some(RefreshMarker::Refresh) {
      self.url = Some(href.to_string());
      self.refresh = Some(RefreshMarker::Refresh);
    }
    for child in self.parallel_routes.values_mut() {
      child.add_refresh_marker_to_active_parallel_segments(href);
    }
  }

  /// The URL path this tree renders, or `None` when it ends in a default
  /// slot or an intercepting segment.
  pub fn extract_path(&self) -> Option<String> {
    let parts = self.path_parts()?;
    Some(format!("/{}", parts.join("/")))
  }

  fn path_parts(&self) -> Option<Vec<&str>> {
    match &self.segment {
      Segment::Default => return None,
      Segment::Literal(s) if s.starts_with("(.") => return None,
      Segment::Page { .. } => return Some(Vec::new()),
      _ => {}
    }
    let mut parts: Vec<&str> = self.segment.path_component().into_iter().collect();
    if let Some(child) = self.parallel_routes.get(CHILDREN_SLOT).and_then(Self::path_parts) {
      parts.extend(child);
    } else {
      for (slot, route) in &self.parallel_routes {
        if slot == CHILDREN_SLOT {
          continue;
        }
        if let Some(child) = route.path_parts() {
          parts.extend(child);
        }
      }
    }
    Some(parts)
  }

  fn primary_child(&self) -> Option<&FlightRouterState> {
    self.parallel_routes.get(CHILDREN_SLOT).or_else(|| self.parallel_routes.values().next())
  }
}

impl Serialize for FlightRouterState {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_value().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for FlightRouterState {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Self::from_value(&value).map_err(serde::de::Error::custom)
  }
}

/// Merge a server tree patch into `current` at `path`.
///
/// The root segment is implicit: `path` starts at the root's first slot.
/// Returns `None` when an intermediate segment no longer matches the
/// current tree, meaning the patch was rendered for a different route.
pub fn apply_router_state_patch_to_tree(
  path: &[PathStep],
  current: &FlightRouterState,
  patch: &FlightRouterState,
) -> Option<FlightRouterState> {
  let Some((step, rest)) = path.split_first() else {
    return Some(apply_patch(current, patch));
  };
  let existing = current.parallel_routes.get(&step.slot);
  let child = if rest.is_empty() {
    match existing {
      Some(existing) => apply_patch(existing, patch),
      None => patch.clone(),
    }
  } else {
    let existing = existing.filter(|child| match_segment(&child.segment, &step.segment))?;
    apply_router_state_patch_to_tree(rest, existing, patch)?
  };

  let mut tree = current.clone();
  tree.parallel_routes.insert(step.slot.clone(), child);
  Some(tree)
}

fn apply_patch(initial: &FlightRouterState, patch: &FlightRouterState) -> FlightRouterState {
  // A default patch means "nothing matched here"; keep what is rendered.
  if patch.segment.is_default() && !initial.segment.is_default() {
    return initial.clone();
  }
  if !match_segment(&initial.segment, &patch.segment) {
    return patch.clone();
  }

  let mut parallel_routes = BTreeMap::new();
  for (slot, child) in &initial.parallel_routes {
    let merged = match patch.parallel_routes.get(slot) {
      Some(patched) => apply_patch(child, patched),
      None => child.clone(),
    };
    parallel_routes.insert(slot.clone(), merged);
  }
  for (slot, child) in &patch.parallel_routes {
    parallel_routes.entry(slot.clone()).or_insert_with(|| child.clone());
  }

  FlightRouterState {
    segment: initial.segment.clone(),
    parallel_routes,
    url: initial.url.clone(),
    refresh: initial.refresh,
    is_root_layout: initial.is_root_layout,
    has_loading_boundary: patch.has_loading_boundary,
  }
}

/// Whether moving from `current` to `next` crosses a root layout boundary,
/// which the client cannot reconcile without a full document load.
pub fn is_navigating_to_new_root_layout(current: &FlightRouterState, next: &FlightRouterState) -> bool {
  let segment_changed = match (&current.segment, &next.segment) {
    (Segment::Dynamic { param: a, kind: ka, .. }, Segment::Dynamic { param: b, kind: kb, .. }) => {
      a != b || ka != kb
    }
    (a, b) => a != b,
  };
  if segment_changed {
    return true;
  }
  if current.is_root_layout {
    return !next.is_root_layout;
  }
  if next.is_root_layout {
    return true;
  }
  match (current.primary_child(), next.primary_child()) {
    (Some(a), Some(b)) => is_navigating_to_new_root_layout(a, b),
    _ => true,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::segment::DynamicParamKind;

  fn lit(name: &str) -> FlightRouterState {
    FlightRouterState::new(Segment::literal(name))
  }

  fn page() -> FlightRouterState {
    FlightRouterState::new(Segment::page())
  }

  #[test]
  fn wire_round_trip_keeps_markers() {
    let raw = json!(["", {"children": ["blog", {"children": ["__PAGE__?a=1", {}, "/blog?a=1", "refresh"]}]}, null, null, true]);
    let tree = FlightRouterState::from_value(&raw).unwrap();
    assert!(tree.is_root_layout);
    let leaf = &tree.parallel_routes["children"].parallel_routes["children"];
    assert_eq!(leaf.url.as_deref(), Some("/blog?a=1"));
    assert_eq!(leaf.refresh, Some(RefreshMarker::Refresh));
    assert_eq!(tree.to_value(), raw);
  }

  #[test]
  fn rejects_bad_shapes() {
    assert!(FlightRouterState::from_value(&json!(["a"])).is_err());
    assert!(FlightRouterState::from_value(&json!(["a", []])).is_err());
    assert!(FlightRouterState::from_value(&json!(["a", {}, null, "bogus"])).is_err());
  }

  #[test]
  fn strip_drops_client_only_fields() {
    let tree = lit("")
      .root_layout()
      .with_refresh(RefreshMarker::Refetch)
      .with_children(FlightRouterState {
        url: Some("/x?q=1".into()),
        refresh: Some(RefreshMarker::Refresh),
        ..FlightRouterState::new(Segment::Page { search: Some("q=1".into()) })
      });
    let stripped = tree.strip_client_only_data();
    assert_eq!(stripped.refresh, Some(RefreshMarker::Refetch));
    assert!(stripped.is_root_layout);
    let leaf = &stripped.parallel_routes["children"];
    assert_eq!(leaf.segment, Segment::page());
    assert_eq!(leaf.url, None);
    assert_eq!(leaf.refresh, None);
  }

  #[test]
  fn refresh_markers_land_on_pages_only() {
    let mut tree = lit("").with_children(lit("a").with_children(page())).with_child("modal", page());
    tree.add_refresh_marker_to_active_parallel_segments("/a");
    assert_eq!(tree.refresh, None);
    let leaf = &tree.parallel_routes["children"].parallel_routes["children"];
    assert_eq!(leaf.url.as_deref(), Some("/a"));
    assert_eq!(tree.parallel_routes["modal"].refresh, Some(RefreshMarker::Refresh));

    tree.add_refresh_marker_to_active_parallel_segments("/b");
    let leaf = &tree.parallel_routes["children"].parallel_routes["children"];
    assert_eq!(leaf.url.as_deref(), Some("/a"));
  }

  #[test]
  fn extracts_paths() {
    let tree = lit("").with_children(
      lit("(shop)").with_children(
        FlightRouterState::new(Segment::dynamic("id", "42", DynamicParamKind::Dynamic)).with_children(page()),
      ),
    );
    assert_eq!(tree.extract_path().as_deref(), Some("/42"));
    assert_eq!(lit("").with_children(page()).extract_path().as_deref(), Some("/"));
    assert_eq!(FlightRouterState::new(Segment::Default).extract_path(), None);
  }

  #[test]
  fn patch_at_leaf_replaces_mismatched_segment() {
    let current = lit("").with_children(lit("shared").with_children(lit("one").with_children(page())));
    let path = vec![PathStep::children(Segment::literal("shared")), PathStep::children(Segment::literal("two"))];
    let patch = lit("two").with_children(page());
    let next = apply_router_state_patch_to_tree(&path, &current, &patch).unwrap();
    let shared = &next.parallel_routes["children"];
    assert_eq!(shared.segment, Segment::literal("shared"));
    assert_eq!(shared.parallel_routes["children"], patch);
  }

  #[test]
  fn patch_with_mismatched_intermediate_is_rejected() {
    let current = lit("").with_children(lit("a").with_children(page()));
    let path = vec![PathStep::children(Segment::literal("b")), PathStep::children(Segment::page())];
    assert!(apply_router_state_patch_to_tree(&path, &current, &page()).is_none());
  }

  #[test]
  fn default_patch_keeps_existing_slot() {
    let current = lit("").with_children(page()).with_child("modal", lit("photo").with_children(page()));
    let patch = lit("")
      .with_children(FlightRouterState::new(Segment::Page { search: Some("x=1".into()) }))
      .with_child("modal", FlightRouterState::new(Segment::Default));
    let next = apply_router_state_patch_to_tree(&[], &current, &patch).unwrap();
    assert_eq!(next.parallel_routes["modal"], current.parallel_routes["modal"]);
    assert_eq!(next.parallel_routes["children"].segment, Segment::Page { search: Some("x=1".into()) });
  }

  #[test]
  fn root_layout_changes() {
    let a = lit("").with_children(lit("(a)").root_layout().with_children(page()));
    let b = lit("").with_children(lit("(b)").root_layout().with_children(page()));
    assert!(is_navigating_to_new_root_layout(&a, &b));
    assert!(!is_navigating_to_new_root_layout(&a, &a.clone()));

    let root = lit("").root_layout().with_children(page());
    let other = lit("").root_layout().with_children(lit("x").with_children(page()));
    assert!(!is_navigating_to_new_root_layout(&root, &other));
  }
}

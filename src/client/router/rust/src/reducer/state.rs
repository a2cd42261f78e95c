/* src/client/router/rust/src/reducer/state.rs */

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::cache_node::CacheNode;
use crate::config::RouterConfig;
use crate::errors::RouterError;
use crate::fill::fill_lazy_items_till_leaf_with_head;
use crate::flight::{FlightData, FlightResponse};
use crate::prefetch::{FetchStrategy, PrefetchCache};
use crate::request::create_href_from_url;
use crate::router_state::FlightRouterState;
use crate::segment::SegmentPath;

/// How the next committed URL should reach the history stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRef {
  pub pending_push: bool,
  /// The router gave up and asked for a full document load.
  pub mpa_navigation: bool,
  /// Leave the entry's state alone, e.g. after a popstate.
  pub preserve_custom_history_state: bool,
}

/// Where the rendering layer should move focus and scroll after a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusAndScrollRef {
  pub apply: bool,
  pub only_hash_change: bool,
  pub hash_fragment: Option<String>,
  pub segment_paths: Vec<SegmentPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PendingKind {
  Navigate { push: bool, should_scroll: bool },
  Refresh,
}

/// The one navigation or refresh whose response may still be committed.
/// Issuing another supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
  pub id: u64,
  pub url: Url,
  /// Hash-less href, the prefetch cache key for the result.
  pub href: String,
  pub next_url: Option<String>,
  pub kind: PendingKind,
  pub navigated_at: u64,
}

/// Browser history entry state written on push and replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryState {
  pub tree: FlightRouterState,
}

/// The router's whole state. Every field is replaced, never mutated, so
/// consumers can compare versions by pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct AppRouterState {
  pub build_id: String,
  pub tree: Arc<FlightRouterState>,
  pub cache: Arc<CacheNode>,
  pub prefetch_cache: Arc<PrefetchCache>,
  /// `pathname + search + hash` of the committed URL.
  pub canonical_url: String,
  /// Scheme, host and port the application is served from.
  pub origin: Url,
  pub push_ref: PushRef,
  pub focus_and_scroll_ref: FocusAndScrollRef,
  pub next_url: Option<String>,
  pub previous_next_url: Option<String>,
  pub pending: Option<PendingRequest>,
  pub next_request_id: u64,
  pub config: Arc<RouterConfig>,
}

impl AppRouterState {
  /// Resolve `href` against the committed URL.
  pub fn resolve_url(&self, href: &str) -> Result<Url, RouterError> {
    Ok(self.origin.join(&self.canonical_url)?.join(href)?)
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }
}

/// Inputs for building the state a freshly loaded document starts from.
#[derive(Debug, Clone)]
pub struct InitialRouterStateOptions {
  /// Root row of the document's inline flight payload.
  pub response: FlightResponse,
  pub location: Url,
  pub config: RouterConfig,
  /// The page was served fully prerendered.
  pub prerendered: bool,
  pub now: u64,
}

impl InitialRouterStateOptions {
  /// `{"response", "location", "config"?, "prerendered"?, "now"?}`, as handed
  /// over by a host page.
  pub fn from_value(value: &Value) -> Result<Self, RouterError> {
    let response = value
      .get("response")
      .ok_or_else(|| RouterError::MalformedResponse("missing initial response".to_string()))?;
    let location = value
      .get("location")
      .and_then(Value::as_str)
      .ok_or_else(|| RouterError::Config("missing location".to_string()))?;
    let config = match value.get("config") {
      Some(config) if !config.is_null() => serde_json::from_value(config.clone())?,
      _ => RouterConfig::default(),
    };
    Ok(Self {
      response: FlightResponse::from_value(response)?,
      location: Url::parse(location)?,
      config,
      prerendered: value.get("prerendered").and_then(Value::as_bool).unwrap_or(false),
      now: value.get("now").and_then(Value::as_u64).unwrap_or(0),
    })
  }
}

pub fn create_initial_router_state(options: InitialRouterStateOptions) -> Result<AppRouterState, RouterError> {
  let InitialRouterStateOptions { response, location, config, prerendered, now } = options;
  config.validate()?;

  let initial = match &response.flight_data {
    FlightData::Paths(paths) => paths.first(),
    FlightData::MpaNavigation(_) => None,
  }
  .ok_or_else(|| RouterError::MalformedResponse("initial payload carries no tree".to_string()))?;

  let canonical_url = create_href_from_url(&location, true);
  let mut tree = initial.tree.clone();
  tree.add_refresh_marker_to_active_parallel_segments(&canonical_url);

  let seed = initial.seed_data.as_ref();
  let mut cache = CacheNode {
    rsc: seed.and_then(|s| s.rsc.clone()),
    loading: seed.and_then(|s| s.loading.clone()),
    navigated_at: now,
    ..CacheNode::default()
  };
  fill_lazy_items_till_leaf_with_head(now, &mut cache, None, &initial.tree, seed, initial.head.as_ref());

  let next_url = tree.extract_path().or_else(|| Some(location.path().to_string()));
  let mut prefetch_cache = PrefetchCache::new(&config);
  let strategy = if prerendered { FetchStrategy::Full } else { FetchStrategy::OnDemand };
  prefetch_cache.insert_ready(
    &create_href_from_url(&location, false),
    next_url.as_deref(),
    strategy,
    Arc::new(response.clone()),
    now,
  );

  let origin = location.join("/")?;
  tracing::debug!(href = %canonical_url, build_id = %response.build_id, "router state initialized");

  Ok(AppRouterState {
    build_id: response.build_id,
    tree: Arc::new(tree),
    cache: Arc::new(cache),
    prefetch_cache: Arc::new(prefetch_cache),
    canonical_url,
    origin,
    push_ref: PushRef { preserve_custom_history_state: true, ..PushRef::default() },
    focus_and_scroll_ref: FocusAndScrollRef::default(),
    next_url,
    previous_next_url: None,
    pending: None,
    next_request_id: 0,
    config: Arc::new(config),
  })
}

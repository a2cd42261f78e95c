/* src/client/router/rust/src/reducer/apply.rs */

use std::sync::Arc;

use percent_encoding::percent_decode_str;
use url::Url;

use super::state::{AppRouterState, FocusAndScrollRef, PushRef};
use super::{Effect, Reduction};
use crate::cache_node::{CacheNode, invalidate_cache_below_path};
use crate::fill::{fill_cache_with_new_subtree_data, fill_cache_with_new_subtree_data_but_only_loading, fill_root};
use crate::flight::{FlightData, FlightResponse};
use crate::prefetch::PrefetchCache;
use crate::request::create_href_from_url;
use crate::router_state::{FlightRouterState, apply_router_state_patch_to_tree, is_navigating_to_new_root_layout};
use crate::segment::{PathStep, SegmentPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FillMode {
  Full,
  /// Optimistic placeholder from an incomplete prefetch.
  OnlyLoading,
}

pub(super) enum Applied {
  Tree { tree: FlightRouterState, cache: Arc<CacheNode>, scrollable_segments: Vec<SegmentPath> },
  /// The response cannot be reconciled client-side; load this URL instead.
  Mpa(String),
}

/// Merge every flight path of `response` into the current tree and cache.
pub(super) fn apply_flight_response(
  state: &AppRouterState,
  response: &FlightResponse,
  href: &str,
  navigated_at: u64,
  mode: FillMode,
) -> Applied {
  let paths = match &response.flight_data {
    FlightData::MpaNavigation(url) => return Applied::Mpa(url.clone()),
    FlightData::Paths(paths) => paths,
  };
  if !state.build_id.is_empty() && !response.build_id.is_empty() && response.build_id != state.build_id {
    tracing::warn!(current = %state.build_id, incoming = %response.build_id, "build id changed");
    return Applied::Mpa(href.to_string());
  }

  let mut tree = FlightRouterState::clone(&state.tree);
  let mut cache = Arc::clone(&state.cache);
  let mut scrollable_segments = Vec::new();

  for flight in paths {
    let Some(next_tree) = apply_router_state_patch_to_tree(&flight.segment_path, &tree, &flight.tree) else {
      tracing::warn!(href, "flight data was rendered for a different tree");
      return Applied::Mpa(href.to_string());
    };
    if is_navigating_to_new_root_layout(&tree, &next_tree) {
      tracing::debug!(href, "navigation crosses root layouts");
      return Applied::Mpa(href.to_string());
    }

    cache = match &flight.seed_data {
      None => invalidate_cache_below_path(&cache, &flight.segment_path),
      Some(seed) if flight.is_root_render => {
        fill_root(navigated_at, &cache, &flight.tree, seed, flight.head.as_ref(), mode == FillMode::Full)
      }
      Some(_) => match mode {
        FillMode::Full => fill_cache_with_new_subtree_data(navigated_at, &cache, flight),
        FillMode::OnlyLoading => fill_cache_with_new_subtree_data_but_only_loading(navigated_at, &cache, flight),
      },
    };
    scrollable_segments.extend(leaf_segment_paths(&flight.segment_path, &flight.tree));
    tree = next_tree;
  }

  tree.add_refresh_marker_to_active_parallel_segments(href);
  Applied::Tree { tree, cache, scrollable_segments }
}

/// Paths from the root to every leaf of a patch rooted at `prefix`.
fn leaf_segment_paths(prefix: &[PathStep], patch: &FlightRouterState) -> Vec<SegmentPath> {
  let mut out = Vec::new();
  collect_leaves(patch, &mut prefix.to_vec(), &mut out);
  out
}

fn collect_leaves(tree: &FlightRouterState, prefix: &mut SegmentPath, out: &mut Vec<SegmentPath>) {
  if tree.parallel_routes.is_empty() {
    out.push(prefix.clone());
    return;
  }
  for (slot, child) in &tree.parallel_routes {
    prefix.push(PathStep::new(slot.clone(), child.segment.clone()));
    collect_leaves(child, prefix, out);
    prefix.pop();
  }
}

/// Partial update applied to a state on commit. `None` keeps the current value.
#[derive(Default)]
pub(super) struct Mutable {
  pub canonical_url: Option<String>,
  pub tree: Option<Arc<FlightRouterState>>,
  pub cache: Option<Arc<CacheNode>>,
  pub prefetch_cache: Option<Arc<PrefetchCache>>,
  pub pending_push: Option<bool>,
  pub preserve_custom_history_state: Option<bool>,
  pub only_hash_change: bool,
  pub hash_fragment: Option<String>,
  /// `Some` asks the rendering layer to scroll to these segments.
  pub scrollable_segments: Option<Vec<SegmentPath>>,
  pub should_scroll: Option<bool>,
}

pub(super) fn handle_mutable(state: &AppRouterState, mutable: Mutable) -> AppRouterState {
  let should_scroll = mutable.should_scroll.unwrap_or(true);
  let canonical_url = mutable.canonical_url.unwrap_or_else(|| state.canonical_url.clone());

  let mut next_url = state.next_url.clone();
  if let Some(tree) = &mutable.tree {
    match tree.extract_path() {
      Some(path) => next_url = Some(path),
      // Intercepted routes keep the URL they were opened from.
      None if next_url.is_none() => next_url = Some(canonical_url.clone()),
      None => {}
    }
  }
  let previous_next_url =
    if next_url != state.next_url { state.next_url.clone() } else { state.previous_next_url.clone() };

  let focus_and_scroll_ref = if should_scroll {
    FocusAndScrollRef {
      apply: mutable.scrollable_segments.is_some(),
      only_hash_change: mutable.only_hash_change,
      hash_fragment: mutable.hash_fragment.filter(|h| !h.is_empty()).map(|h| decode_fragment(&h)),
      segment_paths: mutable.scrollable_segments.unwrap_or_default(),
    }
  } else {
    FocusAndScrollRef { only_hash_change: mutable.only_hash_change, ..FocusAndScrollRef::default() }
  };

  AppRouterState {
    build_id: state.build_id.clone(),
    tree: mutable.tree.unwrap_or_else(|| Arc::clone(&state.tree)),
    cache: mutable.cache.unwrap_or_else(|| Arc::clone(&state.cache)),
    prefetch_cache: mutable.prefetch_cache.unwrap_or_else(|| Arc::clone(&state.prefetch_cache)),
    canonical_url,
    origin: state.origin.clone(),
    push_ref: PushRef {
      pending_push: mutable.pending_push.unwrap_or(state.push_ref.pending_push),
      mpa_navigation: false,
      preserve_custom_history_state: mutable
        .preserve_custom_history_state
        .unwrap_or(state.push_ref.preserve_custom_history_state),
    },
    focus_and_scroll_ref,
    next_url,
    previous_next_url,
    pending: state.pending.clone(),
    next_request_id: state.next_request_id,
    config: Arc::clone(&state.config),
  }
}

fn decode_fragment(fragment: &str) -> String {
  percent_decode_str(fragment).decode_utf8_lossy().into_owned()
}

/// Give up on client-side reconciliation and load `url` as a document.
pub(super) fn handle_external_url(state: &AppRouterState, url: &str, push: bool) -> Reduction {
  let resolved = state.resolve_url(url).ok();
  let absolute = resolved.as_ref().map_or_else(|| url.to_string(), Url::to_string);
  let canonical_url = match &resolved {
    Some(resolved) if state.is_same_origin(resolved) => create_href_from_url(resolved, true),
    _ => absolute.clone(),
  };

  let mut next = state.clone();
  next.canonical_url = canonical_url;
  next.push_ref = PushRef { pending_push: push, mpa_navigation: true, preserve_custom_history_state: false };
  next.pending = None;
  Reduction::commit(next).with_effect(Effect::MpaNavigation { url: absolute, replace: !push })
}

/// The href a response commits under: the server's canonical URL when it
/// redirected, keeping the requested fragment.
pub(super) fn committed_href(state: &AppRouterState, requested: &Url, response: &FlightResponse) -> String {
  let mut url = response
    .canonical_url
    .as_deref()
    .and_then(|canonical| state.resolve_url(canonical).ok())
    .unwrap_or_else(|| requested.clone());
  if url.fragment().is_none() {
    url.set_fragment(requested.fragment());
  }
  create_href_from_url(&url, true)
}

/// Copy-on-write update of the prefetch cache.
pub(super) fn update_prefetch_cache(
  cache: &Arc<PrefetchCache>,
  update: impl FnOnce(&mut PrefetchCache),
) -> Arc<PrefetchCache> {
  let mut next = PrefetchCache::clone(cache);
  update(&mut next);
  Arc::new(next)
}

/// Drop expired entries, sharing `cache` when nothing expired.
pub(super) fn pruned(cache: &Arc<PrefetchCache>, now: u64) -> Arc<PrefetchCache> {
  if cache.has_expired(now) { update_prefetch_cache(cache, |c| c.prune(now)) } else { Arc::clone(cache) }
}

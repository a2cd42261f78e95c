/* src/client/router/rust/src/reducer/navigate.rs */

use std::sync::Arc;

use url::Url;

use super::apply::{
  Applied, FillMode, Mutable, apply_flight_response, committed_href, handle_external_url, handle_mutable, pruned,
  update_prefetch_cache,
};
use super::state::{AppRouterState, PendingKind, PendingRequest};
use super::{Effect, FetchOutcome, NavigateType, Reduction};
use crate::prefetch::{FetchStrategy, PrefetchLookup};
use crate::request::{FetchRequest, create_href_from_url};

pub(super) fn navigate(
  state: &Arc<AppRouterState>,
  url: &str,
  navigate_type: NavigateType,
  should_scroll: bool,
  now: u64,
) -> Reduction {
  let push = navigate_type == NavigateType::Push;
  let target = match state.resolve_url(url) {
    Ok(target) => target,
    Err(err) => {
      tracing::warn!(url, %err, "ignoring navigation to an invalid url");
      return Reduction::unchanged(state);
    }
  };
  if !state.is_same_origin(&target) {
    tracing::debug!(url = %target, "navigating to another origin");
    return handle_external_url(state, target.as_str(), push);
  }

  let href = create_href_from_url(&target, false);
  let current_href = state.canonical_url.split('#').next().unwrap_or_default();
  if let Some(hash) = target.fragment().filter(|h| !h.is_empty())
    && current_href == href
  {
    let mut next = handle_mutable(
      state,
      Mutable {
        canonical_url: Some(create_href_from_url(&target, true)),
        pending_push: Some(push),
        preserve_custom_history_state: Some(false),
        only_hash_change: true,
        hash_fragment: Some(hash.to_string()),
        scrollable_segments: Some(Vec::new()),
        should_scroll: Some(should_scroll),
        ..Mutable::default()
      },
    );
    next.pending = None;
    return Reduction::commit(next);
  }

  let prefetch_cache = pruned(&state.prefetch_cache, now);
  match prefetch_cache.lookup(&href, state.next_url.as_deref(), FetchStrategy::OnDemand, now) {
    PrefetchLookup::Hit { key, response } => {
      let canonical = committed_href(state, &target, &response);
      match apply_flight_response(state, &response, &canonical, now, FillMode::Full) {
        Applied::Tree { tree, cache, scrollable_segments } => {
          tracing::trace!(href = %canonical, strategy = ?key.strategy, "navigating from prefetch cache");
          let prefetch_cache = update_prefetch_cache(&prefetch_cache, |c| c.mark_used(&key, now));
          let mut next = handle_mutable(
            state,
            Mutable {
              canonical_url: Some(canonical),
              tree: Some(Arc::new(tree)),
              cache: Some(cache),
              prefetch_cache: Some(prefetch_cache),
              pending_push: Some(push),
              preserve_custom_history_state: Some(false),
              hash_fragment: target.fragment().map(str::to_string),
              scrollable_segments: Some(scrollable_segments),
              should_scroll: Some(should_scroll),
              ..Mutable::default()
            },
          );
          next.pending = None;
          Reduction::commit(next)
        }
        Applied::Mpa(url) => handle_external_url(state, &url, push),
      }
    }
    PrefetchLookup::Partial { key, response } => {
      let canonical = committed_href(state, &target, &response);
      let optimistic = match apply_flight_response(state, &response, &canonical, now, FillMode::OnlyLoading) {
        Applied::Tree { tree, cache, scrollable_segments } => {
          tracing::trace!(href = %canonical, strategy = ?key.strategy, "showing loading state from partial prefetch");
          handle_mutable(
            state,
            Mutable {
              canonical_url: Some(canonical),
              tree: Some(Arc::new(tree)),
              cache: Some(cache),
              prefetch_cache: Some(Arc::clone(&prefetch_cache)),
              pending_push: Some(push),
              preserve_custom_history_state: Some(false),
              hash_fragment: target.fragment().map(str::to_string),
              scrollable_segments: Some(scrollable_segments),
              should_scroll: Some(should_scroll),
              ..Mutable::default()
            },
          )
        }
        // The full response decides whether this turns into a document load.
        Applied::Mpa(_) => AppRouterState { prefetch_cache: Arc::clone(&prefetch_cache), ..AppRouterState::clone(state) },
      };
      start_fetch(state, optimistic, target, href, push, should_scroll, now)
    }
    PrefetchLookup::Pending { .. } | PrefetchLookup::Miss => {
      let base = AppRouterState { prefetch_cache, ..AppRouterState::clone(state) };
      start_fetch(state, base, target, href, push, should_scroll, now)
    }
  }
}

/// Issue the navigation fetch from `base`, superseding any pending request.
/// The server diffs against the tree committed before this navigation.
fn start_fetch(
  state: &AppRouterState,
  mut base: AppRouterState,
  target: Url,
  href: String,
  push: bool,
  should_scroll: bool,
  now: u64,
) -> Reduction {
  let id = state.next_request_id;
  if let Some(superseded) = &state.pending {
    tracing::debug!(superseded = superseded.id, id, "navigation supersedes pending request");
  }
  let mut url = target.clone();
  url.set_fragment(None);
  let request = FetchRequest {
    id,
    url,
    strategy: FetchStrategy::OnDemand,
    router_state: Arc::clone(&state.tree),
    next_url: state.next_url.clone(),
    is_hmr_refresh: false,
  };
  base.pending = Some(PendingRequest {
    id,
    url: target,
    href,
    next_url: state.next_url.clone(),
    kind: PendingKind::Navigate { push, should_scroll },
    navigated_at: now,
  });
  base.next_request_id = id + 1;
  Reduction::commit(base).with_effect(Effect::Fetch(request))
}

/// Commit the response to the navigation still pending.
pub(super) fn resolve(
  state: &Arc<AppRouterState>,
  pending: &PendingRequest,
  push: bool,
  should_scroll: bool,
  outcome: FetchOutcome,
  now: u64,
) -> Reduction {
  let response = match outcome {
    FetchOutcome::Ok(response) => Arc::new(response),
    FetchOutcome::Failed(message) => {
      tracing::warn!(url = %pending.url, %message, "navigation fetch failed");
      return handle_external_url(state, pending.url.as_str(), push);
    }
  };

  let canonical = committed_href(state, &pending.url, &response);
  match apply_flight_response(state, &response, &canonical, pending.navigated_at, FillMode::Full) {
    Applied::Tree { tree, cache, scrollable_segments } => {
      let prefetch_cache = update_prefetch_cache(&state.prefetch_cache, |c| {
        c.insert_ready(&pending.href, pending.next_url.as_deref(), FetchStrategy::OnDemand, Arc::clone(&response), now)
      });
      let mut next = handle_mutable(
        state,
        Mutable {
          canonical_url: Some(canonical),
          tree: Some(Arc::new(tree)),
          cache: Some(cache),
          prefetch_cache: Some(prefetch_cache),
          pending_push: Some(push),
          preserve_custom_history_state: Some(false),
          hash_fragment: pending.url.fragment().map(str::to_string),
          scrollable_segments: Some(scrollable_segments),
          should_scroll: Some(should_scroll),
          ..Mutable::default()
        },
      );
      next.pending = None;
      Reduction::commit(next)
    }
    Applied::Mpa(url) => handle_external_url(state, &url, push),
  }
}

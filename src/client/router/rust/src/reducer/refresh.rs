/* src/client/router/rust/src/reducer/refresh.rs */

use std::sync::Arc;

use super::apply::{Applied, FillMode, Mutable, apply_flight_response, handle_external_url, handle_mutable};
use super::state::{AppRouterState, PendingKind, PendingRequest};
use super::{Effect, FetchOutcome, Reduction};
use crate::prefetch::{FetchStrategy, PrefetchCache};
use crate::request::{FetchRequest, create_href_from_url};
use crate::router_state::RefreshMarker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RefreshMode {
  /// `router.refresh()`: drop prefetched data and refetch the page.
  Refresh,
  /// Dev server code change; the server needs the client-only tree data.
  Hmr,
  /// Dev fast refresh; prefetched data stays valid.
  Fast,
}

pub(super) fn refresh(state: &Arc<AppRouterState>, mode: RefreshMode, now: u64) -> Reduction {
  let mut url = match state.resolve_url(&state.canonical_url) {
    Ok(url) => url,
    Err(err) => {
      tracing::warn!(href = %state.canonical_url, %err, "cannot refresh an invalid url");
      return Reduction::unchanged(state);
    }
  };
  url.set_fragment(None);

  let mut router_state = (*state.tree).clone();
  router_state.refresh = Some(RefreshMarker::Refetch);

  let id = state.next_request_id;
  if let Some(superseded) = &state.pending {
    tracing::debug!(superseded = superseded.id, id, "refresh supersedes pending request");
  }
  let request = FetchRequest {
    id,
    url: url.clone(),
    strategy: FetchStrategy::OnDemand,
    router_state: Arc::new(router_state),
    next_url: state.next_url.clone(),
    is_hmr_refresh: mode == RefreshMode::Hmr,
  };

  let mut next = AppRouterState::clone(state);
  if mode != RefreshMode::Fast {
    next.prefetch_cache = Arc::new(PrefetchCache::new(&state.config));
  }
  next.pending = Some(PendingRequest {
    id,
    href: create_href_from_url(&url, false),
    url,
    next_url: state.next_url.clone(),
    kind: PendingKind::Refresh,
    navigated_at: now,
  });
  next.next_request_id = id + 1;
  Reduction::commit(next).with_effect(Effect::Fetch(request))
}

pub(super) fn resolve(state: &Arc<AppRouterState>, pending: &PendingRequest, outcome: FetchOutcome) -> Reduction {
  let response = match outcome {
    FetchOutcome::Ok(response) => response,
    FetchOutcome::Failed(message) => {
      tracing::warn!(url = %pending.url, %message, "refresh fetch failed");
      return handle_external_url(state, pending.url.as_str(), false);
    }
  };

  let canonical = match response.canonical_url.as_deref().map(|u| state.resolve_url(u)) {
    Some(Ok(redirected)) => create_href_from_url(&redirected, true),
    _ => state.canonical_url.clone(),
  };
  match apply_flight_response(state, &response, &canonical, pending.navigated_at, FillMode::Full) {
    Applied::Tree { tree, cache, .. } => {
      let mut next = handle_mutable(
        state,
        Mutable {
          canonical_url: Some(canonical),
          tree: Some(Arc::new(tree)),
          cache: Some(cache),
          pending_push: Some(false),
          should_scroll: Some(false),
          ..Mutable::default()
        },
      );
      next.pending = None;
      Reduction::commit(next)
    }
    Applied::Mpa(url) => handle_external_url(state, &url, false),
  }
}

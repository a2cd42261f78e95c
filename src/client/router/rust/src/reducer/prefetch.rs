/* src/client/router/rust/src/reducer/prefetch.rs */

use std::sync::Arc;

use super::apply::{pruned, update_prefetch_cache};
use super::state::AppRouterState;
use super::{Effect, FetchOutcome, Reduction};
use crate::prefetch::{FetchStrategy, PrefetchLookup};
use crate::request::{FetchRequest, create_href_from_url};

pub(super) fn prefetch(state: &Arc<AppRouterState>, url: &str, strategy: FetchStrategy, now: u64) -> Reduction {
  let mut target = match state.resolve_url(url) {
    Ok(target) => target,
    Err(err) => {
      tracing::warn!(url, %err, "ignoring prefetch of an invalid url");
      return Reduction::unchanged(state);
    }
  };
  if !state.is_same_origin(&target) {
    tracing::trace!(url = %target, "not prefetching another origin");
    return Reduction::unchanged(state);
  }
  target.set_fragment(None);
  let href = create_href_from_url(&target, false);

  let prefetch_cache = pruned(&state.prefetch_cache, now);
  match prefetch_cache.lookup(&href, state.next_url.as_deref(), strategy, now) {
    PrefetchLookup::Hit { .. } => {
      tracing::trace!(href, ?strategy, "prefetch already cached");
      return Reduction::unchanged(state);
    }
    PrefetchLookup::Pending { request_id } => {
      tracing::trace!(href, request_id, "prefetch already in flight");
      return Reduction::unchanged(state);
    }
    PrefetchLookup::Partial { .. } | PrefetchLookup::Miss => {}
  }

  let id = state.next_request_id;
  let next_url = state.next_url.as_deref();
  let prefetch_cache = update_prefetch_cache(&prefetch_cache, |c| c.insert_pending(&href, next_url, strategy, id, now));
  let request = FetchRequest {
    id,
    url: target,
    strategy,
    router_state: Arc::clone(&state.tree),
    next_url: state.next_url.clone(),
    is_hmr_refresh: false,
  };
  let next = AppRouterState { prefetch_cache, next_request_id: id + 1, ..AppRouterState::clone(state) };
  Reduction::commit(next).with_effect(Effect::Fetch(request))
}

pub(super) fn resolve(state: &Arc<AppRouterState>, request_id: u64, outcome: FetchOutcome, now: u64) -> Reduction {
  let prefetch_cache = update_prefetch_cache(&state.prefetch_cache, |c| match outcome {
    FetchOutcome::Ok(response) => {
      c.resolve(request_id, Arc::new(response), now);
    }
    FetchOutcome::Failed(message) => {
      tracing::warn!(request_id, %message, "prefetch failed");
      c.reject(request_id);
    }
  });
  Reduction::commit(AppRouterState { prefetch_cache, ..AppRouterState::clone(state) })
}

/* src/client/router/rust/src/reducer/server_action.rs */

use std::sync::Arc;

use super::apply::{Applied, FillMode, Mutable, apply_flight_response, handle_external_url, handle_mutable};
use super::refresh::{self, RefreshMode};
use super::state::AppRouterState;
use super::{NavigateType, Reduction, ServerActionResult, navigate};
use crate::prefetch::PrefetchCache;
use crate::request::create_href_from_url;

/// A server action may have mutated anything, so prefetched data is dropped
/// before the response is applied.
pub(super) fn server_action(state: &Arc<AppRouterState>, result: ServerActionResult, now: u64) -> Reduction {
  let cleared = Arc::new(AppRouterState {
    prefetch_cache: Arc::new(PrefetchCache::new(&state.config)),
    ..AppRouterState::clone(state)
  });

  match result {
    ServerActionResult { flight_data: Some(response), redirect_location, .. } => {
      let push = redirect_location.is_some();
      let canonical = match redirect_location.as_deref().map(|loc| cleared.resolve_url(loc)) {
        Some(Ok(target)) if !cleared.is_same_origin(&target) => {
          return handle_external_url(&cleared, target.as_str(), true);
        }
        Some(Ok(target)) => create_href_from_url(&target, true),
        Some(Err(err)) => {
          tracing::warn!(%err, "server action redirected to an invalid url");
          cleared.canonical_url.clone()
        }
        None => cleared.canonical_url.clone(),
      };

      match apply_flight_response(&cleared, &response, &canonical, now, FillMode::Full) {
        Applied::Tree { tree, cache, scrollable_segments } => {
          let mut next = handle_mutable(
            &cleared,
            Mutable {
              canonical_url: Some(canonical),
              tree: Some(Arc::new(tree)),
              cache: Some(cache),
              pending_push: Some(push),
              preserve_custom_history_state: Some(false),
              scrollable_segments: push.then_some(scrollable_segments),
              should_scroll: Some(push),
              ..Mutable::default()
            },
          );
          if push {
            next.pending = None;
          }
          Reduction::commit(next)
        }
        Applied::Mpa(url) => handle_external_url(&cleared, &url, push),
      }
    }
    ServerActionResult { flight_data: None, redirect_location: Some(location), .. } => {
      navigate::navigate(&cleared, &location, NavigateType::Push, true, now)
    }
    ServerActionResult { revalidated: true, .. } => refresh::refresh(&cleared, RefreshMode::Refresh, now),
    ServerActionResult { .. } => Reduction { state: cleared, effects: Vec::new() },
  }
}

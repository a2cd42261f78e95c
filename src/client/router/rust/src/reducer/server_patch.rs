/* src/client/router/rust/src/reducer/server_patch.rs */

use std::sync::Arc;

use super::apply::{Applied, FillMode, Mutable, apply_flight_response, handle_external_url, handle_mutable};
use super::state::AppRouterState;
use super::Reduction;
use crate::flight::FlightResponse;
use crate::request::create_href_from_url;
use crate::router_state::FlightRouterState;

/// Apply data the rendering layer fetched lazily for a pending segment.
/// Patches rendered against a tree that has since changed are dropped.
pub(super) fn server_patch(
  state: &Arc<AppRouterState>,
  previous_tree: &FlightRouterState,
  response: &FlightResponse,
  now: u64,
) -> Reduction {
  if *state.tree != *previous_tree {
    tracing::debug!("discarding server patch for an outdated tree");
    return Reduction::unchanged(state);
  }

  let canonical = match response.canonical_url.as_deref().map(|u| state.resolve_url(u)) {
    Some(Ok(redirected)) => create_href_from_url(&redirected, true),
    _ => state.canonical_url.clone(),
  };
  match apply_flight_response(state, response, &canonical, now, FillMode::Full) {
    Applied::Tree { tree, cache, .. } => Reduction::commit(handle_mutable(
      state,
      Mutable {
        canonical_url: Some(canonical),
        tree: Some(Arc::new(tree)),
        cache: Some(cache),
        pending_push: Some(false),
        should_scroll: Some(false),
        ..Mutable::default()
      },
    )),
    Applied::Mpa(url) => handle_external_url(state, &url, false),
  }
}

/* src/client/router/rust/src/reducer/restore.rs */

use std::sync::Arc;

use super::state::{AppRouterState, HistoryState, PushRef};
use super::Reduction;
use crate::request::create_href_from_url;

/// Back/forward: show the tree stored in the history entry without
/// fetching. Segments missing from the cache load lazily.
pub(super) fn restore(state: &Arc<AppRouterState>, url: &str, history_state: Option<HistoryState>) -> Reduction {
  let target = match state.resolve_url(url) {
    Ok(target) => target,
    Err(err) => {
      tracing::warn!(url, %err, "ignoring popstate with an invalid url");
      return Reduction::unchanged(state);
    }
  };
  let canonical_url = create_href_from_url(&target, true);
  let tree = match history_state {
    Some(history) => Arc::new(history.tree),
    None => {
      tracing::debug!(href = %canonical_url, "history entry carries no router state, keeping current tree");
      Arc::clone(&state.tree)
    }
  };
  if let Some(pending) = &state.pending {
    tracing::debug!(superseded = pending.id, "popstate supersedes pending request");
  }

  let next_url = tree.extract_path().or_else(|| Some(target.path().to_string()));
  Reduction::commit(AppRouterState {
    canonical_url,
    push_ref: PushRef { pending_push: false, mpa_navigation: false, preserve_custom_history_state: true },
    next_url,
    previous_next_url: None,
    tree,
    pending: None,
    ..AppRouterState::clone(state)
  })
}

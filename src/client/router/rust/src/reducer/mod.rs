/* src/client/router/rust/src/reducer/mod.rs */

//! Pure state transitions. `reduce` never performs I/O: fetches and
//! document loads come back as [`Effect`]s for the caller to run.

mod apply;
mod navigate;
mod prefetch;
mod refresh;
mod restore;
mod server_action;
mod server_patch;
mod state;


use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use state::{
  AppRouterState, FocusAndScrollRef, HistoryState, InitialRouterStateOptions, PendingKind, PendingRequest,
  PushRef, create_initial_router_state,
};

use crate::flight::FlightResponse;
use crate::prefetch::FetchStrategy;
use crate::request::FetchRequest;
use crate::router_state::FlightRouterState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigateType {
  #[default]
  Push,
  Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchOutcome {
  Ok(FlightResponse),
  Failed(String),
}

/// What a server action's response asked the router to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerActionResult {
  #[serde(default)]
  pub flight_data: Option<FlightResponse>,
  #[serde(default)]
  pub redirect_location: Option<String>,
  /// Server data changed but no new tree was sent along.
  #[serde(default)]
  pub revalidated: bool,
}

fn default_should_scroll() -> bool {
  true
}

fn default_prefetch_strategy() -> FetchStrategy {
  FetchStrategy::Full
}

/// Everything that can happen to the router. `now` is wall-clock
/// milliseconds, supplied by the caller so reduction stays deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Action {
  Navigate {
    url: String,
    #[serde(default)]
    navigate_type: NavigateType,
    #[serde(default = "default_should_scroll")]
    should_scroll: bool,
    now: u64,
  },
  Prefetch {
    url: String,
    #[serde(default = "default_prefetch_strategy")]
    strategy: FetchStrategy,
    now: u64,
  },
  FetchResolved {
    request_id: u64,
    outcome: FetchOutcome,
    now: u64,
  },
  Restore {
    url: String,
    #[serde(default)]
    history_state: Option<HistoryState>,
    now: u64,
  },
  Refresh {
    now: u64,
  },
  HmrRefresh {
    now: u64,
  },
  FastRefresh {
    now: u64,
  },
  ServerAction {
    result: ServerActionResult,
    now: u64,
  },
  ServerPatch {
    previous_tree: FlightRouterState,
    response: FlightResponse,
    now: u64,
  },
}

/// Work the caller must perform after a reduction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Effect {
  /// Fetch flight data and dispatch `fetch-resolved` with `request.id`.
  Fetch(FetchRequest),
  /// Load `url` as a new document.
  MpaNavigation { url: String, replace: bool },
}

#[derive(Debug, Clone)]
pub struct Reduction {
  pub state: Arc<AppRouterState>,
  pub effects: Vec<Effect>,
}

impl Reduction {
  pub(crate) fn unchanged(state: &Arc<AppRouterState>) -> Self {
    Self { state: Arc::clone(state), effects: Vec::new() }
  }

  pub(crate) fn commit(state: AppRouterState) -> Self {
    Self { state: Arc::new(state), effects: Vec::new() }
  }

  pub(crate) fn with_effect(mut self, effect: Effect) -> Self {
    self.effects.push(effect);
    self
  }

  pub fn is_unchanged(&self, previous: &Arc<AppRouterState>) -> bool {
    Arc::ptr_eq(&self.state, previous) && self.effects.is_empty()
  }
}

pub fn reduce(state: &Arc<AppRouterState>, action: Action) -> Reduction {
  match action {
    Action::Navigate { url, navigate_type, should_scroll, now } => {
      navigate::navigate(state, &url, navigate_type, should_scroll, now)
    }
    Action::Prefetch { url, strategy, now } => prefetch::prefetch(state, &url, strategy, now),
    Action::FetchResolved { request_id, outcome, now } => fetch_resolved(state, request_id, outcome, now),
    Action::Restore { url, history_state, .. } => restore::restore(state, &url, history_state),
    Action::Refresh { now } => refresh::refresh(state, refresh::RefreshMode::Refresh, now),
    Action::HmrRefresh { now } => refresh::refresh(state, refresh::RefreshMode::Hmr, now),
    Action::FastRefresh { now } => refresh::refresh(state, refresh::RefreshMode::Fast, now),
    Action::ServerAction { result, now } => server_action::server_action(state, result, now),
    Action::ServerPatch { previous_tree, response, now } => {
      server_patch::server_patch(state, &previous_tree, &response, now)
    }
  }
}

/// Route a fetch result to whichever request is still waiting on it.
fn fetch_resolved(state: &Arc<AppRouterState>, request_id: u64, outcome: FetchOutcome, now: u64) -> Reduction {
  if let Some(pending) = state.pending.as_ref().filter(|p| p.id == request_id) {
    let pending = pending.clone();
    return match pending.kind {
      PendingKind::Navigate { push, should_scroll } => {
        navigate::resolve(state, &pending, push, should_scroll, outcome, now)
      }
      PendingKind::Refresh => refresh::resolve(state, &pending, outcome),
    };
  }
  if state.prefetch_cache.find_pending(request_id).is_some() {
    return prefetch::resolve(state, request_id, outcome, now);
  }
  tracing::debug!(request_id, "discarding superseded flight response");
  Reduction::unchanged(state)
}

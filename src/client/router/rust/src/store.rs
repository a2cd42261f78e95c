/* src/client/router/rust/src/store.rs */

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

use crate::cache_node::CacheNode;
use crate::errors::FetchError;
use crate::flight::FlightResponse;
use crate::prefetch::FetchStrategy;
use crate::reducer::{
  Action, AppRouterState, Effect, FetchOutcome, FocusAndScrollRef, HistoryState, NavigateType, Reduction,
  ServerActionResult, reduce,
};
use crate::request::FetchRequest;
use crate::router_state::FlightRouterState;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Performs the flight fetches the reducer asks for.
pub trait FlightFetcher: Send + Sync {
  fn fetch(&self, request: FetchRequest) -> BoxFuture<Result<FlightResponse, FetchError>>;
}

/// The browser history API, or a stand-in for it.
pub trait HistoryAdapter: Send + Sync {
  fn push_state(&self, state: &HistoryState, href: &str);
  fn replace_state(&self, state: &HistoryState, href: &str);
  fn back(&self);
  fn forward(&self);
  /// Leave the application and load `url` as a new document.
  fn assign(&self, url: &str, replace: bool);
}

/// What the rendering layer reads on every commit.
#[derive(Debug, Clone)]
pub struct AppRouterContext {
  pub tree: Arc<FlightRouterState>,
  pub cache: Arc<CacheNode>,
  pub next_url: Option<String>,
  pub previous_next_url: Option<String>,
  pub focus_and_scroll_ref: FocusAndScrollRef,
}

/// Holds the current state and serializes reductions. Subscribers are
/// woken only when a reduction produced a new state.
pub struct RouterStore {
  sender: watch::Sender<Arc<AppRouterState>>,
}

impl RouterStore {
  pub fn new(initial: AppRouterState) -> Self {
    let (sender, _) = watch::channel(Arc::new(initial));
    Self { sender }
  }

  pub fn state(&self) -> Arc<AppRouterState> {
    Arc::clone(&*self.sender.borrow())
  }

  pub fn subscribe(&self) -> watch::Receiver<Arc<AppRouterState>> {
    self.sender.subscribe()
  }

  pub fn context(&self) -> AppRouterContext {
    let state = self.state();
    AppRouterContext {
      tree: Arc::clone(&state.tree),
      cache: Arc::clone(&state.cache),
      next_url: state.next_url.clone(),
      previous_next_url: state.previous_next_url.clone(),
      focus_and_scroll_ref: state.focus_and_scroll_ref.clone(),
    }
  }

  pub fn dispatch(&self, action: Action) -> Vec<Effect> {
    self.apply(action).1.effects
  }

  /// Reduce `action` against the current state; returns the state it replaced.
  fn apply(&self, action: Action) -> (Arc<AppRouterState>, Reduction) {
    let mut previous = self.state();
    let mut reduction = Reduction { state: Arc::clone(&previous), effects: Vec::new() };
    self.sender.send_if_modified(|current| {
      previous = Arc::clone(current);
      reduction = reduce(current, action);
      let changed = !Arc::ptr_eq(current, &reduction.state);
      *current = Arc::clone(&reduction.state);
      changed
    });
    (previous, reduction)
  }
}

fn system_now() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}

/// Imperative router API: dispatches actions, runs their effects and keeps
/// browser history in step with committed URLs.
pub struct AppRouter {
  store: RouterStore,
  fetcher: Arc<dyn FlightFetcher>,
  history: Arc<dyn HistoryAdapter>,
  clock: fn() -> u64,
}

impl AppRouter {
  pub fn new(store: RouterStore, fetcher: Arc<dyn FlightFetcher>, history: Arc<dyn HistoryAdapter>) -> Self {
    Self { store, fetcher, history, clock: system_now }
  }

  pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
    self.clock = clock;
    self
  }

  pub fn store(&self) -> &RouterStore {
    &self.store
  }

  pub async fn push(&self, href: &str) {
    self.navigate(href, NavigateType::Push).await;
  }

  pub async fn replace(&self, href: &str) {
    self.navigate(href, NavigateType::Replace).await;
  }

  async fn navigate(&self, href: &str, navigate_type: NavigateType) {
    let now = (self.clock)();
    let effects =
      self.dispatch(Action::Navigate { url: href.to_string(), navigate_type, should_scroll: true, now });
    self.run(effects).await;
  }

  pub fn back(&self) {
    self.history.back();
  }

  pub fn forward(&self) {
    self.history.forward();
  }

  pub async fn refresh(&self) {
    let effects = self.dispatch(Action::Refresh { now: (self.clock)() });
    self.run(effects).await;
  }

  pub async fn hmr_refresh(&self) {
    let effects = self.dispatch(Action::HmrRefresh { now: (self.clock)() });
    self.run(effects).await;
  }

  pub async fn prefetch(&self, href: &str, strategy: FetchStrategy) {
    let effects = self.dispatch(Action::Prefetch { url: href.to_string(), strategy, now: (self.clock)() });
    self.run(effects).await;
  }

  /// Call from the host's `popstate` listener.
  pub fn on_popstate(&self, href: &str, history_state: Option<HistoryState>) {
    let effects = self.dispatch(Action::Restore { url: href.to_string(), history_state, now: (self.clock)() });
    debug_assert!(effects.is_empty());
  }

  pub async fn server_action(&self, result: ServerActionResult) {
    let effects = self.dispatch(Action::ServerAction { result, now: (self.clock)() });
    self.run(effects).await;
  }

  pub async fn server_patch(&self, previous_tree: FlightRouterState, response: FlightResponse) {
    let effects = self.dispatch(Action::ServerPatch { previous_tree, response, now: (self.clock)() });
    self.run(effects).await;
  }

  fn dispatch(&self, action: Action) -> Vec<Effect> {
    let (previous, reduction) = self.store.apply(action);
    self.sync_history(&previous, &reduction.state);
    reduction.effects
  }

  fn sync_history(&self, previous: &Arc<AppRouterState>, next: &Arc<AppRouterState>) {
    if Arc::ptr_eq(previous, next) || next.push_ref.mpa_navigation || next.push_ref.preserve_custom_history_state {
      return;
    }
    if previous.canonical_url == next.canonical_url && Arc::ptr_eq(&previous.tree, &next.tree) {
      return;
    }
    let entry = HistoryState { tree: FlightRouterState::clone(&next.tree) };
    if next.push_ref.pending_push && previous.canonical_url != next.canonical_url {
      self.history.push_state(&entry, &next.canonical_url);
    } else {
      self.history.replace_state(&entry, &next.canonical_url);
    }
  }

  /// Perform effects until the reducer stops asking for more.
  async fn run(&self, effects: Vec<Effect>) {
    let mut queue = VecDeque::from(effects);
    while let Some(effect) = queue.pop_front() {
      match effect {
        Effect::Fetch(request) => {
          let request_id = request.id;
          let outcome = match self.fetcher.fetch(request).await {
            Ok(response) => FetchOutcome::Ok(response),
            Err(err) => FetchOutcome::Failed(err.to_string()),
          };
          queue.extend(self.dispatch(Action::FetchResolved { request_id, outcome, now: (self.clock)() }));
        }
        Effect::MpaNavigation { url, replace } => {
          tracing::debug!(%url, replace, "loading document");
          self.history.assign(&url, replace);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use serde_json::json;
  use url::Url;

  use super::*;
  use crate::config::RouterConfig;
  use crate::reducer::{InitialRouterStateOptions, create_initial_router_state};

  fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
  }

  fn route(name: &str) -> FlightResponse {
    FlightResponse::from_value(&json!({
      "b": "build-1",
      "f": [[
        "children", name,
        [name, {"children": ["__PAGE__", {}]}],
        [format!("{name}-layout"), {"children": [format!("{name}-page"), {}, null]}, null],
        null,
        false
      ]]
    }))
    .unwrap()
  }

  fn store() -> RouterStore {
    let response = FlightResponse::from_value(&json!({
      "b": "build-1",
      "f": [[
        ["", {"children": ["__PAGE__", {}]}, null, null, true],
        ["root", {"children": ["home", {}, null]}, null],
        null,
        false
      ]]
    }))
    .unwrap();
    let options = InitialRouterStateOptions {
      response,
      location: Url::parse("https://app.test/").unwrap(),
      config: RouterConfig::default(),
      prerendered: false,
      now: 0,
    };
    RouterStore::new(create_initial_router_state(options).unwrap())
  }

  #[derive(Default)]
  struct FakeFetcher {
    requests: Mutex<Vec<FetchRequest>>,
    fail: bool,
  }

  impl FlightFetcher for FakeFetcher {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<Result<FlightResponse, FetchError>> {
      let name = request.url.path().trim_start_matches('/').to_string();
      self.requests.lock().unwrap().push(request);
      let result = if self.fail { Err(FetchError::with_status(502, "bad gateway")) } else { Ok(route(&name)) };
      Box::pin(async move { result })
    }
  }

  #[derive(Default)]
  struct FakeHistory {
    events: Mutex<Vec<String>>,
  }

  impl FakeHistory {
    fn events(&self) -> Vec<String> {
      self.events.lock().unwrap().clone()
    }
  }

  impl HistoryAdapter for FakeHistory {
    fn push_state(&self, _state: &HistoryState, href: &str) {
      self.events.lock().unwrap().push(format!("push {href}"));
    }
    fn replace_state(&self, _state: &HistoryState, href: &str) {
      self.events.lock().unwrap().push(format!("replace {href}"));
    }
    fn back(&self) {
      self.events.lock().unwrap().push("back".to_string());
    }
    fn forward(&self) {
      self.events.lock().unwrap().push("forward".to_string());
    }
    fn assign(&self, url: &str, replace: bool) {
      self.events.lock().unwrap().push(format!("assign {url} {replace}"));
    }
  }

  fn router(fetcher: &Arc<FakeFetcher>, history: &Arc<FakeHistory>) -> AppRouter {
    init_tracing();
    let fetcher: Arc<dyn FlightFetcher> = Arc::clone(fetcher) as Arc<dyn FlightFetcher>;
    let history: Arc<dyn HistoryAdapter> = Arc::clone(history) as Arc<dyn HistoryAdapter>;
    AppRouter::new(store(), fetcher, history).with_clock(|| 1_000)
  }

  #[tokio::test]
  async fn push_fetches_commits_and_writes_history() {
    let fetcher = Arc::new(FakeFetcher::default());
    let history = Arc::new(FakeHistory::default());
    let router = router(&fetcher, &history);
    let updates = router.store().subscribe();

    router.push("/a").await;

    assert_eq!(router.store().state().canonical_url, "/a");
    assert_eq!(history.events(), vec!["push /a"]);
    assert!(updates.has_changed().unwrap());
    assert_eq!(fetcher.requests.lock().unwrap().len(), 1);

    router.replace("/b").await;
    assert_eq!(history.events(), vec!["push /a", "replace /b"]);
  }

  #[tokio::test]
  async fn prefetched_route_is_fetched_once() {
    let fetcher = Arc::new(FakeFetcher::default());
    let history = Arc::new(FakeHistory::default());
    let router = router(&fetcher, &history);

    router.prefetch("/a", FetchStrategy::Full).await;
    router.prefetch("/a", FetchStrategy::Full).await;
    router.push("/a").await;

    let requests = fetcher.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].strategy, FetchStrategy::Full);
    let context = router.store().context();
    assert!(context.tree.parallel_routes.contains_key("children"));
    assert_eq!(context.next_url.as_deref(), Some("/a"));
  }

  #[tokio::test]
  async fn failed_fetch_loads_the_document() {
    let fetcher = Arc::new(FakeFetcher { fail: true, ..FakeFetcher::default() });
    let history = Arc::new(FakeHistory::default());
    let router = router(&fetcher, &history);

    router.push("/a").await;
    assert_eq!(history.events(), vec!["assign https://app.test/a false"]);
    assert!(router.store().state().push_ref.mpa_navigation);
  }

  #[tokio::test]
  async fn popstate_restores_without_touching_history() {
    let fetcher = Arc::new(FakeFetcher::default());
    let history = Arc::new(FakeHistory::default());
    let router = router(&fetcher, &history);

    router.push("/a").await;
    router.back();
    router.on_popstate("/", None);

    assert_eq!(history.events(), vec!["push /a", "back"]);
    assert_eq!(router.store().state().canonical_url, "/");
  }

  #[tokio::test]
  async fn unchanged_dispatch_does_not_notify() {
    let fetcher = Arc::new(FakeFetcher::default());
    let history = Arc::new(FakeHistory::default());
    let router = router(&fetcher, &history);
    let updates = router.store().subscribe();

    let effects = router.store().dispatch(Action::Prefetch {
      url: "https://other.test/".into(),
      strategy: FetchStrategy::Full,
      now: 1,
    });
    assert!(effects.is_empty());
    assert!(!updates.has_changed().unwrap());
  }
}

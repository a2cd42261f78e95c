/* src/client/router/rust/src/prefetch.rs */

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RouterConfig;
use crate::flight::FlightResponse;

/// How much of a route a fetch asks the server for, least specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
  /// Static shell shared by every visitor.
  Full,
  /// Includes private, per-request data.
  Runtime,
  /// Fetched at navigation time.
  OnDemand,
}

impl FetchStrategy {
  pub const ALL: [FetchStrategy; 3] = [Self::Full, Self::Runtime, Self::OnDemand];

  pub fn specificity(self) -> u8 {
    match self {
      Self::Full => 0,
      Self::Runtime => 1,
      Self::OnDemand => 2,
    }
  }

  /// Whether a result fetched under `self` may serve a request under `requested`.
  /// A less specific result only qualifies once it has no dynamic holes left.
  pub fn can_satisfy(self, requested: FetchStrategy, complete: bool) -> bool {
    self == requested || (self.specificity() < requested.specificity() && complete)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrefetchKey {
  pub href: String,
  /// Set only for responses the server said could be intercepted.
  pub next_url: Option<String>,
  pub strategy: FetchStrategy,
}

impl PrefetchKey {
  pub fn new(href: impl Into<String>, next_url: Option<String>, strategy: FetchStrategy) -> Self {
    Self { href: href.into(), next_url, strategy }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrefetchData {
  /// `next_url` is the one the request was sent with.
  Pending { request_id: u64, next_url: Option<String> },
  Ready(Arc<FlightResponse>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchEntry {
  pub data: PrefetchData,
  /// No dynamic holes remain in the result.
  pub complete: bool,
  pub prefetch_time: u64,
  pub last_used_time: Option<u64>,
  pub expires_at: u64,
}

impl PrefetchEntry {
  fn recency(&self) -> u64 {
    self.last_used_time.unwrap_or(self.prefetch_time)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrefetchLookup {
  /// Reusable as is.
  Hit { key: PrefetchKey, response: Arc<FlightResponse> },
  /// Ready but incomplete: only good as an optimistic placeholder.
  Partial { key: PrefetchKey, response: Arc<FlightResponse> },
  /// Same request already in flight.
  Pending { request_id: u64 },
  Miss,
}

/// Per-session store of prefetched responses.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchCache {
  entries: BTreeMap<PrefetchKey, PrefetchEntry>,
  config: RouterConfig,
}

impl PrefetchCache {
  pub fn new(config: &RouterConfig) -> Self {
    Self { entries: BTreeMap::new(), config: config.clone() }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, key: &PrefetchKey) -> Option<&PrefetchEntry> {
    self.entries.get(key)
  }

  pub fn set(&mut self, key: PrefetchKey, entry: PrefetchEntry) {
    self.entries.insert(key, entry);
    self.evict_over_capacity();
  }

  /// Find the best usable entry for `href` under `strategy`.
  ///
  /// Keys scoped to `next_url` are tried before unscoped ones, and within a
  /// scope the requested strategy before less specific ones.
  pub fn lookup(&self, href: &str, next_url: Option<&str>, strategy: FetchStrategy, now: u64) -> PrefetchLookup {
    let scopes = next_url.map(str::to_string).into_iter().map(Some).chain(std::iter::once(None));
    let mut pending = None;
    let mut partial = None;

    for scope in scopes {
      for candidate in FetchStrategy::ALL.iter().rev().copied() {
        let key = PrefetchKey::new(href, scope.clone(), candidate);
        let Some(entry) = self.entries.get(&key).filter(|e| e.expires_at > now) else {
          continue;
        };
        match &entry.data {
          PrefetchData::Ready(response) if candidate.can_satisfy(strategy, entry.complete) => {
            return PrefetchLookup::Hit { key, response: Arc::clone(response) };
          }
          PrefetchData::Ready(response) if candidate.specificity() < strategy.specificity() => {
            if partial.is_none() {
              partial = Some(PrefetchLookup::Partial { key, response: Arc::clone(response) });
            }
          }
          PrefetchData::Pending { request_id, .. } if candidate == strategy => {
            pending.get_or_insert(PrefetchLookup::Pending { request_id: *request_id });
          }
          _ => {}
        }
      }
    }
    pending.or(partial).unwrap_or(PrefetchLookup::Miss)
  }

  /// Record an in-flight prefetch. The scope is unknown until the response says
  /// whether it could be intercepted, so pending entries are unscoped.
  pub fn insert_pending(
    &mut self,
    href: &str,
    next_url: Option<&str>,
    strategy: FetchStrategy,
    request_id: u64,
    now: u64,
  ) {
    let entry = PrefetchEntry {
      data: PrefetchData::Pending { request_id, next_url: next_url.map(str::to_string) },
      complete: false,
      prefetch_time: now,
      last_used_time: None,
      expires_at: now.saturating_add(self.config.stale_time_for(strategy)),
    };
    self.set(PrefetchKey::new(href, None, strategy), entry);
  }

  /// Key of the pending entry waiting on `request_id`.
  pub fn find_pending(&self, request_id: u64) -> Option<&PrefetchKey> {
    self.entries.iter().find_map(|(key, entry)| match entry.data {
      PrefetchData::Pending { request_id: id, .. } if id == request_id => Some(key),
      _ => None,
    })
  }

  /// Settle the pending entry for `request_id`. Returns `false` when no entry
  /// waits on that id any more, i.e. the response is stale.
  pub fn resolve(&mut self, request_id: u64, response: Arc<FlightResponse>, now: u64) -> bool {
    let Some(key) = self.find_pending(request_id).cloned() else {
      return false;
    };
    let Some(pending) = self.entries.remove(&key) else {
      return false;
    };
    let next_url = match pending.data {
      PrefetchData::Pending { next_url, .. } => next_url,
      PrefetchData::Ready(_) => None,
    };
    let scoped = PrefetchKey { next_url: next_url.filter(|_| response.could_be_intercepted), ..key };
    self.store_ready(scoped, response, pending.prefetch_time, now);
    true
  }

  /// Drop the pending entry for a failed prefetch.
  pub fn reject(&mut self, request_id: u64) -> bool {
    match self.find_pending(request_id).cloned() {
      Some(key) => self.entries.remove(&key).is_some(),
      None => false,
    }
  }

  /// Store a response that did not go through a pending prefetch, such as a
  /// navigation result or the initial document's payload.
  pub fn insert_ready(
    &mut self,
    href: &str,
    next_url: Option<&str>,
    strategy: FetchStrategy,
    response: Arc<FlightResponse>,
    now: u64,
  ) {
    let scope = next_url.filter(|_| response.could_be_intercepted).map(str::to_string);
    self.store_ready(PrefetchKey::new(href, scope, strategy), response, now, now);
  }

  fn store_ready(&mut self, key: PrefetchKey, response: Arc<FlightResponse>, prefetch_time: u64, now: u64) {
    let ttl = response
      .stale_time
      .map_or_else(|| self.config.stale_time_for(key.strategy), |secs| secs.saturating_mul(1000));
    let entry = PrefetchEntry {
      complete: !response.postponed,
      data: PrefetchData::Ready(response),
      prefetch_time,
      last_used_time: None,
      expires_at: now.saturating_add(ttl),
    };
    self.set(key, entry);
  }

  pub fn mark_used(&mut self, key: &PrefetchKey, now: u64) {
    if let Some(entry) = self.entries.get_mut(key) {
      entry.last_used_time = Some(now);
    }
  }

  /// Invalidate every entry for `href`, whatever its strategy or scope.
  pub fn remove(&mut self, href: &str) {
    self.entries.retain(|key, _| key.href != href);
  }

  pub fn has_expired(&self, now: u64) -> bool {
    self.entries.values().any(|entry| entry.expires_at <= now)
  }

  pub fn prune(&mut self, now: u64) {
    let before = self.entries.len();
    self.entries.retain(|_, entry| entry.expires_at > now);
    let evicted = before - self.entries.len();
    if evicted > 0 {
      tracing::trace!(evicted, "pruned expired prefetch entries");
    }
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  fn evict_over_capacity(&mut self) {
    while self.entries.len() > self.config.max_prefetch_entries {
      let oldest = self.entries.iter().min_by_key(|(_, entry)| entry.recency()).map(|(key, _)| key.clone());
      match oldest {
        Some(key) => {
          tracing::trace!(href = %key.href, "evicting least recently used prefetch entry");
          self.entries.remove(&key);
        }
        None => break,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::flight::normalize_flight_data;

  fn response(postponed: bool) -> Arc<FlightResponse> {
    let data = normalize_flight_data(&json!([[["__PAGE__", {}], ["p", {}, null], null, false]])).unwrap();
    Arc::new(FlightResponse { postponed, ..FlightResponse::new("b", data) })
  }

  fn cache() -> PrefetchCache {
    PrefetchCache::new(&RouterConfig::default())
  }

  #[test]
  fn strategy_lattice() {
    use FetchStrategy::*;
    assert!(Full.can_satisfy(Full, false));
    assert!(Full.can_satisfy(Runtime, true));
    assert!(!Full.can_satisfy(Runtime, false));
    assert!(!Runtime.can_satisfy(Full, true));
    assert!(!OnDemand.can_satisfy(Runtime, true));
    assert!(Runtime.can_satisfy(OnDemand, true));
  }

  #[test]
  fn huge_stale_times_never_expire_early() {
    let now = 1_700_000_000_000;
    let mut cache = cache();
    let long_lived = FlightResponse { stale_time: Some(18_446_744_073_709_551), ..FlightResponse::clone(&response(false)) };
    cache.insert_ready("/a", None, FetchStrategy::Full, Arc::new(long_lived), now);
    assert!(matches!(cache.lookup("/a", None, FetchStrategy::Full, now + 1), PrefetchLookup::Hit { .. }));

    let config = RouterConfig { static_stale_time_ms: u64::MAX, ..RouterConfig::default() };
    let mut cache = PrefetchCache::new(&config);
    cache.insert_pending("/b", None, FetchStrategy::Full, 7, now);
    assert!(cache.resolve(7, response(false), now));
    assert!(!cache.has_expired(now + 1));
  }

  #[test]
  fn incomplete_full_entry_does_not_serve_runtime_requests() {
    let mut cache = cache();
    cache.insert_ready("/a", None, FetchStrategy::Full, response(true), 0);
    assert!(matches!(cache.lookup("/a", None, FetchStrategy::Runtime, 1), PrefetchLookup::Partial { .. }));
    assert!(matches!(cache.lookup("/a", None, FetchStrategy::Full, 1), PrefetchLookup::Hit { .. }));
  }

  #[test]
  fn complete_full_entry_serves_runtime_requests() {
    let mut cache = cache();
    cache.insert_ready("/a", None, FetchStrategy::Full, response(false), 0);
    let PrefetchLookup::Hit { key, .. } = cache.lookup("/a", None, FetchStrategy::Runtime, 1) else {
      panic!("expected hit");
    };
    assert_eq!(key.strategy, FetchStrategy::Full);
  }

  #[test]
  fn more_specific_entries_never_serve_general_requests() {
    let mut cache = cache();
    cache.insert_ready("/a", None, FetchStrategy::Runtime, response(false), 0);
    assert_eq!(cache.lookup("/a", None, FetchStrategy::Full, 1), PrefetchLookup::Miss);
  }

  #[test]
  fn pending_entries_deduplicate() {
    let mut cache = cache();
    cache.insert_pending("/a", None, FetchStrategy::Full, 7, 0);
    assert_eq!(cache.lookup("/a", None, FetchStrategy::Full, 1), PrefetchLookup::Pending { request_id: 7 });
    assert_eq!(cache.lookup("/a", None, FetchStrategy::Runtime, 1), PrefetchLookup::Miss);

    assert!(!cache.resolve(8, response(false), 2));
    assert!(cache.resolve(7, response(false), 2));
    let entry = cache.get(&PrefetchKey::new("/a", None, FetchStrategy::Full)).unwrap();
    assert!(entry.complete);
    assert_eq!(entry.prefetch_time, 0);
    assert!(!cache.resolve(7, response(false), 3));
  }

  #[test]
  fn rejected_prefetch_is_dropped() {
    let mut cache = cache();
    cache.insert_pending("/a", None, FetchStrategy::Full, 1, 0);
    assert!(cache.reject(1));
    assert!(cache.is_empty());
    assert!(!cache.reject(1));
  }

  #[test]
  fn entries_expire() {
    let mut cache = cache();
    cache.insert_ready("/a", None, FetchStrategy::OnDemand, response(false), 0);
    assert!(matches!(cache.lookup("/a", None, FetchStrategy::OnDemand, 29_999), PrefetchLookup::Hit { .. }));
    assert_eq!(cache.lookup("/a", None, FetchStrategy::OnDemand, 30_000), PrefetchLookup::Miss);
    assert!(cache.has_expired(30_000));
    cache.prune(30_000);
    assert!(cache.is_empty());
  }

  #[test]
  fn server_stale_time_overrides_default() {
    let mut cache = cache();
    let short = Arc::new(FlightResponse { stale_time: Some(5), ..(*response(false)).clone() });
    cache.insert_ready("/a", None, FetchStrategy::Full, short, 0);
    assert_eq!(cache.get(&PrefetchKey::new("/a", None, FetchStrategy::Full)).unwrap().expires_at, 5_000);
  }

  #[test]
  fn intercepted_responses_are_scoped_to_next_url() {
    let mut cache = cache();
    let intercepted = Arc::new(FlightResponse { could_be_intercepted: true, ..(*response(false)).clone() });
    cache.insert_ready("/photo/1", Some("/feed"), FetchStrategy::Full, intercepted, 0);
    cache.insert_ready("/photo/1", Some("/feed"), FetchStrategy::OnDemand, response(false), 0);

    let PrefetchLookup::Hit { key, .. } = cache.lookup("/photo/1", Some("/feed"), FetchStrategy::Full, 1) else {
      panic!("expected hit");
    };
    assert_eq!(key.next_url.as_deref(), Some("/feed"));
    assert_eq!(cache.lookup("/photo/1", None, FetchStrategy::Full, 1), PrefetchLookup::Miss);
    let PrefetchLookup::Hit { key, .. } = cache.lookup("/photo/1", None, FetchStrategy::OnDemand, 1) else {
      panic!("expected hit");
    };
    assert_eq!(key.next_url, None);
  }

  #[test]
  fn resolved_intercepted_prefetch_uses_request_next_url() {
    let mut cache = cache();
    cache.insert_pending("/photo/1", Some("/feed"), FetchStrategy::Full, 3, 0);
    let intercepted = Arc::new(FlightResponse { could_be_intercepted: true, ..(*response(false)).clone() });
    assert!(cache.resolve(3, intercepted, 1));
    assert!(cache.get(&PrefetchKey::new("/photo/1", Some("/feed".into()), FetchStrategy::Full)).is_some());
    assert!(cache.get(&PrefetchKey::new("/photo/1", None, FetchStrategy::Full)).is_none());
  }

  #[test]
  fn evicts_least_recently_used() {
    let config = RouterConfig { max_prefetch_entries: 2, ..RouterConfig::default() };
    let mut cache = PrefetchCache::new(&config);
    cache.insert_ready("/a", None, FetchStrategy::Full, response(false), 0);
    cache.insert_ready("/b", None, FetchStrategy::Full, response(false), 1);
    cache.mark_used(&PrefetchKey::new("/a", None, FetchStrategy::Full), 2);
    cache.insert_ready("/c", None, FetchStrategy::Full, response(false), 3);

    assert_eq!(cache.len(), 2);
    assert!(cache.get(&PrefetchKey::new("/b", None, FetchStrategy::Full)).is_none());
    assert!(cache.get(&PrefetchKey::new("/a", None, FetchStrategy::Full)).is_some());
  }

  #[test]
  fn remove_drops_every_strategy() {
    let mut cache = cache();
    cache.insert_ready("/a", None, FetchStrategy::Full, response(false), 0);
    cache.insert_pending("/a", None, FetchStrategy::Runtime, 1, 0);
    cache.insert_ready("/b", None, FetchStrategy::Full, response(false), 0);
    cache.remove("/a");
    assert_eq!(cache.len(), 1);
  }
}

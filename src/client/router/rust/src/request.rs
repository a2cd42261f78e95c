/* src/client/router/rust/src/request.rs */

use std::sync::Arc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use url::Url;

use crate::prefetch::FetchStrategy;
use crate::router_state::FlightRouterState;

pub const RSC_HEADER: &str = "rsc";
pub const NEXT_ROUTER_STATE_TREE_HEADER: &str = "next-router-state-tree";
pub const NEXT_URL_HEADER: &str = "next-url";
pub const NEXT_ROUTER_PREFETCH_HEADER: &str = "next-router-prefetch";
pub const NEXT_HMR_REFRESH_HEADER: &str = "next-hmr-refresh";

/// Everything `encodeURIComponent` escapes.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

/// `pathname + search (+ hash)`, the form hrefs are keyed and stored by.
pub fn create_href_from_url(url: &Url, include_hash: bool) -> String {
  let mut href = url.path().to_string();
  if let Some(query) = url.query().filter(|q| !q.is_empty()) {
    href.push('?');
    href.push_str(query);
  }
  if include_hash && let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
    href.push('#');
    href.push_str(fragment);
  }
  href
}

/// Serialize the router state for the `next-router-state-tree` header.
/// Client-only data is stripped unless this is an HMR refresh.
pub fn encode_router_state_tree(tree: &FlightRouterState, is_hmr_refresh: bool) -> String {
  let value = if is_hmr_refresh { tree.to_value() } else { tree.strip_client_only_data().to_value() };
  utf8_percent_encode(&value.to_string(), URI_COMPONENT).to_string()
}

/// A flight fetch the reducer wants performed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
  /// Echoed back in `fetch-resolved` so stale responses can be recognized.
  pub id: u64,
  pub url: Url,
  pub strategy: FetchStrategy,
  pub router_state: Arc<FlightRouterState>,
  pub next_url: Option<String>,
  pub is_hmr_refresh: bool,
}

impl FetchRequest {
  pub fn headers(&self) -> Vec<(&'static str, String)> {
    let mut headers = vec![
      (RSC_HEADER, "1".to_string()),
      (NEXT_ROUTER_STATE_TREE_HEADER, encode_router_state_tree(&self.router_state, self.is_hmr_refresh)),
    ];
    if let Some(next_url) = &self.next_url {
      headers.push((NEXT_URL_HEADER, next_url.clone()));
    }
    match self.strategy {
      FetchStrategy::Full => headers.push((NEXT_ROUTER_PREFETCH_HEADER, "1".to_string())),
      FetchStrategy::Runtime => headers.push((NEXT_ROUTER_PREFETCH_HEADER, "2".to_string())),
      FetchStrategy::OnDemand => {}
    }
    if self.is_hmr_refresh {
      headers.push((NEXT_HMR_REFRESH_HEADER, "1".to_string()));
    }
    headers
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::router_state::RefreshMarker;
  use crate::segment::Segment;

  fn tree() -> FlightRouterState {
    FlightRouterState::new(Segment::literal("")).root_layout().with_children(FlightRouterState {
      url: Some("/a?x=1".into()),
      refresh: Some(RefreshMarker::Refresh),
      ..FlightRouterState::new(Segment::Page { search: Some("x=1".into()) })
    })
  }

  fn header<'a>(headers: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
  }

  #[test]
  fn href_from_url() {
    let url = Url::parse("https://example.com/a/b?x=1#top").unwrap();
    assert_eq!(create_href_from_url(&url, true), "/a/b?x=1#top");
    assert_eq!(create_href_from_url(&url, false), "/a/b?x=1");
    let bare = Url::parse("https://example.com/?#").unwrap();
    assert_eq!(create_href_from_url(&bare, true), "/");
  }

  #[test]
  fn state_tree_is_stripped_and_uri_encoded() {
    let encoded = encode_router_state_tree(&tree(), false);
    assert_eq!(encoded, "%5B%22%22%2C%7B%22children%22%3A%5B%22__PAGE__%22%2C%7B%7D%5D%7D%2Cnull%2Cnull%2Ctrue%5D");
    let hmr = encode_router_state_tree(&tree(), true);
    assert!(hmr.contains("refresh"));
  }

  #[test]
  fn prefetch_headers_by_strategy() {
    let mut request = FetchRequest {
      id: 1,
      url: Url::parse("https://example.com/a").unwrap(),
      strategy: FetchStrategy::Full,
      router_state: Arc::new(tree()),
      next_url: Some("/feed".into()),
      is_hmr_refresh: false,
    };
    let headers = request.headers();
    assert_eq!(header(&headers, RSC_HEADER), Some("1"));
    assert_eq!(header(&headers, NEXT_URL_HEADER), Some("/feed"));
    assert_eq!(header(&headers, NEXT_ROUTER_PREFETCH_HEADER), Some("1"));
    assert_eq!(header(&headers, NEXT_HMR_REFRESH_HEADER), None);

    request.strategy = FetchStrategy::Runtime;
    assert_eq!(header(&request.headers(), NEXT_ROUTER_PREFETCH_HEADER), Some("2"));

    request.strategy = FetchStrategy::OnDemand;
    request.is_hmr_refresh = true;
    request.next_url = None;
    let headers = request.headers();
    assert_eq!(header(&headers, NEXT_ROUTER_PREFETCH_HEADER), None);
    assert_eq!(header(&headers, NEXT_URL_HEADER), None);
    assert_eq!(header(&headers, NEXT_HMR_REFRESH_HEADER), Some("1"));
  }
}

/* src/client/router/rust/src/lib.rs */

//! Client-side router cache and navigation reducer.
//!
//! The router keeps a persistent tree of rendered segments (`CacheNode`)
//! alongside the route shape (`FlightRouterState`), merges server flight
//! data into both with structural sharing, and serves navigations from a
//! prefetch cache when it can. State transitions are pure; the `store`
//! module drives their effects.

pub mod cache_node;
pub mod config;
pub mod errors;
pub mod fill;
pub mod flight;
pub mod prefetch;
pub mod reducer;
pub mod request;
pub mod router_state;
pub mod segment;
pub mod store;

pub use cache_node::{CacheNode, Patch, Rsc, invalidate_cache_below_path, pending_segment_paths, with_patch};
pub use config::RouterConfig;
pub use errors::{FetchError, RouterError};
pub use fill::{
  fill_cache_with_new_subtree_data, fill_cache_with_new_subtree_data_but_only_loading,
  fill_lazy_items_till_leaf_with_head,
};
pub use flight::{
  FlightData, FlightResponse, NormalizedFlightData, SeedData, get_flight_data_parts_from_path,
  normalize_flight_data, read_flight_response,
};
pub use prefetch::{FetchStrategy, PrefetchCache, PrefetchKey, PrefetchLookup};
pub use reducer::{
  Action, AppRouterState, Effect, FetchOutcome, HistoryState, InitialRouterStateOptions, NavigateType,
  Reduction, ServerActionResult, create_initial_router_state, reduce,
};
pub use request::{FetchRequest, create_href_from_url, encode_router_state_tree};
pub use router_state::{FlightRouterState, RefreshMarker, apply_router_state_patch_to_tree};
pub use segment::{PathStep, Segment, SegmentPath, create_cache_key, match_segment};
pub use store::{AppRouter, AppRouterContext, BoxFuture, FlightFetcher, HistoryAdapter, RouterStore};

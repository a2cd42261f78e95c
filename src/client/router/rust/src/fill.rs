/* src/client/router/rust/src/fill.rs */

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache_node::{CacheNode, Patch, Rsc, same_payload, with_patch};
use crate::flight::{NormalizedFlightData, SeedData};
use crate::router_state::FlightRouterState;
use crate::segment::Segment;

/// Merge a server update into the cache, filling real content along the
/// whole patched subtree.
pub fn fill_cache_with_new_subtree_data(
  navigated_at: u64,
  existing: &Arc<CacheNode>,
  flight: &NormalizedFlightData,
) -> Arc<CacheNode> {
  fill_cache(navigated_at, existing, flight, true)
}

/// Like [`fill_cache_with_new_subtree_data`], but a terminal page segment
/// only receives its loading boundary. Used as an optimistic placeholder
/// while the full response is still in flight.
pub fn fill_cache_with_new_subtree_data_but_only_loading(
  navigated_at: u64,
  existing: &Arc<CacheNode>,
  flight: &NormalizedFlightData,
) -> Arc<CacheNode> {
  fill_cache(navigated_at, existing, flight, false)
}

fn fill_cache(
  navigated_at: u64,
  existing: &Arc<CacheNode>,
  flight: &NormalizedFlightData,
  fill_lazy_items: bool,
) -> Arc<CacheNode> {
  let (Some(seed), Some(terminal)) = (&flight.seed_data, flight.segment_path.last()) else {
    return Arc::clone(existing);
  };

  with_patch(existing, &flight.segment_path, |current| {
    if let Some(node) = current {
      if is_filled_from(node, &flight.tree, seed, fill_lazy_items, fill_lazy_items) {
        tracing::trace!(segment = ?terminal.segment, "segment already filled from this seed");
        return Patch::Keep;
      }
      if node.navigated_at > navigated_at {
        tracing::debug!(
          segment = ?terminal.segment,
          existing = node.navigated_at,
          incoming = navigated_at,
          "skipping stale fill"
        );
        return Patch::Keep;
      }
    }
    let node = build_node(
      navigated_at,
      current.map(|n| &**n),
      &flight.tree,
      seed,
      &terminal.segment,
      flight.head.as_ref(),
      fill_lazy_items,
    );
    Patch::Replace(Arc::new(node))
  })
}

/// Build a new root for a root render, keeping slots the tree does not name.
/// Without `fill_pages`, page segments only receive their loading boundary.
pub fn fill_root(
  navigated_at: u64,
  existing: &Arc<CacheNode>,
  tree: &FlightRouterState,
  seed: &SeedData,
  head: Option<&Rsc>,
  fill_pages: bool,
) -> Arc<CacheNode> {
  if is_filled_from(existing, tree, seed, fill_pages, true) {
    return Arc::clone(existing);
  }
  if existing.navigated_at > navigated_at {
    tracing::debug!(existing = existing.navigated_at, incoming = navigated_at, "skipping stale root fill");
    return Arc::clone(existing);
  }
  let mut node = CacheNode {
    rsc: rsc_for(seed, &tree.segment, fill_pages),
    loading: seed.loading.clone(),
    parallel_routes: existing.parallel_routes.clone(),
    navigated_at,
    ..CacheNode::default()
  };
  invalidate_cache_by_router_state(&mut node, tree);
  fill_children(navigated_at, &mut node, Some(existing), tree, Some(seed), head, fill_pages);
  Arc::new(node)
}

fn rsc_for(seed: &SeedData, segment: &Segment, fill_lazy_items: bool) -> Option<Rsc> {
  if fill_lazy_items || !segment.is_page() { seed.rsc.clone() } else { None }
}

/// A node counts as filled from `seed` when it holds the very payloads the
/// seed would install. With `deep`, every seeded descendant must as well,
/// so a subtree filled only with loading boundaries is not mistaken for a
/// complete one.
fn is_filled_from(node: &CacheNode, tree: &FlightRouterState, seed: &SeedData, fill_pages: bool, deep: bool) -> bool {
  if !same_payload(&node.rsc, &rsc_for(seed, &tree.segment, fill_pages)) || !same_payload(&node.loading, &seed.loading)
  {
    return false;
  }
  !deep
    || tree.parallel_routes.iter().all(|(slot, child_tree)| match seed.parallel_routes.get(slot) {
      Some(child_seed) => node
        .child(slot, &child_tree.segment.cache_key())
        .is_some_and(|child| is_filled_from(child, child_tree, child_seed, fill_pages, true)),
      None => true,
    })
}

fn build_node(
  navigated_at: u64,
  existing: Option<&CacheNode>,
  tree: &FlightRouterState,
  seed: &SeedData,
  segment: &Segment,
  head: Option<&Rsc>,
  fill_lazy_items: bool,
) -> CacheNode {
  let mut node = CacheNode {
    rsc: rsc_for(seed, segment, fill_lazy_items),
    loading: seed.loading.clone(),
    navigated_at,
    ..CacheNode::default()
  };
  if !fill_lazy_items {
    return node;
  }
  if let Some(existing) = existing {
    node.parallel_routes = existing.parallel_routes.clone();
    invalidate_cache_by_router_state(&mut node, tree);
  }
  fill_children(navigated_at, &mut node, existing, tree, Some(seed), head, true);
  node
}

/// Remove the children `tree` is about to re-render from `node`'s copied maps.
fn invalidate_cache_by_router_state(node: &mut CacheNode, tree: &FlightRouterState) {
  for (slot, child) in &tree.parallel_routes {
    if let Some(map) = node.parallel_routes.get_mut(slot) {
      map.remove(&child.segment.cache_key());
    }
  }
}

/// Populate `node`'s children from `tree` down to its leaves.
///
/// Seeded children are filled from the seed. Children without seed data
/// reuse the existing subtree when there is one and are otherwise left
/// pending for the rendering layer to fetch. Leaves receive `head`.
pub fn fill_lazy_items_till_leaf_with_head(
  navigated_at: u64,
  node: &mut CacheNode,
  existing: Option<&CacheNode>,
  tree: &FlightRouterState,
  seed: Option<&SeedData>,
  head: Option<&Rsc>,
) {
  fill_children(navigated_at, node, existing, tree, seed, head, true);
}

fn fill_children(
  navigated_at: u64,
  node: &mut CacheNode,
  existing: Option<&CacheNode>,
  tree: &FlightRouterState,
  seed: Option<&SeedData>,
  head: Option<&Rsc>,
  fill_pages: bool,
) {
  if tree.parallel_routes.is_empty() {
    node.head = head.cloned();
    return;
  }

  for (slot, child_tree) in &tree.parallel_routes {
    let key = child_tree.segment.cache_key();
    let child_seed = seed.and_then(|s| s.parallel_routes.get(slot));
    let existing_child = existing.and_then(|e| e.child(slot, &key));

    let child = match (child_seed, existing_child) {
      (Some(child_seed), _) => {
        let mut child = CacheNode {
          rsc: rsc_for(child_seed, &child_tree.segment, fill_pages),
          loading: child_seed.loading.clone(),
          parallel_routes: existing_child.map(|c| c.parallel_routes.clone()).unwrap_or_default(),
          navigated_at,
          ..CacheNode::default()
        };
        let existing_child = existing_child.map(|c| &**c);
        fill_children(navigated_at, &mut child, existing_child, child_tree, Some(child_seed), head, fill_pages);
        Arc::new(child)
      }
      (None, Some(existing_child)) => Arc::clone(existing_child),
      (None, None) => {
        let mut child = CacheNode::pending(navigated_at);
        fill_children(navigated_at, &mut child, None, child_tree, None, head, fill_pages);
        Arc::new(child)
      }
    };
    node.parallel_routes.entry(slot.clone()).or_insert_with(BTreeMap::new).insert(key, child);
  }
}

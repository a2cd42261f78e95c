/* src/client/router/rust/src/cache_node.rs */

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::router_state::FlightRouterState;
use crate::segment::{PathStep, SegmentPath};

/// Rendered payload for one segment. Shared by reference between tree
/// versions; identity is what the rendering layer diffs on.
pub type Rsc = Arc<Value>;

/// Cache key -> child node, for one parallel slot.
pub type ChildSegmentMap = BTreeMap<String, Arc<CacheNode>>;

/// Slot name -> child map. More than one key per slot may be mounted at
/// once, e.g. the outgoing and incoming segment during a transition.
pub type ParallelRoutes = BTreeMap<String, ChildSegmentMap>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheNode {
  /// `None` means pending: not loaded yet.
  pub rsc: Option<Rsc>,
  pub prefetch_rsc: Option<Rsc>,
  pub head: Option<Rsc>,
  pub prefetch_head: Option<Rsc>,
  pub loading: Option<Rsc>,
  pub parallel_routes: ParallelRoutes,
  pub navigated_at: u64,
}

impl CacheNode {
  pub fn pending(navigated_at: u64) -> Self {
    Self { navigated_at, ..Self::default() }
  }

  pub fn is_pending(&self) -> bool {
    self.rsc.is_none()
  }

  pub fn child(&self, slot: &str, key: &str) -> Option<&Arc<CacheNode>> {
    self.parallel_routes.get(slot)?.get(key)
  }

  /// Follow `path` from this node.
  pub fn descendant(&self, path: &[PathStep]) -> Option<&Arc<CacheNode>> {
    let (step, rest) = path.split_first()?;
    let child = self.child(&step.slot, &step.segment.cache_key())?;
    if rest.is_empty() { Some(child) } else { child.descendant(rest) }
  }
}

/// Outcome chosen by a [`with_patch`] producer for the terminal node.
pub enum Patch {
  Keep,
  Replace(Arc<CacheNode>),
  Remove,
}

/// Copy-on-write update of the node at `path`.
///
/// Every node strictly above the terminal is shallow-copied with exactly
/// one child entry swapped; everything else is shared with `root`. When
/// the producer keeps the node, or the existing tree has no slot map or
/// intermediate node along `path`, `root` itself is returned.
pub fn with_patch<F>(root: &Arc<CacheNode>, path: &[PathStep], producer: F) -> Arc<CacheNode>
where
  F: FnOnce(Option<&Arc<CacheNode>>) -> Patch,
{
  patch_at(root, path, producer).unwrap_or_else(|| Arc::clone(root))
}

fn patch_at<F>(node: &Arc<CacheNode>, path: &[PathStep], producer: F) -> Option<Arc<CacheNode>>
where
  F: FnOnce(Option<&Arc<CacheNode>>) -> Patch,
{
  let (step, rest) = path.split_first()?;
  let Some(children) = node.parallel_routes.get(&step.slot) else {
    tracing::trace!(slot = %step.slot, "no child map for slot, skipping patch");
    return None;
  };
  let key = step.segment.cache_key();
  let existing = children.get(&key);

  let replacement = if rest.is_empty() {
    match producer(existing) {
      Patch::Keep => return None,
      Patch::Replace(next) => Some(next),
      Patch::Remove => {
        existing?;
        None
      }
    }
  } else {
    let Some(child) = existing else {
      tracing::trace!(slot = %step.slot, key = %key, "intermediate node missing, skipping patch");
      return None;
    };
    Some(patch_at(child, rest, producer)?)
  };

  let mut next = CacheNode::clone(node);
  let slot_map = next.parallel_routes.entry(step.slot.clone()).or_default();
  match replacement {
    Some(child) => {
      slot_map.insert(key, child);
    }
    None => {
      slot_map.remove(&key);
    }
  }
  Some(Arc::new(next))
}

/// Drop the node at `path` so the rendering layer fetches it lazily.
pub fn invalidate_cache_below_path(root: &Arc<CacheNode>, path: &[PathStep]) -> Arc<CacheNode> {
  with_patch(root, path, |existing| if existing.is_some() { Patch::Remove } else { Patch::Keep })
}

/// Segments on the active route whose content still has to be fetched.
///
/// Stops descending at the first pending node of each branch.
pub fn pending_segment_paths(tree: &FlightRouterState, cache: &CacheNode) -> Vec<SegmentPath> {
  let mut out = Vec::new();
  collect_pending(tree, cache, &mut Vec::new(), &mut out);
  out
}

fn collect_pending(
  tree: &FlightRouterState,
  cache: &CacheNode,
  prefix: &mut SegmentPath,
  out: &mut Vec<SegmentPath>,
) {
  for (slot, child_tree) in &tree.parallel_routes {
    prefix.push(PathStep::new(slot.clone(), child_tree.segment.clone()));
    match cache.child(slot, &child_tree.segment.cache_key()) {
      Some(child) if !child.is_pending() => collect_pending(child_tree, child, prefix, out),
      _ => out.push(prefix.clone()),
    }
    prefix.pop();
  }
}

/// Payload identity, the cheap equality the rendering layer relies on.
pub fn same_payload(a: &Option<Rsc>, b: &Option<Rsc>) -> bool {
  match (a, b) {
    (None, None) => true,
    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::segment::Segment;

  fn leaf(label: &str) -> Arc<CacheNode> {
    Arc::new(CacheNode { rsc: Some(Arc::new(json!(label))), ..CacheNode::default() })
  }

  fn with_children(label: &str, children: &[(&str, Arc<CacheNode>)]) -> Arc<CacheNode> {
    let map = children.iter().map(|(k, v)| (k.to_string(), Arc::clone(v))).collect();
    Arc::new(CacheNode {
      rsc: Some(Arc::new(json!(label))),
      parallel_routes: BTreeMap::from([("children".to_string(), map)]),
      ..CacheNode::default()
    })
  }

  fn step(name: &str) -> PathStep {
    PathStep::children(Segment::literal(name))
  }

  #[test]
  fn replace_copies_only_the_path() {
    let one = leaf("one");
    let other = leaf("other");
    let shared = with_children("shared", &[("one", Arc::clone(&one))]);
    let root = with_children("root", &[("shared", Arc::clone(&shared)), ("other", Arc::clone(&other))]);

    let two = leaf("two");
    let next = with_patch(&root, &[step("shared"), step("two")], |existing| {
      assert!(existing.is_none());
      Patch::Replace(Arc::clone(&two))
    });

    assert!(!Arc::ptr_eq(&next, &root));
    assert!(Arc::ptr_eq(next.child("children", "other").unwrap(), &other));
    let next_shared = next.child("children", "shared").unwrap();
    assert!(!Arc::ptr_eq(next_shared, &shared));
    assert!(same_payload(&next_shared.rsc, &shared.rsc));
    assert!(Arc::ptr_eq(next_shared.child("children", "one").unwrap(), &one));
    assert!(Arc::ptr_eq(next_shared.child("children", "two").unwrap(), &two));
    // input untouched
    assert!(shared.child("children", "two").is_none());
  }

  #[test]
  fn keep_returns_same_root() {
    let root = with_children("root", &[("a", leaf("a"))]);
    let next = with_patch(&root, &[step("a")], |_| Patch::Keep);
    assert!(Arc::ptr_eq(&next, &root));
  }

  #[test]
  fn missing_slot_or_intermediate_bails_out() {
    let root = with_children("root", &[("a", leaf("a"))]);
    let missing_slot = [PathStep::new("modal", Segment::literal("x"))];
    assert!(Arc::ptr_eq(&with_patch(&root, &missing_slot, |_| Patch::Replace(leaf("x"))), &root));
    let missing_mid = [step("b"), step("c")];
    assert!(Arc::ptr_eq(&with_patch(&root, &missing_mid, |_| Patch::Replace(leaf("x"))), &root));
    assert!(Arc::ptr_eq(&with_patch(&root, &[], |_| Patch::Replace(leaf("x"))), &root));
  }

  #[test]
  fn invalidate_removes_terminal() {
    let root = with_children("root", &[("a", leaf("a")), ("b", leaf("b"))]);
    let next = invalidate_cache_below_path(&root, &[step("a")]);
    assert!(next.child("children", "a").is_none());
    assert!(Arc::ptr_eq(next.child("children", "b").unwrap(), root.child("children", "b").unwrap()));
    assert!(Arc::ptr_eq(&invalidate_cache_below_path(&next, &[step("a")]), &next));
  }

  #[test]
  fn pending_paths_follow_the_active_tree() {
    let pending = Arc::new(CacheNode::pending(0));
    let root = with_children("root", &[("a", with_children("a", &[("__PAGE__", pending)]))]);
    let tree = FlightRouterState::new(Segment::literal(""))
      .with_children(
        FlightRouterState::new(Segment::literal("a")).with_children(FlightRouterState::new(Segment::page())),
      )
      .with_child("modal", FlightRouterState::new(Segment::Default));

    let paths = pending_segment_paths(&tree, &root);
    assert_eq!(
      paths,
      vec![
        vec![step("a"), PathStep::children(Segment::page())],
        vec![PathStep::new("modal", Segment::Default)],
      ]
    );
  }

  #[test]
  fn descendant_lookup() {
    let root = with_children("root", &[("a", with_children("a", &[("b", leaf("b"))]))]);
    assert_eq!(root.descendant(&[step("a"), step("b")]).unwrap().rsc.as_deref(), Some(&json!("b")));
    assert!(root.descendant(&[step("z")]).is_none());
  }
}

/* src/client/router/wasm/src/lib.rs */

use std::sync::Arc;

use serde_json::{Map, Value, json};
use wasm_bindgen::prelude::*;

use seam_router::{
  Action, AppRouterState, Effect, FlightData, FlightRouterState, InitialRouterStateOptions, NormalizedFlightData,
  SeedData, Segment, create_initial_router_state, pending_segment_paths, reduce,
};

fn error_json(e: impl std::fmt::Display) -> String {
  json!({ "error": e.to_string() }).to_string()
}

fn parse_json(input: &str) -> Result<Value, String> {
  serde_json::from_str(input).map_err(|e| e.to_string())
}

// --- Wire helpers ---

/// Cache key for a segment, returned as a JSON string.
#[wasm_bindgen]
pub fn create_cache_key(segment_json: &str) -> String {
  let segment = parse_json(segment_json).and_then(|v| Segment::from_value(&v).map_err(|e| e.to_string()));
  match segment {
    Ok(segment) => Value::String(seam_router::create_cache_key(&segment)).to_string(),
    Err(e) => error_json(e),
  }
}

fn normalized_to_value(data: &NormalizedFlightData) -> Value {
  json!({
    "pathToSegment": data.path_to_segment,
    "segment": data.segment,
    "segmentPath": data.segment_path,
    "tree": data.tree,
    "seedData": data.seed_data.as_ref().map(SeedData::to_value),
    "head": data.head.as_deref(),
    "isHeadPartial": data.is_head_partial,
    "isRootRender": data.is_root_render,
  })
}

/// Normalized paths of a flight data field, or the MPA URL string.
#[wasm_bindgen]
pub fn normalize_flight_data(flight_data_json: &str) -> String {
  let data = parse_json(flight_data_json).and_then(|v| seam_router::normalize_flight_data(&v).map_err(|e| e.to_string()));
  match data {
    Ok(FlightData::MpaNavigation(url)) => Value::String(url).to_string(),
    Ok(FlightData::Paths(paths)) => Value::Array(paths.iter().map(normalized_to_value).collect()).to_string(),
    Err(e) => error_json(e),
  }
}

/// Header value for a router state tree. Not JSON: the encoded string itself.
#[wasm_bindgen]
pub fn encode_router_state_tree(tree_json: &str, is_hmr_refresh: bool) -> String {
  let tree = parse_json(tree_json).and_then(|v| FlightRouterState::from_value(&v).map_err(|e| e.to_string()));
  match tree {
    Ok(tree) => seam_router::encode_router_state_tree(&tree, is_hmr_refresh),
    Err(e) => error_json(e),
  }
}

// --- Router session ---

fn effect_to_value(effect: &Effect) -> Value {
  let mut value = serde_json::to_value(effect).unwrap_or(Value::Null);
  if let (Effect::Fetch(request), Value::Object(obj)) = (effect, &mut value) {
    let headers: Map<String, Value> =
      request.headers().into_iter().map(|(name, v)| (name.to_string(), Value::String(v))).collect();
    obj.insert("headers".to_string(), Value::Object(headers));
  }
  value
}

/// Reducer state held on the Rust side. The host dispatches actions,
/// performs the returned effects and reads snapshots back.
#[wasm_bindgen]
pub struct RouterSession {
  state: Arc<AppRouterState>,
}

fn init_state(options_json: &str) -> Result<AppRouterState, String> {
  let value = parse_json(options_json)?;
  let options = InitialRouterStateOptions::from_value(&value).map_err(|e| e.to_string())?;
  create_initial_router_state(options).map_err(|e| e.to_string())
}

#[wasm_bindgen]
impl RouterSession {
  #[wasm_bindgen(constructor)]
  pub fn new(options_json: &str) -> Result<RouterSession, JsValue> {
    let state = init_state(options_json).map_err(|e| JsValue::from_str(&e))?;
    Ok(Self { state: Arc::new(state) })
  }

  /// Returns `{"changed", "effects"}`. Fetch effects carry their request
  /// headers ready to send.
  pub fn dispatch(&mut self, action_json: &str) -> String {
    let action: Action = match serde_json::from_str(action_json) {
      Ok(action) => action,
      Err(e) => return error_json(e),
    };
    let reduction = reduce(&self.state, action);
    let changed = !Arc::ptr_eq(&reduction.state, &self.state);
    self.state = reduction.state;
    let effects: Vec<Value> = reduction.effects.iter().map(effect_to_value).collect();
    json!({ "changed": changed, "effects": effects }).to_string()
  }

  pub fn snapshot(&self) -> String {
    let s = &self.state;
    json!({
      "buildId": s.build_id,
      "canonicalUrl": s.canonical_url,
      "tree": s.tree.as_ref(),
      "pushRef": s.push_ref,
      "focusAndScrollRef": s.focus_and_scroll_ref,
      "nextUrl": s.next_url,
      "previousNextUrl": s.previous_next_url,
      "pending": s.pending,
    })
    .to_string()
  }

  pub fn cache(&self) -> String {
    serde_json::to_string(self.state.cache.as_ref()).unwrap_or_else(|_| "null".to_string())
  }

  /// State to store on the history entry for the committed URL.
  pub fn history_state(&self) -> String {
    json!({ "tree": self.state.tree.as_ref() }).to_string()
  }

  /// Segments whose data the rendering layer has to fetch lazily.
  pub fn pending_segment_paths(&self) -> String {
    serde_json::to_string(&pending_segment_paths(&self.state.tree, &self.state.cache))
      .unwrap_or_else(|_| "[]".to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const OPTIONS: &str = r#"{
    "location": "https://app.test/",
    "response": {
      "b": "build-1",
      "f": [[["", {"children": ["__PAGE__", {}]}, null, null, true],
             ["root", {"children": ["home", {}, null]}, null],
             "head", false]]
    }
  }"#;

  fn session() -> RouterSession {
    RouterSession { state: Arc::new(init_state(OPTIONS).unwrap()) }
  }

  #[test]
  fn cache_key_for_dynamic_segment() {
    assert_eq!(create_cache_key(r#"["slug","a","d"]"#), r#""slug|a|d""#);
    assert!(create_cache_key("{").contains("error"));
  }

  #[test]
  fn normalize_reports_mpa_and_paths() {
    assert_eq!(normalize_flight_data(r#""/login""#), r#""/login""#);
    let out: Value = serde_json::from_str(&normalize_flight_data(
      r#"[["children", "about", ["about", {}], null, null, false]]"#,
    ))
    .unwrap();
    assert_eq!(out[0]["segmentPath"][0]["slot"], "children");
    assert_eq!(out[0]["isRootRender"], false);
  }

  #[test]
  fn navigate_returns_fetch_with_headers() {
    let mut session = session();
    let out: Value =
      serde_json::from_str(&session.dispatch(r#"{"type":"navigate","url":"/about","now":1000}"#)).unwrap();
    assert_eq!(out["changed"], true);
    assert_eq!(out["effects"][0]["headers"]["rsc"], "1");

    let snapshot: Value = serde_json::from_str(&session.snapshot()).unwrap();
    assert_eq!(snapshot["canonicalUrl"], "/");
    assert!(!snapshot["pending"].is_null());
  }

  #[test]
  fn bad_action_is_reported() {
    let mut session = session();
    assert!(session.dispatch(r#"{"type":"teleport"}"#).contains("error"));
  }
}

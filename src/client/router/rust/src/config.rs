/* src/client/router/rust/src/config.rs */

use serde::{Deserialize, Serialize};

use crate::errors::RouterError;
use crate::prefetch::FetchStrategy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
  /// Lifetime of prefetch entries fetched with the full strategy.
  #[serde(default = "default_static_stale_time")]
  pub static_stale_time_ms: u64,
  /// Lifetime of runtime and on-demand entries.
  #[serde(default = "default_dynamic_stale_time")]
  pub dynamic_stale_time_ms: u64,
  #[serde(default = "default_max_prefetch_entries")]
  pub max_prefetch_entries: usize,
}

impl Default for RouterConfig {
  fn default() -> Self {
    Self {
      static_stale_time_ms: default_static_stale_time(),
      dynamic_stale_time_ms: default_dynamic_stale_time(),
      max_prefetch_entries: default_max_prefetch_entries(),
    }
  }
}

impl RouterConfig {
  pub fn from_json(json: &str) -> Result<Self, RouterError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), RouterError> {
    if self.max_prefetch_entries == 0 {
      return Err(RouterError::Config("max_prefetch_entries must be at least 1".to_string()));
    }
    if self.dynamic_stale_time_ms > self.static_stale_time_ms {
      return Err(RouterError::Config(format!(
        "dynamic_stale_time_ms ({}) must not exceed static_stale_time_ms ({})",
        self.dynamic_stale_time_ms, self.static_stale_time_ms
      )));
    }
    Ok(())
  }

  pub fn stale_time_for(&self, strategy: FetchStrategy) -> u64 {
    match strategy {
      FetchStrategy::Full => self.static_stale_time_ms,
      FetchStrategy::Runtime | FetchStrategy::OnDemand => self.dynamic_stale_time_ms,
    }
  }
}

fn default_static_stale_time() -> u64 {
  300_000
}

fn default_dynamic_stale_time() -> u64 {
  30_000
}

fn default_max_prefetch_entries() -> usize {
  128
}

//! Loader configuration.

use serde::{Deserialize, Serialize};

use crate::batch::{CoalesceConfig, Coalescer};
use crate::cache::{CacheConfig, CacheThrough};
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;

/// Settings for the standard loading pipeline: a [`CacheThrough`] in front
/// of a [`Coalescer`] in front of a fetcher. Every field has a default, so
/// `{}` is a valid configuration.
///
/// ```
/// use std::time::Duration;
/// use graphloader::{Config, Window};
///
/// let config = Config::from_json_str(r#"{
///     "coalesce": {"window": {"delay": 10}, "max_keys": 100},
///     "cache": {"cache_negative_results": false}
/// }"#).unwrap();
///
/// assert_eq!(config.coalesce.window, Window::Delay(Duration::from_millis(10)));
/// assert!(!config.cache.cache_negative_results);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coalesce: CoalesceConfig,
    pub cache: CacheConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| Error::invalid_argument(format!("invalid loader config: {}", err)))
    }

    /// Assemble the loading pipeline for a fetcher.
    pub fn build<F: Fetcher + 'static>(&self, fetcher: F) -> CacheThrough<Coalescer<F>> {
        CacheThrough::new(Coalescer::new(fetcher, self.coalesce.clone()), self.cache.clone())
    }
}

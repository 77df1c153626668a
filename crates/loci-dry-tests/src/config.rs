// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for tests that must not touch the filesystem.

use std::collections::BTreeMap;
use std::sync::Arc;

use loci_core::{ConfigError, ConfigStore, Lock};

/// In-memory [`ConfigStore`] that counts calls and can be told to fail.
///
/// Clones share one backing map, so a test can hand a clone to a
/// [`ConfigService`](loci_core::ConfigService) and inspect the original.
///
/// # Example
///
/// ```
/// use loci_core::{BackendKind, ConfigService, RuntimeConfig};
/// use loci_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// let config = RuntimeConfig::with_localities(4, BackendKind::Actor);
/// service.save_runtime_config(&config).unwrap();
///
/// assert_eq!(service.runtime_config().unwrap(), config);
/// assert_eq!((store.save_count(), store.load_count()), (1, 1));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    state: Arc<Lock<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    blobs: BTreeMap<String, Vec<u8>>,
    loads: usize,
    saves: usize,
    failing_loads: bool,
    failing_saves: bool,
}

impl InMemoryConfigStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding `blobs`.
    pub fn with_blobs<K: Into<String>>(blobs: impl IntoIterator<Item = (K, Vec<u8>)>) -> Self {
        let store = Self::new();
        store.state.with(|state| {
            state
                .blobs
                .extend(blobs.into_iter().map(|(k, v)| (k.into(), v)));
        });
        store
    }

    /// Makes every later `load_raw` fail (or succeed again).
    pub fn set_fail_on_load(&self, fail: bool) {
        self.state.lock().failing_loads = fail;
    }

    /// Makes every later `save_raw` fail (or succeed again).
    pub fn set_fail_on_save(&self, fail: bool) {
        self.state.lock().failing_saves = fail;
    }

    /// Attempted loads, failed ones included.
    pub fn load_count(&self) -> usize {
        self.state.lock().loads
    }

    /// Attempted saves, failed ones included.
    pub fn save_count(&self) -> usize {
        self.state.lock().saves
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().blobs.keys().cloned().collect()
    }

    /// True when `key` holds a blob.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state.lock().blobs.contains_key(key)
    }

    /// The blob under `key` as UTF-8 text, for asserting on stored JSON.
    pub fn text(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .blobs
            .get(key)
            .map(|blob| String::from_utf8_lossy(blob).into_owned())
    }

    /// Drops every blob, zeroes the counters and clears failure flags.
    pub fn reset(&self) {
        *self.state.lock() = StoreState::default();
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut state = self.state.lock();
        state.loads += 1;
        if state.failing_loads {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        state.blobs.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut state = self.state.lock();
        state.saves += 1;
        if state.failing_saves {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        state.blobs.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runtime configuration and its storage port.
use std::num::NonZeroUsize;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendKind;

/// Key under which [`RuntimeConfig`] is persisted.
pub const RUNTIME_CONFIG_KEY: &str = "runtime";

/// Exclusive upper bound on the locality count; an [`ObjectId`](crate::ObjectId)
/// stores its creator in 16 bits.
pub const MAX_LOCALITIES: u32 = 1 << 16;

/// Knobs of a [`Runtime`](crate::Runtime).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of localities (partitions) the runtime models.
    pub num_localities: u32,
    /// Backend started by [`Runtime::init`](crate::Runtime::init).
    pub backend: BackendKind,
    /// Worker threads per locality for parallel loops and async jobs.
    pub workers_per_locality: usize,
    /// Per-call limit on encoded arguments and results.
    pub max_payload_bytes: usize,
    /// Byte budget of one insertion buffer.
    pub buffer_bytes: usize,
    /// Byte budget of one bulk-insertion chunk.
    pub chunk_bytes: usize,
    /// Fail (instead of warn) when a null handle is waited on.
    pub strict_handles: bool,
    /// Register task types on first dispatch.
    pub auto_register_tasks: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_localities: 1,
            backend: BackendKind::ThreadPool,
            workers_per_locality: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            max_payload_bytes: 64 * 1024,
            buffer_bytes: 3072,
            chunk_bytes: 3072,
            strict_handles: false,
            auto_register_tasks: true,
        }
    }
}

impl RuntimeConfig {
    /// Default configuration with `num_localities` localities on `backend`.
    pub fn with_localities(num_localities: u32, backend: BackendKind) -> Self {
        Self {
            num_localities,
            backend,
            ..Self::default()
        }
    }

    /// Rejects configurations no backend can run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_localities == 0 || self.num_localities >= MAX_LOCALITIES {
            return Err(ConfigError::Invalid(format!(
                "num_localities must be in 1..{MAX_LOCALITIES}, got {}",
                self.num_localities
            )));
        }
        let sizes = [
            ("workers_per_locality", self.workers_per_locality),
            ("max_payload_bytes", self.max_payload_bytes),
            ("buffer_bytes", self.buffer_bytes),
            ("chunk_bytes", self.chunk_bytes),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
        }
        Ok(())
    }
}

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Loaded configuration failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes config values as JSON and delegates storage to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Loads the stored [`RuntimeConfig`], falling back to defaults when none
    /// is stored. Missing fields take their default values.
    pub fn runtime_config(&self) -> Result<RuntimeConfig, ConfigError> {
        let config = self
            .load::<RuntimeConfig>(RUNTIME_CONFIG_KEY)?
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Validates and persists `config`.
    pub fn save_runtime_config(&self, config: &RuntimeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.save(RUNTIME_CONFIG_KEY, config)
    }
}

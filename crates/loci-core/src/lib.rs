// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! loci-core: locality-aware dispatch runtime.
//!
//! A [`Runtime`] models a fixed set of localities, each owning one partition of
//! every distributed object registered in its [`Directory`]. Work crosses
//! locality boundaries only as serialized [`Task`]s resolved through a
//! [`TaskRegistry`] on the receiving side, and is executed by whichever
//! [`BackendExecutor`] the runtime was started with.
//!
//! ```
//! use loci_core::{BackendKind, DispatchError, Locality, Runtime, RuntimeConfig, Task};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct WhereAmI;
//!
//! impl Task for WhereAmI {
//!     type Output = u32;
//!     fn run(self, rt: &Runtime) -> Result<u32, DispatchError> {
//!         Ok(rt.this_locality().get())
//!     }
//! }
//!
//! let config = RuntimeConfig {
//!     num_localities: 3,
//!     backend: BackendKind::Sequential,
//!     ..RuntimeConfig::default()
//! };
//! let rt = Runtime::init(config)?;
//! let answer = rt.execute_at_with_ret(Locality::new(2), WhereAmI)?;
//! assert_eq!(answer, 2);
//! rt.shutdown();
//! # Ok::<(), DispatchError>(())
//! ```
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

/// Pluggable execution backends.
pub mod backend;
mod codec;
/// Runtime configuration and the config storage port.
pub mod config;
mod directory;
mod error;
mod handle;
mod locality;
mod lock;
mod runtime;
mod task;

pub use backend::{
    ActorBackend, BackendExecutor, BackendKind, Job, SequentialBackend, ThreadPoolBackend,
};
pub use codec::{decode, encode, Envelope};
pub use config::{ConfigError, ConfigService, ConfigStore, RuntimeConfig};
pub use directory::{Directory, DistributedObject, ObjectId};
pub use error::DispatchError;
pub use handle::{Handle, Promise};
pub use locality::{Locality, LocalityIter, LocalityRange};
pub use lock::Lock;
pub use runtime::Runtime;
pub use task::{task_name, IterTask, Payload, Task, TaskRegistry};

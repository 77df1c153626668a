// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dispatch and directory errors.
use thiserror::Error;

use crate::directory::ObjectId;
use crate::locality::Locality;

/// Failures surfaced by the dispatch layer, the object directory and the
/// containers built on them.
///
/// Missing keys in a container are never errors; only the conditions below
/// are. The type is `Clone` so one failure can be handed to every waiter of a
/// [`Handle`](crate::Handle).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Target locality is not below the runtime's locality count.
    #[error("[LOCALITY_OUT_OF_RANGE] {locality} is outside 0..{num_localities}")]
    LocalityOutOfRange {
        /// The offending target.
        locality: Locality,
        /// Locality count of the runtime.
        num_localities: u32,
    },

    /// Encoded arguments or result exceed the per-call limit.
    #[error("[PAYLOAD_TOO_LARGE] {size} bytes exceeds the {limit}-byte per-call limit")]
    PayloadTooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Configured `max_payload_bytes`.
        limit: usize,
    },

    /// A null handle was waited on while strict handle checking is enabled.
    #[error("[NULL_HANDLE_WAIT] waited on a handle that no async call was attached to")]
    NullHandleWait,

    /// The object id was never created on this locality, or was destroyed.
    #[error("[STALE_OBJECT_ID] {0} does not resolve on this locality")]
    StaleObjectId(ObjectId),

    /// The object id resolves, but to a partition of another type.
    #[error("[OBJECT_TYPE_MISMATCH] {oid} is not a {expected}")]
    ObjectTypeMismatch {
        /// The resolved id.
        oid: ObjectId,
        /// Name of the requested partition type.
        expected: &'static str,
    },

    /// A partition was registered twice under the same id.
    #[error("[DUPLICATE_OBJECT_ID] {0} is already registered")]
    DuplicateObjectId(ObjectId),

    /// The locality minted every id its 48-bit sequence can hold.
    #[error("[OBJECT_IDS_EXHAUSTED] {0} has no object ids left")]
    ObjectIdsExhausted(Locality),

    /// The receiving registry does not know the task name.
    #[error("[UNKNOWN_TASK] no task registered as `{0}`")]
    UnknownTask(String),

    /// CBOR encoding or decoding failed.
    #[error("[CODEC] {0}")]
    Codec(String),

    /// A task panicked while running on the given locality.
    #[error("[TASK_PANICKED] task panicked on {0}")]
    TaskPanicked(Locality),

    /// The backend could not start or lost its workers.
    #[error("[BACKEND_UNAVAILABLE] {0}")]
    BackendUnavailable(String),

    /// The runtime was shut down.
    #[error("[SHUT_DOWN] runtime has been shut down")]
    ShutDown,

    /// The runtime configuration is unusable.
    #[error("[INVALID_CONFIG] {0}")]
    InvalidConfig(String),

    /// A promise completed without producing a value.
    #[error("[RESULT_UNAVAILABLE] async call completed without a result")]
    ResultUnavailable,
}

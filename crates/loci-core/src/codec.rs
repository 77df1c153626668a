// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CBOR codec for values crossing a locality boundary.
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::DispatchError;

/// Encodes `value` as CBOR.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, DispatchError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| DispatchError::Codec(e.to_string()))?;
    Ok(out)
}

/// Decodes a CBOR value produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DispatchError> {
    ciborium::from_reader(bytes).map_err(|e| DispatchError::Codec(e.to_string()))
}

/// One serialized task invocation: the registry name of the task and its
/// encoded arguments.
///
/// Cloning is cheap; broadcasts hand the same payload to every locality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    task: &'static str,
    payload: Bytes,
}

impl Envelope {
    /// Encodes `task` under `name`, enforcing the per-call size `limit`.
    pub fn seal<T: Serialize>(
        name: &'static str,
        task: &T,
        limit: usize,
    ) -> Result<Self, DispatchError> {
        let payload = encode(task)?;
        check_size(payload.len(), limit)?;
        Ok(Self {
            task: name,
            payload: Bytes::from(payload),
        })
    }

    /// Registry name of the task.
    pub fn task(&self) -> &'static str {
        self.task
    }

    /// Encoded task arguments.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size of the encoded arguments in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the task encodes to zero bytes.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

pub(crate) fn check_size(size: usize, limit: usize) -> Result<(), DispatchError> {
    if size > limit {
        return Err(DispatchError::PayloadTooLarge { size, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u64,
        tag: String,
    }

    #[test]
    fn envelope_keeps_name_and_payload() {
        let sample = Sample {
            id: 42,
            tag: "edge".into(),
        };
        let env = Envelope::seal("sample", &sample, 1024).unwrap();
        assert_eq!(env.task(), "sample");
        let back: Sample = decode(env.payload()).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn oversized_payload_is_rejected_before_sealing() {
        let sample = Sample {
            id: 1,
            tag: "x".repeat(512),
        };
        let err = Envelope::seal("sample", &sample, 64).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::PayloadTooLarge { limit: 64, size } if size > 512
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = decode::<Sample>(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, DispatchError::Codec(_)));
    }
}

// Copyright 2025 Keyward Project Contributors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::state::Location;
use crate::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const KEY_LEN: usize = 32;

/// Content-addressed key of an immutable data block.
///
/// The key is the sha256 over the block headers followed by the payload,
/// and maps to a [`Location`] on the routing ring.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockKey([u8; KEY_LEN]);

impl BlockKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        BlockKey(bytes)
    }

    pub fn from_content(headers: &[u8], payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(headers);
        hasher.update(payload);
        BlockKey(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The key's normalized position in the circular key space, derived
    /// from its leading 8 bytes.
    pub fn location(&self) -> Location {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        let value = u64::from_be_bytes(prefix) as f64 / (u64::MAX as f64 + 1.0);
        Location::new(value)
    }

    /// Re-derive the key from headers and payload and compare.
    pub fn verify(&self, headers: &[u8], payload: &[u8]) -> NodeResult<()> {
        let derived = BlockKey::from_content(headers, payload);
        if derived == *self {
            Ok(())
        } else {
            Err(NodeError::verify_failed(format!(
                "content hashes to {} but key is {}",
                derived, self
            )))
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..")
    }
}

impl fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockKey({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_matching_content() {
        let key = BlockKey::from_content(b"header", b"payload");
        assert!(key.verify(b"header", b"payload").is_ok());
    }

    #[test]
    fn verify_rejects_tampered_content() {
        let key = BlockKey::from_content(b"header", b"payload");
        let err = key.verify(b"header", b"tampered").unwrap_err();
        assert!(matches!(err, NodeError::VerifyFailed(_)));
    }

    #[test]
    fn location_stays_in_unit_interval() {
        let key = BlockKey::from_bytes([0xff; KEY_LEN]);
        let loc = key.location().value();
        assert!((0.0..1.0).contains(&loc));
    }
}

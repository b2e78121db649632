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

use crate::state::{BlockKey, Location};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Why a downstream peer rejected a data-insert it had already accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    VerifyFailed,
    ReceiveFailed,
    Other,
}

/// Protocol messages exchanged for one insert operation.
///
/// Every variant carries the 64-bit operation id; transport encoding is up
/// to the messaging layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeMessage {
    /// Routing request toward the peer believed closest to the key.
    InsertRequest {
        uid: u64,
        htl: u16,
        key: BlockKey,
        closest: Location,
    },
    Accepted {
        uid: u64,
    },
    RejectedLoop {
        uid: u64,
    },
    RejectedOverload {
        uid: u64,
        is_local: bool,
    },
    /// Payload header, sent once a peer has accepted the routing request.
    DataInsert {
        uid: u64,
        headers: Bytes,
    },
    InsertReply {
        uid: u64,
    },
    /// The peer exhausted its own hop budget; it reports what is left of it.
    RouteNotFound {
        uid: u64,
        htl: u16,
    },
    DataInsertRejected {
        uid: u64,
        reason: RejectReason,
    },
    RejectedTimeout {
        uid: u64,
    },
    /// Downstream acknowledgement that the peer's own fan-out settled.
    TransfersCompleted {
        uid: u64,
        any_timed_out: bool,
    },
}

impl NodeMessage {
    pub fn uid(&self) -> u64 {
        match self {
            NodeMessage::InsertRequest { uid, .. } => *uid,
            NodeMessage::Accepted { uid } => *uid,
            NodeMessage::RejectedLoop { uid } => *uid,
            NodeMessage::RejectedOverload { uid, .. } => *uid,
            NodeMessage::DataInsert { uid, .. } => *uid,
            NodeMessage::InsertReply { uid } => *uid,
            NodeMessage::RouteNotFound { uid, .. } => *uid,
            NodeMessage::DataInsertRejected { uid, .. } => *uid,
            NodeMessage::RejectedTimeout { uid } => *uid,
            NodeMessage::TransfersCompleted { uid, .. } => *uid,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            NodeMessage::InsertRequest { .. } => "InsertRequest",
            NodeMessage::Accepted { .. } => "Accepted",
            NodeMessage::RejectedLoop { .. } => "RejectedLoop",
            NodeMessage::RejectedOverload { .. } => "RejectedOverload",
            NodeMessage::DataInsert { .. } => "DataInsert",
            NodeMessage::InsertReply { .. } => "InsertReply",
            NodeMessage::RouteNotFound { .. } => "RouteNotFound",
            NodeMessage::DataInsertRejected { .. } => "DataInsertRejected",
            NodeMessage::RejectedTimeout { .. } => "RejectedTimeout",
            NodeMessage::TransfersCompleted { .. } => "TransfersCompleted",
        }
    }

    /// True for the downstream settlement acknowledgement, which is consumed
    /// by the completion path rather than the routing loop.
    pub fn is_completion_notice(&self) -> bool {
        matches!(self, NodeMessage::TransfersCompleted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_is_extracted_from_every_variant() {
        let key = BlockKey::from_content(b"h", b"p");
        let messages = vec![
            NodeMessage::InsertRequest {
                uid: 7,
                htl: 10,
                key,
                closest: key.location(),
            },
            NodeMessage::Accepted { uid: 7 },
            NodeMessage::RejectedLoop { uid: 7 },
            NodeMessage::RejectedOverload {
                uid: 7,
                is_local: true,
            },
            NodeMessage::DataInsert {
                uid: 7,
                headers: Bytes::from_static(b"hdr"),
            },
            NodeMessage::InsertReply { uid: 7 },
            NodeMessage::RouteNotFound { uid: 7, htl: 3 },
            NodeMessage::DataInsertRejected {
                uid: 7,
                reason: RejectReason::Other,
            },
            NodeMessage::RejectedTimeout { uid: 7 },
            NodeMessage::TransfersCompleted {
                uid: 7,
                any_timed_out: false,
            },
        ];
        for msg in messages {
            assert_eq!(msg.uid(), 7, "{}", msg.type_name());
        }
    }

    #[test]
    fn only_transfers_completed_is_a_completion_notice() {
        assert!(NodeMessage::TransfersCompleted {
            uid: 1,
            any_timed_out: false
        }
        .is_completion_notice());
        assert!(!NodeMessage::InsertReply { uid: 1 }.is_completion_notice());
    }
}

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

use crate::router::PeerRef;
use keyward_common::conf::InsertConf;

/// Hop-budget policy. The routing loop applies `decrement` exactly once per
/// backtrack; what a backtrack costs is the policy's business.
pub trait HtlPolicy: Send + Sync {
    fn decrement(&self, source: Option<&PeerRef>, htl: u16) -> u16;

    /// Whether a hop budget of zero at entry ends the leg as local success.
    fn zero_htl_terminates(&self) -> bool;
}

pub struct DefaultHtlPolicy {
    edge_decrement: u16,
    zero_htl_terminates: bool,
}

impl DefaultHtlPolicy {
    pub fn new(edge_decrement: u16, zero_htl_terminates: bool) -> Self {
        Self {
            edge_decrement,
            zero_htl_terminates,
        }
    }

    pub fn from_conf(conf: &InsertConf) -> Self {
        Self::new(conf.edge_htl_decrement, conf.zero_htl_terminates)
    }
}

impl HtlPolicy for DefaultHtlPolicy {
    fn decrement(&self, source: Option<&PeerRef>, htl: u16) -> u16 {
        let step = match source {
            Some(peer) if peer.is_edge() => self.edge_decrement,
            _ => 1,
        };
        htl.saturating_sub(step)
    }

    fn zero_htl_terminates(&self) -> bool {
        self.zero_htl_terminates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::PeerHandle;
    use async_trait::async_trait;
    use keyward_common::message::NodeMessage;
    use keyward_common::state::{Location, PeerId};
    use keyward_common::NodeResult;
    use std::sync::Arc;

    struct StubPeer {
        edge: bool,
    }

    #[async_trait]
    impl PeerHandle for StubPeer {
        fn peer_id(&self) -> PeerId {
            PeerId(1)
        }

        fn location(&self) -> Location {
            Location::new(0.5)
        }

        fn is_routable(&self) -> bool {
            true
        }

        fn is_edge(&self) -> bool {
            self.edge
        }

        async fn send(&self, _message: NodeMessage) -> NodeResult<()> {
            Ok(())
        }

        fn local_rejected_overload(&self, _reason: &str) {}

        fn success_not_overload(&self) {}
    }

    #[test]
    fn interior_peers_cost_one_hop() {
        let policy = DefaultHtlPolicy::new(2, true);
        let source: PeerRef = Arc::new(StubPeer { edge: false });
        assert_eq!(policy.decrement(Some(&source), 10), 9);
        assert_eq!(policy.decrement(None, 10), 9);
    }

    #[test]
    fn edge_peers_cost_more() {
        let policy = DefaultHtlPolicy::new(2, true);
        let source: PeerRef = Arc::new(StubPeer { edge: true });
        assert_eq!(policy.decrement(Some(&source), 10), 8);
    }

    #[test]
    fn budget_never_underflows() {
        let policy = DefaultHtlPolicy::new(2, true);
        let source: PeerRef = Arc::new(StubPeer { edge: true });
        assert_eq!(policy.decrement(Some(&source), 1), 0);
        assert_eq!(policy.decrement(None, 0), 0);
    }
}

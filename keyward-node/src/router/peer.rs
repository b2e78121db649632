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

use async_trait::async_trait;
use keyward_common::message::NodeMessage;
use keyward_common::state::{Location, PeerId};
use keyward_common::NodeResult;
use std::sync::Arc;

pub type PeerRef = Arc<dyn PeerHandle>;

/// Handle to a directly connected remote node.
///
/// Implemented by the connection layer; the insert engine only sends
/// messages and reports load feedback through it.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    fn peer_id(&self) -> PeerId;

    /// The peer's position in the circular key space.
    fn location(&self) -> Location;

    /// Whether the peer can currently be routed to.
    fn is_routable(&self) -> bool;

    /// Edge peers pay a larger hop-budget cost when backtracked to.
    fn is_edge(&self) -> bool {
        false
    }

    /// Queue a message for the peer. Fails with `NotConnected` when the
    /// link is gone; never blocks on a reply.
    async fn send(&self, message: NodeMessage) -> NodeResult<()>;

    /// The peer behaved as if overloaded (rejection or silence).
    fn local_rejected_overload(&self, reason: &str);

    /// The peer answered properly and is not to be penalized.
    fn success_not_overload(&self);
}

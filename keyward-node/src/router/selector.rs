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
use keyward_common::state::{Location, PeerId};
use std::collections::HashSet;

/// Black-box view of the peer table.
pub trait PeerSelector: Send + Sync {
    /// Next-closest eligible peer for `target`, or none when routing is
    /// exhausted.
    ///
    /// `routed_to` are peers already tried for this operation and must not
    /// be returned again; `not_ignored` overrides any backoff the table
    /// keeps for the listed peers. With `allow_backtrack`, peers farther
    /// from the target than this node may be returned.
    fn closer_peer(
        &self,
        source: Option<&PeerRef>,
        routed_to: &HashSet<PeerId>,
        not_ignored: &HashSet<PeerId>,
        target: Location,
        allow_backtrack: bool,
    ) -> Option<PeerRef>;
}

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
use keyward_common::state::PeerId;
use log::warn;

/// Downstream settlement acknowledgement outcome for one fan-out leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    Succeeded,
    Failed,
    TimedOut,
}

/// Bookkeeping for one downstream peer that accepted the payload header.
///
/// Two independent facts are recorded: whether the immediate byte transfer
/// to the peer finished, and whether the peer later acknowledged that its
/// own downstream fan-out settled. A transfer can succeed while the
/// downstream acknowledgement still times out.
pub struct TransferTracker {
    peer: PeerRef,
    transfer_done: Option<bool>,
    notice: Option<Notice>,
}

impl TransferTracker {
    pub fn new(peer: PeerRef) -> Self {
        Self {
            peer,
            transfer_done: None,
            notice: None,
        }
    }

    pub fn peer(&self) -> &PeerRef {
        &self.peer
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer.peer_id()
    }

    /// Immediate transfer finished. Called exactly once per leg.
    pub fn completed_transfer(&mut self, success: bool) {
        if self.transfer_done.is_some() {
            warn!("duplicate transfer completion for {}", self.peer_id());
            return;
        }
        self.transfer_done = Some(success);
    }

    /// Downstream acknowledgement arrived, or the grace period expired.
    /// Called exactly once per leg.
    pub fn completed(&mut self, timeout: bool, success: bool) {
        if self.notice.is_some() {
            warn!("duplicate completion notice for {}", self.peer_id());
            return;
        }
        self.notice = Some(if timeout {
            Notice::TimedOut
        } else if success {
            Notice::Succeeded
        } else {
            Notice::Failed
        });
    }

    pub fn transfer_done(&self) -> bool {
        self.transfer_done.is_some()
    }

    pub fn notice_received(&self) -> bool {
        self.notice.is_some()
    }

    /// Both facts recorded, whatever their outcome.
    pub fn settled(&self) -> bool {
        self.transfer_done() && self.notice_received()
    }

    /// True once either fact recorded a failure or timeout.
    pub fn failed(&self) -> bool {
        self.transfer_done == Some(false)
            || matches!(self.notice, Some(Notice::Failed) | Some(Notice::TimedOut))
    }
}

/// Commands from the routing loop and the transfer tasks to the
/// settlement task, which owns all tracker state.
pub enum TrackerEvent {
    Register(PeerRef),
    TransferDone { peer: PeerId, success: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::PeerHandle;
    use async_trait::async_trait;
    use keyward_common::message::NodeMessage;
    use keyward_common::state::Location;
    use keyward_common::NodeResult;
    use std::sync::Arc;

    struct StubPeer;

    #[async_trait]
    impl PeerHandle for StubPeer {
        fn peer_id(&self) -> PeerId {
            PeerId(5)
        }

        fn location(&self) -> Location {
            Location::new(0.5)
        }

        fn is_routable(&self) -> bool {
            true
        }

        async fn send(&self, _message: NodeMessage) -> NodeResult<()> {
            Ok(())
        }

        fn local_rejected_overload(&self, _reason: &str) {}

        fn success_not_overload(&self) {}
    }

    fn tracker() -> TransferTracker {
        TransferTracker::new(Arc::new(StubPeer))
    }

    #[test]
    fn settles_only_with_both_facts() {
        let mut t = tracker();
        assert!(!t.settled());
        t.completed_transfer(true);
        assert!(!t.settled());
        t.completed(false, true);
        assert!(t.settled());
        assert!(!t.failed());
    }

    #[test]
    fn transfer_success_with_downstream_timeout_is_a_failure() {
        let mut t = tracker();
        t.completed_transfer(true);
        t.completed(true, false);
        assert!(t.settled());
        assert!(t.failed());
    }

    #[test]
    fn duplicate_reports_keep_the_first_outcome() {
        let mut t = tracker();
        t.completed_transfer(false);
        t.completed_transfer(true);
        assert!(t.failed());
        t.completed(false, true);
        t.completed(true, false);
        assert!(t.failed());
    }
}

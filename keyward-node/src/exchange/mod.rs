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

use dashmap::DashMap;
use keyward_common::message::NodeMessage;
use keyward_common::state::PeerId;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// An inbound protocol message together with the peer it came from.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub source: PeerId,
    pub message: NodeMessage,
}

/// Result of one bounded wait on a mailbox.
#[derive(Debug)]
pub enum Wait {
    Message(Envelope),
    Timeout,
    Cancelled,
}

/// Timeout-aware receiver for one operation's messages.
///
/// Arrivals that a caller classifies and discards do not restart the
/// deadline; the wait simply continues against the same instant.
pub struct Mailbox {
    uid: u64,
    rx: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
}

impl Mailbox {
    pub async fn recv_until(&mut self, deadline: Instant) -> Wait {
        if self.cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Wait::Cancelled,

            env = self.rx.recv() => {
                match env {
                    Some(env) => Wait::Message(env),
                    None => {
                        // Operation unregistered under us.
                        debug!("mailbox for {} closed", self.uid);
                        Wait::Cancelled
                    }
                }
            }

            _ = tokio::time::sleep_until(deadline) => Wait::Timeout,
        }
    }
}

struct OpChannels {
    proto_tx: mpsc::Sender<Envelope>,
    completion_tx: mpsc::Sender<Envelope>,
}

/// The single inbound dispatch point.
///
/// Messages are demultiplexed by operation id, and within one operation by
/// kind: the downstream settlement acknowledgement goes to the completion
/// mailbox, everything else to the protocol mailbox. The routing loop's
/// mailbox honors the operation's cancellation token; the completion
/// mailbox does not, since settlement must still be reached after an
/// upstream receive failure.
pub struct ExchangeRegistry {
    ops: DashMap<u64, OpChannels>,
    queue_size: usize,
}

impl ExchangeRegistry {
    pub fn new(queue_size: usize) -> Self {
        Self {
            ops: DashMap::new(),
            queue_size: queue_size.max(1),
        }
    }

    /// Register an operation; returns (protocol mailbox, completion mailbox).
    pub fn register(&self, uid: u64, cancel: CancellationToken) -> (Mailbox, Mailbox) {
        let (proto_tx, proto_rx) = mpsc::channel(self.queue_size);
        let (completion_tx, completion_rx) = mpsc::channel(self.queue_size);
        self.ops.insert(
            uid,
            OpChannels {
                proto_tx,
                completion_tx,
            },
        );
        let proto = Mailbox {
            uid,
            rx: proto_rx,
            cancel,
        };
        let completion = Mailbox {
            uid,
            rx: completion_rx,
            cancel: CancellationToken::new(),
        };
        (proto, completion)
    }

    pub fn unregister(&self, uid: u64) {
        self.ops.remove(&uid);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Route one inbound message. Unknown operations are dropped; a full
    /// queue drops the message rather than blocking the dispatch path.
    pub fn dispatch(&self, source: PeerId, message: NodeMessage) {
        let uid = message.uid();
        let Some(channels) = self.ops.get(&uid) else {
            debug!(
                "dropping {} from {} for unknown operation {}",
                message.type_name(),
                source,
                uid
            );
            return;
        };

        let tx = if message.is_completion_notice() {
            &channels.completion_tx
        } else {
            &channels.proto_tx
        };
        let kind = message.type_name();
        match tx.try_send(Envelope { source, message }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("queue full for operation {}, dropping {}", uid, kind);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("operation {} no longer waiting, dropping {}", uid, kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn deadline_in(millis: u64) -> Instant {
        Instant::now() + Duration::from_millis(millis)
    }

    #[tokio::test]
    async fn dispatch_routes_by_operation_and_kind() {
        let registry = ExchangeRegistry::new(8);
        let (mut proto, mut completion) = registry.register(1, CancellationToken::new());

        registry.dispatch(PeerId(9), NodeMessage::Accepted { uid: 1 });
        registry.dispatch(
            PeerId(9),
            NodeMessage::TransfersCompleted {
                uid: 1,
                any_timed_out: true,
            },
        );

        match proto.recv_until(deadline_in(100)).await {
            Wait::Message(env) => {
                assert_eq!(env.source, PeerId(9));
                assert!(matches!(env.message, NodeMessage::Accepted { uid: 1 }));
            }
            other => panic!("unexpected wait result: {:?}", other),
        }
        match completion.recv_until(deadline_in(100)).await {
            Wait::Message(env) => {
                assert!(env.message.is_completion_notice());
            }
            other => panic!("unexpected wait result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_operation_is_dropped() {
        let registry = ExchangeRegistry::new(8);
        // Must not panic or block.
        registry.dispatch(PeerId(1), NodeMessage::InsertReply { uid: 42 });
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn recv_until_times_out() {
        let registry = ExchangeRegistry::new(8);
        let (mut proto, _completion) = registry.register(1, CancellationToken::new());
        assert!(matches!(
            proto.recv_until(deadline_in(20)).await,
            Wait::Timeout
        ));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let registry = ExchangeRegistry::new(8);
        let cancel = CancellationToken::new();
        let (mut proto, _completion) = registry.register(1, cancel.clone());

        let waiter = tokio::spawn(async move { proto.recv_until(deadline_in(5_000)).await });
        cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Wait::Cancelled));
    }
}

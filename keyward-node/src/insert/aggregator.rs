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

use crate::exchange::{Envelope, Mailbox, Wait};
use crate::insert::coordinator::OpSnapshot;
use crate::insert::tracker::{TrackerEvent, TransferTracker};
use keyward_common::conf::InsertConf;
use keyward_common::message::NodeMessage;
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Observable settlement state of one operation's fan-out.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanoutState {
    /// Every leg has finished its transfer and received (or been given) a
    /// downstream acknowledgement, unreachable legs excepted.
    pub settled: bool,
    /// Latched once any leg fails its transfer or times out downstream.
    pub any_failed: bool,
}

enum Step {
    Event(Option<TrackerEvent>),
    StatusChanged(bool),
    Inbound(Wait),
    Tick,
}

/// Settlement task for one operation.
///
/// Owns every [`TransferTracker`]; the routing loop and the transfer tasks
/// only talk to it through the event channel, downstream acknowledgements
/// arrive on the completion mailbox. Lazily started when the first leg is
/// registered, runs until settlement.
pub(crate) struct CompletionAggregator {
    uid: u64,
    conf: InsertConf,
    trackers: Vec<TransferTracker>,
    events: mpsc::UnboundedReceiver<TrackerEvent>,
    events_closed: bool,
    mailbox: Mailbox,
    mailbox_closed: bool,
    status_rx: watch::Receiver<OpSnapshot>,
    status_closed: bool,
    fanout_tx: watch::Sender<FanoutState>,
    cancel: CancellationToken,
    any_failed: bool,
    /// When every immediate transfer was first observed finished; the
    /// acknowledgement grace period runs from here.
    transfers_done_at: Option<Instant>,
}

impl CompletionAggregator {
    pub fn new(
        uid: u64,
        conf: InsertConf,
        events: mpsc::UnboundedReceiver<TrackerEvent>,
        mailbox: Mailbox,
        status_rx: watch::Receiver<OpSnapshot>,
        fanout_tx: watch::Sender<FanoutState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            uid,
            conf,
            trackers: Vec::new(),
            events,
            events_closed: false,
            mailbox,
            mailbox_closed: false,
            status_rx,
            status_closed: false,
            fanout_tx,
            cancel,
            any_failed: false,
            transfers_done_at: None,
        }
    }

    pub async fn run(mut self) {
        debug!("settlement task started for {}", self.uid);

        // The first leg is registered before the task is spawned, but the
        // event may not have been delivered yet.
        while self.trackers.is_empty() {
            match self.events.recv().await {
                Some(event) => self.apply_event(event),
                None => {
                    self.settle();
                    return;
                }
            }
        }

        loop {
            self.drain_events();

            let terminal = self.terminal_or_cancelled();
            let routable: Vec<usize> = (0..self.trackers.len())
                .filter(|&i| self.trackers[i].peer().is_routable())
                .collect();

            if terminal {
                if routable.is_empty() {
                    debug!("no reachable fan-out legs left for {}", self.uid);
                    self.settle();
                    return;
                }
                let all_transferred = routable.iter().all(|&i| self.trackers[i].transfer_done());
                if all_transferred && self.transfers_done_at.is_none() {
                    debug!("all immediate transfers finished for {}", self.uid);
                    self.transfers_done_at = Some(Instant::now());
                }
                if all_transferred
                    && routable.iter().all(|&i| self.trackers[i].notice_received())
                {
                    self.settle();
                    return;
                }
            }

            let now = Instant::now();
            let (deadline, no_time_left) = match self.transfers_done_at {
                Some(done_at) if terminal => {
                    let grace_end = done_at + self.conf.completion_ack_timeout;
                    if grace_end <= now {
                        (now + Duration::from_millis(1), true)
                    } else {
                        (grace_end, false)
                    }
                }
                _ => (now + self.conf.aggregator_poll_interval, false),
            };

            let step = tokio::select! {
                biased;

                event = self.events.recv(), if !self.events_closed => Step::Event(event),

                changed = self.status_rx.changed(), if !self.status_closed => {
                    Step::StatusChanged(changed.is_err())
                }

                wait = self.mailbox.recv_until(deadline), if !self.mailbox_closed => {
                    Step::Inbound(wait)
                }

                _ = tokio::time::sleep_until(deadline), if self.mailbox_closed => Step::Tick,
            };

            match step {
                Step::Event(Some(event)) => self.apply_event(event),
                Step::Event(None) => self.events_closed = true,
                Step::StatusChanged(closed) => {
                    if closed {
                        self.status_closed = true;
                    }
                }
                Step::Inbound(Wait::Message(env)) => self.apply_notice(env),
                Step::Inbound(Wait::Cancelled) => self.mailbox_closed = true,
                Step::Inbound(Wait::Timeout) | Step::Tick => {
                    if no_time_left {
                        self.force_timeout();
                        self.settle();
                        return;
                    }
                }
            }
        }
    }

    fn terminal_or_cancelled(&mut self) -> bool {
        self.status_rx.borrow_and_update().status.is_terminal() || self.cancel.is_cancelled()
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.events_closed = true;
                    break;
                }
            }
        }
    }

    fn apply_event(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::Register(peer) => {
                debug!("tracking transfer to {} for {}", peer.peer_id(), self.uid);
                self.trackers.push(TransferTracker::new(peer));
            }
            TrackerEvent::TransferDone { peer, success } => {
                let tracker = self
                    .trackers
                    .iter_mut()
                    .find(|t| t.peer_id() == peer && !t.transfer_done());
                match tracker {
                    Some(tracker) => {
                        tracker.completed_transfer(success);
                        if !success {
                            self.mark_failed();
                        }
                    }
                    None => {
                        warn!("transfer completion for unknown leg {} on {}", peer, self.uid)
                    }
                }
            }
        }
    }

    fn apply_notice(&mut self, env: Envelope) {
        let any_timed_out = match env.message {
            NodeMessage::TransfersCompleted { any_timed_out, .. } => any_timed_out,
            other => {
                warn!(
                    "unexpected {} on completion path for {}",
                    other.type_name(),
                    self.uid
                );
                return;
            }
        };
        let tracker = self
            .trackers
            .iter_mut()
            .find(|t| t.peer_id() == env.source && !t.notice_received());
        match tracker {
            Some(tracker) => {
                tracker.completed(false, !any_timed_out);
                if any_timed_out {
                    self.mark_failed();
                }
            }
            None => {
                warn!(
                    "unmatched completion notice from {} for {}",
                    env.source, self.uid
                );
            }
        }
    }

    /// The grace period ran out: give every reachable, still-waiting leg a
    /// timed-out acknowledgement and fail unfinished transfers.
    fn force_timeout(&mut self) {
        warn!("settlement grace period expired for {}", self.uid);
        for tracker in self.trackers.iter_mut() {
            if !tracker.peer().is_routable() {
                continue;
            }
            if !tracker.notice_received() {
                tracker.completed(true, false);
            }
            if !tracker.transfer_done() {
                tracker.completed_transfer(false);
            }
        }
        self.any_failed = true;
    }

    fn mark_failed(&mut self) {
        if !self.any_failed {
            self.any_failed = true;
            self.publish(false);
        }
    }

    fn publish(&self, settled: bool) {
        self.fanout_tx.send_replace(FanoutState {
            settled,
            any_failed: self.any_failed,
        });
    }

    fn settle(&self) {
        debug!(
            "fan-out settled for {}, any_failed={}",
            self.uid, self.any_failed
        );
        self.publish(true);
    }
}

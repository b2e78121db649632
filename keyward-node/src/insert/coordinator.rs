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

use crate::exchange::{ExchangeRegistry, Mailbox, Wait};
use crate::insert::aggregator::{CompletionAggregator, FanoutState};
use crate::insert::tracker::TrackerEvent;
use crate::router::{HtlPolicy, PeerRef, PeerSelector};
use crate::transfer::{ByteCounters, PayloadBuffer, TransferFactory, TransferOutcome};
use bytes::Bytes;
use futures::FutureExt;
use keyward_common::conf::InsertConf;
use keyward_common::message::{NodeMessage, RejectReason};
use keyward_common::state::{BlockKey, InsertStatus, Location, PeerId};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything needed to admit one insert operation, locally originated or
/// relayed from an upstream peer.
pub struct InsertContext {
    pub uid: u64,
    pub key: BlockKey,
    pub headers: Bytes,
    pub htl: u16,
    /// The peer that relayed the request to us, none when locally originated.
    pub source: Option<PeerRef>,
    pub payload: PayloadBuffer,
    /// Payload comes from the local store and is trusted without re-verification.
    pub from_store: bool,
    /// Closest metric distance the request reached upstream of this node.
    pub closest: Location,
}

/// Point-in-time view of one operation's routing state. Published by the
/// coordinator task, the single writer.
#[derive(Debug, Clone, Copy)]
pub struct OpSnapshot {
    pub status: InsertStatus,
    pub htl: u16,
    /// A downstream peer accepted the request and was sent the payload
    /// header. Decides `RouteNotFound` vs `RouteReallyNotFound`.
    pub header_sent: bool,
    pub forwarded_overload: bool,
}

/// Observer handle for one insert operation.
#[derive(Clone)]
pub struct InsertHandle {
    uid: u64,
    key: BlockKey,
    status_rx: watch::Receiver<OpSnapshot>,
    fanout_rx: watch::Receiver<FanoutState>,
    cancel: CancellationToken,
    counters: Arc<ByteCounters>,
}

impl InsertHandle {
    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn key(&self) -> BlockKey {
        self.key
    }

    pub fn status(&self) -> InsertStatus {
        self.status_rx.borrow().status
    }

    pub fn status_string(&self) -> &'static str {
        self.status().as_str()
    }

    pub fn htl(&self) -> u16 {
        self.status_rx.borrow().htl
    }

    /// Whether any peer accepted this insert and received the payload header.
    pub fn header_sent(&self) -> bool {
        self.status_rx.borrow().header_sent
    }

    /// Whether an overload notice was propagated toward the original
    /// requester; at most one per operation.
    pub fn forwarded_overload(&self) -> bool {
        self.status_rx.borrow().forwarded_overload
    }

    /// True once every fan-out leg has settled.
    pub fn completed(&self) -> bool {
        self.fanout_rx.borrow().settled
    }

    pub fn any_transfer_failed(&self) -> bool {
        self.fanout_rx.borrow().any_failed
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.counters.sent()
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.counters.received()
    }

    pub fn counters(&self) -> &Arc<ByteCounters> {
        &self.counters
    }

    /// Upstream receive failed: abort in-flight work promptly. The
    /// operation keeps its `NotFinished` status; the caller already knows
    /// the real reason.
    pub fn report_receive_failed(&self) {
        self.cancel.cancel();
    }

    pub fn receive_failed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the routing loop is done: terminal status or aborted by
    /// a receive failure.
    pub async fn wait_finished(&self) {
        let mut rx = self.status_rx.clone();
        loop {
            if rx.borrow_and_update().status.is_terminal() || self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Wait until the whole fan-out has settled.
    pub async fn wait_settled(&self) {
        let mut rx = self.fanout_rx.clone();
        loop {
            if rx.borrow_and_update().settled {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

enum ReplyStep {
    TryNext,
    Finished,
    Cancelled,
}

/// Drives the hop-by-hop routing and request/response protocol for one
/// insert operation.
///
/// All mutable routing state (hop budget, terminal status, sticky flags)
/// is owned by this task and published through a watch channel; transfer
/// legs and the settlement task communicate over channels only.
pub struct InsertCoordinator {
    uid: u64,
    key: BlockKey,
    target: Location,
    headers: Bytes,
    payload: PayloadBuffer,
    from_store: bool,
    closest: Location,
    source: Option<PeerRef>,
    htl: u16,
    conf: InsertConf,

    selector: Arc<dyn PeerSelector>,
    htl_policy: Arc<dyn HtlPolicy>,
    transfer_factory: Arc<dyn TransferFactory>,
    exchange: Arc<ExchangeRegistry>,

    mailbox: Mailbox,
    completion_mailbox: Option<Mailbox>,
    status_tx: watch::Sender<OpSnapshot>,
    fanout_tx: Option<watch::Sender<FanoutState>>,
    fanout_rx: watch::Receiver<FanoutState>,
    cancel: CancellationToken,
    counters: Arc<ByteCounters>,

    status: InsertStatus,
    header_sent: bool,
    forwarded_overload: bool,
    aggregator_tx: Option<mpsc::UnboundedSender<TrackerEvent>>,
}

impl InsertCoordinator {
    pub fn new(
        ctx: InsertContext,
        conf: InsertConf,
        selector: Arc<dyn PeerSelector>,
        htl_policy: Arc<dyn HtlPolicy>,
        transfer_factory: Arc<dyn TransferFactory>,
        exchange: Arc<ExchangeRegistry>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (mailbox, completion_mailbox) = exchange.register(ctx.uid, cancel.clone());
        let (status_tx, _) = watch::channel(OpSnapshot {
            status: InsertStatus::NotFinished,
            htl: ctx.htl,
            header_sent: false,
            forwarded_overload: false,
        });
        let (fanout_tx, fanout_rx) = watch::channel(FanoutState::default());

        Self {
            uid: ctx.uid,
            key: ctx.key,
            target: ctx.key.location(),
            headers: ctx.headers,
            payload: ctx.payload,
            from_store: ctx.from_store,
            closest: ctx.closest,
            source: ctx.source,
            htl: ctx.htl,
            conf,
            selector,
            htl_policy,
            transfer_factory,
            exchange,
            mailbox,
            completion_mailbox: Some(completion_mailbox),
            status_tx,
            fanout_tx: Some(fanout_tx),
            fanout_rx,
            cancel,
            counters: Arc::new(ByteCounters::default()),
            status: InsertStatus::NotFinished,
            header_sent: false,
            forwarded_overload: false,
            aggregator_tx: None,
        }
    }

    /// Launch the protocol; returns immediately with the observer handle.
    pub fn start(self) -> InsertHandle {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }

    pub fn handle(&self) -> InsertHandle {
        InsertHandle {
            uid: self.uid,
            key: self.key,
            status_rx: self.status_tx.subscribe(),
            fanout_rx: self.fanout_rx.clone(),
            cancel: self.cancel.clone(),
            counters: self.counters.clone(),
        }
    }

    async fn run(mut self) {
        info!(
            "insert {} starting, key {}, htl {}",
            self.uid, self.key, self.htl
        );

        let outcome = AssertUnwindSafe(self.route_loop()).catch_unwind().await;
        match outcome {
            Ok(()) => {}
            Err(panic) => {
                error!("insert {} routing loop panicked: {}", self.uid, panic_text(&panic));
                if !self.status.is_terminal() {
                    self.finish(InsertStatus::InternalError).await;
                }
            }
        }

        // Whatever path ended the routing loop, do not tear the operation
        // down while fan-out legs are unsettled.
        if self.aggregator_tx.is_some() {
            self.wait_settled().await;
        } else if let Some(fanout_tx) = self.fanout_tx.take() {
            fanout_tx.send_replace(FanoutState {
                settled: true,
                any_failed: false,
            });
        }
        self.exchange.unregister(self.uid);
        debug!("insert {} done: {}", self.uid, self.status.as_str());
    }

    async fn route_loop(&mut self) {
        let mut routed_to: HashSet<PeerId> = HashSet::new();
        let not_ignored: HashSet<PeerId> = HashSet::new();

        loop {
            if self.aborted_by_receive_failure() {
                return;
            }

            if self.htl == 0 {
                // This leg cannot propagate any further; whether that is
                // success here is the hop-budget policy's call.
                let status = if self.htl_policy.zero_htl_terminates() {
                    InsertStatus::Success
                } else {
                    InsertStatus::RouteNotFound
                };
                self.finish(status).await;
                return;
            }

            let next = match self.selector.closer_peer(
                self.source.as_ref(),
                &routed_to,
                &not_ignored,
                self.target,
                true,
            ) {
                Some(peer) => peer,
                None => {
                    self.finish(InsertStatus::RouteNotFound).await;
                    return;
                }
            };
            debug!("insert {}: routing to {}", self.uid, next.peer_id());
            routed_to.insert(next.peer_id());

            if self.target.distance(next.location()) > self.target.distance(self.closest) {
                debug!(
                    "insert {}: backtracking, target={} next={} closest={}",
                    self.uid,
                    self.target,
                    next.location(),
                    self.closest
                );
                self.htl = self.htl_policy.decrement(self.source.as_ref(), self.htl);
                self.publish();
            }

            let request = NodeMessage::InsertRequest {
                uid: self.uid,
                htl: self.htl,
                key: self.key,
                closest: self.closest,
            };
            if let Err(e) = next.send(request).await {
                debug!("insert {}: not connected to {}: {}", self.uid, next.peer_id(), e);
                continue;
            }

            if self.aborted_by_receive_failure() {
                return;
            }

            match self.await_accept(&next).await {
                Some(true) => {}
                Some(false) => continue,
                None => return,
            }
            debug!("insert {}: {} accepted", self.uid, next.peer_id());

            let data_insert = NodeMessage::DataInsert {
                uid: self.uid,
                headers: self.headers.clone(),
            };
            if self.aborted_by_receive_failure() {
                return;
            }
            if let Err(e) = next.send(data_insert).await {
                debug!(
                    "insert {}: not connected sending data insert to {}: {}",
                    self.uid,
                    next.peer_id(),
                    e
                );
                continue;
            }
            self.header_sent = true;
            self.publish();
            if self.aborted_by_receive_failure() {
                return;
            }

            self.begin_transfer(&next);

            match self.await_reply(&next).await {
                ReplyStep::TryNext => continue,
                ReplyStep::Finished => return,
                ReplyStep::Cancelled => return,
            }
        }
    }

    /// Wait for the peer's verdict on the routing request.
    ///
    /// `Some(true)` = accepted, `Some(false)` = try another peer,
    /// `None` = aborted by a receive failure. Message races are expected:
    /// non-local overload notices and unrecognized types are classified and
    /// discarded without restarting the deadline.
    async fn await_accept(&mut self, next: &PeerRef) -> Option<bool> {
        let deadline = Instant::now() + self.conf.accept_timeout;
        loop {
            match self.mailbox.recv_until(deadline).await {
                Wait::Cancelled => {
                    self.aborted_by_receive_failure();
                    return None;
                }
                Wait::Timeout => {
                    debug!(
                        "insert {}: timed out waiting for accept from {}",
                        self.uid,
                        next.peer_id()
                    );
                    next.local_rejected_overload("accept timeout");
                    self.forward_rejected_overload();
                    return Some(false);
                }
                Wait::Message(env) => {
                    if env.source != next.peer_id() {
                        warn!(
                            "insert {}: {} from {} while waiting for accept from {}",
                            self.uid,
                            env.message.type_name(),
                            env.source,
                            next.peer_id()
                        );
                        continue;
                    }
                    match env.message {
                        NodeMessage::Accepted { .. } => return Some(true),
                        NodeMessage::RejectedOverload { is_local: true, .. } => {
                            next.local_rejected_overload("rejected overload");
                            debug!(
                                "insert {}: local overload at {}, moving on",
                                self.uid,
                                next.peer_id()
                            );
                            return Some(false);
                        }
                        NodeMessage::RejectedOverload { is_local: false, .. } => {
                            // Information only, not this peer's rejection.
                            self.forward_rejected_overload();
                            continue;
                        }
                        NodeMessage::RejectedLoop { .. } => {
                            // Legitimate topology loop, not the peer's fault.
                            next.success_not_overload();
                            return Some(false);
                        }
                        other => {
                            error!(
                                "insert {}: unexpected {} while waiting for accept",
                                self.uid,
                                other.type_name()
                            );
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Wait for the decisive reply after the payload header went out.
    async fn await_reply(&mut self, next: &PeerRef) -> ReplyStep {
        let deadline = Instant::now() + self.conf.reply_timeout;
        loop {
            match self.mailbox.recv_until(deadline).await {
                Wait::Cancelled => {
                    self.aborted_by_receive_failure();
                    return ReplyStep::Cancelled;
                }
                Wait::Timeout => {
                    // Fatal at this hop: the payload already went out and is
                    // never re-sent from scratch.
                    error!(
                        "insert {}: timed out waiting for reply from {} after accept",
                        self.uid,
                        next.peer_id()
                    );
                    next.local_rejected_overload("reply timeout");
                    self.finish(InsertStatus::TimedOut).await;
                    return ReplyStep::Finished;
                }
                Wait::Message(env) => {
                    if env.source != next.peer_id() {
                        warn!(
                            "insert {}: {} from {} while waiting for reply from {}",
                            self.uid,
                            env.message.type_name(),
                            env.source,
                            next.peer_id()
                        );
                        continue;
                    }
                    match env.message {
                        NodeMessage::RejectedTimeout { .. } => {
                            error!(
                                "insert {}: {} reported timeout after accepting the data",
                                self.uid,
                                next.peer_id()
                            );
                            next.local_rejected_overload("rejected timeout");
                            self.finish(InsertStatus::TimedOut).await;
                            return ReplyStep::Finished;
                        }
                        NodeMessage::RejectedOverload { is_local: true, .. } => {
                            next.local_rejected_overload("rejected overload");
                            debug!(
                                "insert {}: local overload at {} after accept, moving on",
                                self.uid,
                                next.peer_id()
                            );
                            // The transfer already under way keeps running
                            // and stays tracked.
                            return ReplyStep::TryNext;
                        }
                        NodeMessage::RejectedOverload { is_local: false, .. } => {
                            self.forward_rejected_overload();
                            continue;
                        }
                        NodeMessage::RouteNotFound { htl: reported, .. } => {
                            debug!(
                                "insert {}: {} exhausted its hop budget, reported {}",
                                self.uid,
                                next.peer_id(),
                                reported
                            );
                            next.success_not_overload();
                            // The budget only ever shrinks.
                            if reported < self.htl {
                                self.htl = reported;
                                self.publish();
                            }
                            return ReplyStep::TryNext;
                        }
                        NodeMessage::DataInsertRejected { reason, .. } => {
                            next.success_not_overload();
                            self.handle_data_insert_rejected(next, reason);
                            if self.aborted_by_receive_failure() {
                                return ReplyStep::Cancelled;
                            }
                            error!(
                                "insert {}: data insert rejected by {}: {:?}",
                                self.uid,
                                next.peer_id(),
                                reason
                            );
                            return ReplyStep::TryNext;
                        }
                        NodeMessage::InsertReply { .. } => {
                            next.success_not_overload();
                            self.finish(InsertStatus::Success).await;
                            return ReplyStep::Finished;
                        }
                        other => {
                            error!(
                                "insert {}: unknown reply {} from {}",
                                self.uid,
                                other.type_name(),
                                next.peer_id()
                            );
                            self.finish(InsertStatus::InternalError).await;
                            return ReplyStep::Finished;
                        }
                    }
                }
            }
        }
    }

    fn handle_data_insert_rejected(&mut self, next: &PeerRef, reason: RejectReason) {
        match reason {
            RejectReason::VerifyFailed => {
                if self.from_store {
                    error!(
                        "insert {}: {} failed verification on a payload we sent from the store",
                        self.uid,
                        next.peer_id()
                    );
                } else if self.payload.is_aborted() {
                    self.cancel.cancel();
                } else if !self.payload.all_received() {
                    error!(
                        "insert {}: payload incomplete but {} claims it is invalid",
                        self.uid,
                        next.peer_id()
                    );
                } else {
                    // Second opinion only; the peer's decision stands.
                    match self.payload.try_bytes() {
                        Some(data) => match self.key.verify(&self.headers, &data) {
                            Ok(()) => error!(
                                "insert {}: verify failed on {} but the payload is valid",
                                self.uid,
                                next.peer_id()
                            ),
                            Err(_) => info!(
                                "insert {}: local verification agrees the payload is invalid",
                                self.uid
                            ),
                        },
                        None => self.cancel.cancel(),
                    }
                }
            }
            RejectReason::ReceiveFailed => {
                if self.cancel.is_cancelled() {
                    debug!(
                        "insert {}: failed to receive data, so failed to send data",
                        self.uid
                    );
                } else if self.payload.all_received() {
                    error!(
                        "insert {}: all payload received but the send to {} failed",
                        self.uid,
                        next.peer_id()
                    );
                } else if self.payload.is_aborted() {
                    info!(
                        "insert {}: send failed, payload aborted: {}",
                        self.uid,
                        self.payload.abort_reason().unwrap_or_default()
                    );
                } else {
                    info!(
                        "insert {}: send to {} failed before the payload fully arrived",
                        self.uid,
                        next.peer_id()
                    );
                }
            }
            RejectReason::Other => {}
        }
    }

    /// Hand the accepted peer a reference to the (possibly still filling)
    /// payload and supervise the leg: the transfer task reports its outcome
    /// to the settlement task, which is lazily started on the first leg.
    fn begin_transfer(&mut self, next: &PeerRef) {
        let events = self.ensure_aggregator();
        if events.send(TrackerEvent::Register(next.clone())).is_err() {
            error!(
                "insert {}: settlement task gone, transfer to {} untracked",
                self.uid,
                next.peer_id()
            );
            return;
        }

        let mut transfer = self.transfer_factory.create(
            next.clone(),
            self.uid,
            self.payload.clone(),
            self.counters.clone(),
        );
        let uid = self.uid;
        let peer = next.peer_id();
        let events = events.clone();
        tokio::spawn(async move {
            let success = match AssertUnwindSafe(transfer.transfer()).catch_unwind().await {
                Ok(Ok(TransferOutcome::Success)) => true,
                Ok(Ok(TransferOutcome::Overload)) => {
                    debug!("insert {}: transfer to {} shed under load", uid, peer);
                    false
                }
                Ok(Ok(TransferOutcome::Failure)) => false,
                Ok(Err(e)) => {
                    error!("insert {}: transfer to {} failed: {}", uid, peer, e);
                    false
                }
                Err(panic) => {
                    error!(
                        "insert {}: transfer task to {} panicked: {}",
                        uid,
                        peer,
                        panic_text(&panic)
                    );
                    false
                }
            };
            let _ = events.send(TrackerEvent::TransferDone { peer, success });
        });
    }

    fn ensure_aggregator(&mut self) -> mpsc::UnboundedSender<TrackerEvent> {
        if let Some(tx) = &self.aggregator_tx {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        // Both taken exactly once, on the first fan-out leg.
        let mailbox = self.completion_mailbox.take().unwrap();
        let fanout_tx = self.fanout_tx.take().unwrap();
        let aggregator = CompletionAggregator::new(
            self.uid,
            self.conf.clone(),
            rx,
            mailbox,
            self.status_tx.subscribe(),
            fanout_tx,
            self.cancel.clone(),
        );
        tokio::spawn(aggregator.run());
        self.aggregator_tx = Some(tx.clone());
        tx
    }

    /// Assign the terminal status (exactly once), then hold the caller
    /// until the fan-out has settled.
    async fn finish(&mut self, code: InsertStatus) {
        let code = if code == InsertStatus::RouteNotFound && !self.header_sent {
            InsertStatus::RouteReallyNotFound
        } else {
            code
        };
        if self.status.is_terminal() {
            panic!(
                "finish() called with {} when status is already {}",
                code, self.status
            );
        }
        self.status = code;
        self.publish();
        info!("insert {} finished: {}", self.uid, code.as_str());

        if self.aggregator_tx.is_none() {
            // No transfers were ever started.
            if let Some(fanout_tx) = self.fanout_tx.take() {
                fanout_tx.send_replace(FanoutState {
                    settled: true,
                    any_failed: false,
                });
            }
            return;
        }
        self.wait_settled().await;
    }

    async fn wait_settled(&mut self) {
        let mut rx = self.fanout_rx.clone();
        loop {
            if rx.borrow_and_update().settled {
                return;
            }
            match tokio::time::timeout(self.conf.settle_check_interval, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    warn!(
                        "insert {}: settlement task gone before settling",
                        self.uid
                    );
                    return;
                }
                Err(_) => {
                    debug!("insert {}: still waiting for fan-out settlement", self.uid);
                }
            }
        }
    }

    /// Checked immediately before and after every wait. Aborting the
    /// payload here makes the upstream failure visible to every transfer
    /// leg still reading from it.
    fn aborted_by_receive_failure(&mut self) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        debug!(
            "insert {}: upstream receive failed, stopping the routing loop",
            self.uid
        );
        if !self.payload.all_received() {
            self.payload.abort("upstream receive failed");
        }
        true
    }

    /// Propagate an overload notice toward the original requester, at most
    /// once per operation. Never called for a *local* overload.
    fn forward_rejected_overload(&mut self) {
        if self.forwarded_overload {
            return;
        }
        self.forwarded_overload = true;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(OpSnapshot {
            status: self.status,
            htl: self.htl,
            header_sent: self.header_sent,
            forwarded_overload: self.forwarded_overload,
        });
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

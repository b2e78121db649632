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

mod payload;

pub use payload::PayloadBuffer;

use crate::router::PeerRef;
use async_trait::async_trait;
use keyward_common::NodeResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How one outbound block transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Failure,
    /// The receiving peer shed the transfer under load.
    Overload,
}

/// Moves the payload to a single downstream peer. Implemented by the
/// transfer layer; one instance per fan-out leg.
#[async_trait]
pub trait BlockTransfer: Send {
    /// Runs the transfer to completion. An `Aborted` error means the
    /// payload source was killed by its producer.
    async fn transfer(&mut self) -> NodeResult<TransferOutcome>;
}

/// Mints a [`BlockTransfer`] per accepted peer.
pub trait TransferFactory: Send + Sync {
    fn create(
        &self,
        peer: PeerRef,
        uid: u64,
        payload: PayloadBuffer,
        counters: Arc<ByteCounters>,
    ) -> Box<dyn BlockTransfer>;
}

/// Byte accounting for one operation, shared with every transfer leg.
#[derive(Debug, Default)]
pub struct ByteCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl ByteCounters {
    pub fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

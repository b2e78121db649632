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

use crate::exchange::ExchangeRegistry;
use crate::insert::{InsertContext, InsertCoordinator, InsertHandle};
use crate::router::{HtlPolicy, PeerSelector};
use crate::transfer::TransferFactory;
use dashmap::DashMap;
use keyward_common::conf::InsertConf;
use keyward_common::message::NodeMessage;
use keyward_common::state::PeerId;
use keyward_common::{err_box, NodeResult};
use log::debug;
use std::sync::Arc;

/// Registry of live insert operations on this node.
///
/// Admits requests (local or relayed), feeds inbound protocol messages to
/// the per-operation exchange, and drops operations once their fan-out has
/// settled and their routing loop is done.
pub struct InsertManager {
    conf: InsertConf,
    exchange: Arc<ExchangeRegistry>,
    selector: Arc<dyn PeerSelector>,
    htl_policy: Arc<dyn HtlPolicy>,
    transfer_factory: Arc<dyn TransferFactory>,
    active: DashMap<u64, InsertHandle>,
}

impl InsertManager {
    pub fn new(
        conf: InsertConf,
        selector: Arc<dyn PeerSelector>,
        htl_policy: Arc<dyn HtlPolicy>,
        transfer_factory: Arc<dyn TransferFactory>,
    ) -> Arc<Self> {
        let exchange = Arc::new(ExchangeRegistry::new(conf.message_queue_size));
        Arc::new(Self {
            conf,
            exchange,
            selector,
            htl_policy,
            transfer_factory,
            active: DashMap::new(),
        })
    }

    /// Admit one insert operation and launch its routing loop.
    pub fn start_insert(self: &Arc<Self>, ctx: InsertContext) -> NodeResult<InsertHandle> {
        let uid = ctx.uid;
        if self.active.contains_key(&uid) {
            return err_box!("insert {} is already running", uid);
        }

        let coordinator = InsertCoordinator::new(
            ctx,
            self.conf.clone(),
            self.selector.clone(),
            self.htl_policy.clone(),
            self.transfer_factory.clone(),
            self.exchange.clone(),
        );
        let handle = coordinator.start();
        self.active.insert(uid, handle.clone());

        let manager = self.clone();
        let watched = handle.clone();
        tokio::spawn(async move {
            watched.wait_finished().await;
            watched.wait_settled().await;
            manager.active.remove(&uid);
            debug!("insert {} removed from the active set", uid);
        });

        Ok(handle)
    }

    /// Feed one inbound protocol message to whichever operation wants it.
    pub fn dispatch(&self, source: PeerId, message: NodeMessage) {
        self.exchange.dispatch(source, message);
    }

    pub fn get(&self, uid: u64) -> Option<InsertHandle> {
        self.active.get(&uid).map(|entry| entry.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn exchange(&self) -> &Arc<ExchangeRegistry> {
        &self.exchange
    }
}

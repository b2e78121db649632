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

use crate::utils::DurationUnit;
use crate::NodeResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Insert propagation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertConf {
    // How long to wait for Accepted/Rejected after a routing request.
    #[serde(skip)]
    pub accept_timeout: Duration,
    #[serde(alias = "accept_timeout")]
    pub accept_timeout_str: String,

    // How long to wait for the decisive reply after the payload header.
    #[serde(skip)]
    pub reply_timeout: Duration,
    #[serde(alias = "reply_timeout")]
    pub reply_timeout_str: String,

    // Grace period for downstream settlement acknowledgements, measured
    // from the moment every immediate transfer has finished.
    #[serde(skip)]
    pub completion_ack_timeout: Duration,
    #[serde(alias = "completion_ack_timeout")]
    pub completion_ack_timeout_str: String,

    // Poll cadence of the settlement task while the routing loop may still
    // add fan-out legs.
    #[serde(skip)]
    pub aggregator_poll_interval: Duration,
    #[serde(alias = "aggregator_poll_interval")]
    pub aggregator_poll_interval_str: String,

    // Log cadence while a terminating call waits for settlement.
    #[serde(skip)]
    pub settle_check_interval: Duration,
    #[serde(alias = "settle_check_interval")]
    pub settle_check_interval_str: String,

    // Inbound message queue depth per operation.
    pub message_queue_size: usize,

    // Extra hop-budget cost charged by the default policy for edge peers.
    pub edge_htl_decrement: u16,

    // Whether a hop budget of zero at entry counts as local success.
    pub zero_htl_terminates: bool,
}

impl InsertConf {
    pub fn init(&mut self) -> NodeResult<()> {
        self.accept_timeout = DurationUnit::from_str(&self.accept_timeout_str)?.as_duration();
        self.reply_timeout = DurationUnit::from_str(&self.reply_timeout_str)?.as_duration();
        self.completion_ack_timeout =
            DurationUnit::from_str(&self.completion_ack_timeout_str)?.as_duration();
        self.aggregator_poll_interval =
            DurationUnit::from_str(&self.aggregator_poll_interval_str)?.as_duration();
        self.settle_check_interval =
            DurationUnit::from_str(&self.settle_check_interval_str)?.as_duration();
        Ok(())
    }
}

impl Default for InsertConf {
    fn default() -> Self {
        let mut conf = Self {
            accept_timeout: Default::default(),
            accept_timeout_str: "10s".to_string(),

            reply_timeout: Default::default(),
            reply_timeout_str: "120s".to_string(),

            completion_ack_timeout: Default::default(),
            completion_ack_timeout_str: "120s".to_string(),

            aggregator_poll_interval: Default::default(),
            aggregator_poll_interval_str: "5s".to_string(),

            settle_check_interval: Default::default(),
            settle_check_interval_str: "10s".to_string(),

            message_queue_size: 128,
            edge_htl_decrement: 2,
            zero_htl_terminates: true,
        };
        // Defaults always parse.
        let _ = conf.init();
        conf
    }
}

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

/// Adaptive probe-interval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConf {
    // CPU usage the controller steers towards, in percent.
    pub target_cpu_percent: u32,

    // Starting interval value, in milliseconds.
    pub initial_probe_interval_ms: f64,

    #[serde(skip)]
    pub sample_interval: Duration,
    #[serde(alias = "sample_interval")]
    pub sample_interval_str: String,
}

impl LoadConf {
    pub fn init(&mut self) -> NodeResult<()> {
        self.sample_interval = DurationUnit::from_str(&self.sample_interval_str)?.as_duration();
        Ok(())
    }
}

impl Default for LoadConf {
    fn default() -> Self {
        let mut conf = Self {
            target_cpu_percent: 50,
            initial_probe_interval_ms: 1000.0,
            sample_interval: Default::default(),
            sample_interval_str: "1s".to_string(),
        };
        let _ = conf.init();
        conf
    }
}

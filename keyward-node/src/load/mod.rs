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

use keyward_common::conf::LoadConf;
use log::{debug, error};
use sysinfo::System;
use tokio::sync::watch;
use tokio::time::Instant;

// 5% per second of drift toward the target usage.
const MUL_PER_SECOND: f64 = 1.05;
const MAX_VALUE: f64 = f64::MAX / MUL_PER_SECOND;
const MIN_VALUE: f64 = f64::MIN_POSITIVE;

/// Read side of the adaptive probe interval.
pub trait ProbeInterval: Send + Sync {
    fn value(&self) -> f64;
}

/// CPU usage sample source, in percent of all cores.
pub trait CpuMonitor: Send {
    fn cpu_usage(&mut self) -> Option<f32>;
}

pub struct SysinfoCpuMonitor {
    system: System,
}

impl SysinfoCpuMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoCpuMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuMonitor for SysinfoCpuMonitor {
    fn cpu_usage(&mut self) -> Option<f32> {
        self.system.refresh_cpu_usage();
        let usage = self.system.global_cpu_info().cpu_usage();
        if usage.is_finite() {
            Some(usage)
        } else {
            None
        }
    }
}

/// Scales an interval up while CPU usage is above the target and back down
/// while it is below, multiplicatively per elapsed second.
pub struct CpuAdjustingInterval {
    rx: watch::Receiver<f64>,
}

impl CpuAdjustingInterval {
    pub fn from_conf(conf: &LoadConf) -> Self {
        Self::start(
            conf.initial_probe_interval_ms,
            conf.target_cpu_percent,
            conf.sample_interval,
            SysinfoCpuMonitor::new(),
        )
    }

    pub fn start(
        initial: f64,
        target_cpu_percent: u32,
        sample_interval: std::time::Duration,
        mut monitor: impl CpuMonitor + 'static,
    ) -> Self {
        let (tx, rx) = watch::channel(initial.clamp(MIN_VALUE, MAX_VALUE));
        tokio::spawn(async move {
            let mut current = initial.clamp(MIN_VALUE, MAX_VALUE);
            loop {
                let slept_from = Instant::now();
                tokio::time::sleep(sample_interval).await;
                let Some(usage) = monitor.cpu_usage() else {
                    error!("cannot auto-adjust the probe interval from cpu usage");
                    return;
                };
                let elapsed = slept_from.elapsed().as_secs_f64();
                let mul = MUL_PER_SECOND.powf(elapsed);
                let target = target_cpu_percent as f32;
                if usage > target {
                    current = (current * mul).min(MAX_VALUE);
                } else if usage < target {
                    current = (current / mul).max(MIN_VALUE);
                }
                debug!(
                    "cpu usage {:.1}%, target {}%, probe interval {:.3}",
                    usage, target_cpu_percent, current
                );
                if tx.send(current).is_err() {
                    return;
                }
            }
        });
        Self { rx }
    }
}

impl ProbeInterval for CpuAdjustingInterval {
    fn value(&self) -> f64 {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct ScriptedMonitor {
        usage: Option<f32>,
    }

    impl CpuMonitor for ScriptedMonitor {
        fn cpu_usage(&mut self) -> Option<f32> {
            self.usage
        }
    }

    #[tokio::test]
    async fn interval_grows_when_cpu_is_above_target() {
        let interval = CpuAdjustingInterval::start(
            1000.0,
            50,
            Duration::from_millis(10),
            ScriptedMonitor { usage: Some(90.0) },
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(interval.value() > 1000.0);
    }

    #[tokio::test]
    async fn interval_shrinks_when_cpu_is_below_target() {
        let interval = CpuAdjustingInterval::start(
            1000.0,
            50,
            Duration::from_millis(10),
            ScriptedMonitor { usage: Some(5.0) },
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(interval.value() < 1000.0);
    }

    #[tokio::test]
    async fn unmeasurable_cpu_stops_adjusting() {
        let interval = CpuAdjustingInterval::start(
            1000.0,
            50,
            Duration::from_millis(10),
            ScriptedMonitor { usage: None },
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(interval.value(), 1000.0);
    }
}

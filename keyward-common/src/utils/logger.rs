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

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOGGER: OnceCell<()> = OnceCell::new();

/// Process-wide logging bootstrap. `log` macro output is bridged into the
/// tracing subscriber; `RUST_LOG` overrides the default level.
pub struct Logger;

impl Logger {
    pub fn init(level: &str) {
        LOGGER.get_or_init(|| {
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            let _ = tracing_log::LogTracer::init();
        });
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::init("info");
        Logger
    }
}

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

mod insert_conf;
mod load_conf;

pub use insert_conf::InsertConf;
pub use load_conf::LoadConf;

use crate::{err_msg, NodeResult};
use serde::{Deserialize, Serialize};

/// Node-wide configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConf {
    pub insert: InsertConf,
    pub load: LoadConf,
}

impl NodeConf {
    pub fn from_str(text: &str) -> NodeResult<Self> {
        let mut conf: NodeConf =
            toml::from_str(text).map_err(|e| err_msg!("invalid configuration: {}", e))?;
        conf.init()?;
        Ok(conf)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> NodeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Resolve duration strings into their `Duration` fields.
    pub fn init(&mut self) -> NodeResult<()> {
        self.insert.init()?;
        self.load.init()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_resolve() {
        let mut conf = NodeConf::default();
        conf.init().unwrap();
        assert_eq!(conf.insert.accept_timeout, Duration::from_secs(10));
        assert_eq!(conf.insert.reply_timeout, Duration::from_secs(120));
        assert_eq!(conf.insert.completion_ack_timeout, Duration::from_secs(120));
    }

    #[test]
    fn toml_overrides_apply() {
        let conf = NodeConf::from_str(
            r#"
            [insert]
            accept_timeout = "3s"
            message_queue_size = 16

            [load]
            target_cpu_percent = 75
            "#,
        )
        .unwrap();
        assert_eq!(conf.insert.accept_timeout, Duration::from_secs(3));
        assert_eq!(conf.insert.message_queue_size, 16);
        assert_eq!(conf.load.target_cpu_percent, 75);
        // Untouched fields keep their defaults.
        assert_eq!(conf.insert.reply_timeout, Duration::from_secs(120));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let res = NodeConf::from_str(
            r#"
            [insert]
            accept_timeout = "soon"
            "#,
        );
        assert!(res.is_err());
    }
}

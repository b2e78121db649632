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

use thiserror::Error;

pub type NodeResult<T> = Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("verify failed: {0}")]
    VerifyFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Common(String),
}

impl NodeError {
    pub fn common(msg: impl Into<String>) -> Self {
        NodeError::Common(msg.into())
    }

    pub fn not_connected(msg: impl Into<String>) -> Self {
        NodeError::NotConnected(msg.into())
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        NodeError::Disconnected(msg.into())
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        NodeError::Aborted(msg.into())
    }

    pub fn verify_failed(msg: impl Into<String>) -> Self {
        NodeError::VerifyFailed(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        NodeError::Timeout(msg.into())
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, NodeError::NotConnected(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, NodeError::Aborted(_))
    }
}

impl From<std::io::Error> for NodeError {
    fn from(value: std::io::Error) -> Self {
        NodeError::Common(value.to_string())
    }
}

// Formatted early return, mirrors the error-site usage all over the tree.
#[macro_export]
macro_rules! err_box {
    ($($arg:tt)*) => {
        Err($crate::error::NodeError::common(format!($($arg)*)))
    };
}

// Same formatting, but yields the error value itself.
#[macro_export]
macro_rules! err_msg {
    ($($arg:tt)*) => {
        $crate::error::NodeError::common(format!($($arg)*))
    };
}

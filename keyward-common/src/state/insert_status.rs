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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal outcome of one insert operation.
///
/// An operation starts at `NotFinished` and moves to exactly one terminal
/// value; the value is frozen afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertStatus {
    NotFinished,
    /// The insert reached a node that accepted it, or the hop budget ran out.
    Success,
    /// Routing exhausted every candidate after at least one request was sent.
    RouteNotFound,
    /// Routing exhausted every candidate before any request left this node.
    RouteReallyNotFound,
    /// A downstream peer stopped responding after accepting the payload header.
    TimedOut,
    /// Protocol violation or unexpected runtime fault.
    InternalError,
}

impl InsertStatus {
    pub fn is_terminal(&self) -> bool {
        *self != InsertStatus::NotFinished
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsertStatus::NotFinished => "NOT FINISHED",
            InsertStatus::Success => "SUCCESS",
            InsertStatus::RouteNotFound => "ROUTE NOT FOUND",
            InsertStatus::RouteReallyNotFound => "ROUTE REALLY NOT FOUND",
            InsertStatus::TimedOut => "TIMED OUT",
            InsertStatus::InternalError => "INTERNAL ERROR",
        }
    }
}

impl fmt::Display for InsertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_finished_is_non_terminal() {
        assert!(!InsertStatus::NotFinished.is_terminal());
        for status in [
            InsertStatus::Success,
            InsertStatus::RouteNotFound,
            InsertStatus::RouteReallyNotFound,
            InsertStatus::TimedOut,
            InsertStatus::InternalError,
        ] {
            assert!(status.is_terminal());
        }
    }
}

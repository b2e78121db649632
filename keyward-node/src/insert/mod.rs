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

mod aggregator;
mod coordinator;
mod manager;
mod tracker;

pub use aggregator::FanoutState;
pub use coordinator::InsertContext;
pub use coordinator::InsertCoordinator;
pub use coordinator::InsertHandle;
pub use coordinator::OpSnapshot;
pub use manager::InsertManager;
pub use tracker::TrackerEvent;
pub use tracker::TransferTracker;

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

mod duration_unit;
mod logger;

pub use duration_unit::DurationUnit;
pub use logger::Logger;

pub struct Utils;

impl Utils {
    /// Fresh operation id for a locally originated request.
    pub fn req_id() -> u64 {
        rand::random::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_distinct() {
        assert_ne!(Utils::req_id(), Utils::req_id());
    }
}

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

/// A position in the circular [0, 1) key space.
///
/// Routing always prefers the peer with the smallest circular distance to
/// the target; distances wrap around the ring, so 0.95 and 0.05 are 0.1
/// apart, not 0.9.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Location(f64);

impl Location {
    pub fn new(value: f64) -> Self {
        // Wrap into [0, 1); non-finite input collapses to 0.
        if !value.is_finite() {
            return Location(0.0);
        }
        Location(value.rem_euclid(1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Circular distance to another location, in [0, 0.5].
    pub fn distance(&self, other: Location) -> f64 {
        let d = (self.0 - other.0).abs();
        d.min(1.0 - d)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_wraps_around_the_ring() {
        let a = Location::new(0.95);
        let b = Location::new(0.05);
        assert!((a.distance(b) - 0.1).abs() < 1e-9);
        assert!((b.distance(a) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn distance_is_zero_for_equal_locations() {
        let a = Location::new(0.3);
        assert_eq!(a.distance(a), 0.0);
    }

    #[test]
    fn new_wraps_out_of_range_values() {
        assert!((Location::new(1.25).value() - 0.25).abs() < 1e-9);
        assert!((Location::new(-0.25).value() - 0.75).abs() < 1e-9);
    }
}

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

use crate::NodeResult;
use crate::err_box;
use std::time::Duration;

/// Human-readable duration string, e.g. "10s", "500ms", "2m", "6h".
///
/// A bare number is taken as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationUnit {
    millis: u64,
}

impl DurationUnit {
    pub fn from_str(value: impl AsRef<str>) -> NodeResult<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return err_box!("empty duration string");
        }

        let split = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let (number, unit) = value.split_at(split);
        if number.is_empty() {
            return err_box!("duration has no numeric part: {}", value);
        }
        let number: u64 = match number.parse() {
            Ok(v) => v,
            Err(e) => return err_box!("invalid duration {}: {}", value, e),
        };

        let millis = match unit {
            "" | "ms" => number,
            "s" => number * 1000,
            "m" => number * 60 * 1000,
            "h" => number * 60 * 60 * 1000,
            "d" => number * 24 * 60 * 60 * 1000,
            _ => return err_box!("unknown duration unit in {}", value),
        };
        Ok(DurationUnit { millis })
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_units() {
        assert_eq!(DurationUnit::from_str("500ms").unwrap().as_millis(), 500);
        assert_eq!(DurationUnit::from_str("10s").unwrap().as_millis(), 10_000);
        assert_eq!(DurationUnit::from_str("2m").unwrap().as_millis(), 120_000);
        assert_eq!(DurationUnit::from_str("1h").unwrap().as_millis(), 3_600_000);
        assert_eq!(DurationUnit::from_str("120").unwrap().as_millis(), 120);
    }

    #[test]
    fn rejects_garbage() {
        assert!(DurationUnit::from_str("").is_err());
        assert!(DurationUnit::from_str("fast").is_err());
        assert!(DurationUnit::from_str("10parsecs").is_err());
    }
}

//! Tunables shared by the cone operations and the driver.

use serde::{Deserialize, Serialize};

/// Default block order above which straddling blocks are combined with an
/// all-reduce instead of being routed through their home rank.
pub const DEFAULT_CUTOFF: usize = 1000;

/// Settings for a sequence of cone operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocSettings {
    /// Communication cutoff (performance hint only, never changes results)
    pub cutoff: usize,

    /// Enable verbose logging of exchange plans
    pub verbose: bool,
}

impl Default for SocSettings {
    fn default() -> Self {
        // SOC_CUTOFF=0 routes every straddling block through the all-reduce path
        let cutoff = std::env::var("SOC_CUTOFF")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CUTOFF);

        let verbose = std::env::var("SOC_VERBOSE")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false);

        Self {
            cutoff,
            verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_json_roundtrip() {
        let settings = SocSettings {
            cutoff: 8,
            verbose: true,
        };
        let text = serde_json::to_string(&settings).unwrap();
        let back: SocSettings = serde_json::from_str(&text).unwrap();
        assert_eq!(back, settings);
    }
}

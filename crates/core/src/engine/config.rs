//! Scheduler settings.

use std::time::Duration;

use crate::config::GenerationConfig;

/// Number of quadrants in a grid.
pub const GRID_SIZE: usize = 4;

/// How the scheduler walks each prompt's generation tree.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub upscale: bool,
    pub variation: bool,
    /// Requested lanes; 0 or anything above the bot limit means the bot limit.
    pub concurrency: usize,
    /// Pause between two prompts of a lane, before jitter.
    pub wait: Duration,
    /// Pause before the first prompt of a lane.
    pub first_wait: Duration,
    /// Attempts per bot call.
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upscale: false,
            variation: false,
            concurrency: 0,
            wait: Duration::from_secs(5),
            first_wait: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl From<&GenerationConfig> for EngineConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            upscale: config.upscale,
            variation: config.variation,
            concurrency: config.concurrency,
            wait: Duration::from_millis(config.wait_ms),
            max_attempts: config.max_attempts.max(1),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_generation_config() {
        let generation = GenerationConfig {
            upscale: true,
            variation: true,
            concurrency: 2,
            wait_ms: 250,
            max_attempts: 0,
            ..Default::default()
        };
        let config = EngineConfig::from(&generation);
        assert!(config.upscale);
        assert!(config.variation);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.wait, Duration::from_millis(250));
        assert_eq!(config.first_wait, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 1);
    }
}

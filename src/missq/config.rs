use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MissQueueConfig {
    pub num_threads: usize,
    pub line_bytes: u64,
}

impl Config for MissQueueConfig {}

impl Default for MissQueueConfig {
    fn default() -> Self {
        Self {
            num_threads: 4,
            line_bytes: 64,
        }
    }
}

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub steps: u64,
    pub fetch_latency: u64,
    pub drain_timeout: u64,
    pub results_json: Option<String>,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            steps: 10000,
            fetch_latency: 20,
            drain_timeout: 10000,
            results_json: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub seed: u64,
    pub num_lines: u64,
    pub base_addr: u64,
    pub issue_prob: f64,
    pub store_fraction: f64,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            num_lines: 16,
            base_addr: 0x8000_0000,
            issue_prob: 0.3,
            store_fraction: 0.25,
        }
    }
}

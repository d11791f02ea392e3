pub mod config;
pub mod driver;
pub mod fetch;

pub use config::{Config, SimConfig, TrafficConfig};
pub use driver::{DriverStats, Sim};
pub use fetch::{FetchPipeline, FetchStats};

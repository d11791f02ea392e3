use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use toml::Table;

use missq::missq::MissQueueConfig;
use missq::sim::config::{Config, SimConfig, TrafficConfig};
use missq::sim::driver::Sim;

#[derive(Parser)]
#[command(version, about)]
struct MissqArgs {
    #[arg(help = "Path to config.toml (built-in defaults when omitted)")]
    config_path: Option<PathBuf>,
    #[arg(long, help = "Override number of hardware threads")]
    num_threads: Option<usize>,
    #[arg(long, help = "Override cache line size in bytes")]
    line_bytes: Option<u64>,
    #[arg(long, help = "Override number of simulated steps")]
    steps: Option<u64>,
    #[arg(long, help = "Override traffic seed")]
    seed: Option<u64>,
    #[arg(long, help = "Write summary stats to this JSON file")]
    results_json: Option<String>,
}

pub fn main() -> Result<()> {
    env_logger::init();

    let argv = MissqArgs::parse();
    let config_table: Table = match &argv.config_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&text).context("cannot parse config toml")?
        }
        None => Table::new(),
    };
    let mut sim_config = SimConfig::from_section(config_table.get("sim"));
    let mut queue_config = MissQueueConfig::from_section(config_table.get("missq"));
    let mut traffic_config = TrafficConfig::from_section(config_table.get("traffic"));

    // override toml configs with argv
    queue_config.num_threads = argv.num_threads.unwrap_or(queue_config.num_threads);
    queue_config.line_bytes = argv.line_bytes.unwrap_or(queue_config.line_bytes);
    sim_config.steps = argv.steps.unwrap_or(sim_config.steps);
    traffic_config.seed = argv.seed.unwrap_or(traffic_config.seed);
    if let Some(path) = argv.results_json {
        sim_config.results_json = Some(path);
    }

    let mut sim = Sim::new(sim_config, queue_config, traffic_config);
    sim.run()
}

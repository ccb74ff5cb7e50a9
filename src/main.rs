use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use icn_config::EngineConfig;
use icn_group::Scenario;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario and print the report as JSON
    Run {
        /// Scenario file (YAML)
        scenario: PathBuf,

        /// Engine configuration file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Log filter, e.g. `info` or `icn_governance=debug`
        #[arg(short, long)]
        log_level: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            config,
            log_level,
        } => {
            let mut config = match config {
                Some(path) => EngineConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => EngineConfig::from_env()?,
            };
            if let Some(level) = log_level {
                config.log_level = level;
            }
            icn_config::init_logging(&config.log_level)?;

            let scenario = Scenario::from_file(&scenario)
                .with_context(|| format!("loading scenario {}", scenario.display()))?;
            info!("Running scenario with {} periods", scenario.periods.len());

            let report = scenario.run(config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

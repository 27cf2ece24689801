#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use hubcache_core::{ConsistencyMode, load_config};
use hubcache_sim::campaign::{CampaignConfig, format_violation, replay_seed, run_campaign};
use hubcache_sim::network::FaultConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "hubcache-sim: deterministic cache consistency simulation",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Directory containing `.hubcache/config.toml`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run many seeds and report failures",
        after_help = "EXAMPLES:\n    # 500 seeds with strict reconciliation\n    hubcache-sim campaign --seeds 500 --strict\n\n    # Fault-free baseline\n    hubcache-sim campaign --no-faults"
    )]
    Campaign(RunArgs),

    #[command(
        about = "Replay one seed and print its trace",
        after_help = "EXAMPLES:\n    # Replay the first failure of a campaign\n    hubcache-sim replay 17 --json"
    )]
    Replay {
        seed: u64,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of seeds, starting at `--start-seed`.
    #[arg(long, default_value_t = 100)]
    seeds: u64,

    #[arg(long, default_value_t = 0)]
    start_seed: u64,

    /// Rounds per seed.
    #[arg(long, default_value_t = 40)]
    rounds: u64,

    /// Reject racing mutation responses instead of applying the last one.
    #[arg(long)]
    strict: bool,

    /// Disable delays, reordering, and failures.
    #[arg(long)]
    no_faults: bool,
}

impl RunArgs {
    fn campaign_config(&self, root: &std::path::Path) -> Result<CampaignConfig> {
        let cache = load_config(root)?;
        let mut config = CampaignConfig {
            seed_range: self.start_seed..self.start_seed.saturating_add(self.seeds),
            rounds: self.rounds,
            ..CampaignConfig::default()
        }
        .with_cache_config(&cache);

        if self.strict {
            config.consistency = ConsistencyMode::Strict;
        }
        if self.no_faults {
            config.fault = FaultConfig::none();
        }
        Ok(config)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HUBCACHE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "hubcache=debug,info"
        } else {
            "hubcache=info,warn"
        })
    });

    let format = env::var("HUBCACHE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(std::io::stderr);
            registry.with(layer).init();
        }
        _ => {
            let layer = fmt::layer().compact().with_writer(std::io::stderr);
            registry.with(layer).init();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Campaign(ref args) => {
            let config = args.campaign_config(&cli.root)?;
            let report = run_campaign(&config)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "campaign complete: seeds={} passed={} interesting={} drifted={}",
                    report.seeds_run,
                    report.seeds_passed,
                    report.interesting_states_reached,
                    report.seeds_with_drift
                );
                for failure in &report.failures {
                    println!("  seed {}:", failure.seed);
                    for violation in &failure.violations {
                        println!("    {violation}");
                    }
                }
            }

            if let Some(seed) = report.first_failure {
                bail!("invariants violated; replay with `hubcache-sim replay {seed}`");
            }
        }
        Commands::Replay { seed, ref run } => {
            let config = run.campaign_config(&cli.root)?;
            config.validate()?;
            let result = replay_seed(seed, &config)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result.trace)?);
            } else {
                for event in &result.trace {
                    println!("[{:>3}] {:?}", event.round, event.kind);
                }
                println!(
                    "seed {seed}: drift={} stats={:?}",
                    result.drift, result.stats
                );
                for violation in &result.oracle.violations {
                    println!("  {}", format_violation(violation));
                }
            }

            if !result.oracle.passed {
                bail!("seed {seed} violated invariants");
            }
        }
    }

    Ok(())
}

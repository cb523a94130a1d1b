//! Hazard simulator CLI
//!
//! Runs deadlock or race scenarios and prints their verdicts.

use clap::{Parser, Subcommand};
use hazard_simulator::{
    parse_selection, run_scenarios, ScenarioKind, SimulatorConfig, ALL_RACES_ID,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hazard-sim")]
#[command(about = "Reproduce deadlocks and data races under a watchdog")]
#[command(version)]
struct Cli {
    /// Watchdog budget for deadlock scenarios, in seconds
    #[arg(long, global = true, default_value = "5")]
    timeout_secs: u64,

    /// Watchdog budget for race scenarios (e.g., "60s", "5m")
    #[arg(long, global = true, default_value = "60s")]
    race_timeout: humantime::Duration,

    /// Hold time between acquisitions (e.g., "250ms", "1s")
    #[arg(long, global = true, default_value = "250ms")]
    hold: humantime::Duration,

    /// Seed for think-time jitter
    #[arg(long, global = true, default_value = "12345")]
    seed: u64,

    /// Print the verdict as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Two workers locking two resources in opposite order
    SimpleDeadlock,

    /// N workers over N resources with a rotating acquisition window
    CircularDeadlock {
        /// Number of workers (and resources)
        #[arg(long, default_value = "5")]
        workers: usize,
    },

    /// Unsynchronized read-think-write on a shared counter
    CounterRace {
        /// Number of incrementing threads
        #[arg(long, default_value = "5")]
        threads: usize,

        /// Increments per thread
        #[arg(long, default_value = "1000")]
        iterations: usize,
    },

    /// Concurrent deposits and stale-guarded withdrawals on one balance
    BankRace {
        /// Number of threads (even ids deposit, odd ids withdraw)
        #[arg(long, default_value = "4")]
        threads: usize,

        /// Transactions per thread
        #[arg(long, default_value = "50")]
        transactions: usize,
    },

    /// Counter race followed by bank race, both with default sizes
    Races,

    /// Run a scenario by id (e.g., "circular-deadlock:7", "counter-race:8x2000", "races")
    Run {
        /// Scenario id
        id: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let kinds = match cli.command {
        Commands::SimpleDeadlock => vec![ScenarioKind::SimpleDeadlock],
        Commands::CircularDeadlock { workers } => vec![ScenarioKind::CircularDeadlock { workers }],
        Commands::CounterRace {
            threads,
            iterations,
        } => vec![ScenarioKind::CounterRace {
            threads,
            iterations,
        }],
        Commands::BankRace {
            threads,
            transactions,
        } => vec![ScenarioKind::BankRace {
            threads,
            transactions,
        }],
        Commands::Races => parse_selection(ALL_RACES_ID)?,
        Commands::Run { id } => parse_selection(&id)?,
    };

    let config = SimulatorConfig::new()
        .with_hold(cli.hold.into())
        .with_deadlock_timeout(Duration::from_secs(cli.timeout_secs))
        .with_race_timeout(cli.race_timeout.into())
        .with_seed(cli.seed);

    let verdicts = run_scenarios(&kinds, &config)?;

    if cli.json {
        match verdicts.as_slice() {
            [single] => println!("{}", single.to_json()?),
            all => println!("{}", serde_json::to_string_pretty(all)?),
        }
    } else {
        for verdict in &verdicts {
            verdict.print();
        }
    }

    // Threads stuck in a deadlock are detached; exiting reclaims them.
    Ok(())
}

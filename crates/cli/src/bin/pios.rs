// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pios` - command every worker unit from the leader.
//!
//! ```text
//! pios run dosing_control --units pio2 --units pio3 --mode silent
//! pios kill dosing_control -y
//! pios update-settings dosing_control --target_od 0.6
//! pios sync-configs
//! ```

use clap::{Parser, Subcommand};
use pio_cli::{fleet, init_tracing};

#[derive(Parser)]
#[command(name = "pios", about = "Command the worker units (leader only)")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a job on all, or specific, workers
    Run {
        job: String,
        /// Specify a unit name; repeatable. Default is all active units.
        #[arg(long = "units", default_value = pio_core::BROADCAST)]
        units: Vec<String>,
        /// Skip asking for confirmation
        #[arg(short = 'y')]
        yes: bool,
        /// Extra flags passed through to the worker job
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        extra: Vec<String>,
    },
    /// Send a termination signal to jobs on workers
    Kill {
        #[arg(required = true)]
        jobs: Vec<String>,
        #[arg(long = "units", default_value = pio_core::BROADCAST)]
        units: Vec<String>,
        /// Skip asking for confirmation
        #[arg(short = 'y')]
        yes: bool,
    },
    /// Update editable settings on a running job on workers
    #[command(name = "update-settings")]
    UpdateSettings {
        job: String,
        #[arg(long = "units", default_value = pio_core::BROADCAST)]
        units: Vec<String>,
        /// `--<setting> <value>` pairs
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        settings: Vec<String>,
    },
    /// Ship the global and per-unit configs to workers
    #[command(name = "sync-configs")]
    SyncConfigs {
        #[arg(long = "units", default_value = pio_core::BROADCAST)]
        units: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing(0);
    let cli = Cli::parse();

    let result = match fleet::Fleet::load() {
        Err(e) => Err(e),
        Ok(fleet) => match cli.command {
            Command::Run { job, units, yes, extra } => fleet.run(&job, &extra, &units, yes).await,
            Command::Kill { jobs, units, yes } => fleet.kill(&jobs, &units, yes).await,
            Command::UpdateSettings { job, units, settings } => {
                match fleet::parse_setting_pairs(&settings) {
                    Ok(pairs) => fleet.update_settings(&job, &pairs, &units).await,
                    Err(e) => Err(e),
                }
            }
            Command::SyncConfigs { units } => fleet.sync_configs(&units).await,
        },
    };

    if let Err(exit) = result {
        if !exit.message.is_empty() {
            if exit.code == 0 {
                println!("{exit}");
            } else {
                eprintln!("{exit}");
            }
        }
        std::process::exit(exit.code);
    }
}

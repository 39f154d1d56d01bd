// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pio` - run and manage jobs on this unit.
//!
//! ```text
//! pio run dosing_control --mode turbidostat --target-od 0.5 --volume 0.75
//! pio kill dosing_control
//! pio logs
//! ```

use clap::{ArgAction, Args, Parser, Subcommand};
use pio_cli::{exit_error::ExitError, init_tracing, jobs, logfile, procs};
use pio_control::ControllerOptions;

#[derive(Parser)]
#[command(name = "pio", about = "Run and manage jobs on this unit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a job on this unit
    Run {
        #[command(subcommand)]
        job: RunJob,
    },
    /// Send a termination signal to the oldest process running a job
    Kill {
        job: String,
    },
    /// Follow the shared job log
    Logs,
}

#[derive(Subcommand)]
enum RunJob {
    /// Dosing control: watch OD and growth rate, actuate pumps on a cadence
    #[command(name = "dosing_control")]
    DosingControl(DosingArgs),
}

#[derive(Args)]
struct DosingArgs {
    /// Dosing strategy: silent, morbidostat, turbidostat, pid_turbidostat,
    /// pid_morbidostat
    #[arg(long, default_value = "silent")]
    mode: String,

    /// Target optical density, in volts
    #[arg(long)]
    target_od: Option<f64>,

    /// Target growth rate, 1/hr (pid_morbidostat only)
    #[arg(long)]
    target_growth_rate: Option<f64>,

    /// Time, in minutes, between every monitor check
    #[arg(long, default_value_t = 30.0)]
    duration: f64,

    /// The volume to exchange, mL
    #[arg(long)]
    volume: Option<f64>,

    /// OD sensor channel to follow
    #[arg(long, default_value = "135/A")]
    sensor: String,

    /// Normally IO runs immediately. Set this flag to wait <duration>min
    /// before the first run.
    #[arg(long)]
    skip_first_run: bool,

    /// Increase log verbosity
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Detach and append logs to the shared log file
    #[arg(short = 'b', long)]
    background: bool,
}

impl DosingArgs {
    fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            mode: self.mode.clone(),
            duration_minutes: self.duration,
            skip_first_run: self.skip_first_run,
            sensor: self.sensor.clone(),
            target_od: self.target_od,
            target_growth_rate: self.target_growth_rate,
            volume: self.volume,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { job: RunJob::DosingControl(args) } => {
            if args.background {
                jobs::respawn_detached()
            } else {
                init_tracing(args.verbose);
                jobs::run_dosing_control(args.controller_options()).await
            }
        }
        Command::Kill { job } => {
            init_tracing(0);
            match procs::kill_oldest_job(&job) {
                Ok(Some(pid)) => {
                    println!("Sent SIGTERM to {job} (pid {pid})");
                    Ok(())
                }
                Ok(None) => {
                    println!("No running process found for {job}");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Logs => logfile::follow().await.map_err(Into::into),
    };

    if let Err(error) = result {
        match error.downcast_ref::<ExitError>() {
            Some(exit) => {
                if !exit.message.is_empty() {
                    eprintln!("{exit}");
                }
                std::process::exit(exit.code);
            }
            None => {
                eprintln!("Error: {error:#}");
                std::process::exit(1);
            }
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side job launching for `pio run`.

use crate::logfile;
use anyhow::{anyhow, Context, Result};
use pio_adapters::CalibratedPumps;
use pio_bus::{Bus, BusFactory, BusOptions, BusRole, MqttBus};
use pio_control::{ControllerOptions, DosingController, JobOptions, JOB_NAME};
use pio_core::{BrokerConfig, Config, Ident, JobState};
use std::process::Stdio;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

/// Bus-client factory over the configured broker, with the naming scheme
/// `<unit>-<role>-<job>`.
pub fn mqtt_factory(broker: &BrokerConfig, unit: &str, job_name: &str) -> BusFactory {
    let broker = broker.clone();
    let unit = unit.to_string();
    let job = job_name.to_string();
    Arc::new(move |role| {
        let bus: Arc<dyn Bus> = match role {
            BusRole::Publisher { last_will } => MqttBus::connect(
                BusOptions::from_config(&broker, format!("{unit}-pub-{job}"))
                    .with_last_will(last_will),
            ),
            BusRole::Subscriber => {
                MqttBus::connect(BusOptions::from_config(&broker, format!("{unit}-sub-{job}")))
            }
        };
        Ok(bus)
    })
}

/// Run dosing control in the foreground until the lifecycle exits.
///
/// Termination and interrupt signals drive the job to `disconnected`; the
/// job raises SIGUSR1 once teardown is done, which is our cue to leave.
pub async fn run_dosing_control(options: ControllerOptions) -> Result<()> {
    let config = Config::load().context("loading config")?;
    let unit = crate::unit_name();
    let ident = Ident::new(unit.clone(), config.cluster.experiment.clone());

    // Signal streams install on the main task, before any bus callback can
    // attempt a state change.
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    let pump_bus: Arc<dyn Bus> = MqttBus::connect(BusOptions::from_config(
        &config.broker,
        format!("{unit}-pumps-{JOB_NAME}"),
    ));
    let pumps = Arc::new(CalibratedPumps::new(
        pump_bus,
        ident.clone(),
        config.pumps.clone(),
        JOB_NAME,
    ));

    let controller = DosingController::create(
        ident,
        options,
        pumps,
        mqtt_factory(&config.broker, &unit, JOB_NAME),
        JobOptions { exit_on_disconnect: true },
    )?;
    let job = Arc::clone(controller.core().job());
    let mut run = tokio::spawn(controller.run());

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                if let Err(e) = job.set_state(JobState::Disconnected) {
                    tracing::error!("disconnect on SIGTERM failed: {e}");
                }
            }
            _ = sigint.recv() => {
                if let Err(e) = job.set_state(JobState::Disconnected) {
                    tracing::error!("disconnect on SIGINT failed: {e}");
                }
            }
            _ = sigusr1.recv() => return Ok(()),
            result = &mut run => {
                return match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        let _ = job.set_state(JobState::Disconnected);
                        Err(e.into())
                    }
                    Err(e) => Err(anyhow!("dosing control task failed: {e}")),
                };
            }
        }
    }
}

/// Relaunch the current invocation detached, appending output to the shared
/// log file.
pub fn respawn_detached() -> Result<()> {
    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg != "-b" && arg != "--background")
        .collect();

    let path = logfile::log_path();
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    let log_err = log.try_clone()?;

    std::process::Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .spawn()?;

    println!("Appending logs to {}", path.display());
    println!("Tip: tail logs using `pio logs`");
    Ok(())
}

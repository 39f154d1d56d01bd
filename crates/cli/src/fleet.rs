// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leader-side fan-out of fleet commands.
//!
//! Only the elected leader may run these; workers are refused up front.
//! Dispatch runs one task per unit through a bounded pool, and a failing
//! unit is reported without stopping the rest of the fan-out.

use crate::confirm::confirm;
use crate::exit_error::ExitError;
use pio_bus::{Bus, BusOptions, MqttBus, QoS};
use pio_core::{config_dir, topics, Config, BROADCAST};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Bound on concurrent per-unit dispatch tasks.
const MAX_FANOUT: usize = 8;

/// Leader context for fleet commands.
#[derive(Debug)]
pub struct Fleet {
    pub config: Config,
    pub unit: String,
}

impl Fleet {
    /// Gate on leader election and a non-empty inventory.
    pub fn new(config: Config, unit: String) -> Result<Self, ExitError> {
        if config.cluster.leader != unit {
            return Err(ExitError::new(0, "workers cannot run `pios` commands. Try `pio` instead."));
        }
        if config.cluster.inventory.is_empty() {
            return Err(ExitError::new(0, "No active workers. See `inventory` section in config.toml."));
        }
        Ok(Self { config, unit })
    }

    pub fn load() -> Result<Self, ExitError> {
        let config = Config::load().map_err(|e| ExitError::new(1, e.to_string()))?;
        Self::new(config, crate::unit_name())
    }

    /// `$broadcast` expands to the active worker inventory.
    pub fn expand_units(&self, units: &[String]) -> Vec<String> {
        if units.iter().any(|u| u == BROADCAST) {
            self.config.cluster.inventory.clone()
        } else {
            units.to_vec()
        }
    }

    /// Launch a detached job on each unit.
    pub async fn run(
        &self,
        job: &str,
        extra: &[String],
        units: &[String],
        assume_yes: bool,
    ) -> Result<(), ExitError> {
        let units = self.expand_units(units);
        let mut core_command = vec!["pio".to_string(), "run".to_string(), job.to_string()];
        core_command.extend(extra.iter().cloned());
        let core_command = core_command.join(" ");

        if !confirm(&format!("Confirm running `{core_command}` on {units:?}?"), assume_yes) {
            return Ok(());
        }

        let command = format!("{core_command} -b");
        for_each_unit(units, |unit| ssh(unit, command.clone())).await;
        Ok(())
    }

    /// SIGTERM one or more jobs on each unit via the worker CLI.
    pub async fn kill(
        &self,
        jobs: &[String],
        units: &[String],
        assume_yes: bool,
    ) -> Result<(), ExitError> {
        let units = self.expand_units(units);
        let command = format!("pio kill {}", jobs.join(" "));

        if !confirm(&format!("Confirm killing `{}` on {units:?}?", jobs.join(" ")), assume_yes) {
            return Ok(());
        }

        for_each_unit(units, |unit| ssh(unit, command.clone())).await;
        Ok(())
    }

    /// Publish `…/<job>/<setting>/set` writes to each unit.
    pub async fn update_settings(
        &self,
        job: &str,
        pairs: &[(String, String)],
        units: &[String],
    ) -> Result<(), ExitError> {
        let units = self.expand_units(units);
        let bus = MqttBus::connect(BusOptions::from_config(
            &self.config.broker,
            format!("{}-pios-update", self.unit),
        ));

        for unit in &units {
            println!("Updating {job} on {unit}...");
            let ident = pio_core::Ident::new(unit.clone(), self.config.cluster.experiment.clone());
            for (setting, value) in pairs {
                let topic = topics::set_topic(&ident, job, setting);
                if let Err(e) = bus.publish(&topic, value.as_bytes(), QoS::ExactlyOnce, false) {
                    tracing::error!("{unit}: {e}");
                    eprintln!("{unit}: {e}");
                }
            }
        }

        // Give the client a beat to finish the QoS handshakes before the
        // process exits.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = bus.disconnect();
        Ok(())
    }

    /// Ship the global config plus each unit's per-host config.
    pub async fn sync_configs(&self, units: &[String]) -> Result<(), ExitError> {
        let units = self.expand_units(units);
        let dir = config_dir().map_err(|e| ExitError::new(1, e.to_string()))?;
        let leader = self.config.cluster.leader.clone();

        for_each_unit(units, |unit| {
            let dir = dir.clone();
            let leader = leader.clone();
            async move {
                // The leader's own global config is already in place; copying
                // it onto itself once wiped the file mid-copy.
                if unit != leader {
                    scp(&dir.join("config.toml"), &format!("{unit}:.pioreactor/config.toml"))
                        .await?;
                }

                let unit_file = dir.join(format!("config_{unit}.toml"));
                if !unit_file.exists() {
                    return Err(format!(
                        "Did you forget to create config_{unit}.toml to ship to {unit}?"
                    ));
                }
                scp(&unit_file, &format!("{unit}:.pioreactor/unit_config.toml")).await
            }
        })
        .await;
        Ok(())
    }
}

/// Parse trailing `--<setting> <value>` pairs for update-settings.
pub fn parse_setting_pairs(args: &[String]) -> Result<Vec<(String, String)>, ExitError> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(ExitError::new(1, "expected `--<setting> <value>` pairs"));
    }
    let mut pairs = Vec::with_capacity(args.len() / 2);
    for chunk in args.chunks(2) {
        let Some(name) = chunk[0].strip_prefix("--") else {
            return Err(ExitError::new(1, format!("expected a `--<setting>` flag, got `{}`", chunk[0])));
        };
        pairs.push((name.replace('-', "_"), chunk[1].clone()));
    }
    Ok(pairs)
}

/// Bounded fan-out; per-unit failures are reported and skipped.
async fn for_each_unit<F, Fut>(units: Vec<String>, dispatch: F)
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    use futures_util::StreamExt;

    futures_util::stream::iter(units)
        .for_each_concurrent(MAX_FANOUT, |unit| {
            let task = dispatch(unit.clone());
            async move {
                println!("Executing on {unit}...");
                if let Err(e) = task.await {
                    tracing::error!("{unit}: {e}");
                    eprintln!("{unit}: {e}");
                }
            }
        })
        .await;
}

async fn ssh(unit: String, command: String) -> Result<(), String> {
    let status = tokio::process::Command::new("ssh")
        .arg(&unit)
        .arg(&command)
        .status()
        .await
        .map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("ssh exited with {status}"))
    }
}

async fn scp(local: &Path, remote: &str) -> Result<(), String> {
    let status = tokio::process::Command::new("scp")
        .arg(local)
        .arg(remote)
        .status()
        .await
        .map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("scp exited with {status}"))
    }
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;

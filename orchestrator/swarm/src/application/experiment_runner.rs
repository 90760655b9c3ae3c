// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Batch experiment runner
//!
//! Drives a list of experiments through the ground station, one after the
//! other, using the agents' status reports as the handshake:
//!
//! 1. select the experiment for every agent, then send `pre_start`
//! 2. wait until every agent reports READY
//! 3. send `Experiment` and wait until every agent reports DONE
//! 4. send `hold` and let the swarm settle before the next experiment
//!
//! Repeating paths never report DONE, so every experiment is bounded by
//! [`RunnerSettings::experiment_timeout`].

use anyhow::bail;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use helix_core::domain::agent::AgentId;
use helix_core::domain::mission::Command;
use helix_core::domain::node_config::RunnerSettings;
use helix_core::domain::protocol::AgentStatus;

use super::ground_station::GroundStation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every agent reported DONE.
    Completed,
    /// The experiment timeout elapsed first; the swarm was put on hold.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub name: String,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
}

pub struct ExperimentRunner {
    station: Arc<GroundStation>,
    settings: RunnerSettings,
}

impl ExperimentRunner {
    pub fn new(station: Arc<GroundStation>, settings: RunnerSettings) -> Self {
        Self { station, settings }
    }

    /// Fly one experiment with `agents`. Fails if any agent does not report
    /// READY in time, after putting everyone on hold.
    pub async fn run_one(
        &self,
        agents: &[AgentId],
        name: &str,
    ) -> anyhow::Result<ExperimentReport> {
        if agents.is_empty() {
            bail!("No agents to run experiment '{}' with", name);
        }
        info!(experiment = name, agents = agents.len(), "Starting experiment");
        self.station.clear_statuses();

        for id in agents {
            self.station.select_experiment(Some(id), name).await?;
        }
        tokio::time::sleep(self.settings.settle).await;

        self.send_all(agents, Command::PreStart).await?;
        if !self
            .station
            .wait_for_status(agents, AgentStatus::Ready, self.settings.ready_timeout)
            .await
        {
            let missing = self.missing(agents, AgentStatus::Ready);
            self.send_all(agents, Command::Hold).await?;
            bail!(
                "Agents {:?} did not report READY for '{}' within {:?}",
                missing,
                name,
                self.settings.ready_timeout
            );
        }
        tokio::time::sleep(self.settings.settle).await;

        let started = Instant::now();
        self.send_all(agents, Command::Experiment).await?;
        let outcome = if self
            .station
            .wait_for_status(agents, AgentStatus::Done, self.settings.experiment_timeout)
            .await
        {
            RunOutcome::Completed
        } else {
            warn!(
                experiment = name,
                missing = ?self.missing(agents, AgentStatus::Done),
                "Experiment timed out"
            );
            RunOutcome::TimedOut
        };
        let elapsed = started.elapsed();

        self.send_all(agents, Command::Hold).await?;
        tokio::time::sleep(self.settings.settle).await;
        info!(
            experiment = name,
            ?outcome,
            elapsed_secs = elapsed.as_secs_f64(),
            "Experiment finished"
        );

        Ok(ExperimentReport {
            name: name.to_string(),
            outcome,
            elapsed,
        })
    }

    /// Run `experiments` in order. Cancellation puts the swarm on hold and
    /// returns the reports of the experiments that finished.
    pub async fn run_all(
        &self,
        agents: &[AgentId],
        experiments: &[String],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<ExperimentReport>> {
        let mut reports = Vec::with_capacity(experiments.len());
        for name in experiments {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(experiment = %name, "Run cancelled, holding");
                    self.send_all(agents, Command::Hold).await?;
                    break;
                }
                report = self.run_one(agents, name) => reports.push(report?),
            }
        }
        Ok(reports)
    }

    async fn send_all(&self, agents: &[AgentId], command: Command) -> anyhow::Result<()> {
        for id in agents {
            self.station.send_command(Some(id), command).await?;
        }
        Ok(())
    }

    fn missing(&self, agents: &[AgentId], status: AgentStatus) -> Vec<AgentId> {
        let statuses = self.station.statuses();
        agents
            .iter()
            .filter(|id| statuses.get(*id) != Some(&status))
            .cloned()
            .collect()
    }
}

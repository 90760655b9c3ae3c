// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Agent Node
//!
//! One running swarm member: owns the vehicle driver, the bus session, the
//! replicated pose table and the mission state machine, and wires them
//! together with a handful of background tasks.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Tasks:** telemetry ingestion and publication, the bus receive loop,
//!   the own-link monitor and stale-peer eviction run for the node lifetime;
//!   pre-start transit, the control loop and return-home run per command and
//!   are superseded by the next accepted command
//! - **Shared state:** the pose table is read by snapshot only; the mission
//!   state lives in a watch channel so long-running tasks observe changes
//!   without polling a lock

use anyhow::Context;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use helix_core::domain::agent::AgentId;
use helix_core::domain::controller::PathFollower;
use helix_core::domain::corridor::PathId;
use helix_core::domain::driver::{DriverError, VehicleDriver};
use helix_core::domain::events::SwarmEvent;
use helix_core::domain::experiment::ConfigError;
use helix_core::domain::geodesy::{GeodeticPosition, LocalFrame};
use helix_core::domain::mission::{Command, MissionError, MissionState};
use helix_core::domain::node_config::NodeConfigSpec;
use helix_core::domain::pose::SharedPoseTable;
use helix_core::domain::protocol::{AgentStatus, ConnectionStatus, ParameterUpdate, Topic};
use helix_core::domain::transport::{Message, SessionOptions, Transport, TransportError};
use helix_core::infrastructure::codec;
use helix_core::infrastructure::event_bus::EventBus;
use helix_core::infrastructure::experiment_loader::LoadedExperiment;

use crate::application::maneuver::{Maneuver, TransitSettings};
use crate::application::telemetry::{
    spawn_battery_publisher, spawn_ingestion, spawn_pose_publisher, TelemetryContext,
};
use crate::domain::bootstrap::{
    assign_initial_state, bootstrap_order, current_altitudes, current_positions,
};
use crate::domain::deconfliction::deconflict;

/// How often lost peers are checked against the stale timeout.
const EVICTION_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);

/// Mutable per-mission state. Never held across an await.
#[derive(Default)]
struct NodeRuntime {
    experiment: Option<String>,
    follower: Option<PathFollower>,
    home: Option<GeodeticPosition>,
    return_altitude: Option<f64>,
    active_task: Option<CancellationToken>,
}

pub struct AgentNode {
    id: AgentId,
    settings: RwLock<NodeConfigSpec>,
    frame: LocalFrame,
    driver: Arc<dyn VehicleDriver>,
    transport: Arc<dyn Transport>,
    table: SharedPoseTable,
    events: EventBus,
    mission: watch::Sender<MissionState>,
    runtime: Mutex<NodeRuntime>,
    cancel: CancellationToken,
}

/// Background tasks of a started node.
pub struct NodeHandle {
    node: Arc<AgentNode>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn node(&self) -> &Arc<AgentNode> {
        &self.node
    }

    /// Stop every task, mark the node Disconnected and close the session.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.node.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Node task ended abnormally: {}", e);
            }
        }
        let status = Message::new(
            Topic::ConnectionStatus(self.node.id.clone()).to_string(),
            codec::encode_text(ConnectionStatus::Disconnected.as_str()),
        )
        .retained();
        if let Err(e) = self.node.transport.publish(status).await {
            debug!("Could not publish final connection status: {}", e);
        }
        self.node
            .transport
            .disconnect()
            .await
            .context("Failed to close bus session")?;
        info!(agent_id = %self.node.id, "Agent node stopped");
        Ok(())
    }
}

impl AgentNode {
    pub fn new(
        settings: NodeConfigSpec,
        driver: Arc<dyn VehicleDriver>,
        transport: Arc<dyn Transport>,
        events: EventBus,
    ) -> Result<Arc<Self>, ConfigError> {
        let id = settings.agent_id()?;
        let frame = LocalFrame::new(settings.geodetic_reference);
        let (mission, _) = watch::channel(MissionState::Idle);
        Ok(Arc::new(Self {
            id,
            settings: RwLock::new(settings),
            frame,
            driver,
            transport,
            table: SharedPoseTable::new(),
            events,
            mission,
            runtime: Mutex::new(NodeRuntime::default()),
            cancel: CancellationToken::new(),
        }))
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn table(&self) -> &SharedPoseTable {
        &self.table
    }

    pub fn frame(&self) -> LocalFrame {
        self.frame
    }

    pub fn mission_state(&self) -> MissionState {
        *self.mission.borrow()
    }

    pub fn subscribe_mission(&self) -> watch::Receiver<MissionState> {
        self.mission.subscribe()
    }

    pub fn settings(&self) -> NodeConfigSpec {
        self.settings.read().clone()
    }

    /// True once a pre-start transit has completed and the follower is ready.
    pub fn is_prepared(&self) -> bool {
        self.runtime.lock().follower.is_some()
    }

    /// Lane and waypoint index of the prepared follower, if any.
    pub fn lane(&self) -> Option<(PathId, usize)> {
        self.runtime
            .lock()
            .follower
            .as_ref()
            .map(|f| (f.path(), f.index()))
    }

    /// Connect, announce, subscribe, and spawn the lifetime tasks.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<NodeHandle> {
        let will = Message::new(
            Topic::ConnectionStatus(self.id.clone()).to_string(),
            codec::encode_text(ConnectionStatus::Disconnected.as_str()),
        )
        .retained();
        self.transport
            .connect(SessionOptions::new(self.id.as_str()).with_last_will(will))
            .await
            .context("Failed to connect to the bus")?;

        let filters = [
            Topic::Detection.to_string(),
            Topic::EmergencyStop.to_string(),
            Topic::Command(self.id.clone()).to_string(),
            Topic::BroadcastCommand.to_string(),
            Topic::HomeAltitude(self.id.clone()).to_string(),
            Topic::UpdateParameters(self.id.clone()).to_string(),
            Topic::CurrentExperiment(self.id.clone()).to_string(),
            "+/connection_status".to_string(),
        ];
        for filter in &filters {
            self.transport
                .subscribe(filter)
                .await
                .with_context(|| format!("Failed to subscribe to '{}'", filter))?;
        }

        self.table.insert_if_absent(&self.id);
        self.announce().await;

        let (control_period, publish_period, battery_period) = {
            let settings = self.settings.read();
            (
                settings.control.control_period,
                settings.control.publish_period,
                settings.control.battery_period,
            )
        };
        let ctx = TelemetryContext {
            agent_id: self.id.clone(),
            driver: self.driver.clone(),
            transport: self.transport.clone(),
            table: self.table.clone(),
            cancel: self.cancel.clone(),
        };
        let mut tasks = spawn_ingestion(&ctx);
        tasks.push(spawn_pose_publisher(&ctx, publish_period));
        tasks.push(spawn_battery_publisher(&ctx, battery_period));
        tasks.push(self.spawn_receiver());
        tasks.push(self.spawn_link_monitor());
        tasks.push(self.spawn_eviction());

        info!(
            agent_id = %self.id,
            control_period = ?control_period,
            "Agent node started"
        );
        Ok(NodeHandle {
            node: self.clone(),
            tasks,
        })
    }

    fn emit(&self, event: SwarmEvent) {
        self.events.publish(event);
    }

    async fn publish(&self, message: Message) {
        let topic = message.topic.clone();
        if let Err(e) = self.transport.publish(message).await {
            debug!(agent_id = %self.id, %topic, "Publish failed: {}", e);
        }
    }

    /// Publish own id on `detection` and a retained Connected status.
    async fn announce(&self) {
        self.publish(Message::new(
            Topic::Detection.to_string(),
            codec::encode_text(self.id.as_str()),
        ))
        .await;
        self.publish(
            Message::new(
                Topic::ConnectionStatus(self.id.clone()).to_string(),
                codec::encode_text(ConnectionStatus::Connected.as_str()),
            )
            .retained(),
        )
        .await;
    }

    async fn publish_status(&self, status: AgentStatus) {
        info!(agent_id = %self.id, %status, "Status");
        self.publish(Message::new(
            Topic::Status(self.id.clone()).to_string(),
            codec::encode_text(status.as_str()),
        ))
        .await;
    }

    async fn report_error(&self, text: &str) {
        metrics::counter!("helix_errors_reported_total").increment(1);
        self.publish(Message::new(
            Topic::Errors(self.id.clone()).to_string(),
            codec::encode_text(text),
        ))
        .await;
    }

    async fn reject(&self, command: Option<Command>, reason: String) {
        warn!(agent_id = %self.id, ?command, "Command rejected: {}", reason);
        self.emit(SwarmEvent::CommandRejected {
            agent_id: self.id.clone(),
            command,
            reason: reason.clone(),
            rejected_at: Utc::now(),
        });
        self.report_error(&reason).await;
    }

    fn spawn_receiver(self: &Arc<Self>) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = node.cancel.cancelled() => break,
                    received = node.transport.recv() => received,
                };
                match received {
                    Ok(message) => node.handle_message(message).await,
                    Err(TransportError::Closed) | Err(TransportError::NotConnected) => {
                        warn!(agent_id = %node.id, "Bus session closed, receive loop exiting");
                        break;
                    }
                    Err(e) => debug!(agent_id = %node.id, "Receive failed: {}", e),
                }
            }
            debug!(agent_id = %node.id, "Receive loop stopped");
        })
    }

    async fn handle_message(self: &Arc<Self>, message: Message) {
        let topic = match message.topic.parse::<Topic>() {
            Ok(topic) => topic,
            Err(e) => {
                debug!(agent_id = %self.id, "Ignoring message: {}", e);
                return;
            }
        };

        match topic {
            // Only discovered peers are replicated; an evicted peer comes
            // back through detection, not through stray telemetry.
            Topic::Telemetry(peer) if peer != self.id && self.table.contains(&peer) => {
                match codec::decode_telemetry(&message.payload) {
                    Ok(frame) => self.table.apply_telemetry(&peer, &frame),
                    Err(e) => warn!(agent_id = %self.id, %peer, "Bad telemetry frame: {}", e),
                }
            }
            Topic::Detection => match codec::decode_text(&message.payload).map(AgentId::new) {
                Ok(Ok(peer)) => self.on_detection(peer).await,
                _ => warn!(agent_id = %self.id, "Malformed detection payload"),
            },
            Topic::ConnectionStatus(peer) if peer != self.id => {
                let status = codec::decode_text(&message.payload)
                    .map_err(|e| e.to_string())
                    .and_then(|text| text.parse::<ConnectionStatus>());
                match status {
                    Ok(status) => self.on_peer_status(peer, status).await,
                    Err(e) => warn!(agent_id = %self.id, %peer, "Bad connection status: {}", e),
                }
            }
            Topic::Command(_) | Topic::BroadcastCommand => {
                let parsed = codec::decode_text(&message.payload)
                    .map_err(|e| e.to_string())
                    .and_then(|text| text.parse::<Command>().map_err(|e| e.to_string()));
                match parsed {
                    Ok(command) => {
                        if let Err(e) = self.dispatch(command).await {
                            self.reject(Some(command), e.to_string()).await;
                        }
                    }
                    Err(reason) => self.reject(None, reason).await,
                }
            }
            Topic::EmergencyStop => {
                warn!(agent_id = %self.id, "Emergency stop received");
                if let Err(e) = self.dispatch(Command::Hold).await {
                    error!(agent_id = %self.id, "Emergency hold failed: {}", e);
                }
            }
            Topic::HomeAltitude(_) => match codec::decode_altitude(&message.payload) {
                Ok(altitude) if altitude.is_finite() => {
                    info!(agent_id = %self.id, altitude, "Return altitude assigned");
                    self.runtime.lock().return_altitude = Some(altitude);
                }
                _ => self.report_error("invalid home altitude payload").await,
            },
            Topic::CurrentExperiment(_) => match codec::decode_text(&message.payload) {
                Ok(name) if !name.trim().is_empty() => {
                    info!(agent_id = %self.id, experiment = name.trim(), "Experiment selected");
                    self.runtime.lock().experiment = Some(name.trim().to_string());
                }
                _ => self.report_error("invalid experiment name").await,
            },
            Topic::UpdateParameters(_) => {
                let update = serde_json::from_slice::<ParameterUpdate>(&message.payload)
                    .map_err(|e| e.to_string())
                    .and_then(|u| {
                        self.settings
                            .write()
                            .apply_parameter_update(&u)
                            .map(|_| u)
                            .map_err(|e| e.to_string())
                    });
                match update {
                    Ok(update) => info!(agent_id = %self.id, ?update, "Parameters updated"),
                    Err(reason) => {
                        warn!(agent_id = %self.id, "Parameter update rejected: {}", reason);
                        self.report_error(&format!("parameter update rejected: {}", reason))
                            .await;
                    }
                }
            }
            _ => {}
        }
    }

    async fn on_detection(self: &Arc<Self>, peer: AgentId) {
        if peer == self.id {
            return;
        }
        if self.table.insert_if_absent(&peer) {
            info!(agent_id = %self.id, %peer, "Discovered agent");
            let filter = Topic::Telemetry(peer.clone()).to_string();
            if let Err(e) = self.transport.subscribe(&filter).await {
                warn!(agent_id = %self.id, %peer, "Could not subscribe to telemetry: {}", e);
            }
            self.emit(SwarmEvent::AgentDiscovered {
                agent_id: self.id.clone(),
                peer,
                discovered_at: Utc::now(),
            });
            // Late joiners only learn about us from a fresh announcement.
            self.announce().await;
        } else if self.table.mark_connected(&peer) {
            info!(agent_id = %self.id, %peer, "Peer link restored");
            self.emit(SwarmEvent::PeerLinkRestored {
                agent_id: self.id.clone(),
                peer,
                restored_at: Utc::now(),
            });
        }
    }

    async fn on_peer_status(self: &Arc<Self>, peer: AgentId, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Disconnected => {
                if self.table.mark_lost(&peer, Instant::now()) {
                    warn!(agent_id = %self.id, %peer, "Peer link lost");
                    self.emit(SwarmEvent::PeerLinkLost {
                        agent_id: self.id.clone(),
                        peer,
                        lost_at: Utc::now(),
                    });
                }
            }
            ConnectionStatus::Connected => self.on_detection(peer).await,
        }
    }

    /// Cancel whatever task the previous command started and hand out a
    /// token for the next one.
    fn supersede(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        if let Some(previous) = self.runtime.lock().active_task.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Apply `command` to the mission state atomically.
    fn transition(&self, command: Command) -> Result<(MissionState, MissionState), MissionError> {
        let mut outcome = Err(MissionError::InvalidTransition {
            state: *self.mission.borrow(),
            command,
        });
        self.mission.send_if_modified(|state| match state.apply(command) {
            Ok(next) => {
                outcome = Ok((*state, next));
                let changed = *state != next;
                *state = next;
                changed
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    fn force_state(&self, next: MissionState) {
        let from = self.mission.send_replace(next);
        if from != next {
            self.emit(SwarmEvent::MissionStateChanged {
                agent_id: self.id.clone(),
                from,
                to: next,
                changed_at: Utc::now(),
            });
        }
    }

    /// Validate `command` against the mission state and act on it.
    ///
    /// Short actions complete before this returns; pre-start, the control
    /// loop and return-home run as tasks superseded by the next command.
    pub async fn dispatch(self: &Arc<Self>, command: Command) -> Result<MissionState, MissionError> {
        if command == Command::Experiment
            && self.mission_state().apply(command).is_ok()
            && !self.is_prepared()
        {
            return Err(MissionError::NotPrepared);
        }

        let (from, to) = self.transition(command)?;
        info!(agent_id = %self.id, %command, %from, %to, "Command accepted");
        if from != to {
            self.emit(SwarmEvent::MissionStateChanged {
                agent_id: self.id.clone(),
                from,
                to,
                changed_at: Utc::now(),
            });
        }

        let token = self.supersede();
        match command {
            Command::Arm => match self.driver.arm().await {
                Ok(()) => {
                    let home = self.table.get(&self.id).map(|pose| pose.geodetic);
                    self.runtime.lock().home = home;
                }
                Err(e) => self.actuation_failed("arm", e).await,
            },
            Command::Takeoff => {
                let altitude = self.settings.read().flight.takeoff_altitude;
                if let Err(e) = self.driver.takeoff(altitude).await {
                    self.actuation_failed("takeoff", e).await;
                }
            }
            Command::Hold => {
                if let Err(e) = self.driver.hold().await {
                    error!(agent_id = %self.id, "Hold failed: {}", e);
                    self.report_error(&format!("hold failed: {}", e)).await;
                }
            }
            Command::Land => {
                if let Err(e) = self.driver.land().await {
                    self.actuation_failed("land", e).await;
                }
            }
            Command::PreStart => {
                tokio::spawn(self.clone().run_pre_start(token));
            }
            Command::Experiment => {
                self.anchor_mission_start();
                tokio::spawn(self.clone().run_control_loop(token));
            }
            Command::Return => {
                tokio::spawn(self.clone().run_return(token));
            }
        }
        Ok(to)
    }

    /// Start delays count from the moment the Experiment command is accepted.
    fn anchor_mission_start(&self) {
        let gps_time_us = self
            .table
            .get(&self.id)
            .map(|pose| pose.gps_time_us)
            .unwrap_or(0);
        if gps_time_us == 0 {
            debug!(agent_id = %self.id, "No GPS time yet, start delay runs from the first tick");
            return;
        }
        if let Some(follower) = self.runtime.lock().follower.as_mut() {
            follower.start_mission(gps_time_us);
        }
    }

    /// Report a failed actuation and fall back to Hold.
    async fn actuation_failed(self: &Arc<Self>, action: &str, error: DriverError) {
        error!(agent_id = %self.id, action, "Actuation failed: {}", error);
        self.report_error(&format!("{} failed: {}", action, error)).await;
        self.fail_safe_hold(action).await;
    }

    async fn fail_safe_hold(self: &Arc<Self>, reason: &str) {
        warn!(agent_id = %self.id, reason, "Fail-safe hold");
        self.supersede();
        self.force_state(MissionState::Holding);
        if let Err(e) = self.driver.hold().await {
            error!(agent_id = %self.id, "Fail-safe hold failed: {}", e);
        }
    }

    fn maneuver(&self, owner: MissionState, token: CancellationToken) -> Maneuver {
        let transit = TransitSettings::from(&self.settings.read().flight);
        Maneuver::new(
            self.id.clone(),
            self.driver.clone(),
            self.table.clone(),
            self.frame,
            transit,
            self.mission.subscribe(),
            owner,
            token,
        )
    }

    async fn run_pre_start(self: Arc<Self>, token: CancellationToken) {
        self.runtime.lock().follower = None;
        match self.prepare(token).await {
            Ok(true) => {
                info!(agent_id = %self.id, "Pre-start complete, ready for Experiment");
                self.publish_status(AgentStatus::Ready).await;
            }
            Ok(false) => debug!(agent_id = %self.id, "Pre-start superseded"),
            Err(e) => {
                error!(agent_id = %self.id, "Pre-start failed: {:#}", e);
                self.report_error(&format!("pre_start failed: {:#}", e)).await;
                if self.mission_state() == MissionState::PreStart {
                    self.fail_safe_hold("pre_start").await;
                }
            }
        }
    }

    /// Load the experiment, bootstrap, and fly the deconflicted transit.
    /// Returns false when superseded before completion.
    async fn prepare(&self, token: CancellationToken) -> anyhow::Result<bool> {
        let (directory, name, deconfliction) = {
            let settings = self.settings.read();
            let name = self
                .runtime
                .lock()
                .experiment
                .clone()
                .unwrap_or_else(|| settings.experiments.default.clone());
            (
                settings.experiments.directory.clone(),
                name,
                settings.flight.deconfliction,
            )
        };
        let loaded = LoadedExperiment::load_named(&directory, &name)?;

        let snapshot = self.table.snapshot();
        let order = bootstrap_order(&snapshot);
        let assignments =
            assign_initial_state(&order, &loaded.config, &current_positions(&snapshot));
        let mine = assignments
            .get(&self.id)
            .context("own agent is not in the bootstrap order")?;

        let mut follower = PathFollower::new(
            loaded.corridor.clone(),
            &loaded.config,
            mine.initial_path,
            mine.permissions.clone(),
            mine.start_delay,
        )?;

        let ladder = deconflict(
            &current_altitudes(&order, &snapshot),
            self.frame.reference().altitude_m,
            deconfliction.into(),
        );
        let travel_altitude = ladder
            .iter()
            .find(|(id, _)| id == &self.id)
            .map(|(_, altitude)| *altitude)
            .context("own agent missing from the altitude ladder")?;

        info!(
            agent_id = %self.id,
            experiment = %loaded.config.name,
            rank = mine.rank,
            path = mine.initial_path,
            travel_altitude,
            swarm_size = order.len(),
            "Bootstrapped"
        );

        let outcome = self
            .maneuver(MissionState::PreStart, token)
            .deconflicted_transit(mine.pre_start_position, travel_altitude)
            .await?;
        if outcome.is_aborted() {
            return Ok(false);
        }

        if let Some(pose) = self.table.get(&self.id) {
            follower.seed_index(&pose.position);
        }
        self.runtime.lock().follower = Some(follower);
        Ok(true)
    }

    async fn run_control_loop(self: Arc<Self>, token: CancellationToken) {
        let Some(mut follower) = self.runtime.lock().follower.take() else {
            warn!(agent_id = %self.id, "Control loop started without a follower");
            return;
        };
        if let Err(e) = self.driver.start_offboard().await {
            self.runtime.lock().follower = Some(follower);
            self.actuation_failed("start_offboard", e).await;
            return;
        }

        let period = self.settings.read().control.control_period;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(agent_id = %self.id, path = follower.path(), "Control loop running");
        let mut finished = follower.has_finished();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.mission_state() != MissionState::Following {
                break;
            }

            let (limits, fence) = {
                let settings = self.settings.read();
                (settings.control_limits(), settings.flight.altitude_fence)
            };
            let snapshot = self.table.snapshot();
            let output = follower.tick(&self.id, &snapshot, &limits);

            if let Some(switch) = &output.switched {
                self.emit(SwarmEvent::LaneSwitched {
                    agent_id: self.id.clone(),
                    from_path: switch.from_path,
                    to_path: switch.to_path,
                    to_index: switch.to_index,
                    switched_at: Utc::now(),
                });
            }

            if !finished && follower.has_finished() {
                finished = true;
                self.publish_status(AgentStatus::Done).await;
            }

            if let Some(own) = snapshot.get(&self.id) {
                let height = -own.position.z;
                if !fence.contains(height) {
                    self.runtime.lock().follower = Some(follower);
                    self.altitude_fence_breached(height).await;
                    return;
                }
            }

            if let Err(e) = self.driver.set_velocity_ned(output.command).await {
                if token.is_cancelled() || self.mission_state() != MissionState::Following {
                    break;
                }
                self.runtime.lock().follower = Some(follower);
                self.actuation_failed("set_velocity_ned", e).await;
                return;
            }
        }

        debug!(agent_id = %self.id, path = follower.path(), index = follower.index(), "Control loop stopped");
        self.runtime.lock().follower = Some(follower);
    }

    async fn altitude_fence_breached(self: &Arc<Self>, height_m: f64) {
        error!(agent_id = %self.id, height_m, "Altitude fence breached, holding swarm");
        self.emit(SwarmEvent::AltitudeFenceBreached {
            agent_id: self.id.clone(),
            height_m,
            breached_at: Utc::now(),
        });
        self.fail_safe_hold("altitude fence").await;
        for peer in self.table.ids() {
            if peer == self.id {
                continue;
            }
            self.publish(Message::new(
                Topic::Command(peer).to_string(),
                codec::encode_text(Command::Hold.as_str()),
            ))
            .await;
        }
    }

    async fn run_return(self: Arc<Self>, token: CancellationToken) {
        let reference = self.frame.reference();
        let default_altitude =
            reference.altitude_m + self.settings.read().flight.takeoff_altitude;
        let (home, altitude) = {
            let runtime = self.runtime.lock();
            (
                runtime.home.unwrap_or(reference),
                runtime.return_altitude.unwrap_or(default_altitude),
            )
        };

        let result = self
            .maneuver(MissionState::Returning, token)
            .return_home(home, altitude)
            .await;
        match result {
            Ok(outcome) if outcome.is_aborted() => debug!(agent_id = %self.id, "Return superseded"),
            Ok(_) => {}
            Err(e) => {
                if self.mission_state() == MissionState::Returning {
                    self.actuation_failed("return", e).await;
                }
            }
        }
    }

    /// Watch the own bus link: announce on recovery, hold when it stays down
    /// past the grace period while a mission task is running.
    fn spawn_link_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let node = self.clone();
        let mut link = self.transport.link_state();
        tokio::spawn(async move {
            loop {
                if link.borrow_and_update().is_connected() {
                    tokio::select! {
                        _ = node.cancel.cancelled() => break,
                        changed = link.changed() => if changed.is_err() { break },
                    }
                    continue;
                }

                warn!(agent_id = %node.id, "Own bus link lost");
                node.emit(SwarmEvent::OwnLinkLost {
                    agent_id: node.id.clone(),
                    lost_at: Utc::now(),
                });
                let grace = node.settings.read().control.link_loss_grace;
                let restored = tokio::select! {
                    _ = node.cancel.cancelled() => break,
                    _ = tokio::time::sleep(grace) => None,
                    result = async { link.wait_for(|s| s.is_connected()).await.map(|_| ()) } => Some(result),
                };
                let restored = match restored {
                    Some(result) => result,
                    None => {
                        if node.mission_state().is_airborne_task() {
                            node.fail_safe_hold("link lost").await;
                        }
                        tokio::select! {
                            _ = node.cancel.cancelled() => break,
                            result = async { link.wait_for(|s| s.is_connected()).await.map(|_| ()) } => result,
                        }
                    }
                };
                if restored.is_err() {
                    break;
                }

                info!(agent_id = %node.id, "Own bus link restored");
                node.announce().await;
                node.emit(SwarmEvent::OwnLinkRestored {
                    agent_id: node.id.clone(),
                    restored_at: Utc::now(),
                });
            }
            debug!(agent_id = %node.id, "Link monitor stopped");
        })
    }

    fn spawn_eviction(self: &Arc<Self>) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVICTION_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = node.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let timeout = node.settings.read().control.stale_peer_timeout;
                        for peer in node.table.evict_stale(timeout, Instant::now()) {
                            info!(agent_id = %node.id, %peer, "Evicted stale peer");
                            node.emit(SwarmEvent::PeerEvicted {
                                agent_id: node.id.clone(),
                                peer,
                                evicted_at: Utc::now(),
                            });
                        }
                    }
                }
            }
        })
    }
}

// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Ground Station
//!
//! Operator-side bus client. Keeps its own replica of the swarm from the
//! agents' telemetry, issues commands, assigns deconflicted return altitudes
//! and runs the proximity monitor. It never takes part in control.

use anyhow::Context;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use helix_core::domain::agent::AgentId;
use helix_core::domain::events::SwarmEvent;
use helix_core::domain::geodesy::LocalFrame;
use helix_core::domain::mission::Command;
use helix_core::domain::node_config::NodeConfigSpec;
use helix_core::domain::pose::SharedPoseTable;
use helix_core::domain::protocol::{AgentStatus, ConnectionStatus, ParameterUpdate, Topic};
use helix_core::domain::transport::{Message, SessionOptions, Transport, TransportError};
use helix_core::infrastructure::codec;
use helix_core::infrastructure::event_bus::EventBus;

use crate::domain::bootstrap::{current_altitudes, priority_order};
use crate::domain::deconfliction::{deconflict, DeconflictionParams};
use crate::domain::proximity::{proximity_check, ProximityAlert};

pub const GROUND_STATION_ID: &str = "ground";

const PROXIMITY_PERIOD: Duration = Duration::from_millis(500);

pub struct GroundStation {
    station_id: AgentId,
    transport: Arc<dyn Transport>,
    table: SharedPoseTable,
    frame: LocalFrame,
    deconfliction: DeconflictionParams,
    min_proximity: f64,
    statuses: watch::Sender<BTreeMap<AgentId, AgentStatus>>,
    events: EventBus,
    cancel: CancellationToken,
}

impl GroundStation {
    pub fn new(
        settings: &NodeConfigSpec,
        transport: Arc<dyn Transport>,
        events: EventBus,
    ) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            station_id: AgentId::new(GROUND_STATION_ID)?,
            transport,
            table: SharedPoseTable::new(),
            frame: LocalFrame::new(settings.geodetic_reference),
            deconfliction: settings.flight.deconfliction.into(),
            min_proximity: settings.flight.min_proximity,
            statuses: watch::channel(BTreeMap::new()).0,
            events,
            cancel: CancellationToken::new(),
        }))
    }

    pub fn table(&self) -> &SharedPoseTable {
        &self.table
    }

    /// Connect, subscribe to every agent's telemetry and start the receive
    /// loop and proximity monitor.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<Vec<JoinHandle<()>>> {
        self.transport
            .connect(SessionOptions::new(GROUND_STATION_ID))
            .await
            .context("Failed to connect ground station")?;
        let filters = [
            Topic::Detection.to_string(),
            "+/T".to_string(),
            "+/B".to_string(),
            "+/flight_mode".to_string(),
            "+/telemetry/arm_status".to_string(),
            "+/connection_status".to_string(),
            "+/errors".to_string(),
            "+/status".to_string(),
        ];
        for filter in &filters {
            self.transport
                .subscribe(filter)
                .await
                .with_context(|| format!("Failed to subscribe to '{}'", filter))?;
        }
        info!("Ground station connected");
        Ok(vec![self.spawn_receiver(), self.spawn_proximity_monitor()])
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.transport
            .disconnect()
            .await
            .context("Failed to close ground station session")
    }

    fn spawn_receiver(self: &Arc<Self>) -> JoinHandle<()> {
        let station = self.clone();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = station.cancel.cancelled() => break,
                    received = station.transport.recv() => received,
                };
                match received {
                    Ok(message) => station.handle_message(&message),
                    Err(TransportError::Closed) | Err(TransportError::NotConnected) => break,
                    Err(e) => debug!("Ground station receive failed: {}", e),
                }
            }
        })
    }

    fn handle_message(&self, message: &Message) {
        let Ok(topic) = message.topic.parse::<Topic>() else {
            return;
        };
        let payload = &message.payload;
        match topic {
            Topic::Detection => {
                if let Ok(Ok(id)) = codec::decode_text(payload).map(AgentId::new) {
                    if self.table.insert_if_absent(&id) {
                        info!(agent = %id, "Agent detected");
                    }
                }
            }
            Topic::Telemetry(id) => match codec::decode_telemetry(payload) {
                Ok(frame) => self.table.apply_telemetry(&id, &frame),
                Err(e) => warn!(agent = %id, "Bad telemetry frame: {}", e),
            },
            Topic::Battery(id) => {
                if let Ok(percent) = codec::decode_battery(payload) {
                    self.table.update_battery(&id, percent);
                }
            }
            Topic::FlightMode(id) => {
                if let Ok(mode) = codec::decode_flight_mode(payload) {
                    self.table.update_flight_mode(&id, mode);
                }
            }
            Topic::ArmStatus(id) => {
                if let Ok(armed) = codec::decode_arm_status(payload) {
                    self.table.update_armed(&id, armed);
                }
            }
            Topic::ConnectionStatus(id) => {
                let status = codec::decode_text(payload)
                    .ok()
                    .and_then(|text| text.parse::<ConnectionStatus>().ok());
                match status {
                    Some(ConnectionStatus::Connected) => {
                        self.table.insert_if_absent(&id);
                        self.table.mark_connected(&id);
                    }
                    Some(ConnectionStatus::Disconnected) => {
                        if self.table.mark_lost(&id, Instant::now()) {
                            warn!(agent = %id, "Agent disconnected");
                        }
                    }
                    None => {}
                }
            }
            Topic::Errors(id) => {
                let text = codec::decode_text(payload).unwrap_or("<binary>");
                warn!(agent = %id, "Agent reported: {}", text);
            }
            Topic::Status(id) => {
                let status = codec::decode_text(payload)
                    .map_err(|e| e.to_string())
                    .and_then(|text| text.parse::<AgentStatus>());
                match status {
                    Ok(status) => {
                        info!(agent = %id, %status, "Agent status");
                        self.statuses.send_modify(|statuses| {
                            statuses.insert(id, status);
                        });
                    }
                    Err(e) => warn!(agent = %id, "Bad status: {}", e),
                }
            }
            _ => {}
        }
    }

    /// Last `{id}/status` reported by each agent.
    pub fn statuses(&self) -> BTreeMap<AgentId, AgentStatus> {
        self.statuses.borrow().clone()
    }

    /// Forget reported statuses, e.g. before the next experiment.
    pub fn clear_statuses(&self) {
        self.statuses.send_modify(|statuses| statuses.clear());
    }

    /// Wait until every agent in `agents` has reported `status`. Returns
    /// false when `timeout` elapses first.
    pub async fn wait_for_status(
        &self,
        agents: &[AgentId],
        status: AgentStatus,
        timeout: Duration,
    ) -> bool {
        let mut receiver = self.statuses.subscribe();
        let reached = receiver.wait_for(|statuses| {
            agents.iter().all(|id| statuses.get(id) == Some(&status))
        });
        let reached = matches!(tokio::time::timeout(timeout, reached).await, Ok(Ok(_)));
        reached
    }

    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        self.transport.publish(message).await
    }

    /// Send `command` to one agent, or to every agent when `target` is None.
    pub async fn send_command(
        &self,
        target: Option<&AgentId>,
        command: Command,
    ) -> Result<(), TransportError> {
        let topic = match target {
            Some(id) => Topic::Command(id.clone()),
            None => Topic::BroadcastCommand,
        };
        info!(%topic, %command, "Sending command");
        self.publish(Message::new(topic.to_string(), codec::encode_text(command.as_str())))
            .await
    }

    pub async fn emergency_stop(&self) -> Result<(), TransportError> {
        warn!("Emergency stop");
        self.publish(Message::new(Topic::EmergencyStop.to_string(), codec::encode_text("stop")))
            .await
    }

    /// Select the experiment an agent (or every known agent) loads on
    /// pre_start. The selection is retained so late joiners pick it up.
    pub async fn select_experiment(
        &self,
        target: Option<&AgentId>,
        name: &str,
    ) -> Result<(), TransportError> {
        let targets = match target {
            Some(id) => vec![id.clone()],
            None => self.table.ids(),
        };
        for id in targets {
            self.publish(
                Message::new(Topic::CurrentExperiment(id).to_string(), codec::encode_text(name))
                    .retained(),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn update_parameters(
        &self,
        target: &AgentId,
        update: &ParameterUpdate,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(update)?;
        self.publish(Message::new(Topic::UpdateParameters(target.clone()).to_string(), payload))
            .await?;
        Ok(())
    }

    /// Deconflict the connected agents' current altitudes and send each its
    /// return altitude on `{id}/home/altitude`.
    pub async fn prepare_return(&self) -> Result<BTreeMap<AgentId, f64>, TransportError> {
        let snapshot = self.table.snapshot();
        let order = priority_order(
            snapshot
                .iter()
                .filter(|(_, pose)| pose.is_connected())
                .map(|(id, _)| id),
        );
        let altitudes = current_altitudes(&order, &snapshot);
        let assigned = deconflict(
            &altitudes,
            self.frame.reference().altitude_m,
            self.deconfliction,
        );
        for (id, altitude) in &assigned {
            info!(agent = %id, altitude, "Assigning return altitude");
            self.publish(Message::new(
                Topic::HomeAltitude(id.clone()).to_string(),
                codec::encode_altitude(*altitude),
            ))
            .await?;
        }
        Ok(assigned.into_iter().collect())
    }

    /// Assign return altitudes, then command every agent home.
    pub async fn return_all(&self) -> Result<BTreeMap<AgentId, f64>, TransportError> {
        let assigned = self.prepare_return().await?;
        self.send_command(None, Command::Return).await?;
        Ok(assigned)
    }

    /// Current pairs closer than the minimum separation.
    pub fn proximity_alerts(&self) -> Vec<ProximityAlert> {
        proximity_check(&self.table.located_snapshot(), self.min_proximity)
    }

    /// Log each pair once when it comes closer than the minimum separation.
    fn spawn_proximity_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let station = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROXIMITY_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut active: BTreeSet<(AgentId, AgentId)> = BTreeSet::new();
            loop {
                tokio::select! {
                    _ = station.cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let alerts = station.proximity_alerts();
                let mut current = BTreeSet::new();
                for alert in alerts {
                    let pair = (alert.a.clone(), alert.b.clone());
                    if !active.contains(&pair) {
                        warn!(a = %alert.a, b = %alert.b, distance = alert.distance, "Agents too close");
                        metrics::counter!("helix_proximity_warnings_total").increment(1);
                        station.events.publish(SwarmEvent::ProximityWarning {
                            agent_id: station.station_id.clone(),
                            a: alert.a,
                            b: alert.b,
                            distance: alert.distance,
                            detected_at: Utc::now(),
                        });
                    }
                    current.insert(pair);
                }
                active = current;
            }
            debug!("Proximity monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::domain::geodesy::GeodeticPosition;
    use helix_core::domain::geometry::Vec3;
    use helix_core::domain::pose::TelemetryFrame;
    use helix_core::infrastructure::broker::{BrokerClient, InMemoryBroker};

    fn telemetry(frame: &LocalFrame, position: Vec3) -> bytes::Bytes {
        codec::encode_telemetry(&TelemetryFrame {
            geodetic: frame.to_geodetic(&position),
            position,
            velocity: Vec3::zeros(),
            heading_deg: 0.0,
        })
    }

    async fn station() -> (InMemoryBroker, Arc<GroundStation>, EventBus) {
        let broker = InMemoryBroker::new();
        let events = EventBus::with_default_capacity();
        let mut settings = NodeConfigSpec::default();
        settings.geodetic_reference = GeodeticPosition::new(51.0, -2.0, 100.0);
        let station = GroundStation::new(&settings, Arc::new(broker.client()), events.clone()).unwrap();
        station.start().await.unwrap();
        (broker, station, events)
    }

    async fn agent(broker: &InMemoryBroker, id: &str, position: Vec3) -> BrokerClient {
        let client = broker.client();
        client.connect(SessionOptions::new(id)).await.unwrap();
        client.subscribe(&format!("{}/home/altitude", id)).await.unwrap();
        client.subscribe("commands").await.unwrap();
        let frame = LocalFrame::new(GeodeticPosition::new(51.0, -2.0, 100.0));
        client
            .publish(Message::new(format!("{}/T", id), telemetry(&frame, position)))
            .await
            .unwrap();
        client
    }

    #[tokio::test(start_paused = true)]
    async fn test_replica_follows_telemetry_and_status() {
        let (broker, station, _) = station().await;
        let _a = agent(&broker, "P101", Vec3::new(1.0, 2.0, -30.0)).await;
        broker.inject(Message::new("P101/B", codec::encode_battery(87.5)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let id = AgentId::new("P101").unwrap();
        let pose = station.table().get(&id).unwrap();
        assert_eq!(pose.position, Vec3::new(1.0, 2.0, -30.0));
        assert_eq!(pose.battery_percent, Some(87.5));

        broker.inject(Message::new("P101/connection_status", "Disconnected"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!station.table().get(&id).unwrap().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_altitudes_are_deconflicted_and_sent() {
        let (broker, station, _) = station().await;
        let a = agent(&broker, "P101", Vec3::new(0.0, 0.0, -30.0)).await;
        let b = agent(&broker, "P102", Vec3::new(10.0, 0.0, -32.0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let assigned = station.return_all().await.unwrap();
        let low = assigned[&AgentId::new("P101").unwrap()];
        let high = assigned[&AgentId::new("P102").unwrap()];
        assert!((high - low - 1.0).abs() < 1e-6);
        assert!(((low + high) / 2.0 - 131.0).abs() < 1e-2);

        let sent = a.recv().await.unwrap();
        assert_eq!(sent.topic, "P101/home/altitude");
        assert_eq!(codec::decode_altitude(&sent.payload).unwrap(), low);
        assert_eq!(a.recv().await.unwrap().payload_str(), Some("return"));
        assert_eq!(b.recv().await.unwrap().topic, "P102/home/altitude");
    }

    #[tokio::test(start_paused = true)]
    async fn test_proximity_warning_fires_once_per_encounter() {
        let (broker, _station, events) = station().await;
        let mut events = events.subscribe();
        let _a = agent(&broker, "P101", Vec3::new(0.0, 0.0, -20.0)).await;
        let _b = agent(&broker, "P102", Vec3::new(0.5, 0.0, -20.0)).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        match events.try_recv().unwrap() {
            SwarmEvent::ProximityWarning { a, b, distance, .. } => {
                assert_eq!(a.as_str(), "P101");
                assert_eq!(b.as_str(), "P102");
                assert!((distance - 0.5).abs() < 1e-9);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detected_agent_without_telemetry_is_not_located() {
        let (broker, station, _) = station().await;
        let a = agent(&broker, "P101", Vec3::new(0.5, 0.0, -30.0)).await;
        broker.inject(Message::new("detection", "P102"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let silent = AgentId::new("P102").unwrap();
        assert!(station.table().get(&silent).unwrap().is_connected());
        assert!(station.proximity_alerts().is_empty());

        let assigned = station.prepare_return().await.unwrap();
        assert!(!assigned.contains_key(&silent));
        let own = assigned[&AgentId::new("P101").unwrap()];
        assert!((own - 130.0).abs() < 1e-2, "ladder dragged to {}", own);
        assert_eq!(a.recv().await.unwrap().topic, "P101/home/altitude");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_status_from_every_agent() {
        let (broker, station, _) = station().await;
        let agents = [AgentId::new("S001").unwrap(), AgentId::new("S002").unwrap()];

        broker.inject(Message::new("S001/status", "READY"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(station.statuses()[&agents[0]], AgentStatus::Ready);
        assert!(
            !station
                .wait_for_status(&agents, AgentStatus::Ready, Duration::from_secs(1))
                .await
        );

        broker.inject(Message::new("S002/status", "READY"));
        assert!(
            station
                .wait_for_status(&agents, AgentStatus::Ready, Duration::from_secs(1))
                .await
        );

        station.clear_statuses();
        assert!(station.statuses().is_empty());
        broker.inject(Message::new("S002/status", "finished"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(station.statuses().is_empty());
    }
}

//! Authority implementation.
//!
//! The server is the only writer of replicated motion state. It supports:
//! - Clients joining over UDP and receiving an `Authority` controller each
//! - Tick-tagged move requests applied as they arrive
//! - Fan-out of every replicated change to all peers
//! - An optional host avatar driven by local input (`spawn_local`)
//!
//! Requests are applied in arrival order with no reordering buffer. A request
//! that never arrives leaves its entity where it was; the next one is applied
//! from the current transform without filling the gap.

use std::{
    collections::{BTreeMap, HashMap},
    io::{BufRead, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use netmove_shared::{
    config::MovementConfig,
    controller::{FrameOutcome, PlayerMovementController},
    entity::{EntityAllocator, EntityId, Transform},
    math::{Vec2, Vec3},
    net::{CompactMotionState, MoveRequest, Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION},
    replicator::SubscriptionId,
    sample::MotionState,
    session::SessionContext,
};
use tokio::{net::UdpSocket, sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

/// Distance between consecutive spawn points along X.
const SPAWN_SPACING: f32 = 2.0;
/// Longest a step waits for the socket to report queued datagrams.
const READY_WAIT: Duration = Duration::from_millis(1);

/// Counters exposed for status output and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub requests_applied: u64,
    pub requests_ignored: u64,
    pub states_sent: u64,
    pub malformed: u64,
}

/// A spawned entity and the fan-out observer installed on it.
struct ServerEntity {
    controller: PlayerMovementController,
    fan_out: SubscriptionId,
    peer: Option<SocketAddr>,
}

/// Movement authority.
pub struct MovementServer {
    pub cfg: MovementConfig,
    ctx: SessionContext,
    udp: UdpSocket,

    ids: EntityAllocator,
    spawned: u32,
    entities: BTreeMap<EntityId, ServerEntity>,
    peers: HashMap<SocketAddr, EntityId>,

    changes_tx: mpsc::UnboundedSender<(EntityId, MotionState)>,
    changes_rx: mpsc::UnboundedReceiver<(EntityId, MotionState)>,

    steps: u64,
    stats: ServerStats,
    console_rx: Option<mpsc::Receiver<String>>,
}

impl MovementServer {
    /// Binds the authority socket at `cfg.server_addr`.
    pub async fn new(cfg: MovementConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let udp = UdpSocket::bind(addr).await.context("udp bind")?;
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();

        Ok(Self {
            ctx: SessionContext::host(cfg.clone()),
            cfg,
            udp,
            ids: EntityAllocator::default(),
            spawned: 0,
            entities: BTreeMap::new(),
            peers: HashMap::new(),
            changes_tx,
            changes_rx,
            steps: 0,
            stats: ServerStats::default(),
            console_rx: None,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn controller(&self, entity: EntityId) -> Option<&PlayerMovementController> {
        self.entities.get(&entity).map(|e| &e.controller)
    }

    /// Entity owned by the client at `peer`.
    pub fn entity_of(&self, peer: SocketAddr) -> Option<EntityId> {
        self.peers.get(&peer).copied()
    }

    fn next_spawn_point(&mut self) -> Transform {
        let slot = self.spawned;
        self.spawned += 1;
        Transform::at(Vec3::new(slot as f32 * SPAWN_SPACING, 0.0, 0.0))
    }

    fn spawn_entity(&mut self, peer: Option<SocketAddr>) -> EntityId {
        let id = self.ids.spawn();
        let at = self.next_spawn_point();
        let mut controller = PlayerMovementController::spawn(&self.ctx, id, peer.is_none(), at);

        let tx = self.changes_tx.clone();
        let fan_out = controller.subscribe(move |_previous, next| {
            // receiver lives as long as the server; a send error only
            // happens during shutdown
            let _ = tx.send((id, next));
        });

        self.entities.insert(
            id,
            ServerEntity {
                controller,
                fan_out,
                peer,
            },
        );
        if let Some(peer) = peer {
            self.peers.insert(peer, id);
        }
        id
    }

    /// Spawns the host's own avatar, driven by [`Self::drive_local`], and
    /// announces it to every joined peer.
    pub async fn spawn_local(&mut self) -> EntityId {
        let id = self.spawn_entity(None);
        let transform = self
            .controller(id)
            .map(PlayerMovementController::transform)
            .unwrap_or_default();
        info!(entity = ?id, "Host avatar spawned");
        self.broadcast(&Packet::Spawn {
            entity: id,
            transform,
        })
        .await;
        id
    }

    /// Runs one frame of local input for a host-owned entity.
    pub fn drive_local(
        &mut self,
        entity: EntityId,
        frame_dt: f32,
        move_input: Vec2,
        look_delta: Vec2,
    ) -> anyhow::Result<FrameOutcome> {
        let e = self
            .entities
            .get_mut(&entity)
            .with_context(|| format!("no entity {entity:?}"))?;
        anyhow::ensure!(
            e.controller.is_locally_driven(),
            "{entity:?} is owned by a remote client"
        );
        Ok(e.controller.frame(frame_dt, move_input, look_delta))
    }

    /// Applies a move request to an entity, as if it had arrived from its
    /// owner. Returns `None` when the request is ignored.
    pub fn apply_request(&mut self, entity: EntityId, request: MoveRequest) -> Option<MotionState> {
        let Some(e) = self.entities.get_mut(&entity) else {
            self.stats.requests_ignored += 1;
            debug!(entity = ?entity, "Move request for unknown entity");
            return None;
        };
        match e.controller.receive_request(request) {
            Ok(state) => {
                self.stats.requests_applied += 1;
                Some(state)
            }
            Err(err) => {
                self.stats.requests_ignored += 1;
                debug!(entity = ?entity, error = %err, "Move request ignored");
                None
            }
        }
    }

    /// Removes an entity, its fan-out observer and its peer mapping, and
    /// tells every remaining peer.
    pub async fn despawn(&mut self, entity: EntityId) -> anyhow::Result<bool> {
        let Some(mut e) = self.entities.remove(&entity) else {
            return Ok(false);
        };
        e.controller.unsubscribe(e.fan_out);
        if let Some(peer) = e.peer {
            self.peers.remove(&peer);
        }
        e.controller.despawn();
        self.broadcast(&Packet::Despawn { entity }).await;
        Ok(true)
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(self.cfg.tick_duration());
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step().await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Processes everything that arrived since the last step and replicates
    /// the resulting changes.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        self.process_console_commands().await?;
        self.recv_datagrams().await?;
        self.broadcast_changes().await;
        self.steps += 1;
        Ok(())
    }

    async fn process_console_commands(&mut self) -> anyhow::Result<()> {
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            for out in self.exec_console(&line) {
                println!("{out}");
            }
        }
        Ok(())
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(cmd) = tokens.first() else {
            return Vec::new();
        };

        match *cmd {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Steps: {}", self.steps));
                out.push(format!("Entities: {}", self.entities.len()));
                for (id, e) in &self.entities {
                    let t = e.controller.transform();
                    let owner = e
                        .peer
                        .map_or_else(|| "host".to_string(), |p| p.to_string());
                    out.push(format!(
                        "  {:?}: owner={} pos=({:.2}, {:.2}, {:.2}) yaw={:.1}",
                        id,
                        owner,
                        t.position.x,
                        t.position.y,
                        t.position.z,
                        t.rotation.yaw_degrees()
                    ));
                }
                out.push(format!("{:?}", self.stats));
                out
            }
            "config" => match serde_json::to_string_pretty(&self.cfg) {
                Ok(json) => json.lines().map(str::to_string).collect(),
                Err(e) => vec![format!("config not serializable: {e}")],
            },
            "quit" | "exit" => {
                info!("Server shutting down");
                std::process::exit(0);
            }
            other => vec![format!("Unknown command: {other}")],
        }
    }

    async fn recv_datagrams(&mut self) -> anyhow::Result<()> {
        // try_recv_from only sees readiness the reactor has already observed
        match tokio::time::timeout(READY_WAIT, self.udp.readable()).await {
            Ok(ready) => ready.context("udp readable")?,
            Err(_) => return Ok(()),
        }
        let mut buf = [0u8; MAX_PACKET_SIZE + 1];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => match Packet::decode(&buf[..n]) {
                    Ok(packet) => self.handle_datagram(from, packet).await?,
                    Err(e) => {
                        self.stats.malformed += 1;
                        warn!(%from, error = %e, "Malformed datagram");
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv")?,
            }
        }
        Ok(())
    }

    async fn handle_datagram(&mut self, from: SocketAddr, packet: Packet) -> anyhow::Result<()> {
        match packet {
            Packet::Join { protocol } => self.on_join(from, protocol).await?,
            Packet::Move { entity, request } => {
                if self.peers.get(&from) == Some(&entity) {
                    self.apply_request(entity, request);
                } else {
                    self.stats.requests_ignored += 1;
                    debug!(%from, entity = ?entity, "Move for entity the peer does not own");
                }
            }
            Packet::Leave { entity } => {
                if self.peers.get(&from) == Some(&entity) {
                    info!(%from, entity = ?entity, "Client left");
                    self.despawn(entity).await?;
                }
            }
            other => debug!(%from, ?other, "Unexpected datagram"),
        }
        Ok(())
    }

    async fn on_join(&mut self, from: SocketAddr, protocol: u32) -> anyhow::Result<()> {
        if protocol != PROTOCOL_VERSION {
            warn!(%from, protocol, expected = PROTOCOL_VERSION, "Join with wrong protocol");
            return Ok(());
        }

        // repeated join: the welcome was lost, send it again
        if let Some(&entity) = self.peers.get(&from) {
            if let Some(e) = self.entities.get(&entity) {
                let transform = e.controller.transform();
                self.send_to(from, &Packet::Welcome { entity, transform })
                    .await;
            }
            return Ok(());
        }

        if self.entities.len() >= self.cfg.max_players as usize {
            warn!(%from, max_players = self.cfg.max_players, "Join refused, server full");
            return Ok(());
        }

        let entity = self.spawn_entity(Some(from));
        let transform = self
            .controller(entity)
            .map(PlayerMovementController::transform)
            .unwrap_or_default();
        info!(%from, entity = ?entity, "Client joined");

        self.send_to(from, &Packet::Welcome { entity, transform })
            .await;

        // introduce everyone else to the newcomer, with their latest state
        let existing: Vec<(EntityId, Transform, Option<MotionState>)> = self
            .entities
            .iter()
            .filter(|(id, _)| **id != entity)
            .map(|(id, e)| (*id, e.controller.transform(), e.controller.replicated()))
            .collect();
        for (id, at, latest) in existing {
            self.send_to(from, &Packet::Spawn { entity: id, transform: at })
                .await;
            if let Some(state) = latest {
                let packet = self.state_packet(id, state);
                self.send_to(from, &packet).await;
            }
        }

        // and the newcomer to everyone else
        let others: Vec<SocketAddr> = self.peers.keys().copied().filter(|p| *p != from).collect();
        for peer in others {
            self.send_to(peer, &Packet::Spawn { entity, transform })
                .await;
        }
        Ok(())
    }

    fn state_packet(&self, entity: EntityId, state: MotionState) -> Packet {
        if self.cfg.compact_rotation {
            Packet::CompactState {
                entity,
                state: CompactMotionState::from_state(&state),
            }
        } else {
            Packet::State { entity, state }
        }
    }

    async fn broadcast_changes(&mut self) {
        while let Ok((entity, state)) = self.changes_rx.try_recv() {
            // change queued before a despawn in the same step
            if !self.entities.contains_key(&entity) {
                continue;
            }
            let packet = self.state_packet(entity, state);
            self.broadcast(&packet).await;
        }
    }

    async fn broadcast(&mut self, packet: &Packet) {
        let peers: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for peer in peers {
            self.send_to(peer, packet).await;
        }
    }

    async fn send_to(&mut self, peer: SocketAddr, packet: &Packet) {
        match self.udp.send_to(&packet.encode(), peer).await {
            Ok(_) => {
                if matches!(packet, Packet::State { .. } | Packet::CompactState { .. }) {
                    self.stats.states_sent += 1;
                }
            }
            Err(e) => warn!(%peer, error = %e, "Datagram not sent"),
        }
    }
}

/// Forwards console lines from `input` to the server until EOF or until the
/// server drops its receiver. Runs on a plain thread.
pub fn pump_console<R: BufRead, W: Write>(mut input: R, mut prompt: W, tx: mpsc::Sender<String>) {
    loop {
        let _ = write!(prompt, "] ");
        let _ = prompt.flush();
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim().to_string();
        if !line.is_empty() && tx.blocking_send(line).is_err() {
            break;
        }
    }
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(MovementServer, MovementConfig)> {
    let cfg = MovementConfig {
        server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        tick_hz,
        ..Default::default()
    };
    let mut server = MovementServer::new(cfg).await?;
    let addr = server.local_addr()?;
    server.cfg.server_addr = addr.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmove_shared::tick::Tick;

    #[tokio::test]
    async fn host_avatar_publishes_and_queues_fan_out() -> anyhow::Result<()> {
        let (mut server, cfg) = bind_ephemeral(60).await?;
        let id = server.spawn_local().await;
        let dt = cfg.tick_duration();

        let out = server.drive_local(id, dt * 1.5, Vec2::new(0.0, 1.0), Vec2::ZERO)?;
        assert!(matches!(out, FrameOutcome::Published(_)));
        assert_eq!(server.changes_rx.try_recv()?.0, id);

        // the host avatar does not take remote requests
        assert!(server
            .apply_request(id, MoveRequest { tick: Tick(1), ..Default::default() })
            .is_none());
        assert_eq!(server.stats().requests_ignored, 1);
        Ok(())
    }

    #[tokio::test]
    async fn despawn_removes_fan_out() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(60).await?;
        let id = server.spawn_local().await;
        assert_eq!(server.controller(id).map(|c| c.observer_count()), Some(1));
        assert!(server.despawn(id).await?);
        assert!(!server.despawn(id).await?);
        assert_eq!(server.entity_count(), 0);
        Ok(())
    }

    #[test]
    fn console_pump_stops_at_eof() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut prompt = Vec::new();
        pump_console(std::io::Cursor::new("status\n\n  quit \n"), &mut prompt, tx);

        assert_eq!(rx.try_recv().ok().as_deref(), Some("status"));
        assert_eq!(rx.try_recv().ok().as_deref(), Some("quit"));
        assert!(rx.try_recv().is_err());
        // one prompt per line read plus the one answered by EOF
        assert_eq!(prompt, b"] ] ] ] ");
    }

    #[tokio::test]
    async fn spawn_points_do_not_overlap() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(60).await?;
        let a = server.spawn_local().await;
        let b = server.spawn_local().await;
        let pa = server.controller(a).map(|c| c.transform().position);
        let pb = server.controller(b).map(|c| c.transform().position);
        assert_ne!(pa, pb);
        Ok(())
    }
}

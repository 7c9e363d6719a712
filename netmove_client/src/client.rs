//! Client implementation.
//!
//! The client maintains:
//! - One unreliable datagram socket to the authority
//! - The controller of its own entity (`OwnerClient`: local prediction)
//! - One `Observer` controller per other entity the authority announced
//!
//! Requests produced by the owner controller are queued on a channel by
//! `ChannelDispatch` and flushed to the socket at the end of each frame; the
//! client never waits for the authority before predicting the next tick.

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use netmove_shared::{
    config::MovementConfig,
    controller::{FrameOutcome, PlayerMovementController},
    entity::{EntityId, Transform},
    math::Vec2,
    net::{Packet, UnreliableConn, PROTOCOL_VERSION},
    sample::MotionState,
    session::{ChannelDispatch, MoveReceiver, SessionContext, TransportRole},
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::input::InputState;

const JOIN_RETRY: Duration = Duration::from_millis(250);
const JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Owns an entity and exchanges movement with the authority.
    Connected,
    /// Left, or the authority removed our entity.
    Disconnected,
}

/// Networked movement client.
pub struct MovementClient {
    pub state: ClientState,
    ctx: SessionContext,
    conn: UnreliableConn,
    outbound: MoveReceiver,
    own: PlayerMovementController,
    observed: BTreeMap<EntityId, PlayerMovementController>,
}

impl MovementClient {
    /// Joins the authority at `cfg.server_addr` and spawns the owned entity.
    pub async fn connect(cfg: &MovementConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, "Joining authority");

        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let conn = UnreliableConn::connect(bind, server_addr).await?;

        let (entity, spawn_at, early) = Self::handshake(&conn).await?;
        info!(entity = ?entity, local = %conn.local_addr()?, "Joined authority");

        let (dispatch, outbound) = ChannelDispatch::new();
        let ctx = SessionContext::new(TransportRole::Client, cfg.clone(), Arc::new(dispatch));
        let own = PlayerMovementController::spawn(&ctx, entity, true, spawn_at);

        let mut client = Self {
            state: ClientState::Connected,
            ctx,
            conn,
            outbound,
            own,
            observed: BTreeMap::new(),
        };
        for packet in early {
            client.handle_packet(packet);
        }
        Ok(client)
    }

    /// Sends `Join` until `Welcome` arrives. Packets that overtake the
    /// welcome are returned so they can be applied afterwards.
    async fn handshake(
        conn: &UnreliableConn,
    ) -> anyhow::Result<(EntityId, Transform, Vec<Packet>)> {
        let deadline = Instant::now() + JOIN_TIMEOUT;
        let mut early = Vec::new();
        while Instant::now() < deadline {
            conn.send(&Packet::Join {
                protocol: PROTOCOL_VERSION,
            })
            .await?;
            let resend_at = Instant::now() + JOIN_RETRY;
            while Instant::now() < resend_at {
                match conn
                    .recv_timeout(resend_at.saturating_duration_since(Instant::now()))
                    .await
                {
                    Ok(Some(Packet::Welcome { entity, transform })) => {
                        return Ok((entity, transform, early))
                    }
                    Ok(Some(other)) => early.push(other),
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Discarding datagram during join");
                        break;
                    }
                }
            }
        }
        anyhow::bail!("no welcome from {} within {JOIN_TIMEOUT:?}", conn.peer_addr())
    }

    pub fn entity(&self) -> EntityId {
        self.own.entity()
    }

    pub fn config(&self) -> &MovementConfig {
        self.ctx.config()
    }

    /// The owned entity's controller.
    pub fn own(&self) -> &PlayerMovementController {
        &self.own
    }

    pub fn observed(&self, entity: EntityId) -> Option<&PlayerMovementController> {
        self.observed.get(&entity)
    }

    pub fn observed_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.observed.keys().copied()
    }

    /// Runs one frame for every local controller and flushes queued requests.
    pub async fn frame(&mut self, frame_dt: f32, input: InputState) -> anyhow::Result<FrameOutcome> {
        let outcome = self
            .own
            .frame(frame_dt, input.move_vector(), input.look_vector());
        for observer in self.observed.values_mut() {
            observer.frame(frame_dt, Vec2::ZERO, Vec2::ZERO);
        }
        self.flush().await?;
        Ok(outcome)
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        while let Ok((entity, request)) = self.outbound.try_recv() {
            if let Err(e) = self.conn.send(&Packet::Move { entity, request }).await {
                // loss is tolerated; the authority just never sees this tick
                warn!(tick = request.tick.0, error = %e, "Move request not sent");
            }
        }
        Ok(())
    }

    /// Receives datagrams, waiting up to `timeout` for the first one and
    /// then draining whatever is already queued. Returns how many were
    /// handled.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<usize> {
        let mut wait = timeout;
        let mut handled = 0;
        loop {
            match self.conn.recv_timeout(wait).await {
                Ok(Some(packet)) => {
                    self.handle_packet(packet);
                    handled += 1;
                    wait = Duration::ZERO;
                }
                Ok(None) => break,
                Err(e) if e.downcast_ref::<std::io::Error>().is_some() => {
                    warn!(error = %e, "Socket error while polling");
                    break;
                }
                Err(e) => {
                    // undecodable datagram; whatever is queued behind it is still good
                    warn!(error = %e, "Dropping datagram");
                    wait = Duration::ZERO;
                }
            }
        }
        Ok(handled)
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Spawn { entity, transform } => self.on_spawn(entity, transform),
            Packet::Despawn { entity } => self.on_despawn(entity),
            Packet::State { entity, state } => self.deliver(entity, state),
            Packet::CompactState { entity, state } => self.deliver(entity, state.to_state()),
            Packet::Welcome { entity, .. } => {
                debug!(entity = ?entity, "Duplicate welcome ignored");
            }
            other => {
                debug!(?other, "Unexpected datagram from authority");
            }
        }
    }

    fn on_spawn(&mut self, entity: EntityId, transform: Transform) {
        if entity == self.own.entity() || self.observed.contains_key(&entity) {
            return;
        }
        let controller = PlayerMovementController::spawn(&self.ctx, entity, false, transform);
        self.observed.insert(entity, controller);
    }

    fn on_despawn(&mut self, entity: EntityId) {
        if entity == self.own.entity() {
            info!(entity = ?entity, "Authority removed our entity");
            self.state = ClientState::Disconnected;
            return;
        }
        if let Some(controller) = self.observed.remove(&entity) {
            controller.despawn();
        }
    }

    fn deliver(&mut self, entity: EntityId, state: MotionState) {
        let target = if entity == self.own.entity() {
            Some(&mut self.own)
        } else {
            self.observed.get_mut(&entity)
        };
        match target {
            Some(controller) => {
                if let Err(e) = controller.receive_replicated(state) {
                    debug!(entity = ?entity, error = %e, "Replicated state rejected");
                }
            }
            None => debug!(entity = ?entity, tick = state.tick.0, "State for unknown entity"),
        }
    }

    /// Releases the owned entity and tears down every observer.
    pub async fn disconnect(&mut self) -> anyhow::Result<()> {
        if self.state == ClientState::Disconnected {
            return Ok(());
        }
        self.conn
            .send(&Packet::Leave {
                entity: self.own.entity(),
            })
            .await?;
        for (_, controller) in std::mem::take(&mut self.observed) {
            controller.despawn();
        }
        self.state = ClientState::Disconnected;
        info!(entity = ?self.own.entity(), "Left authority");
        Ok(())
    }
}

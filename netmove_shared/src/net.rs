//! Networking primitives.
//!
//! Goals:
//! - Provide the per-tick move request (owner -> authority) and replicated
//!   motion state (authority -> observers) as fixed-width binary records.
//! - Provide a small datagram envelope for join/leave/spawn bookkeeping.
//! - Provide an unreliable (UDP) channel; loss and reordering are tolerated
//!   by the movement core, every record carries its tick.
//!
//! All numbers are little-endian. There are no variable-length fields.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::{net::UdpSocket, time};

use crate::{
    entity::{EntityId, Transform},
    math::{Quat, Vec2, Vec3},
    quantize::{dequantize_yaw, quantize_yaw},
    sample::{InputSample, MotionState},
    tick::Tick,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Encoded size of a [`MoveRequest`].
pub const MOVE_REQUEST_SIZE: usize = 4 + 2 * 4 + 2 * 4;
/// Encoded size of a [`MotionState`].
pub const MOTION_STATE_SIZE: usize = 4 + 3 * 4 + 4 * 4 + 1;
/// Encoded size of a [`CompactMotionState`].
pub const COMPACT_MOTION_STATE_SIZE: usize = 4 + 3 * 4 + 2 + 1;
const TRANSFORM_SIZE: usize = 3 * 4 + 4 * 4;
const ENTITY_SIZE: usize = 8;

/// Largest datagram any [`Packet`] encodes to.
pub const MAX_PACKET_SIZE: usize = 1 + ENTITY_SIZE + MOTION_STATE_SIZE;

/// Owner -> authority input for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveRequest {
    pub tick: Tick,
    pub move_input: Vec2,
    pub look_delta: Vec2,
}

impl MoveRequest {
    pub fn to_sample(self) -> InputSample {
        InputSample::new(self.tick, self.move_input, self.look_delta)
    }
}

impl From<InputSample> for MoveRequest {
    fn from(s: InputSample) -> Self {
        Self {
            tick: s.tick,
            move_input: s.move_input,
            look_delta: s.look_delta,
        }
    }
}

/// Motion state with yaw quantized to an `i16` (see [`crate::quantize`]).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompactMotionState {
    pub tick: Tick,
    pub position: Vec3,
    pub yaw: i16,
    pub is_moving: bool,
}

impl CompactMotionState {
    /// Drops everything but yaw from the rotation.
    pub fn from_state(s: &MotionState) -> Self {
        Self {
            tick: s.tick,
            position: s.position,
            yaw: quantize_yaw(s.rotation.yaw_degrees()),
            is_moving: s.is_moving,
        }
    }

    pub fn to_state(self) -> MotionState {
        MotionState {
            tick: self.tick,
            position: self.position,
            rotation: Quat::from_yaw_degrees(dequantize_yaw(self.yaw)),
            is_moving: self.is_moving,
        }
    }
}

/// Datagram envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packet {
    /// Client -> server: request a player entity.
    Join { protocol: u32 },
    /// Server -> client: the entity this client owns and where it spawned.
    Welcome { entity: EntityId, transform: Transform },
    /// Server -> client: an entity to observe appeared.
    Spawn { entity: EntityId, transform: Transform },
    /// Server -> client: an entity left.
    Despawn { entity: EntityId },
    /// Client -> server: input for one tick of an owned entity.
    Move { entity: EntityId, request: MoveRequest },
    /// Server -> client: replicated motion state.
    State { entity: EntityId, state: MotionState },
    /// Server -> client: replicated motion state with quantized yaw.
    CompactState {
        entity: EntityId,
        state: CompactMotionState,
    },
    /// Client -> server: release an owned entity.
    Leave { entity: EntityId },
}

mod tag {
    pub const JOIN: u8 = 1;
    pub const WELCOME: u8 = 2;
    pub const SPAWN: u8 = 3;
    pub const DESPAWN: u8 = 4;
    pub const MOVE: u8 = 5;
    pub const STATE: u8 = 6;
    pub const COMPACT_STATE: u8 = 7;
    pub const LEAVE: u8 = 8;
}

fn put_tick(buf: &mut BytesMut, tick: Tick) {
    buf.put_i32_le(tick.0 as i32);
}

fn get_tick(buf: &mut &[u8]) -> anyhow::Result<Tick> {
    let raw = buf.get_i32_le();
    anyhow::ensure!(raw >= 0, "negative tick {raw}");
    Ok(Tick(raw as u32))
}

fn put_vec2(buf: &mut BytesMut, v: Vec2) {
    buf.put_f32_le(v.x);
    buf.put_f32_le(v.y);
}

fn get_f32(buf: &mut &[u8]) -> anyhow::Result<f32> {
    let v = buf.get_f32_le();
    anyhow::ensure!(v.is_finite(), "non-finite float {v}");
    Ok(v)
}

fn get_vec2(buf: &mut &[u8]) -> anyhow::Result<Vec2> {
    Ok(Vec2::new(get_f32(buf)?, get_f32(buf)?))
}

fn put_vec3(buf: &mut BytesMut, v: Vec3) {
    buf.put_f32_le(v.x);
    buf.put_f32_le(v.y);
    buf.put_f32_le(v.z);
}

fn get_vec3(buf: &mut &[u8]) -> anyhow::Result<Vec3> {
    Ok(Vec3::new(get_f32(buf)?, get_f32(buf)?, get_f32(buf)?))
}

fn put_quat(buf: &mut BytesMut, q: Quat) {
    buf.put_f32_le(q.x);
    buf.put_f32_le(q.y);
    buf.put_f32_le(q.z);
    buf.put_f32_le(q.w);
}

fn get_quat(buf: &mut &[u8]) -> anyhow::Result<Quat> {
    Ok(Quat::new(
        get_f32(buf)?,
        get_f32(buf)?,
        get_f32(buf)?,
        get_f32(buf)?,
    ))
}

fn get_bool(buf: &mut &[u8]) -> anyhow::Result<bool> {
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => anyhow::bail!("invalid bool byte {other}"),
    }
}

fn put_transform(buf: &mut BytesMut, t: &Transform) {
    put_vec3(buf, t.position);
    put_quat(buf, t.rotation);
}

fn get_transform(buf: &mut &[u8]) -> anyhow::Result<Transform> {
    let position = get_vec3(buf)?;
    let rotation = get_quat(buf)?;
    Ok(Transform::new(position, rotation))
}

fn get_entity(buf: &mut &[u8]) -> EntityId {
    EntityId(buf.get_u64_le())
}

impl MoveRequest {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        put_tick(buf, self.tick);
        put_vec2(buf, self.move_input);
        put_vec2(buf, self.look_delta);
    }

    fn decode_from(buf: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            tick: get_tick(buf)?,
            move_input: get_vec2(buf)?,
            look_delta: get_vec2(buf)?,
        })
    }
}

/// Fixed-width wire form of a replicated motion state.
pub fn encode_motion_state(state: &MotionState, buf: &mut BytesMut) {
    put_tick(buf, state.tick);
    put_vec3(buf, state.position);
    put_quat(buf, state.rotation);
    buf.put_u8(u8::from(state.is_moving));
}

/// Decodes exactly one [`MotionState`] from `bytes`.
pub fn decode_motion_state(mut bytes: &[u8]) -> anyhow::Result<MotionState> {
    anyhow::ensure!(
        bytes.len() == MOTION_STATE_SIZE,
        "motion state must be {MOTION_STATE_SIZE} bytes, got {}",
        bytes.len()
    );
    read_motion_state(&mut bytes)
}

fn read_motion_state(buf: &mut &[u8]) -> anyhow::Result<MotionState> {
    Ok(MotionState {
        tick: get_tick(buf)?,
        position: get_vec3(buf)?,
        rotation: get_quat(buf)?,
        is_moving: get_bool(buf)?,
    })
}

fn read_compact_state(buf: &mut &[u8]) -> anyhow::Result<CompactMotionState> {
    Ok(CompactMotionState {
        tick: get_tick(buf)?,
        position: get_vec3(buf)?,
        yaw: buf.get_i16_le(),
        is_moving: get_bool(buf)?,
    })
}

impl Packet {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MAX_PACKET_SIZE);
        match self {
            Packet::Join { protocol } => {
                buf.put_u8(tag::JOIN);
                buf.put_u32_le(*protocol);
            }
            Packet::Welcome { entity, transform } => {
                buf.put_u8(tag::WELCOME);
                buf.put_u64_le(entity.0);
                put_transform(&mut buf, transform);
            }
            Packet::Spawn { entity, transform } => {
                buf.put_u8(tag::SPAWN);
                buf.put_u64_le(entity.0);
                put_transform(&mut buf, transform);
            }
            Packet::Despawn { entity } => {
                buf.put_u8(tag::DESPAWN);
                buf.put_u64_le(entity.0);
            }
            Packet::Move { entity, request } => {
                buf.put_u8(tag::MOVE);
                buf.put_u64_le(entity.0);
                request.encode_into(&mut buf);
            }
            Packet::State { entity, state } => {
                buf.put_u8(tag::STATE);
                buf.put_u64_le(entity.0);
                encode_motion_state(state, &mut buf);
            }
            Packet::CompactState { entity, state } => {
                buf.put_u8(tag::COMPACT_STATE);
                buf.put_u64_le(entity.0);
                put_tick(&mut buf, state.tick);
                put_vec3(&mut buf, state.position);
                buf.put_i16_le(state.yaw);
                buf.put_u8(u8::from(state.is_moving));
            }
            Packet::Leave { entity } => {
                buf.put_u8(tag::LEAVE);
                buf.put_u64_le(entity.0);
            }
        }
        buf.freeze()
    }

    pub fn decode(mut bytes: &[u8]) -> anyhow::Result<Packet> {
        anyhow::ensure!(!bytes.is_empty(), "empty datagram");
        let tag = bytes.get_u8();
        let expected = match tag {
            tag::JOIN => 4,
            tag::WELCOME | tag::SPAWN => ENTITY_SIZE + TRANSFORM_SIZE,
            tag::DESPAWN | tag::LEAVE => ENTITY_SIZE,
            tag::MOVE => ENTITY_SIZE + MOVE_REQUEST_SIZE,
            tag::STATE => ENTITY_SIZE + MOTION_STATE_SIZE,
            tag::COMPACT_STATE => ENTITY_SIZE + COMPACT_MOTION_STATE_SIZE,
            other => anyhow::bail!("unknown packet tag {other}"),
        };
        anyhow::ensure!(
            bytes.len() == expected,
            "packet tag {tag}: expected {expected} payload bytes, got {}",
            bytes.len()
        );

        let buf = &mut bytes;
        let packet = match tag {
            tag::JOIN => Packet::Join {
                protocol: buf.get_u32_le(),
            },
            tag::WELCOME => Packet::Welcome {
                entity: get_entity(buf),
                transform: get_transform(buf)?,
            },
            tag::SPAWN => Packet::Spawn {
                entity: get_entity(buf),
                transform: get_transform(buf)?,
            },
            tag::DESPAWN => Packet::Despawn {
                entity: get_entity(buf),
            },
            tag::MOVE => Packet::Move {
                entity: get_entity(buf),
                request: MoveRequest::decode_from(buf)?,
            },
            tag::STATE => Packet::State {
                entity: get_entity(buf),
                state: read_motion_state(buf)?,
            },
            tag::COMPACT_STATE => Packet::CompactState {
                entity: get_entity(buf),
                state: read_compact_state(buf)?,
            },
            _ => Packet::Leave {
                entity: get_entity(buf),
            },
        };
        Ok(packet)
    }
}

/// Unreliable channel over UDP, connected to one peer.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, packet: &Packet) -> anyhow::Result<()> {
        self.socket
            .send(&packet.encode())
            .await
            .context("udp send")?;
        Ok(())
    }

    /// Receives a datagram within the given timeout.
    ///
    /// `Ok(None)` means nothing arrived in time. A datagram that fails to
    /// decode is returned as an error; callers drop it and keep polling.
    pub async fn recv_timeout(&self, timeout: Duration) -> anyhow::Result<Option<Packet>> {
        let mut buf = [0u8; MAX_PACKET_SIZE + 1];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Packet::decode(&buf[..n]).map(Some),
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

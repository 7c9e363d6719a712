//! Session boundary.
//!
//! Lobby/relay matchmaking lives outside the movement core. The core only
//! consumes three operations (create, join, start transport) and gets back a
//! [`SessionContext`]: the explicitly passed object that carries the config
//! and the outbound move link into every controller. No process-wide network
//! manager exists.
//!
//! `LocalSessions` is an in-process implementation used by tests and by
//! single-process host setups.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{config::MovementConfig, entity::EntityId, net::MoveRequest};

const JOIN_CODE_LEN: usize = 6;
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Which side of the transport this process starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportRole {
    /// Authority, possibly with its own local avatar.
    Host,
    Client,
}

/// A created or joined session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub join_code: String,
    pub max_players: u32,
}

/// Fire-and-forget link from an owning controller to the authority.
///
/// `dispatch` must not block; delivery is best effort and may be dropped.
pub trait MoveDispatch: Send + Sync {
    fn dispatch(&self, entity: EntityId, request: MoveRequest);
}

/// Receiving end of a [`ChannelDispatch`].
pub type MoveReceiver = mpsc::UnboundedReceiver<(EntityId, MoveRequest)>;

/// Queues move requests on a tokio channel for a transport task to send.
#[derive(Debug, Clone)]
pub struct ChannelDispatch {
    tx: mpsc::UnboundedSender<(EntityId, MoveRequest)>,
}

impl ChannelDispatch {
    pub fn new() -> (Self, MoveReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MoveDispatch for ChannelDispatch {
    fn dispatch(&self, entity: EntityId, request: MoveRequest) {
        if self.tx.send((entity, request)).is_err() {
            debug!(entity = ?entity, tick = request.tick.0, "authority link closed, move request dropped");
        }
    }
}

/// Discards requests. Used where the authority processes input itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatch;

impl MoveDispatch for NullDispatch {
    fn dispatch(&self, _entity: EntityId, _request: MoveRequest) {}
}

/// Per-process session state handed to every controller at construction.
#[derive(Clone)]
pub struct SessionContext {
    role: TransportRole,
    config: MovementConfig,
    dispatch: Arc<dyn MoveDispatch>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("role", &self.role)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn new(role: TransportRole, config: MovementConfig, dispatch: Arc<dyn MoveDispatch>) -> Self {
        Self {
            role,
            config,
            dispatch,
        }
    }

    /// Authority context; input it owns is processed in place.
    pub fn host(config: MovementConfig) -> Self {
        Self::new(TransportRole::Host, config, Arc::new(NullDispatch))
    }

    pub fn role(&self) -> TransportRole {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == TransportRole::Host
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<dyn MoveDispatch> {
        Arc::clone(&self.dispatch)
    }
}

/// A started transport: the context plus, on the host, the inbound requests.
#[derive(Debug)]
pub struct StartedTransport {
    pub context: SessionContext,
    pub requests: Option<MoveReceiver>,
}

/// The three operations the movement core needs from matchmaking/relay.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn create_session(&self, max_players: u32) -> anyhow::Result<SessionHandle>;

    async fn join_session(&self, code: &str) -> anyhow::Result<SessionHandle>;

    async fn start_transport(
        &self,
        session: &SessionHandle,
        role: TransportRole,
    ) -> anyhow::Result<StartedTransport>;
}

struct LocalSession {
    handle: SessionHandle,
    players: u32,
    dispatch: ChannelDispatch,
    requests: Option<MoveReceiver>,
}

/// In-process sessions keyed by join code.
pub struct LocalSessions {
    config: MovementConfig,
    sessions: Mutex<HashMap<String, LocalSession>>,
}

impl LocalSessions {
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, LocalSession>>> {
        self.sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("session registry poisoned"))
    }

    fn fresh_code(sessions: &HashMap<String, LocalSession>) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..JOIN_CODE_LEN)
                .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
                .collect();
            if !sessions.contains_key(&code) {
                return code;
            }
        }
    }

    /// Players currently counted in a session, host included.
    pub fn player_count(&self, code: &str) -> Option<u32> {
        self.lock().ok()?.get(code).map(|s| s.players)
    }
}

#[async_trait]
impl SessionService for LocalSessions {
    async fn create_session(&self, max_players: u32) -> anyhow::Result<SessionHandle> {
        anyhow::ensure!(max_players > 0, "max_players must be positive");
        let mut sessions = self.lock()?;
        let join_code = Self::fresh_code(&sessions);
        let handle = SessionHandle {
            join_code: join_code.clone(),
            max_players,
        };
        let (dispatch, requests) = ChannelDispatch::new();
        sessions.insert(
            join_code.clone(),
            LocalSession {
                handle: handle.clone(),
                players: 1,
                dispatch,
                requests: Some(requests),
            },
        );
        info!(join_code = %join_code, max_players, "Session created");
        Ok(handle)
    }

    async fn join_session(&self, code: &str) -> anyhow::Result<SessionHandle> {
        let code = code.trim();
        anyhow::ensure!(!code.is_empty(), "join code not entered");
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(code)
            .ok_or_else(|| anyhow::anyhow!("join code not valid: {code}"))?;
        anyhow::ensure!(
            session.players < session.handle.max_players,
            "session {code} is full"
        );
        session.players += 1;
        info!(join_code = %code, players = session.players, "Session joined");
        Ok(session.handle.clone())
    }

    async fn start_transport(
        &self,
        session: &SessionHandle,
        role: TransportRole,
    ) -> anyhow::Result<StartedTransport> {
        let mut sessions = self.lock()?;
        let entry = sessions
            .get_mut(&session.join_code)
            .ok_or_else(|| anyhow::anyhow!("unknown session {}", session.join_code))?;
        let started = match role {
            TransportRole::Host => {
                let requests = entry
                    .requests
                    .take()
                    .ok_or_else(|| anyhow::anyhow!("host transport already started"))?;
                StartedTransport {
                    context: SessionContext::host(self.config.clone()),
                    requests: Some(requests),
                }
            }
            TransportRole::Client => StartedTransport {
                context: SessionContext::new(
                    TransportRole::Client,
                    self.config.clone(),
                    Arc::new(entry.dispatch.clone()),
                ),
                requests: None,
            },
        };
        info!(join_code = %session.join_code, ?role, "Transport started");
        Ok(started)
    }
}

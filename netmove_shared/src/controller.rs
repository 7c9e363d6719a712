//! Per-entity movement orchestration.
//!
//! A `PlayerMovementController` owns everything one networked player needs on
//! one process: its transform copy, tick gate, kernel, history ring and
//! replicated state. The role is resolved once at spawn and every frame is
//! dispatched on it:
//!
//! - `OwnerClient`: gate -> sample -> local kernel step (prediction) ->
//!   history -> fire-and-forget request to the authority.
//! - `Authority`: runs the kernel for every request it receives (or for local
//!   input when the host owns the entity), records history and publishes the
//!   result through the replicator.
//! - `Observer`: gate -> read the replica -> snap the transform when the
//!   replicated state is moving.
//!
//! Mispredictions are never corrected. A request the authority never receives
//! simply never advances the authoritative state; the next one is applied to
//! whatever transform the authority holds at that point.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::{
    entity::{EntityId, Transform},
    history::HistoryRing,
    kernel::MovementKernel,
    math::Vec2,
    net::MoveRequest,
    replicator::{AuthoritativeReplicator, SubscriptionId},
    sample::{InputSample, MotionState},
    session::{MoveDispatch, SessionContext},
    tick::{FixedStepAccumulator, Tick},
};

/// How this process relates to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Computes and publishes the ground-truth state.
    Authority,
    /// Predicts locally and forwards input to the authority.
    OwnerClient,
    /// Displays replicated state only.
    Observer,
}

impl Role {
    /// Resolves the role for an entity at spawn.
    ///
    /// An authority that also owns the entity (a host's own avatar) stays
    /// `Authority` and takes local input directly.
    pub fn resolve(is_authority: bool, is_owner: bool) -> Role {
        match (is_authority, is_owner) {
            (true, _) => Role::Authority,
            (false, true) => Role::OwnerClient,
            (false, false) => Role::Observer,
        }
    }
}

/// What a call to [`PlayerMovementController::frame`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// No tick fired this frame.
    Waiting,
    /// A tick fired with nothing to apply.
    Idle(Tick),
    /// Owner stepped locally and dispatched the request.
    Predicted(MotionState),
    /// Authority stepped local input and published the result.
    Published(MotionState),
    /// Observer snapped to the replicated state.
    Applied(MotionState),
}

/// Movement state machine for one networked player entity.
pub struct PlayerMovementController {
    entity: EntityId,
    role: Role,
    owned: bool,
    transform: Transform,
    accumulator: FixedStepAccumulator,
    kernel: MovementKernel,
    tick_duration: f32,
    history: HistoryRing,
    replicator: AuthoritativeReplicator,
    dispatch: Arc<dyn MoveDispatch>,
}

impl std::fmt::Debug for PlayerMovementController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerMovementController")
            .field("entity", &self.entity)
            .field("role", &self.role)
            .field("owned", &self.owned)
            .field("transform", &self.transform)
            .field("tick", &self.accumulator.tick())
            .finish_non_exhaustive()
    }
}

impl PlayerMovementController {
    /// Creates the controller for a freshly spawned entity.
    pub fn spawn(ctx: &SessionContext, entity: EntityId, owned: bool, at: Transform) -> Self {
        let cfg = ctx.config();
        let role = Role::resolve(ctx.is_authority(), owned);
        let replicator = match role {
            Role::Authority => AuthoritativeReplicator::authority(),
            Role::OwnerClient | Role::Observer => AuthoritativeReplicator::replica(),
        };
        info!(entity = ?entity, ?role, owned, "Movement controller spawned");
        Self {
            entity,
            role,
            owned,
            transform: at,
            accumulator: FixedStepAccumulator::from_config(cfg),
            kernel: MovementKernel::from_config(cfg),
            tick_duration: cfg.tick_duration(),
            history: HistoryRing::new(cfg.history_capacity),
            replicator,
            dispatch: ctx.dispatcher(),
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// True when input for this entity originates in this process.
    pub fn is_locally_driven(&self) -> bool {
        self.owned
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Tick the gate will fire next.
    pub fn tick(&self) -> Tick {
        self.accumulator.tick()
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    pub fn replicated(&self) -> Option<MotionState> {
        self.replicator.read()
    }

    /// Replicated value before the latest change.
    pub fn previous_state(&self) -> Option<MotionState> {
        self.replicator.previous()
    }

    /// Installs a change observer on this entity's replicated state.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(Option<MotionState>, MotionState) + Send + 'static,
    {
        self.replicator.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.replicator.unsubscribe(id)
    }

    pub fn observer_count(&self) -> usize {
        self.replicator.observer_count()
    }

    /// Runs one rendering frame.
    ///
    /// `move_input` and `look_delta` are the raw axes sampled this frame; they
    /// are only consumed by roles that drive the entity locally.
    pub fn frame(&mut self, frame_dt: f32, move_input: Vec2, look_delta: Vec2) -> FrameOutcome {
        match self.role {
            Role::OwnerClient => self.frame_owner(frame_dt, move_input, look_delta),
            Role::Authority if self.owned => self.frame_host(frame_dt, move_input, look_delta),
            // remote-owned: advanced by `receive_request` only
            Role::Authority => FrameOutcome::Waiting,
            Role::Observer => self.frame_observer(frame_dt),
        }
    }

    fn frame_owner(&mut self, frame_dt: f32, move_input: Vec2, look_delta: Vec2) -> FrameOutcome {
        let Some(tick) = self.accumulator.advance(frame_dt) else {
            return FrameOutcome::Waiting;
        };
        let sample = InputSample::new(tick, move_input, look_delta);
        let state = self
            .kernel
            .advance(&mut self.transform, &sample, self.tick_duration);
        self.history.record(sample, state);
        self.dispatch.dispatch(self.entity, MoveRequest::from(sample));
        trace!(entity = ?self.entity, tick = tick.0, position = ?state.position, "predicted");
        FrameOutcome::Predicted(state)
    }

    fn frame_host(&mut self, frame_dt: f32, move_input: Vec2, look_delta: Vec2) -> FrameOutcome {
        let Some(tick) = self.accumulator.advance(frame_dt) else {
            return FrameOutcome::Waiting;
        };
        let sample = InputSample::new(tick, move_input, look_delta);
        FrameOutcome::Published(self.publish(sample))
    }

    fn frame_observer(&mut self, frame_dt: f32) -> FrameOutcome {
        let Some(tick) = self.accumulator.advance(frame_dt) else {
            return FrameOutcome::Waiting;
        };
        match self.replicator.read() {
            Some(state) if state.is_moving => {
                self.transform = state.transform();
                trace!(entity = ?self.entity, tick = tick.0, remote_tick = state.tick.0, "applied replicated state");
                FrameOutcome::Applied(state)
            }
            _ => FrameOutcome::Idle(tick),
        }
    }

    /// Authority: processes a move request dispatched by the owner.
    ///
    /// Runs the kernel on the authority's own transform with the fixed tick
    /// duration, records history and writes the replicated state.
    pub fn receive_request(&mut self, request: MoveRequest) -> anyhow::Result<MotionState> {
        anyhow::ensure!(
            self.role == Role::Authority,
            "{:?} is not the authority for {:?}",
            self.role,
            self.entity
        );
        anyhow::ensure!(
            !self.owned,
            "{:?} is driven by local input on the authority",
            self.entity
        );
        anyhow::ensure!(
            request.move_input.is_finite() && request.look_delta.is_finite(),
            "non-finite input for {:?} at tick {}",
            self.entity,
            request.tick.0
        );
        Ok(self.publish(request.to_sample()))
    }

    fn publish(&mut self, sample: InputSample) -> MotionState {
        let state = self
            .kernel
            .advance(&mut self.transform, &sample, self.tick_duration);
        self.history.record(sample, state);
        // authority replicas always accept writes
        if let Err(e) = self.replicator.write(state) {
            debug!(entity = ?self.entity, error = %e, "replicated write rejected");
        }
        trace!(entity = ?self.entity, tick = sample.tick.0, position = ?state.position, "published");
        state
    }

    /// Replica roles: stores a state delivered by the transport.
    ///
    /// The transform is not touched here; observers apply it on their next
    /// tick and owners never apply it.
    pub fn receive_replicated(&mut self, state: MotionState) -> anyhow::Result<()> {
        self.replicator.receive(state)
    }

    /// Tears the entity down: drops every change observer and all history so
    /// nothing keeps referring to it.
    pub fn despawn(mut self) {
        let observers = self.replicator.observer_count();
        self.replicator.reset();
        self.history.clear();
        info!(entity = ?self.entity, role = ?self.role, observers, "Movement controller despawned");
    }
}

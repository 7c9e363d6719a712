//! Replicated motion state.
//!
//! One `AuthoritativeReplicator` exists per entity per process. The
//! authority's copy is the only one that accepts `write`; every other copy is
//! a replica that is fed with `receive` when the transport delivers a value.
//! Both paths fire change observers synchronously, once per call, with the
//! prior value and the new one.
//!
//! State machine: `Uninitialized -> Initialized` on the first write or
//! receive. Readers see `None` until then and must treat it as "not moving".

use tracing::trace;

use crate::sample::MotionState;

/// Handle returned by [`AuthoritativeReplicator::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Change callback: `(previous, next)`.
pub type ChangeObserver = Box<dyn FnMut(Option<MotionState>, MotionState) + Send>;

/// Latest authoritative `MotionState` for one entity.
pub struct AuthoritativeReplicator {
    authority: bool,
    current: Option<MotionState>,
    previous: Option<MotionState>,
    observers: Vec<(SubscriptionId, ChangeObserver)>,
    next_subscription: u64,
}

impl std::fmt::Debug for AuthoritativeReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritativeReplicator")
            .field("authority", &self.authority)
            .field("current", &self.current)
            .field("previous", &self.previous)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl AuthoritativeReplicator {
    fn with_authority(authority: bool) -> Self {
        Self {
            authority,
            current: None,
            previous: None,
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// The writable copy held by the authority role.
    pub fn authority() -> Self {
        Self::with_authority(true)
    }

    /// A read-only copy fed by replication.
    pub fn replica() -> Self {
        Self::with_authority(false)
    }

    pub fn is_authority(&self) -> bool {
        self.authority
    }

    /// Publishes a new value. Last write wins; nothing is queued or merged.
    pub fn write(&mut self, value: MotionState) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.authority,
            "motion state is only writable by the authority"
        );
        self.set(value);
        Ok(())
    }

    /// Applies a value delivered from the authority to a replica.
    pub fn receive(&mut self, value: MotionState) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.authority,
            "the authority does not accept replicated motion state"
        );
        self.set(value);
        Ok(())
    }

    fn set(&mut self, value: MotionState) {
        let prior = self.current.replace(value);
        self.previous = prior;
        trace!(
            tick = value.tick.0,
            observers = self.observers.len(),
            "motion state changed"
        );
        for (_, observer) in self.observers.iter_mut() {
            observer(prior, value);
        }
    }

    /// Current value, or `None` before the first write arrived.
    pub fn read(&self) -> Option<MotionState> {
        self.current
    }

    /// Value that was current before the latest change.
    pub fn previous(&self) -> Option<MotionState> {
        self.previous
    }

    pub fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    /// Installs a change observer.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(Option<MotionState>, MotionState) + Send + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Removes and drops an observer. Returns false if it was not installed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Drops every observer and returns to `Uninitialized`.
    pub fn reset(&mut self) {
        self.observers.clear();
        self.current = None;
        self.previous = None;
    }
}

//! Tick-indexed history ring.
//!
//! Two parallel fixed-size arrays, one of input samples and one of the motion
//! states they produced, addressed by `tick mod capacity`. A slot always holds
//! the most recent record whose tick maps to it; older data is overwritten,
//! never merged.
//!
//! Nothing in the movement core reads the ring back yet. It is kept as the
//! storage a rollback/resimulation layer would replay from, and callers may
//! inspect it.

use crate::{
    sample::{InputSample, MotionState},
    tick::Tick,
};

/// Fixed-capacity circular input/state history.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    inputs: Vec<Option<InputSample>>,
    states: Vec<Option<MotionState>>,
    capacity: u32,
}

impl HistoryRing {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            inputs: vec![None; capacity as usize],
            states: vec![None; capacity as usize],
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Stores a sample and its resulting state at the sample's slot.
    pub fn record(&mut self, input: InputSample, state: MotionState) {
        debug_assert_eq!(input.tick, state.tick, "input/state tick mismatch");
        let slot = input.tick.slot(self.capacity);
        self.inputs[slot] = Some(input);
        self.states[slot] = Some(state);
    }

    /// Raw slot contents, whatever tick last wrote them.
    pub fn slot(&self, index: usize) -> Option<(&InputSample, &MotionState)> {
        match (self.inputs.get(index)?, self.states.get(index)?) {
            (Some(i), Some(s)) => Some((i, s)),
            _ => None,
        }
    }

    /// Input recorded for exactly `tick`, if its slot has not been reused.
    pub fn input_for(&self, tick: Tick) -> Option<&InputSample> {
        self.inputs[tick.slot(self.capacity)]
            .as_ref()
            .filter(|s| s.tick == tick)
    }

    /// State recorded for exactly `tick`, if its slot has not been reused.
    pub fn state_for(&self, tick: Tick) -> Option<&MotionState> {
        self.states[tick.slot(self.capacity)]
            .as_ref()
            .filter(|s| s.tick == tick)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.states.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.states.iter().all(Option::is_none)
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.inputs.iter_mut().for_each(|s| *s = None);
        self.states.iter_mut().for_each(|s| *s = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Vec2, Vec3};

    fn record_at(ring: &mut HistoryRing, tick: u32, x: f32) {
        let input = InputSample::new(Tick(tick), Vec2::new(1.0, 0.0), Vec2::ZERO);
        let state = MotionState {
            tick: Tick(tick),
            position: Vec3::new(x, 0.0, 0.0),
            is_moving: true,
            ..Default::default()
        };
        ring.record(input, state);
    }

    #[test]
    fn reused_slot_hides_old_tick() {
        let mut ring = HistoryRing::new(4);
        record_at(&mut ring, 1, 1.0);
        record_at(&mut ring, 5, 5.0);
        assert!(ring.state_for(Tick(1)).is_none());
        assert_eq!(ring.state_for(Tick(5)).unwrap().position.x, 5.0);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn clear_empties_every_slot() {
        let mut ring = HistoryRing::new(8);
        record_at(&mut ring, 0, 0.0);
        record_at(&mut ring, 3, 3.0);
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.slot(3).is_none());
    }
}

//! Semantic-keyed opcode state with touch/sweep collection and fade-out
//!
//! The pool holds two fixed-capacity, open-addressed tables:
//!
//! - **active**: state used by the running program(s). Each execution pass
//!   calls [`StatePool::begin_frame`], and every opcode that fetches its state
//!   marks it touched.
//! - **fading**: state of nodes that were removed from the program. After a
//!   crossfade completes, [`StatePool::gc_sweep`] moves every untouched entry
//!   here with gain 1.0; the gain then decays linearly to 0 over
//!   `fade_blocks` blocks, after which the entry is purged.
//!
//! Both tables are allocated once; inserting, sweeping and purging only move
//! values between pre-sized slots.

use crate::constants::{
    BLOCK_SIZE, DEFAULT_FADE_BLOCKS, MAX_BREAKPOINTS, MAX_SEQ_EVENTS,
};
use crate::dsp_state::{
    Breakpoint, DspState, PatternState, SeqEntry, SeqStepState, StateVariant, TimelineState,
};
use crate::error::{StateInitError, StatePoolError};
use crate::hash::seed_from_key;
use crate::pattern::PatternProgram;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
enum Slot<V> {
    Empty,
    /// Removed entry; probing continues past it.
    Tombstone,
    Live { key: u32, value: V },
}

/// Fixed-capacity linear-probing map from `u32` keys.
#[derive(Debug)]
struct KeyedTable<V> {
    slots: Box<[Slot<V>]>,
    len: usize,
}

impl<V> KeyedTable<V> {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Slot::Empty).collect();
        Self { slots, len: 0 }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn home(&self, key: u32) -> usize {
        key as usize % self.slots.len()
    }

    fn find(&self, key: u32) -> Option<usize> {
        let cap = self.slots.len();
        let start = self.home(key);
        for step in 0..cap {
            let i = (start + step) % cap;
            match &self.slots[i] {
                Slot::Empty => return None,
                Slot::Live { key: k, .. } if *k == key => return Some(i),
                _ => {}
            }
        }
        None
    }

    /// Insert a key known to be absent.
    fn insert(&mut self, key: u32, value: V) -> Result<usize, StatePoolError> {
        let cap = self.slots.len();
        let start = self.home(key);
        for step in 0..cap {
            let i = (start + step) % cap;
            if !matches!(self.slots[i], Slot::Live { .. }) {
                self.slots[i] = Slot::Live { key, value };
                self.len += 1;
                return Ok(i);
            }
        }
        Err(StatePoolError::Full { capacity: cap })
    }

    fn remove_at(&mut self, index: usize) -> Option<(u32, V)> {
        match std::mem::replace(&mut self.slots[index], Slot::Tombstone) {
            Slot::Live { key, value } => {
                self.len -= 1;
                Some((key, value))
            }
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    fn get(&self, index: usize) -> Option<&V> {
        match &self.slots[index] {
            Slot::Live { value, .. } => Some(value),
            _ => None,
        }
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut V> {
        match &mut self.slots[index] {
            Slot::Live { value, .. } => Some(value),
            _ => None,
        }
    }

    fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = Slot::Empty;
        }
        self.len = 0;
    }

    fn iter(&self) -> impl Iterator<Item = (u32, &V)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Live { key, value } => Some((*key, value)),
            _ => None,
        })
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut V)> {
        self.slots.iter_mut().filter_map(|slot| match slot {
            Slot::Live { key, value } => Some((*key, value)),
            _ => None,
        })
    }
}

#[derive(Debug)]
struct ActiveEntry {
    state: DspState,
    touched: bool,
}

#[derive(Debug)]
struct FadingEntry {
    state: DspState,
    remaining: u32,
    total: u32,
    gain: f32,
}

pub struct StatePool {
    active: KeyedTable<ActiveEntry>,
    fading: KeyedTable<FadingEntry>,
    fade_blocks: u32,
    /// Lookups that failed because a table was full.
    overflow_count: u64,
}

impl StatePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: KeyedTable::new(capacity),
            fading: KeyedTable::new(capacity),
            fade_blocks: DEFAULT_FADE_BLOCKS,
            overflow_count: 0,
        }
    }

    /// State of type `T` under `key`, created with `T::default()` if the key
    /// is new or currently holds another type. Marks the key touched.
    pub fn get_or_create<T: StateVariant>(&mut self, key: u32) -> Result<&mut T, StatePoolError> {
        let index = match self.active.find(key) {
            Some(index) => index,
            None => {
                let entry = ActiveEntry {
                    state: T::default().wrap(),
                    touched: true,
                };
                match self.active.insert(key, entry) {
                    Ok(index) => index,
                    Err(err) => {
                        self.overflow_count += 1;
                        return Err(err);
                    }
                }
            }
        };

        let entry = self
            .active
            .get_mut(index)
            .ok_or(StatePoolError::TypeMismatch { key })?;
        entry.touched = true;
        if T::peek(&entry.state).is_none() {
            entry.state = T::default().wrap();
        }
        T::peek_mut(&mut entry.state).ok_or(StatePoolError::TypeMismatch { key })
    }

    /// Read-only access to active state of type `T`.
    pub fn get<T: StateVariant>(&self, key: u32) -> Option<&T> {
        let index = self.active.find(key)?;
        self.active.get(index).and_then(|e| T::peek(&e.state))
    }

    pub fn touch(&mut self, key: u32) {
        if let Some(entry) = self.active.find(key).and_then(|i| self.active.get_mut(i)) {
            entry.touched = true;
        }
    }

    pub fn exists(&self, key: u32) -> bool {
        self.active.find(key).is_some()
    }

    pub fn is_fading(&self, key: u32) -> bool {
        self.fading.find(key).is_some()
    }

    /// Clear every touch mark. Call once before each execution pass.
    pub fn begin_frame(&mut self) {
        for (_, entry) in self.active.iter_mut() {
            entry.touched = false;
        }
    }

    /// Move every untouched active entry into the fading table.
    pub fn gc_sweep(&mut self) {
        let mut swept = 0usize;
        for index in 0..self.active.capacity() {
            let untouched = self.active.get(index).is_some_and(|e| !e.touched);
            if !untouched {
                continue;
            }
            let Some((key, entry)) = self.active.remove_at(index) else {
                continue;
            };
            swept += 1;
            if self.fade_blocks == 0 {
                continue;
            }

            // A key that is already fading restarts its fade with the newer state.
            if let Some(old) = self.fading.find(key) {
                self.fading.remove_at(old);
            }
            let fading = FadingEntry {
                state: entry.state,
                remaining: self.fade_blocks,
                total: self.fade_blocks,
                gain: 1.0,
            };
            if self.fading.insert(key, fading).is_err() {
                self.overflow_count += 1;
            }
        }
        if swept > 0 {
            debug!(swept, fading = self.fading.len, "swept orphaned states");
        }
    }

    /// Step every fading entry one block closer to silence.
    pub fn advance_fading(&mut self) {
        for (_, entry) in self.fading.iter_mut() {
            entry.remaining = entry.remaining.saturating_sub(1);
            entry.gain = if entry.total == 0 {
                0.0
            } else {
                entry.remaining as f32 / entry.total as f32
            };
        }
    }

    /// Drop fading entries whose fade has run out.
    pub fn gc_fading(&mut self) {
        for index in 0..self.fading.capacity() {
            if self.fading.get(index).is_some_and(|e| e.remaining == 0) {
                self.fading.remove_at(index);
            }
        }
    }

    pub fn get_fading<T: StateVariant>(&self, key: u32) -> Option<&T> {
        let index = self.fading.find(key)?;
        self.fading.get(index).and_then(|e| T::peek(&e.state))
    }

    /// 1.0 for active keys, the current fade gain for fading keys, 0.0 for
    /// unknown keys.
    pub fn get_fade_gain(&self, key: u32) -> f32 {
        if self.exists(key) {
            return 1.0;
        }
        self.fading
            .find(key)
            .and_then(|i| self.fading.get(i))
            .map_or(0.0, |e| e.gain)
    }

    pub fn len(&self) -> usize {
        self.active.len
    }

    pub fn is_empty(&self) -> bool {
        self.active.len == 0
    }

    pub fn fading_count(&self) -> usize {
        self.fading.len
    }

    pub fn capacity(&self) -> usize {
        self.active.capacity()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn fade_blocks(&self) -> u32 {
        self.fade_blocks
    }

    pub fn set_fade_blocks(&mut self, blocks: u32) {
        self.fade_blocks = blocks;
    }

    /// Fade duration in samples at the current block size.
    pub fn fade_samples(&self) -> usize {
        self.fade_blocks as usize * BLOCK_SIZE
    }

    /// Keys currently active, in table order.
    pub fn active_keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.active.iter().map(|(key, _)| key)
    }

    pub fn fading_keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.fading.iter().map(|(key, _)| key)
    }

    pub fn reset_playheads(&mut self) {
        for (_, entry) in self.active.iter_mut() {
            entry.state.reset_playhead();
        }
    }

    /// Clear both tables.
    pub fn reset(&mut self) {
        self.active.clear();
        self.fading.clear();
        self.overflow_count = 0;
    }

    /// Load a precomputed step table into `key`.
    ///
    /// Entries are sorted by time; times are beats from the cycle start and
    /// must lie in `[0, cycle_length)`.
    pub fn init_seq_step(
        &mut self,
        key: u32,
        times: &[f64],
        values: &[f32],
        velocities: &[f32],
        cycle_length: f64,
    ) -> Result<(), StateInitError> {
        if times.len() != values.len() || times.len() != velocities.len() {
            return Err(StateInitError::LengthMismatch {
                times: times.len(),
                values: values.len(),
                velocities: velocities.len(),
            });
        }
        if times.len() > MAX_SEQ_EVENTS {
            return Err(StateInitError::TooManyEvents {
                len: times.len(),
                max: MAX_SEQ_EVENTS,
            });
        }

        let state = self.get_or_create::<SeqStepState>(key)?;
        *state = SeqStepState {
            cycle_length,
            ..Default::default()
        };
        for ((&time, &value), &velocity) in times.iter().zip(values).zip(velocities) {
            state.entries.push(SeqEntry {
                time,
                value,
                velocity,
            });
        }
        state
            .entries
            .sort_by(|a, b| a.time.total_cmp(&b.time));
        debug!(key, events = times.len(), cycle_length, "initialized step table");
        Ok(())
    }

    /// Attach a pattern program to `key`. The query seed is derived from the
    /// key and the program's own seed.
    pub fn init_pattern_program(
        &mut self,
        key: u32,
        program: Arc<PatternProgram>,
    ) -> Result<(), StateInitError> {
        let seed = seed_from_key(key) ^ program.seed;
        let state = self.get_or_create::<PatternState>(key)?;
        *state = PatternState {
            program: Some(program),
            seed,
            ..Default::default()
        };
        debug!(key, seed, "attached pattern program");
        Ok(())
    }

    pub fn init_timeline(
        &mut self,
        key: u32,
        points: &[Breakpoint],
        loop_length: Option<f64>,
    ) -> Result<(), StateInitError> {
        if points.len() > MAX_BREAKPOINTS {
            return Err(StateInitError::TooManyBreakpoints {
                len: points.len(),
                max: MAX_BREAKPOINTS,
            });
        }
        let state = self.get_or_create::<TimelineState>(key)?;
        *state = TimelineState {
            points: points.iter().copied().collect(),
            loop_length,
        };
        state.points.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(())
    }
}

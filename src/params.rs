//! Lock-free named parameters with per-parameter smoothing
//!
//! One control thread writes targets; the audio thread reads smoothed values
//! and advances the smoothing. Every field of a slot is its own atomic
//! (`f32` values travel as `u32` bits), so neither side can observe a torn
//! value and neither side ever blocks.
//!
//! Slot publication follows release/acquire: the writer fills in the name,
//! values and coefficient, then releases the `LIVE` state; a reader that
//! acquires `LIVE` sees all of them.

use crate::constants::{BLOCK_SIZE, DEFAULT_SAMPLE_RATE, DEFAULT_SLEW_MS};
use crate::error::ParamError;
use crate::hash::hash_name;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

const EMPTY: u8 = 0;
const LIVE: u8 = 1;
const TOMBSTONE: u8 = 2;

/// Smallest coefficient; keeps very long slews from stalling completely.
const MIN_COEFF: f32 = 1e-6;

/// An `f32` stored in an `AtomicU32`.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    #[inline]
    pub fn store(&self, value: f32, order: Ordering) {
        self.0.store(value.to_bits(), order);
    }
}

#[derive(Debug, Default)]
struct ParamSlot {
    state: AtomicU8,
    name_hash: AtomicU32,
    target: AtomicF32,
    current: AtomicF32,
    coeff: AtomicF32,
}

/// One-pole coefficient reaching ~63% of a step after `slew_ms`.
pub fn smoothing_coeff(slew_ms: f32, sample_rate: f32) -> f32 {
    if !(slew_ms > 0.0) || !(sample_rate > 0.0) {
        return 1.0;
    }
    let samples = slew_ms * 0.001 * sample_rate;
    (1.0 - (-1.0 / samples).exp()).clamp(MIN_COEFF, 1.0)
}

/// Fixed-capacity, open-addressed table of smoothed parameters.
///
/// # Example
/// ```ignore
/// let params = ParamChannel::new(256, 48000.0);
/// params.set_param("cutoff", 800.0, None)?;       // snaps: new parameter
/// params.set_param("cutoff", 1200.0, Some(20.0))?; // ramps over ~20ms
/// params.update_interpolation_block();
/// let value = params.get(hash_name("cutoff"));
/// ```
#[derive(Debug)]
pub struct ParamChannel {
    slots: Box<[ParamSlot]>,
    live: AtomicUsize,
    max_params: usize,
    sample_rate: AtomicF32,
    default_slew_ms: AtomicF32,
}

impl ParamChannel {
    pub fn new(max_params: usize, sample_rate: f32) -> Self {
        let table_size = (max_params.max(1) * 2).next_power_of_two();
        Self {
            slots: (0..table_size).map(|_| ParamSlot::default()).collect(),
            live: AtomicUsize::new(0),
            max_params: max_params.max(1),
            sample_rate: AtomicF32::new(sample_rate),
            default_slew_ms: AtomicF32::new(DEFAULT_SLEW_MS),
        }
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Slot holding `hash`, if live.
    fn find(&self, hash: u32) -> Option<&ParamSlot> {
        let mask = self.mask();
        let start = hash as usize & mask;
        for step in 0..self.slots.len() {
            let slot = &self.slots[(start + step) & mask];
            match slot.state.load(Ordering::Acquire) {
                EMPTY => return None,
                LIVE if slot.name_hash.load(Ordering::Relaxed) == hash => return Some(slot),
                _ => {}
            }
        }
        None
    }

    /// Set a parameter's target. `slew_ms` of `None` uses the default slew.
    ///
    /// A parameter seen for the first time starts at `value` with no ramp.
    pub fn set_param(&self, name: &str, value: f32, slew_ms: Option<f32>) -> Result<(), ParamError> {
        self.set_param_hash(hash_name(name), value, slew_ms)
    }

    pub fn set_param_hash(&self, hash: u32, value: f32, slew_ms: Option<f32>) -> Result<(), ParamError> {
        let slew = slew_ms.unwrap_or_else(|| self.default_slew_ms());
        let coeff = smoothing_coeff(slew, self.sample_rate());

        if let Some(slot) = self.find(hash) {
            slot.coeff.store(coeff, Ordering::Relaxed);
            slot.target.store(value, Ordering::Release);
            return Ok(());
        }

        if self.live.load(Ordering::Relaxed) >= self.max_params {
            return Err(ParamError::TableFull {
                capacity: self.max_params,
            });
        }

        // New parameter: first empty or tombstoned slot on the search path.
        let mask = self.mask();
        let start = hash as usize & mask;
        for step in 0..self.slots.len() {
            let slot = &self.slots[(start + step) & mask];
            if slot.state.load(Ordering::Acquire) == LIVE {
                continue;
            }
            slot.name_hash.store(hash, Ordering::Relaxed);
            slot.current.store(value, Ordering::Relaxed);
            slot.target.store(value, Ordering::Relaxed);
            slot.coeff.store(coeff, Ordering::Relaxed);
            slot.state.store(LIVE, Ordering::Release);
            self.live.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        Err(ParamError::TableFull {
            capacity: self.max_params,
        })
    }

    /// Smoothed value, or 0.0 for an unknown hash.
    #[inline]
    pub fn get(&self, hash: u32) -> f32 {
        self.find(hash)
            .map_or(0.0, |slot| slot.current.load(Ordering::Relaxed))
    }

    /// Unsmoothed target, or 0.0 for an unknown hash.
    pub fn get_target(&self, hash: u32) -> f32 {
        self.find(hash)
            .map_or(0.0, |slot| slot.target.load(Ordering::Acquire))
    }

    pub fn try_get(&self, hash: u32) -> Option<f32> {
        self.find(hash).map(|slot| slot.current.load(Ordering::Relaxed))
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.has_param_hash(hash_name(name))
    }

    pub fn has_param_hash(&self, hash: u32) -> bool {
        self.find(hash).is_some()
    }

    /// Remove a parameter. Returns false if it did not exist.
    pub fn remove_param(&self, name: &str) -> bool {
        match self.find(hash_name(name)) {
            Some(slot) => {
                slot.state.store(TOMBSTONE, Ordering::Release);
                self.live.fetch_sub(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn param_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.max_params
    }

    /// Drop every parameter.
    pub fn reset(&self) {
        for slot in self.slots.iter() {
            slot.state.store(EMPTY, Ordering::Release);
        }
        self.live.store(0, Ordering::Relaxed);
    }

    /// Advance every live parameter's smoothing by one sample.
    pub fn update_interpolation_sample(&self) {
        for slot in self.live_slots() {
            let target = slot.target.load(Ordering::Acquire);
            let current = slot.current.load(Ordering::Relaxed);
            let coeff = slot.coeff.load(Ordering::Relaxed);
            slot.current
                .store(current + (target - current) * coeff, Ordering::Relaxed);
        }
    }

    /// Advance every live parameter's smoothing by a whole block.
    pub fn update_interpolation_block(&self) {
        for slot in self.live_slots() {
            let target = slot.target.load(Ordering::Acquire);
            let current = slot.current.load(Ordering::Relaxed);
            let coeff = slot.coeff.load(Ordering::Relaxed);
            let remaining = (1.0 - coeff).powi(BLOCK_SIZE as i32);
            slot.current
                .store(target + (current - target) * remaining, Ordering::Relaxed);
        }
    }

    fn live_slots(&self) -> impl Iterator<Item = &ParamSlot> {
        self.slots
            .iter()
            .filter(|slot| slot.state.load(Ordering::Acquire) == LIVE)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Affects coefficients of subsequent `set_param` calls.
    pub fn set_sample_rate(&self, sample_rate: f32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    pub fn default_slew_ms(&self) -> f32 {
        self.default_slew_ms.load(Ordering::Relaxed)
    }

    pub fn set_default_slew_ms(&self, slew_ms: f32) {
        self.default_slew_ms.store(slew_ms, Ordering::Relaxed);
    }
}

impl Default for ParamChannel {
    fn default() -> Self {
        Self::new(crate::constants::MAX_PARAMS, DEFAULT_SAMPLE_RATE)
    }
}

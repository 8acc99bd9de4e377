//! Block stepping over timed events
//!
//! `SEQ_STEP` walks a precomputed table whose times repeat every
//! `cycle_length` beats; `PAT_STEP` walks the events a pattern query returned
//! for the current block. Both follow one rule: sample `i` covers the beat
//! interval `[beat(i), beat(i + 1))` and fires every event whose onset lies
//! inside it. A firing sample carries a trigger of 1.0; value and velocity
//! jump to the last event fired and hold until the next one.

use crate::buffer_pool::Block;
use crate::constants::BLOCK_SIZE;
use crate::context::ExecutionContext;
use crate::dsp_state::{PatternState, SeqStepState};
use crate::pattern::TimeSpan;

/// The three per-sample outputs of a stepping opcode.
#[derive(Debug, Clone, Default)]
pub struct StepOutputs {
    pub value: Block,
    pub velocity: Block,
    pub trigger: Block,
}

/// Distance between two positions on a circle of circumference `length`.
fn cyclic_distance(a: f64, b: f64, length: f64) -> f64 {
    let d = (a - b).abs().rem_euclid(length);
    d.min(length - d)
}

/// Point the table cursor at the first entry at or after `position` and
/// hold the entry before it (the last one of the previous cycle at the
/// start of a cycle).
fn resync(state: &mut SeqStepState, position: f64) {
    state.next = state.entries.partition_point(|e| e.time < position);
    let held = match state.next {
        0 => state.entries.last(),
        n => state.entries.get(n - 1),
    };
    if let Some(entry) = held {
        state.held_value = entry.value;
        state.held_velocity = entry.velocity;
    }
}

/// Fire table entries with `time < end`; returns whether any fired.
fn fire_until(state: &mut SeqStepState, end: f64) -> bool {
    let mut fired = false;
    while let Some(entry) = state.entries.get(state.next) {
        if entry.time >= end {
            break;
        }
        state.held_value = entry.value;
        state.held_velocity = entry.velocity;
        state.next += 1;
        fired = true;
    }
    fired
}

/// Step a precomputed table through the current block.
///
/// The cursor carries over between blocks. It resynchronises with the clock
/// whenever the block does not start where the previous one ended (first
/// block, seek, tempo jump or a second pass over the same block), so the
/// output is always what the clock position implies.
pub fn step_table(state: &mut SeqStepState, timing: &ExecutionContext, out: &mut StepOutputs) {
    let length = state.cycle_length;
    let dt = timing.beats_per_sample();
    if state.entries.is_empty() || !(length > 0.0) || !dt.is_finite() || dt < 0.0 {
        *out = StepOutputs::default();
        state.expected = None;
        return;
    }

    let start = timing.beat_position.rem_euclid(length);
    let mut position = match state.expected {
        // Continue from the cursor's own position so a clock value rounded
        // to the other side of the cycle wrap cannot fire entries twice.
        Some(expected) if cyclic_distance(expected, start, length) <= dt * 0.5 => expected,
        _ => {
            resync(state, start);
            start
        }
    };
    for i in 0..BLOCK_SIZE {
        let mut end = position + dt;
        let mut fired = fire_until(state, end);
        if end >= length {
            // Cycle wrap inside this sample: finish the old cycle, then
            // fire the new cycle's entries up to the sample's end.
            fired |= fire_until(state, f64::INFINITY);
            end = end.rem_euclid(length);
            state.next = 0;
            fired |= fire_until(state, end);
        }
        out.trigger[i] = if fired { 1.0 } else { 0.0 };
        out.value[i] = state.held_value;
        out.velocity[i] = state.held_velocity;
        position = end;
    }
    state.expected = Some(position);
}

/// Re-run the pattern query for `window` into the state's event list.
pub fn refresh_events(state: &mut PatternState, window: (f64, f64)) {
    state.events.clear();
    state.window = Some(window);
    if let Some(program) = state.program.as_deref() {
        program.query_onsets_into(
            program.root,
            TimeSpan::new(window.0, window.1),
            state.seed,
            &mut state.events,
        );
    }
}

/// Step queried pattern events through the current block, querying first if
/// the held events belong to another window.
///
/// Stepping the same block twice yields the same output: the held value at
/// the start of the block is remembered and each pass starts over from it.
pub fn step_events(state: &mut PatternState, timing: &ExecutionContext, out: &mut StepOutputs) {
    let (begin, end) = timing.block_beats();
    let window = (begin, end);
    if state.window != Some(window) {
        refresh_events(state, window);
    }
    if state.stepped != Some(window) {
        state.entry_value = state.held_value;
        state.entry_velocity = state.held_velocity;
        state.stepped = Some(window);
    }

    let mut value = state.entry_value;
    let mut velocity = state.entry_velocity;
    let mut cursor = 0;
    for i in 0..BLOCK_SIZE {
        let sample_end = if i + 1 == BLOCK_SIZE {
            end
        } else {
            timing.beat_at(i + 1)
        };
        let mut fired = false;
        while let Some(event) = state.events.get(cursor) {
            if event.time >= sample_end {
                break;
            }
            value = event.value();
            velocity = event.velocity;
            if event.source.is_some() {
                state.active_source = event.source;
            }
            cursor += 1;
            fired = true;
        }
        out.trigger[i] = if fired { 1.0 } else { 0.0 };
        out.value[i] = value;
        out.velocity[i] = velocity;
    }
    state.held_value = value;
    state.held_velocity = velocity;
}

//! Clock-driven opcodes
//!
//! Everything here reads the beat clock from the execution context instead
//! of counting samples itself, so a seek or a tempo change is picked up on
//! the next block without any per-node bookkeeping. Onsets use the same
//! ownership rule as pattern events: sample `i` fires for an onset in
//! `[beat(i), beat(i + 1))`.

use super::{finite_or_zero, OpContext};
use crate::buffer_pool::Block;
use crate::constants::{BEATS_PER_CYCLE, BLOCK_SIZE, TWO_PI};
use crate::dsp_state::{Curve, EuclidState, LfoState, PatternState, SeqStepState, TimelineState};
use crate::hash::{deterministic_unit, seed_from_key};
use crate::instruction::Instruction;
use crate::pattern::{euclid_mask, is_onset, MAX_EUCLID_STEPS};
use crate::sequence::{refresh_events, step_events, step_table, StepOutputs};

/// `CLOCK` mode values.
pub const CLOCK_BEAT: u8 = 0;
pub const CLOCK_BAR: u8 = 1;

/// LFO shapes, selected by the instruction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoShape {
    Sin,
    Tri,
    Saw,
    Ramp,
    Sqr,
    Pwm,
    SampleHold,
}

impl LfoShape {
    pub fn from_mode(mode: u8) -> Self {
        match mode {
            1 => LfoShape::Tri,
            2 => LfoShape::Saw,
            3 => LfoShape::Ramp,
            4 => LfoShape::Sqr,
            5 => LfoShape::Pwm,
            6 => LfoShape::SampleHold,
            _ => LfoShape::Sin,
        }
    }
}

/// The integer in `[from, to)`, if any.
#[inline]
fn crosses_integer(from: f64, to: f64) -> Option<i64> {
    let k = from.ceil();
    (k < to).then_some(k as i64)
}

/// Phase of the current beat (mode 0) or bar (mode 1), in `[0, 1)`.
pub fn clock(ctx: &mut OpContext, inst: &Instruction) {
    let timing = ctx.timing;
    let out = ctx.output(inst);
    for (i, sample) in out.iter_mut().enumerate() {
        *sample = match inst.mode {
            CLOCK_BEAT => timing.beat_phase(i),
            _ => timing.bar_phase(i),
        } as f32;
    }
}

/// Beat-synced LFO in `[-1, 1]`.
///
/// - `in0`: cycles per beat (1.0 when unused)
/// - `in1`: duty cycle for the PWM shape (0.5 when unused)
pub fn lfo(ctx: &mut OpContext, inst: &Instruction) {
    let rate = ctx.input_or(inst, 0, 1.0);
    let duty = ctx.input_or(inst, 1, 0.5);
    let shape = LfoShape::from_mode(inst.mode);
    let timing = ctx.timing;

    let mut out = Block::ZERO;
    if let Ok(state) = ctx.states.get_or_create::<LfoState>(inst.key) {
        if state.entry_block == Some(timing.block_counter) {
            state.held_cycle = state.entry_cycle;
            state.held = state.entry_held;
        } else {
            state.entry_block = Some(timing.block_counter);
            state.entry_cycle = state.held_cycle;
            state.entry_held = state.held;
        }
        let seed = seed_from_key(inst.key);
        for i in 0..BLOCK_SIZE {
            let cycles = timing.beat_at(i) * rate[i] as f64;
            if !cycles.is_finite() {
                continue;
            }
            let phase = cycles.rem_euclid(1.0) as f32;
            out[i] = match shape {
                LfoShape::Sin => (phase * TWO_PI).sin(),
                LfoShape::Tri => 4.0 * (phase - 0.5).abs() - 1.0,
                LfoShape::Saw => 2.0 * phase - 1.0,
                LfoShape::Ramp => 1.0 - 2.0 * phase,
                LfoShape::Sqr => {
                    if phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
                LfoShape::Pwm => {
                    if phase < duty[i] {
                        1.0
                    } else {
                        -1.0
                    }
                }
                LfoShape::SampleHold => {
                    let cycle = cycles.floor() as i64;
                    if state.held_cycle != Some(cycle) {
                        let unit = deterministic_unit(seed, inst.key, cycle as f64);
                        state.held = (unit * 2.0 - 1.0) as f32;
                        state.held_cycle = Some(cycle);
                    }
                    state.held
                }
            };
        }
    }
    ctx.write(inst.out, &out);
}

/// Step through a table loaded with `StatePool::init_seq_step`.
///
/// Writes value to `out`, velocity to `inputs[0]` and trigger to `inputs[1]`.
pub fn seq_step(ctx: &mut OpContext, inst: &Instruction) {
    let mut outs = StepOutputs::default();
    if let Ok(state) = ctx.states.get_or_create::<SeqStepState>(inst.key) {
        step_table(state, ctx.timing, &mut outs);
    }
    write_step_outputs(ctx, inst, &outs);
}

fn write_step_outputs(ctx: &mut OpContext, inst: &Instruction, outs: &StepOutputs) {
    ctx.write(inst.out, &outs.value);
    ctx.write(inst.input(0), &outs.velocity);
    ctx.write(inst.input(1), &outs.trigger);
}

/// Euclidean trigger generator over one bar.
///
/// - `in0`: hits, `in1`: steps, `in2`: rotation (optional), all read at the
///   first sample of the block
pub fn euclid(ctx: &mut OpContext, inst: &Instruction) {
    let hits = ctx.input(inst, 0)[0].max(0.0) as u32;
    let steps = (ctx.input(inst, 1)[0].max(1.0) as u32).min(MAX_EUCLID_STEPS);
    let rotation = ctx.input(inst, 2)[0] as i32;
    let timing = ctx.timing;

    let mut out = Block::ZERO;
    if let Ok(state) = ctx.states.get_or_create::<EuclidState>(inst.key) {
        if !state.valid || state.hits != hits || state.steps != steps || state.rotation != rotation
        {
            *state = EuclidState {
                mask: euclid_mask(hits, steps, rotation),
                hits,
                steps,
                rotation,
                valid: true,
            };
        }

        let steps_per_beat = steps as f64 / BEATS_PER_CYCLE;
        for (i, sample) in out.iter_mut().enumerate() {
            let from = timing.beat_at(i) * steps_per_beat;
            let to = timing.beat_at(i + 1) * steps_per_beat;
            if let Some(step) = crosses_integer(from, to) {
                let step = step.rem_euclid(steps as i64) as u32;
                if is_onset(state.mask, step) {
                    *sample = 1.0;
                }
            }
        }
    }
    ctx.write(inst.out, &out);
}

/// One-sample pulse `in0` times per beat (once per beat when unused).
pub fn trigger(ctx: &mut OpContext, inst: &Instruction) {
    let division = ctx.input_or(inst, 0, 1.0);
    let timing = ctx.timing;
    let out = ctx.output(inst);
    for i in 0..BLOCK_SIZE {
        let div = division[i] as f64;
        out[i] = if div > 0.0 && div.is_finite() {
            let from = timing.beat_at(i) * div;
            let to = timing.beat_at(i + 1) * div;
            if crosses_integer(from, to).is_some() {
                1.0
            } else {
                0.0
            }
        } else {
            0.0
        };
    }
}

/// Breakpoint automation loaded with `StatePool::init_timeline`.
pub fn timeline(ctx: &mut OpContext, inst: &Instruction) {
    let timing = ctx.timing;
    let mut out = Block::ZERO;
    if let Ok(state) = ctx.states.get_or_create::<TimelineState>(inst.key) {
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = timeline_value(state, timing.beat_at(i));
        }
    }
    ctx.write(inst.out, &out);
}

fn timeline_value(state: &TimelineState, beat: f64) -> f32 {
    let points = &state.points;
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 0.0;
    };
    let time = match state.loop_length {
        Some(length) if length > 0.0 => beat.rem_euclid(length),
        _ => beat,
    };

    let next = points.partition_point(|p| p.time <= time);
    if next == 0 {
        return first.value;
    }
    if next == points.len() {
        return last.value;
    }
    let (p0, p1) = (points[next - 1], points[next]);
    let span = p1.time - p0.time;
    let t = if span > 0.0 {
        ((time - p0.time) / span).clamp(0.0, 1.0) as f32
    } else {
        1.0
    };
    let shaped = match p0.curve {
        Curve::Hold => return p0.value,
        Curve::Linear => t,
        Curve::Exponential => t * t,
    };
    finite_or_zero(p0.value + (p1.value - p0.value) * shaped)
}

/// Query the pattern attached to this key for the current block. The output
/// buffer receives the number of events found.
pub fn pat_query(ctx: &mut OpContext, inst: &Instruction) {
    let window = ctx.timing.block_beats();
    let mut count = 0.0;
    if let Ok(state) = ctx.states.get_or_create::<PatternState>(inst.key) {
        if state.window != Some(window) {
            refresh_events(state, window);
        }
        count = state.events.len() as f32;
    }
    ctx.output(inst).fill(count);
}

/// Step the queried pattern events through the block. Same outputs as
/// [`seq_step`].
pub fn pat_step(ctx: &mut OpContext, inst: &Instruction) {
    let mut outs = StepOutputs::default();
    if let Ok(state) = ctx.states.get_or_create::<PatternState>(inst.key) {
        step_events(state, ctx.timing, &mut outs);
    }
    write_step_outputs(ctx, inst, &outs);
}

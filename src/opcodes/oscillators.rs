//! Naive (non-band-limited) oscillators sharing one phase accumulator.
//!
//! Inputs for every shape:
//! - `in0`: frequency in Hz
//! - `in1`: phase the oscillator restarts at, in cycles (optional)
//! - `in2`: reset trigger; a rising edge through zero restarts the phase
//!   (optional)

use super::{finite_or_zero, OpContext};
use crate::buffer_pool::Block;
use crate::constants::{BLOCK_SIZE, TWO_PI};
use crate::dsp_state::OscState;
use crate::instruction::Instruction;

#[inline]
fn wrap_phase(phase: f32) -> f32 {
    let wrapped = phase - phase.floor();
    if wrapped.is_finite() && wrapped < 1.0 {
        wrapped
    } else {
        0.0
    }
}

fn run_oscillator(ctx: &mut OpContext, inst: &Instruction, shape: impl Fn(f32) -> f32) {
    let freq = ctx.input(inst, 0);
    let restart_phase = ctx.input(inst, 1);
    let trigger = ctx.input(inst, 2);
    let inv_sample_rate = ctx.timing.inv_sample_rate();
    let block = ctx.timing.block_counter;

    let mut out = Block::ZERO;
    if let Ok(state) = ctx.states.get_or_create::<OscState>(inst.key) {
        if state.entry_block == Some(block) {
            state.phase = state.entry_phase;
            state.prev_trigger = state.entry_trigger;
        } else {
            state.entry_block = Some(block);
            state.entry_phase = state.phase;
            state.entry_trigger = state.prev_trigger;
        }

        for i in 0..BLOCK_SIZE {
            if state.prev_trigger <= 0.0 && trigger[i] > 0.0 {
                state.phase = wrap_phase(restart_phase[i]);
            }
            state.prev_trigger = trigger[i];
            out[i] = finite_or_zero(shape(state.phase));
            state.phase = wrap_phase(state.phase + freq[i] * inv_sample_rate);
        }
    }
    ctx.write(inst.out, &out);
}

pub fn osc_sin(ctx: &mut OpContext, inst: &Instruction) {
    run_oscillator(ctx, inst, |p| (p * TWO_PI).sin());
}

/// Peaks at phase 0, troughs at phase 0.5.
pub fn osc_tri(ctx: &mut OpContext, inst: &Instruction) {
    run_oscillator(ctx, inst, |p| 4.0 * (p - 0.5).abs() - 1.0);
}

pub fn osc_saw(ctx: &mut OpContext, inst: &Instruction) {
    run_oscillator(ctx, inst, |p| 2.0 * p - 1.0);
}

pub fn osc_sqr(ctx: &mut OpContext, inst: &Instruction) {
    run_oscillator(ctx, inst, |p| if p < 0.5 { 1.0 } else { -1.0 });
}

/// Falling saw.
pub fn osc_ramp(ctx: &mut OpContext, inst: &Instruction) {
    run_oscillator(ctx, inst, |p| 1.0 - 2.0 * p);
}

/// Raw phase in `[0, 1)`.
pub fn osc_phasor(ctx: &mut OpContext, inst: &Instruction) {
    run_oscillator(ctx, inst, |p| p);
}

//! Opcode implementations
//!
//! Every opcode is a plain function `fn(&mut OpContext, &Instruction)` that
//! processes one whole block. [`execute`] dispatches on the opcode with a
//! single `match`, which the compiler lowers to a jump table.
//!
//! # Contract
//!
//! - Inputs are read from the buffer pool by index; an unused input reads as
//!   silence.
//! - Each opcode writes exactly one output buffer, except `OUTPUT` (which
//!   accumulates into the stereo pair) and the stepping opcodes (which also
//!   write their velocity and trigger buffers, named by `inputs[0]` and
//!   `inputs[1]`).
//! - No opcode fails. Numeric edge cases are absorbed locally: division by
//!   zero, the log of a non-positive number and any non-finite result all
//!   produce 0.0. A stateful opcode whose state cannot be allocated writes
//!   silence.
//! - `NOP` and reserved opcode bytes do nothing.
//!
//! # Categories
//!
//! - [`arithmetic`]: constants, copy, add/sub/mul/div/pow/neg
//! - [`math`]: abs, sqrt, log, exp, min, max, clamp, wrap, floor, ceil
//! - [`oscillators`]: sin, tri, saw, sqr, ramp, phasor
//! - [`utility`]: output, noise, mtof, dc, slew, sample-and-hold, parameters
//! - [`sequencing`]: clock, LFO, step tables, euclid, trigger, timeline,
//!   pattern query and step

pub mod arithmetic;
pub mod math;
pub mod oscillators;
pub mod sequencing;
pub mod utility;

use crate::buffer_pool::{Block, BufferPool};
use crate::constants::BLOCK_SIZE;
use crate::context::ExecutionContext;
use crate::instruction::{Instruction, Opcode};
use crate::params::ParamChannel;
use crate::state_pool::StatePool;

/// Everything an opcode may touch while processing one block.
pub struct OpContext<'a> {
    pub buffers: &'a mut BufferPool,
    pub states: &'a mut StatePool,
    pub params: &'a ParamChannel,
    pub timing: &'a ExecutionContext,
    pub out_left: &'a mut [f32; BLOCK_SIZE],
    pub out_right: &'a mut [f32; BLOCK_SIZE],
}

impl OpContext<'_> {
    /// Copy of the block feeding input `slot`.
    #[inline]
    pub fn input(&self, inst: &Instruction, slot: usize) -> Block {
        *self.buffers.get(inst.input(slot))
    }

    /// Copy of input `slot`, or a block of `default` when the slot is unused.
    #[inline]
    pub fn input_or(&self, inst: &Instruction, slot: usize, default: f32) -> Block {
        if inst.has_input(slot) {
            self.input(inst, slot)
        } else {
            Block::splat(default)
        }
    }

    #[inline]
    pub fn output(&mut self, inst: &Instruction) -> &mut Block {
        self.buffers.get_mut(inst.out)
    }

    pub fn write(&mut self, index: u16, block: &Block) {
        *self.buffers.get_mut(index) = *block;
    }
}

/// Replace NaN and infinities with 0.0.
#[inline]
pub fn finite_or_zero(x: f32) -> f32 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// `out[i] = f(in0[i])`
#[inline]
pub(crate) fn unary(ctx: &mut OpContext, inst: &Instruction, f: impl Fn(f32) -> f32) {
    let a = ctx.input(inst, 0);
    for (o, &x) in ctx.output(inst).iter_mut().zip(a.iter()) {
        *o = finite_or_zero(f(x));
    }
}

/// `out[i] = f(in0[i], in1[i])`
#[inline]
pub(crate) fn binary(ctx: &mut OpContext, inst: &Instruction, f: impl Fn(f32, f32) -> f32) {
    let a = ctx.input(inst, 0);
    let b = ctx.input(inst, 1);
    let out = ctx.output(inst);
    for i in 0..BLOCK_SIZE {
        out[i] = finite_or_zero(f(a[i], b[i]));
    }
}

/// `out[i] = f(in0[i], in1[i], in2[i])`
#[inline]
pub(crate) fn ternary(ctx: &mut OpContext, inst: &Instruction, f: impl Fn(f32, f32, f32) -> f32) {
    let a = ctx.input(inst, 0);
    let b = ctx.input(inst, 1);
    let c = ctx.input(inst, 2);
    let out = ctx.output(inst);
    for i in 0..BLOCK_SIZE {
        out[i] = finite_or_zero(f(a[i], b[i], c[i]));
    }
}

/// Run one instruction over the current block.
pub fn execute(ctx: &mut OpContext, inst: &Instruction) {
    use Opcode::*;
    match inst.opcode {
        Nop | Reserved(_) => {}

        PushConst => arithmetic::push_const(ctx, inst),
        Copy => arithmetic::copy(ctx, inst),
        Add => arithmetic::add(ctx, inst),
        Sub => arithmetic::sub(ctx, inst),
        Mul => arithmetic::mul(ctx, inst),
        Div => arithmetic::div(ctx, inst),
        Pow => arithmetic::pow(ctx, inst),
        Neg => arithmetic::neg(ctx, inst),

        OscSin => oscillators::osc_sin(ctx, inst),
        OscTri => oscillators::osc_tri(ctx, inst),
        OscSaw => oscillators::osc_saw(ctx, inst),
        OscSqr => oscillators::osc_sqr(ctx, inst),
        OscRamp => oscillators::osc_ramp(ctx, inst),
        OscPhasor => oscillators::osc_phasor(ctx, inst),

        Abs => math::abs(ctx, inst),
        Sqrt => math::sqrt(ctx, inst),
        Log => math::log(ctx, inst),
        Exp => math::exp(ctx, inst),
        Min => math::min(ctx, inst),
        Max => math::max(ctx, inst),
        Clamp => math::clamp(ctx, inst),
        Wrap => math::wrap(ctx, inst),
        Floor => math::floor(ctx, inst),
        Ceil => math::ceil(ctx, inst),

        Output => utility::output(ctx, inst),
        Noise => utility::noise(ctx, inst),
        Mtof => utility::mtof(ctx, inst),
        Dc => utility::dc(ctx, inst),
        Slew => utility::slew(ctx, inst),
        Sah => utility::sah(ctx, inst),
        EnvGet => utility::env_get(ctx, inst),

        Clock => sequencing::clock(ctx, inst),
        Lfo => sequencing::lfo(ctx, inst),
        SeqStep => sequencing::seq_step(ctx, inst),
        Euclid => sequencing::euclid(ctx, inst),
        Trigger => sequencing::trigger(ctx, inst),
        Timeline => sequencing::timeline(ctx, inst),
        PatQuery => sequencing::pat_query(ctx, inst),
        PatStep => sequencing::pat_step(ctx, inst),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::Rig;
    use super::*;

    #[test]
    fn test_reserved_opcode_is_a_noop() {
        let mut rig = Rig::new();
        rig.buffers.fill(0, 3.0);
        rig.run(Instruction::new(Opcode::Reserved(200), 0, &[1]));
        rig.run(Instruction::new(Opcode::Nop, 0, &[1]));
        assert!(rig.buf(0).iter().all(|&s| s == 3.0));
    }

    #[test]
    fn test_unused_input_reads_silence() {
        let mut rig = Rig::new();
        rig.buffers.fill(1, 2.0);
        rig.run(Instruction::new(Opcode::Add, 0, &[1]));
        assert!(rig.buf(0).iter().all(|&s| s == 2.0));
    }

    #[test]
    fn test_finite_or_zero() {
        assert_eq!(finite_or_zero(f32::NAN), 0.0);
        assert_eq!(finite_or_zero(f32::NEG_INFINITY), 0.0);
        assert_eq!(finite_or_zero(-1.5), -1.5);
    }
}

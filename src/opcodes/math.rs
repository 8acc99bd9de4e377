//! Elementwise math. Domain errors resolve to 0 (`sqrt` of a negative is 0,
//! `log` of a non-positive is 0) and `exp` saturates instead of overflowing.

use super::{binary, ternary, unary, OpContext};
use crate::instruction::Instruction;

/// Largest argument whose exponential still fits in an `f32`.
const EXP_LIMIT: f32 = 87.0;

pub fn abs(ctx: &mut OpContext, inst: &Instruction) {
    unary(ctx, inst, f32::abs);
}

pub fn sqrt(ctx: &mut OpContext, inst: &Instruction) {
    unary(ctx, inst, |a| a.max(0.0).sqrt());
}

pub fn log(ctx: &mut OpContext, inst: &Instruction) {
    unary(ctx, inst, |a| if a > 0.0 { a.ln() } else { 0.0 });
}

pub fn exp(ctx: &mut OpContext, inst: &Instruction) {
    unary(ctx, inst, |a| a.clamp(-EXP_LIMIT, EXP_LIMIT).exp());
}

pub fn min(ctx: &mut OpContext, inst: &Instruction) {
    binary(ctx, inst, f32::min);
}

pub fn max(ctx: &mut OpContext, inst: &Instruction) {
    binary(ctx, inst, f32::max);
}

/// `clamp(in0, in1, in2)`. Reversed bounds are swapped rather than rejected.
pub fn clamp(ctx: &mut OpContext, inst: &Instruction) {
    ternary(ctx, inst, |x, lo, hi| {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        x.max(lo).min(hi)
    });
}

/// Wrap `in0` into `[in1, in2)`. An empty range yields the lower bound.
pub fn wrap(ctx: &mut OpContext, inst: &Instruction) {
    ternary(ctx, inst, |x, lo, hi| {
        let range = hi - lo;
        if range > 0.0 {
            let v = x - lo;
            lo + v - range * (v / range).floor()
        } else {
            lo
        }
    });
}

pub fn floor(ctx: &mut OpContext, inst: &Instruction) {
    unary(ctx, inst, f32::floor);
}

pub fn ceil(ctx: &mut OpContext, inst: &Instruction) {
    unary(ctx, inst, f32::ceil);
}
